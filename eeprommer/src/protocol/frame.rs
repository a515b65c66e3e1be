//! Programmer command frames.
//!
//! Every request is a single ASCII line:
//!
//! ```text
//! +------+---+----------+---+----------+---+---------+----+
//! | verb | ' '| field1  | ' '| field2  | ' '| trailer | \n |
//! +------+---+----------+---+----------+---+---------+----+
//! |  1   | 1 | 8 hex    | 1 | 8 hex    | 1 | 2 hex   | 1  |
//! +------+---+----------+---+----------+---+---------+----+
//! ```
//!
//! Hex digits are lowercase and zero padded. The trailer is the line width
//! (`10`) for reads, the page size (or `00`) for writes and `00` otherwise.

use crate::error::{Error, Result};

/// Width of the two numeric fields, in hex digits.
pub const FIELD_DIGITS: usize = 8;

/// Width of the trailing field, in hex digits.
pub const TRAILER_DIGITS: usize = 2;

/// Bytes per row the device uses for reads.
pub const LINE_WIDTH: u8 = 0x10;

/// Payload size of one write block.
pub const WRITE_BLOCK_SIZE: usize = 256;

/// Programmer command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read as an ASCII hex dump.
    Read,
    /// Write one 256-byte block.
    Write,
    /// Bulk binary read.
    Bulk,
    /// Unlock the chip's software data protection.
    Unlock,
    /// Query the firmware version.
    Version,
}

impl Command {
    /// The ASCII verb sent on the wire.
    pub fn verb(self) -> u8 {
        match self {
            Self::Read => b'R',
            Self::Write => b'W',
            Self::Bulk => b'B',
            Self::Unlock => b'U',
            Self::Version => b'V',
        }
    }
}

/// A validated command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    cmd: Command,
    field1: u32,
    field2: u32,
    trailer: u8,
}

impl CommandFrame {
    /// Create a frame, rejecting values that do not fit their field width.
    pub fn new(cmd: Command, field1: u64, field2: u64, trailer: u64) -> Result<Self> {
        Ok(Self {
            cmd,
            field1: fit("field1", field1)?,
            field2: fit("field2", field2)?,
            trailer: u8::try_from(trailer).map_err(|_| Error::FieldOverflow {
                field: "trailer",
                value: trailer,
                digits: TRAILER_DIGITS,
            })?,
        })
    }

    /// `B <address> <len> 10`: bulk binary read of `len` bytes.
    pub fn bulk_read(address: u64, len: u64) -> Result<Self> {
        Self::new(Command::Bulk, address, len, u64::from(LINE_WIDTH))
    }

    /// `R <start> <end> 10`: ASCII dump of `start..end`.
    pub fn ascii_read(start: u64, end: u64) -> Result<Self> {
        Self::new(Command::Read, start, end, u64::from(LINE_WIDTH))
    }

    /// `W <address> 00000100 <page size or 00>`: write one 256-byte block.
    pub fn write_block(address: u64, page_size: Option<u16>) -> Result<Self> {
        Self::new(
            Command::Write,
            address,
            WRITE_BLOCK_SIZE as u64,
            page_size.map_or(0, u64::from),
        )
    }

    /// `U 00000000 00000000 00`.
    pub fn unlock() -> Self {
        Self::fixed(Command::Unlock)
    }

    /// `V 00000000 00000000 00`.
    pub fn version() -> Self {
        Self::fixed(Command::Version)
    }

    fn fixed(cmd: Command) -> Self {
        Self {
            cmd,
            field1: 0,
            field2: 0,
            trailer: 0,
        }
    }

    /// Render the frame as ASCII bytes, newline included.
    pub fn build(&self) -> Vec<u8> {
        format!(
            "{} {:08x} {:08x} {:02x}\n",
            char::from(self.cmd.verb()),
            self.field1,
            self.field2,
            self.trailer
        )
        .into_bytes()
    }

    /// Get the command type.
    pub fn command(&self) -> Command {
        self.cmd
    }
}

/// Encode a frame in one step.
pub fn encode(cmd: Command, field1: u64, field2: u64, trailer: u64) -> Result<Vec<u8>> {
    Ok(CommandFrame::new(cmd, field1, field2, trailer)?.build())
}

fn fit(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::FieldOverflow {
        field,
        value,
        digits: FIELD_DIGITS,
    })
}
