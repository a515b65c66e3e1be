//! Request and report types exchanged with the [`Programmer`](super::Programmer).

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Bytes in one unit of the `kbytes` count.
pub const KIB: u64 = 1024;

/// Operations the programmer can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// ASCII hex dump to the caller.
    Read,
    /// Binary dump to a sink.
    Dump,
    /// Compare device contents with a source.
    Verify,
    /// Write (paged or not) from a source.
    Write,
    /// Disable software data protection.
    Unlock,
    /// Query the firmware version.
    Version,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Dump => "dump",
            Self::Verify => "verify",
            Self::Write => "write",
            Self::Unlock => "unlock",
            Self::Version => "version",
        };
        f.write_str(name)
    }
}

/// What to do when an operation receives the wrong ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Log a warning, report it, and carry on.
    Warn,
    /// Abort the operation: [`Error::Ack`] for a wrong byte, or
    /// [`Error::Timeout`] when a write block is never acknowledged.
    Fail,
}

impl AckPolicy {
    /// Policy table.
    ///
    /// Reads tolerate a bad trailer since the payload has already arrived.
    /// Write blocks are polled for `%` and fail at the poll deadline.
    pub fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::Read | Operation::Dump | Operation::Verify => Self::Warn,
            Operation::Write | Operation::Unlock | Operation::Version => Self::Fail,
        }
    }
}

/// How a write addresses the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// One byte at a time.
    #[default]
    Unpaged,
    /// Let the device buffer whole pages of the given size.
    Paged {
        /// Page size in bytes (32 for CAT28C*, 64 for AT28C*/X28C*).
        page_size: u16,
    },
}

impl WriteMode {
    /// Default page size when none is configured.
    pub const DEFAULT_PAGE_SIZE: u16 = 32;

    /// Page size to put in the write frame, `None` for unpaged writes.
    pub fn page_size(self) -> Option<u16> {
        match self {
            Self::Unpaged => None,
            Self::Paged { page_size } => Some(page_size),
        }
    }
}

/// One fully parsed request, built once by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationRequest {
    /// First EEPROM address.
    pub address: u64,
    /// Offset into the source image (write and verify).
    pub offset: u64,
    /// Number of KiB to transfer.
    pub kbytes: u32,
    /// Write addressing mode.
    pub write_mode: WriteMode,
}

impl Default for OperationRequest {
    fn default() -> Self {
        Self {
            address: 0,
            offset: 0,
            kbytes: 512,
            write_mode: WriteMode::Unpaged,
        }
    }
}

impl OperationRequest {
    /// Create a request for `kbytes` KiB at `address`.
    pub fn new(address: u64, kbytes: u32) -> Self {
        Self {
            address,
            kbytes,
            ..Default::default()
        }
    }

    /// Set the source offset.
    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Set the write mode.
    #[must_use]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Total byte count.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.kbytes) * KIB
    }

    pub(crate) fn byte_len_usize(&self) -> Result<usize> {
        usize::try_from(self.byte_len()).map_err(|_| {
            Error::Config(format!(
                "{} KiB does not fit in memory on this platform",
                self.kbytes
            ))
        })
    }
}

/// Result of checking a single ack byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCheck {
    /// The expected byte arrived.
    Matched,
    /// Some other byte arrived.
    Unexpected(u8),
    /// Nothing arrived before the timeout.
    Missing,
}

impl AckCheck {
    /// Whether the expected byte arrived.
    pub fn is_matched(self) -> bool {
        matches!(self, Self::Matched)
    }

    /// The wrong byte, if one was received.
    pub fn received(self) -> Option<u8> {
        match self {
            Self::Unexpected(b) => Some(b),
            Self::Matched | Self::Missing => None,
        }
    }
}

impl fmt::Display for AckCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matched => f.write_str("ack received"),
            Self::Unexpected(b) => write!(f, "unexpected byte {b:#04x}"),
            Self::Missing => f.write_str("no ack received"),
        }
    }
}

/// Outcome of a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpReport {
    /// Bytes read and stored.
    pub bytes: usize,
    /// Trailing ack after the payload.
    pub trailer: AckCheck,
}

/// Comparison result of a verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Device and source are identical.
    Equal,
    /// Number of differing byte positions.
    NotEqual(usize),
}

impl VerifyOutcome {
    /// Compare two buffers position by position.
    ///
    /// Bytes present in only one buffer count as differences.
    pub fn compare(expected: &[u8], actual: &[u8]) -> Self {
        let differing = expected
            .iter()
            .zip(actual)
            .filter(|(a, b)| a != b)
            .count()
            + expected
                .len()
                .abs_diff(actual.len());
        if differing == 0 {
            Self::Equal
        } else {
            Self::NotEqual(differing)
        }
    }

    /// Whether the contents matched.
    pub fn is_equal(self) -> bool {
        matches!(self, Self::Equal)
    }

    /// Turn a mismatch into [`Error::Mismatch`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Equal => Ok(()),
            Self::NotEqual(count) => Err(Error::Mismatch { count }),
        }
    }
}

/// Outcome of a verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    /// Comparison result.
    pub outcome: VerifyOutcome,
    /// Trailing ack after the payload.
    pub trailer: AckCheck,
}

/// Outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    /// Bytes written.
    pub bytes: usize,
    /// Acknowledged 256-byte blocks.
    pub blocks: usize,
    /// Wall-clock duration of the write.
    pub elapsed: Duration,
}

/// The five opaque bytes returned by the version command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion(pub [u8; 5]);

impl FirmwareVersion {
    /// Raw bytes as received.
    pub fn as_bytes(&self) -> &[u8; 5] {
        &self.0
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", char::from(b))?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}
