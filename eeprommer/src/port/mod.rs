//! Port abstraction for the programmer's serial link.
//!
//! The protocol engine only talks to the [`Port`] trait, so it can be driven
//! by a real serial port or by an in-memory simulation in tests.
//!
//! ```text
//! +------------------+
//! |  Programmer      |   frames, payloads, ack polling
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   Port Trait     |   read_byte / read_exact_bytes / read_line / clear_input
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | NativePort       |
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use eeprommer::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> eeprommer::Result<()> {
//!     port.clear_input()?;
//!     port.write_all_bytes(b"V 00000000 00000000 00\n")?;
//!     let ack = port.read_byte()?;
//!     println!("ack: {ack:#04x}");
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default baud rate of the programmer firmware.
pub const DEFAULT_BAUD: u32 = 460_800;

/// Default read timeout.
///
/// Large dumps and writes legitimately take minutes, so a single blocking
/// read is allowed to wait this long.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1200);

/// Default delay after opening the port. The programmer board resets when
/// the port is opened and ignores input until its firmware is up.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Delay after opening before the first frame is sent.
    pub settle_delay: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Byte-oriented, timeout-bounded, half-duplex channel to the programmer.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Discard any bytes waiting in the input buffer.
    fn clear_input(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }

    /// Read a single byte.
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        match self.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(Error::Timeout("read_byte: no data".into())),
            Err(e) => Err(map_read_error(e, "read_byte")),
        }
    }

    /// Read exactly `len` bytes.
    fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::Timeout(format!(
                        "received {filled} of {len} bytes"
                    )));
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(Error::Timeout(format!(
                        "received {filled} of {len} bytes"
                    )));
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(buf)
    }

    /// Read one `\n`-terminated line, without the line terminator.
    fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

fn map_read_error(e: io::Error, what: &str) -> Error {
    if e.kind() == io::ErrorKind::TimedOut {
        Error::Timeout(format!("{what}: timeout"))
    } else {
        Error::Io(e)
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
