//! # eeprommer
//!
//! Host-side driver for MEEPROMMER-style serial EEPROM programmers.
//!
//! The programmer firmware accepts one ASCII command line per operation and
//! answers with raw bytes, hex text or single-byte acknowledgements. This
//! crate provides:
//!
//! - Command frame encoding (`"<verb> <8 hex> <8 hex> <2 hex>\n"`)
//! - Binary dump, verify, ASCII read, plain and paged write
//! - Software data protection unlock and firmware version query
//! - Deadline-bounded polling for per-block write acknowledgements
//!
//! ## Supported Chips
//!
//! - 28C-series parallel EEPROMs (AT28C*, CAT28C*, X28C*) behind the
//!   MEEPROMMER board
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use eeprommer::{FileSource, OperationRequest, Programmer, SerialConfig, WriteMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut programmer = Programmer::open(&SerialConfig::new("/dev/ttyUSB0", 460_800))?;
//!         programmer.unlock()?;
//!
//!         let request = OperationRequest::new(0x0000, 32)
//!             .with_write_mode(WriteMode::Paged { page_size: 64 });
//!         let mut image = FileSource::open("rom.bin")?;
//!         let report = programmer.write(&request, Some(&mut image), |done, total| {
//!             println!("Writing: {done}/{total}");
//!         })?;
//!         println!("{} blocks in {:?}", report.blocks, report.elapsed);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod error;
pub mod port;
pub mod programmer;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    buffer::{FileSink, FileSource, MemorySink, MemorySource, Sink, Source},
    error::{Error, Result},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    programmer::{
        AckCheck, AckPolicy, AckPollConfig, AsciiLines, DumpReport, FirmwareVersion, Operation,
        OperationRequest, Programmer, VerifyOutcome, VerifyReport, WriteMode, WriteReport,
    },
    protocol::{Command, CommandFrame},
};
