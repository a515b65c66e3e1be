//! Wire protocol of the programmer firmware.

pub mod frame;

/// Acknowledgement bytes sent by the firmware.
///
/// The expected value depends on the operation; they are not interchangeable.
pub mod ack {
    /// Sent after a written block is committed and after unlock.
    pub const BLOCK_DONE: u8 = b'%';
    /// Trailer after a bulk read.
    pub const BULK_END: u8 = 0x00;
    /// Precedes the version payload.
    pub const VERSION: u8 = b'E';
}

// Re-export common types
pub use frame::{Command, CommandFrame, encode};
