//! Protocol engine for the programmer.
//!
//! Every operation follows the same shape:
//!
//! ```text
//! Idle -> FrameSent -> (PayloadTransfer)* -> AckAwaited -> Success | Failed
//! ```
//!
//! Only writes repeat the `PayloadTransfer -> AckAwaited` cycle, once per
//! 256-byte block. Each operation drains its whole response before it
//! returns; on failure, pending input is discarded so the next frame starts
//! on a clean line.
//!
//! ## Example
//!
//! ```rust,no_run
//! use eeprommer::{FileSink, OperationRequest, Programmer, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut programmer = Programmer::open(&SerialConfig::new("/dev/ttyUSB0", 460_800))?;
//!
//!     let request = OperationRequest::new(0x0000, 32);
//!     let mut sink = FileSink::new("chip.bin");
//!     let report = programmer.dump(&request, Some(&mut sink), |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     println!("dumped {} bytes ({})", report.bytes, report.trailer);
//!
//!     Ok(())
//! }
//! ```

pub mod request;

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

pub use request::{
    AckCheck, AckPolicy, DumpReport, FirmwareVersion, KIB, Operation, OperationRequest,
    VerifyOutcome, VerifyReport, WriteMode, WriteReport,
};

use crate::buffer::{Sink, Source};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::ack;
use crate::protocol::frame::{CommandFrame, LINE_WIDTH, WRITE_BLOCK_SIZE};

/// Chunk size for bulk reads, so progress can be reported.
const READ_CHUNK: usize = 1024;

/// Timing of the per-block write acknowledgement poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPollConfig {
    /// Pause between read attempts.
    pub interval: Duration,
    /// Give up on a block after this long.
    pub timeout: Duration,
    /// Port timeout for a single read attempt while polling.
    pub read_timeout: Duration,
}

impl Default for AckPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Host-side driver for the programmer.
///
/// Owns the port for its whole lifetime and closes it when dropped.
pub struct Programmer<P: Port> {
    port: P,
    ack_poll: AckPollConfig,
}

impl<P: Port> Programmer<P> {
    /// Create a programmer on an already opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            ack_poll: AckPollConfig::default(),
        }
    }

    /// Set the write acknowledgement poll timing.
    #[must_use]
    pub fn with_ack_poll(mut self, ack_poll: AckPollConfig) -> Self {
        self.ack_poll = ack_poll;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Binary dump of the requested region into `sink`.
    ///
    /// A wrong or missing trailer is reported in [`DumpReport::trailer`],
    /// not as an error.
    pub fn dump<F>(
        &mut self,
        request: &OperationRequest,
        sink: Option<&mut dyn Sink>,
        mut progress: F,
    ) -> Result<DumpReport>
    where
        F: FnMut(usize, usize),
    {
        let sink = sink.ok_or_else(|| Error::Config("dump needs a destination".into()))?;
        let result = self.try_dump(request, sink, &mut progress);
        self.settle(result)
    }

    fn try_dump(
        &mut self,
        request: &OperationRequest,
        sink: &mut dyn Sink,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<DumpReport> {
        let len = request.byte_len_usize()?;
        info!("Dumping {len} bytes from 0x{:08x}", request.address);

        let frame = CommandFrame::bulk_read(request.address, request.byte_len())?;
        self.send_command(&frame)?;

        let data = self.read_payload(len, progress)?;
        let trailer = self.check_ack(Operation::Dump, ack::BULK_END)?;

        sink.write_all(&data)?;
        Ok(DumpReport {
            bytes: data.len(),
            trailer,
        })
    }

    /// Compare the requested region with `source` read at `request.offset`.
    pub fn verify<F>(
        &mut self,
        request: &OperationRequest,
        source: Option<&mut dyn Source>,
        mut progress: F,
    ) -> Result<VerifyReport>
    where
        F: FnMut(usize, usize),
    {
        let source =
            source.ok_or_else(|| Error::Config("verify needs a source image".into()))?;
        let result = self.try_verify(request, source, &mut progress);
        self.settle(result)
    }

    fn try_verify(
        &mut self,
        request: &OperationRequest,
        source: &mut dyn Source,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<VerifyReport> {
        let len = request.byte_len_usize()?;
        info!(
            "Verifying {len} bytes at 0x{:08x} against source offset 0x{:x}",
            request.address, request.offset
        );

        let expected = source.read_at(request.offset, len)?;

        let frame = CommandFrame::bulk_read(request.address, request.byte_len())?;
        self.send_command(&frame)?;

        let actual = self.read_payload(len, progress)?;
        let trailer = self.check_ack(Operation::Verify, ack::BULK_END)?;

        let outcome = VerifyOutcome::compare(&expected, &actual);
        match outcome {
            VerifyOutcome::Equal => info!("Ok"),
            VerifyOutcome::NotEqual(count) => info!("Not equal: {count} differences found"),
        }

        Ok(VerifyReport { outcome, trailer })
    }

    /// ASCII dump of the requested region, one 16-byte row per line.
    ///
    /// The returned iterator reads lines lazily from the port and yields
    /// exactly `ceil(len / 16)` of them.
    pub fn read_ascii(&mut self, request: &OperationRequest) -> Result<AsciiLines<'_, P>> {
        let result = self.try_read_ascii(request);
        let remaining = self.settle(result)?;
        Ok(AsciiLines {
            programmer: self,
            remaining,
            failed: false,
        })
    }

    fn try_read_ascii(&mut self, request: &OperationRequest) -> Result<u64> {
        let len = request.byte_len();
        let end = request
            .address
            .checked_add(len)
            .ok_or_else(|| Error::Config("read range overflows the address space".into()))?;

        let frame = CommandFrame::ascii_read(request.address, end)?;
        self.send_command(&frame)?;

        // The firmware starts its reply with an empty line
        let leading = self.port.read_line()?;
        if !leading.trim().is_empty() {
            apply_policy(Operation::Read, AckCheck::Unexpected(leading.as_bytes()[0]), b'\n')?;
        }

        Ok(len.div_ceil(u64::from(LINE_WIDTH)))
    }

    /// Write the requested region from `source`, one 256-byte block at a time.
    ///
    /// Every block must be acknowledged with `%` within
    /// [`AckPollConfig::timeout`].
    pub fn write<F>(
        &mut self,
        request: &OperationRequest,
        source: Option<&mut dyn Source>,
        mut progress: F,
    ) -> Result<WriteReport>
    where
        F: FnMut(usize, usize),
    {
        let source = source.ok_or_else(|| Error::Config("write needs a source image".into()))?;
        let result = self.try_write(request, source, &mut progress);
        self.settle(result)
    }

    fn try_write(
        &mut self,
        request: &OperationRequest,
        source: &mut dyn Source,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<WriteReport> {
        let len = request.byte_len_usize()?;
        let blocks = len / WRITE_BLOCK_SIZE;
        let page_size = request.write_mode.page_size();
        request
            .address
            .checked_add(len as u64)
            .ok_or_else(|| Error::Config("write range overflows the address space".into()))?;
        if blocks > 0 {
            // Reject the range before the first frame goes out
            let last = request.address + ((blocks - 1) * WRITE_BLOCK_SIZE) as u64;
            CommandFrame::write_block(last, page_size)?;
        }
        match page_size {
            Some(size) => info!("Writing {len} bytes with {size}-byte pages"),
            None => info!("Writing {len} bytes"),
        }

        let start = Instant::now();
        for block in 0..blocks {
            let offset = block * WRITE_BLOCK_SIZE;
            let address = request.address + offset as u64;
            let frame = CommandFrame::write_block(address, page_size)?;
            let data = source.read_at(request.offset + offset as u64, WRITE_BLOCK_SIZE)?;

            debug!(
                "Writing from {:08x} to {:08x}",
                address,
                address + WRITE_BLOCK_SIZE as u64 - 1
            );
            self.send_command(&frame)?;
            self.port.clear_input()?;

            trace!("FrameSent -> PayloadTransfer ({} bytes)", data.len());
            self.port.write_all_bytes(&data)?;

            trace!("PayloadTransfer -> AckAwaited");
            self.wait_block_ack(address)?;
            progress(offset + WRITE_BLOCK_SIZE, len);
        }

        let elapsed = start.elapsed();
        info!(
            "Wrote {} bytes in {:.2} seconds",
            blocks * WRITE_BLOCK_SIZE,
            elapsed.as_secs_f64()
        );

        Ok(WriteReport {
            bytes: blocks * WRITE_BLOCK_SIZE,
            blocks,
            elapsed,
        })
    }

    /// Disable the chip's software data protection.
    pub fn unlock(&mut self) -> Result<()> {
        info!("Unlocking...");
        let result = self
            .send_command(&CommandFrame::unlock())
            .and_then(|()| self.check_ack(Operation::Unlock, ack::BLOCK_DONE))
            .map(|_| ());
        self.settle(result)
    }

    /// Query the firmware version.
    pub fn version(&mut self) -> Result<FirmwareVersion> {
        let result = self.try_version();
        self.settle(result)
    }

    fn try_version(&mut self) -> Result<FirmwareVersion> {
        self.send_command(&CommandFrame::version())?;
        self.check_ack(Operation::Version, ack::VERSION)?;

        let payload = self.port.read_exact_bytes(5)?;
        let mut raw = [0u8; 5];
        raw.copy_from_slice(&payload);
        debug!("Firmware version bytes: {raw:02x?}");
        Ok(FirmwareVersion(raw))
    }

    /// Clear stale input, then send a command frame.
    fn send_command(&mut self, frame: &CommandFrame) -> Result<()> {
        self.port.clear_input()?;

        let data = frame.build();
        debug!(
            "Sending {} on {}",
            String::from_utf8_lossy(&data).trim_end(),
            self.port.name()
        );
        self.port.write_all_bytes(&data)?;

        trace!("Idle -> FrameSent ({:?})", frame.command());
        Ok(())
    }

    /// Read exactly `len` payload bytes, reporting progress per chunk.
    fn read_payload(
        &mut self,
        len: usize,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<u8>> {
        trace!("FrameSent -> PayloadTransfer ({len} bytes)");
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            let chunk = READ_CHUNK.min(len - data.len());
            let bytes = self.port.read_exact_bytes(chunk).map_err(|e| match e {
                Error::Timeout(msg) => Error::Timeout(format!(
                    "payload stalled after {} of {len} bytes ({msg})",
                    data.len()
                )),
                other => other,
            })?;
            data.extend_from_slice(&bytes);
            progress(data.len(), len);
        }
        Ok(data)
    }

    /// Read one ack byte and apply the operation's policy to it.
    fn check_ack(&mut self, operation: Operation, expected: u8) -> Result<AckCheck> {
        trace!("PayloadTransfer -> AckAwaited ({operation})");
        let check = match self.port.read_byte() {
            Ok(b) if b == expected => AckCheck::Matched,
            Ok(b) => AckCheck::Unexpected(b),
            Err(Error::Timeout(_)) => AckCheck::Missing,
            Err(e) => return Err(e),
        };
        apply_policy(operation, check, expected)?;
        Ok(check)
    }

    /// Poll for the `%` that follows a written block.
    fn wait_block_ack(&mut self, address: u64) -> Result<()> {
        let saved = self.port.timeout();
        self.port
            .set_timeout(self.ack_poll.read_timeout)?;
        let result = self.poll_block_ack(address);
        let restored = self.port.set_timeout(saved);
        result.and(restored)
    }

    fn poll_block_ack(&mut self, address: u64) -> Result<()> {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.port.read_byte() {
                Ok(ack::BLOCK_DONE) => {
                    trace!("AckAwaited -> Success (block 0x{address:08x}, {attempts} attempts)");
                    return Ok(());
                },
                Ok(other) => trace!("Ignoring 0x{other:02x} while waiting for block ack"),
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }

            if start.elapsed() >= self.ack_poll.timeout {
                let missed = format!(
                    "no ack for block at 0x{address:08x} after {:.2}s ({attempts} attempts)",
                    start
                        .elapsed()
                        .as_secs_f64()
                );
                return match AckPolicy::for_operation(Operation::Write) {
                    AckPolicy::Warn => {
                        warn!("Error: {missed}");
                        Ok(())
                    },
                    AckPolicy::Fail => Err(Error::Timeout(missed)),
                };
            }
            thread::sleep(self.ack_poll.interval);
        }
    }

    /// Discard pending input after a failure.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            debug!("Operation failed ({e}); discarding pending input");
            let _ = self.port.clear_input();
        }
        result
    }
}

/// Apply the operation's ack policy to a check result.
fn apply_policy(operation: Operation, check: AckCheck, expected: u8) -> Result<()> {
    if check.is_matched() {
        return Ok(());
    }
    match AckPolicy::for_operation(operation) {
        AckPolicy::Warn => {
            warn!("Error: no ack after {operation} ({check})");
            Ok(())
        },
        AckPolicy::Fail => Err(Error::Ack {
            operation,
            expected,
            actual: check.received(),
        }),
    }
}

impl<P: Port> Drop for Programmer<P> {
    fn drop(&mut self) {
        let _ = self.port.close();
    }
}

/// Lazy, finite sequence of ASCII dump lines.
///
/// Not restartable. Dropping it before the end discards whatever input is
/// already buffered.
pub struct AsciiLines<'a, P: Port> {
    programmer: &'a mut Programmer<P>,
    remaining: u64,
    failed: bool,
}

impl<P: Port> AsciiLines<'_, P> {
    /// Lines still to be read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<P: Port> Iterator for AsciiLines<'_, P> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }
        match self.programmer.port.read_line() {
            Ok(line) => {
                self.remaining -= 1;
                if self.remaining == 0 {
                    trace!("PayloadTransfer -> Success (read)");
                }
                Some(Ok(line))
            },
            Err(e) => {
                self.failed = true;
                Some(self.programmer.settle(Err(e)))
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (0, Some(n))
    }
}

impl<P: Port> Drop for AsciiLines<'_, P> {
    fn drop(&mut self) {
        if self.remaining > 0 && !self.failed {
            debug!("Read abandoned with {} lines pending", self.remaining);
            let _ = self.programmer.port.clear_input();
        }
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Programmer, Result};
    use crate::port::{NativePort, SerialConfig};

    impl Programmer<NativePort> {
        /// Open the serial port described by `config` and wrap it.
        pub fn open(config: &SerialConfig) -> Result<Self> {
            let port = NativePort::open(config)?;
            Ok(Self::new(port))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::buffer::{MemorySink, MemorySource};
    use crate::testing::{ScriptedPort, SimulatedDevice};

    fn init_logger() {
        let _ = env_logger::builder()
            .is_test(true)
            .try_init();
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i * 7 + i / 256) as u8)
            .collect()
    }

    fn fast_poll() -> AckPollConfig {
        AckPollConfig {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
            read_timeout: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_dump_sends_exact_frame() {
        init_logger();
        let mut device = SimulatedDevice::new(8 * 1024);
        device.memory_mut()[0x1000..0x1400].copy_from_slice(&pattern(1024));
        let mut programmer = Programmer::new(device);

        let mut sink = MemorySink::new();
        let request = OperationRequest::new(0x1000, 1);
        let report = programmer
            .dump(&request, Some(&mut sink), |_, _| {})
            .unwrap();

        assert_eq!(programmer.port().frames(), ["B 00001000 00000400 10"]);
        assert_eq!(report.bytes, 1024);
        assert_eq!(report.trailer, AckCheck::Matched);
        assert_eq!(sink.data(), pattern(1024).as_slice());
        assert_eq!(programmer.port().unread(), 0);
    }

    #[test]
    fn test_dump_reports_progress_per_chunk() {
        let mut programmer = Programmer::new(SimulatedDevice::new(4 * 1024));
        let mut sink = MemorySink::new();
        let mut calls = Vec::new();

        programmer
            .dump(&OperationRequest::new(0, 3), Some(&mut sink), |done, total| {
                calls.push((done, total));
            })
            .unwrap();

        assert_eq!(calls, [(1024, 3072), (2048, 3072), (3072, 3072)]);
    }

    #[test]
    fn test_dump_bad_trailer_is_a_warning() {
        let device = SimulatedDevice::new(1024).bulk_trailer(Some(0x55));
        let mut programmer = Programmer::new(device);
        let mut sink = MemorySink::new();

        let report = programmer
            .dump(&OperationRequest::new(0, 1), Some(&mut sink), |_, _| {})
            .unwrap();

        assert_eq!(report.trailer, AckCheck::Unexpected(0x55));
        assert_eq!(sink.data().len(), 1024);
    }

    #[test]
    fn test_dump_missing_trailer_is_a_warning() {
        let device = SimulatedDevice::new(1024).bulk_trailer(None);
        let mut programmer = Programmer::new(device);
        let mut sink = MemorySink::new();

        let report = programmer
            .dump(&OperationRequest::new(0, 1), Some(&mut sink), |_, _| {})
            .unwrap();

        assert_eq!(report.trailer, AckCheck::Missing);
    }

    #[test]
    fn test_dump_without_sink_is_config_error() {
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let result = programmer.dump(&OperationRequest::new(0, 1), None, |_, _| {});

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(programmer.port().frames().is_empty());
    }

    #[test]
    fn test_dump_short_payload_times_out() {
        // Device promises 1 KiB but only 10 bytes arrive
        let port = ScriptedPort::new(&[0xAA; 10]);
        let mut programmer = Programmer::new(port);
        let mut sink = MemorySink::new();

        let result = programmer.dump(&OperationRequest::new(0, 1), Some(&mut sink), |_, _| {});

        match result {
            Err(Error::Timeout(msg)) => assert!(msg.contains("0 of 1024"), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(sink.data().is_empty());
    }

    #[test]
    fn test_write_then_dump_round_trip() {
        init_logger();
        let image = pattern(2048);
        let mut programmer = Programmer::new(SimulatedDevice::new(8 * 1024));

        let request = OperationRequest::new(0x0800, 2);
        let mut source = MemorySource::new(image.clone());
        let report = programmer
            .write(&request, Some(&mut source), |_, _| {})
            .unwrap();
        assert_eq!(report.bytes, 2048);
        assert_eq!(report.blocks, 8);

        let mut sink = MemorySink::new();
        programmer
            .dump(&request, Some(&mut sink), |_, _| {})
            .unwrap();
        assert_eq!(sink.into_inner(), image);
    }

    #[test]
    fn test_write_frames_per_block() {
        let mut programmer = Programmer::new(SimulatedDevice::new(4 * 1024));
        let request =
            OperationRequest::new(0x0400, 1).with_write_mode(WriteMode::Paged { page_size: 64 });
        let mut source = MemorySource::new(pattern(1024));

        programmer
            .write(&request, Some(&mut source), |_, _| {})
            .unwrap();

        assert_eq!(
            programmer.port().frames(),
            [
                "W 00000400 00000100 40",
                "W 00000500 00000100 40",
                "W 00000600 00000100 40",
                "W 00000700 00000100 40",
            ]
        );
    }

    #[test]
    fn test_unpaged_write_uses_zero_page_field() {
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let mut source = MemorySource::new(pattern(1024));

        programmer
            .write(&OperationRequest::new(0, 1), Some(&mut source), |_, _| {})
            .unwrap();

        assert!(
            programmer
                .port()
                .frames()
                .iter()
                .all(|f| f.ends_with(" 00000100 00"))
        );
    }

    #[test]
    fn test_write_honours_source_offset() {
        let image = pattern(4096);
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let request = OperationRequest::new(0, 1).with_offset(0x300);
        let mut source = MemorySource::new(image.clone());

        programmer
            .write(&request, Some(&mut source), |_, _| {})
            .unwrap();

        assert_eq!(programmer.port().memory(), &image[0x300..0x700]);
    }

    #[test]
    fn test_write_progress_counts_blocks() {
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let mut source = MemorySource::new(pattern(1024));
        let mut seen = Vec::new();

        programmer
            .write(&OperationRequest::new(0, 1), Some(&mut source), |done, total| {
                seen.push((done, total));
            })
            .unwrap();

        assert_eq!(seen, [(256, 1024), (512, 1024), (768, 1024), (1024, 1024)]);
    }

    #[test]
    fn test_paged_write_silent_device_times_out() {
        init_logger();
        let device = SimulatedDevice::new(1024).silent_writes();
        let mut programmer = Programmer::new(device).with_ack_poll(fast_poll());
        let request =
            OperationRequest::new(0, 1).with_write_mode(WriteMode::Paged { page_size: 32 });
        let mut source = MemorySource::new(pattern(1024));

        let start = Instant::now();
        let result = programmer.write(&request, Some(&mut source), |_, _| {});

        assert!(matches!(result, Err(Error::Timeout(_))), "{result:?}");
        assert!(start.elapsed() < Duration::from_secs(2));
        // Gave up on the first block
        assert_eq!(programmer.port().frames().len(), 1);
    }

    #[test]
    fn test_ack_poll_restores_port_timeout() {
        let device = SimulatedDevice::new(1024).silent_writes();
        let mut programmer = Programmer::new(device).with_ack_poll(fast_poll());
        let before = programmer.port().timeout();
        let mut source = MemorySource::new(pattern(1024));

        let _ = programmer.write(&OperationRequest::new(0, 1), Some(&mut source), |_, _| {});

        assert_eq!(programmer.port().timeout(), before);
    }

    #[test]
    fn test_zero_kbytes_write_sends_nothing() {
        let mut programmer = Programmer::new(ScriptedPort::new(&[]));
        let mut source = MemorySource::new(Vec::new());

        let report = programmer
            .write(&OperationRequest::new(0, 0), Some(&mut source), |_, _| {})
            .unwrap();

        assert_eq!(report.blocks, 0);
        assert_eq!(report.bytes, 0);
        assert!(programmer.port().written().is_empty());
    }

    #[test]
    fn test_write_skips_noise_before_block_ack() {
        // Stray bytes ahead of every `%`
        let port = ScriptedPort::new(b"..%\x00%?!%.%");
        let mut programmer = Programmer::new(port).with_ack_poll(fast_poll());
        let mut source = MemorySource::new(pattern(1024));

        let report = programmer
            .write(&OperationRequest::new(0, 1), Some(&mut source), |_, _| {})
            .unwrap();

        assert_eq!(report.blocks, 4);
        assert_eq!(programmer.port().pending(), 0);
        // Four frames of 23 bytes, each followed by a 256-byte block
        assert_eq!(programmer.port().written().len(), 4 * (23 + 256));
    }

    #[test]
    fn test_write_range_overflow_sends_nothing() {
        // Second block would start at 0x1_0000_0000
        let mut programmer = Programmer::new(ScriptedPort::new(b"%%%%"));
        let mut source = MemorySource::new(pattern(1024));

        let result = programmer.write(
            &OperationRequest::new(0xFFFF_FF00, 1),
            Some(&mut source),
            |_, _| {},
        );

        assert!(matches!(result, Err(Error::FieldOverflow { .. })), "{result:?}");
        assert!(programmer.port().written().is_empty());
        assert_eq!(programmer.port().pending(), 4);
    }

    #[test]
    fn test_write_last_block_at_top_of_address_space() {
        let mut programmer = Programmer::new(ScriptedPort::new(b"%%%%"));
        let mut source = MemorySource::new(pattern(1024));

        let report = programmer
            .write(&OperationRequest::new(0xFFFF_FC00, 1), Some(&mut source), |_, _| {})
            .unwrap();

        assert_eq!(report.blocks, 4);
    }

    #[test]
    fn test_write_short_source_fails_before_sending() {
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let mut source = MemorySource::new(vec![0u8; 100]);

        let result = programmer.write(&OperationRequest::new(0, 1), Some(&mut source), |_, _| {});

        match result {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(programmer.port().frames().is_empty());
    }

    #[test]
    fn test_write_without_source_is_config_error() {
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let result = programmer.write(&OperationRequest::new(0, 1), None, |_, _| {});
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_write_page_size_overflow_is_rejected() {
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let request =
            OperationRequest::new(0, 1).with_write_mode(WriteMode::Paged { page_size: 256 });
        let mut source = MemorySource::new(pattern(1024));

        let result = programmer.write(&request, Some(&mut source), |_, _| {});

        assert!(matches!(result, Err(Error::FieldOverflow { .. })));
        assert!(programmer.port().frames().is_empty());
    }

    #[test]
    fn test_verify_equal_is_idempotent() {
        let image = pattern(2048);
        let mut programmer = Programmer::new(SimulatedDevice::with_memory(image.clone()));
        let request = OperationRequest::new(0, 2);

        for _ in 0..2 {
            let mut source = MemorySource::new(image.clone());
            let report = programmer
                .verify(&request, Some(&mut source), |_, _| {})
                .unwrap();
            assert_eq!(report.outcome, VerifyOutcome::Equal);
            assert_eq!(report.trailer, AckCheck::Matched);
        }
        assert_eq!(programmer.port().unread(), 0);
    }

    #[test]
    fn test_verify_counts_mismatches() {
        let image = pattern(1024);
        let mut device = SimulatedDevice::with_memory(image.clone());
        for i in [3, 300, 301] {
            device.memory_mut()[i] ^= 0xFF;
        }
        let mut programmer = Programmer::new(device);
        let mut source = MemorySource::new(image);

        let report = programmer
            .verify(&OperationRequest::new(0, 1), Some(&mut source), |_, _| {})
            .unwrap();

        assert_eq!(report.outcome, VerifyOutcome::NotEqual(3));
        assert!(matches!(
            report.outcome.into_result(),
            Err(Error::Mismatch { count: 3 })
        ));
    }

    #[test]
    fn test_verify_uses_offset_into_source() {
        let image = pattern(4096);
        let device = SimulatedDevice::with_memory(image[0x400..0x800].to_vec());
        let mut programmer = Programmer::new(device);
        let mut source = MemorySource::new(image);
        let request = OperationRequest::new(0, 1).with_offset(0x400);

        let report = programmer
            .verify(&request, Some(&mut source), |_, _| {})
            .unwrap();

        assert!(report.outcome.is_equal());
    }

    #[test]
    fn test_verify_without_source_sends_nothing() {
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let result = programmer.verify(&OperationRequest::new(0, 1), None, |_, _| {});

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(programmer.port().frames().is_empty());
    }

    #[test]
    fn test_read_ascii_yields_rows() {
        let mut memory = vec![0u8; 2048];
        memory[0x400] = 0xAB;
        let mut programmer = Programmer::new(SimulatedDevice::with_memory(memory));
        let request = OperationRequest::new(0x400, 1);

        let lines: Vec<String> = programmer
            .read_ascii(&request)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(lines.len(), 64);
        assert!(lines[0].starts_with("ab 00"));
        assert_eq!(programmer.port().frames(), ["R 00000400 00000800 10"]);
        assert_eq!(programmer.port().unread(), 0);
    }

    #[test]
    fn test_read_ascii_is_lazy() {
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));
        let mut lines = programmer
            .read_ascii(&OperationRequest::new(0, 1))
            .unwrap();

        assert_eq!(lines.remaining(), 64);
        assert!(lines.next().unwrap().is_ok());
        assert_eq!(lines.remaining(), 63);
        drop(lines);

        // Abandoning the read discards the rest
        assert_eq!(programmer.port().unread(), 0);
    }

    #[test]
    fn test_read_ascii_truncated_reply_ends_with_error() {
        let port = ScriptedPort::new(b"\r\nrow one\r\n");
        let mut programmer = Programmer::new(port);

        let results: Vec<Result<String>> = programmer
            .read_ascii(&OperationRequest::new(0, 1))
            .unwrap()
            .collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "row one");
        assert!(matches!(results[1], Err(Error::Timeout(_))));
    }

    #[test]
    fn test_read_ascii_unexpected_leading_line_is_a_warning() {
        let mut programmer = Programmer::new(ScriptedPort::new(b"junk\r\n"));
        let lines = programmer
            .read_ascii(&OperationRequest::new(0, 0))
            .unwrap();
        assert_eq!(lines.remaining(), 0);
        assert_eq!(lines.count(), 0);
    }

    #[test]
    fn test_read_ascii_range_overflow_is_rejected() {
        let mut programmer = Programmer::new(ScriptedPort::new(&[]));
        let result = programmer.read_ascii(&OperationRequest::new(0xFFFF_FC00, 1));
        assert!(matches!(result, Err(Error::FieldOverflow { .. })));
    }

    #[test]
    fn test_unlock_success() {
        let mut programmer = Programmer::new(SimulatedDevice::new(0));
        programmer.unlock().unwrap();
        assert_eq!(programmer.port().frames(), ["U 00000000 00000000 00"]);
    }

    #[test]
    fn test_unlock_wrong_ack_is_error() {
        let device = SimulatedDevice::new(0).unlock_reply(0x00);
        let mut programmer = Programmer::new(device);

        match programmer.unlock() {
            Err(Error::Ack {
                operation,
                expected,
                actual,
            }) => {
                assert_eq!(operation, Operation::Unlock);
                assert_eq!(expected, b'%');
                assert_eq!(actual, Some(0x00));
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unlock_silence_is_error() {
        let mut programmer = Programmer::new(ScriptedPort::new(&[]));
        assert!(matches!(
            programmer.unlock(),
            Err(Error::Ack { actual: None, .. })
        ));
    }

    #[test]
    fn test_version_payload_unmodified() {
        let mut programmer = Programmer::new(ScriptedPort::new(b"Ev1.03"));

        let version = programmer.version().unwrap();

        assert_eq!(version.as_bytes(), b"v1.03");
        assert_eq!(programmer.port().written(), b"V 00000000 00000000 00\n");
        assert_eq!(programmer.port().pending(), 0);
    }

    #[test]
    fn test_version_wrong_ack_is_error() {
        let mut programmer = Programmer::new(ScriptedPort::new(b"Xv1.03"));
        assert!(matches!(
            programmer.version(),
            Err(Error::Ack {
                operation: Operation::Version,
                expected: b'E',
                actual: Some(b'X'),
            })
        ));
    }

    #[test]
    fn test_version_short_payload_times_out() {
        let mut programmer = Programmer::new(ScriptedPort::new(b"Ev1"));
        assert!(matches!(programmer.version(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_every_command_clears_input_first() {
        let mut programmer = Programmer::new(ScriptedPort::new(b"%Ev1.03"));
        programmer.unlock().unwrap();
        programmer.version().unwrap();
        assert_eq!(programmer.port().clears(), 2);
    }

    #[test]
    fn test_drop_closes_port_after_unlock() {
        let port = ScriptedPort::new(b"%");
        let closes = port.close_counter();
        let mut programmer = Programmer::new(port);

        programmer.unlock().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        drop(programmer);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_port_after_failed_write() {
        let port = ScriptedPort::new(&[]);
        let closes = port.close_counter();
        let mut programmer = Programmer::new(port).with_ack_poll(fast_poll());
        let mut source = MemorySource::new(pattern(1024));

        let result = programmer.write(&OperationRequest::new(0, 1), Some(&mut source), |_, _| {});
        assert!(matches!(result, Err(Error::Timeout(_))), "{result:?}");

        drop(programmer);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_port_after_failed_version() {
        let port = ScriptedPort::new(b"X");
        let closes = port.close_counter();
        let mut programmer = Programmer::new(port);

        assert!(matches!(programmer.version(), Err(Error::Ack { .. })));

        drop(programmer);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_operations_share_one_session() {
        let image = pattern(1024);
        let mut programmer = Programmer::new(SimulatedDevice::new(1024));

        programmer.unlock().unwrap();
        let mut source = MemorySource::new(image.clone());
        programmer
            .write(&OperationRequest::new(0, 1), Some(&mut source), |_, _| {})
            .unwrap();
        let mut source = MemorySource::new(image);
        let report = programmer
            .verify(&OperationRequest::new(0, 1), Some(&mut source), |_, _| {})
            .unwrap();
        let version = programmer.version().unwrap();

        assert!(report.outcome.is_equal());
        assert_eq!(version.to_string(), "v1.03");
    }
}
