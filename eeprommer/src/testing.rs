//! Test doubles for the [`Port`] trait.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::frame::WRITE_BLOCK_SIZE;

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "no data")
}

/// Mock serial port replaying a fixed response.
///
/// Unlike `Cursor<Vec<u8>>`, this keeps reads and writes independent.
/// Clearing the input is counted but does not drop the scripted bytes, which
/// stand for replies the device has not sent yet.
pub(crate) struct ScriptedPort {
    read_buf: VecDeque<u8>,
    write_buf: Vec<u8>,
    timeout: Duration,
    clears: usize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedPort {
    pub(crate) fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response
                .iter()
                .copied()
                .collect(),
            write_buf: Vec::new(),
            timeout: Duration::from_secs(1),
            clears: 0,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.write_buf
    }

    pub(crate) fn clears(&self) -> usize {
        self.clears
    }

    pub(crate) fn pending(&self) -> usize {
        self.read_buf.len()
    }

    /// Close counter that stays readable after the port is dropped.
    pub(crate) fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(timed_out());
        }
        let n = buf.len().min(self.read_buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_input(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum Pending {
    Line(Vec<u8>),
    Block { address: usize, data: Vec<u8> },
}

/// In-memory emulation of the programmer firmware and its EEPROM.
pub(crate) struct SimulatedDevice {
    memory: Vec<u8>,
    output: VecDeque<u8>,
    pending: Pending,
    frames: Vec<String>,
    version: [u8; 5],
    unlock_reply: u8,
    bulk_trailer: Option<u8>,
    silent_writes: bool,
    timeout: Duration,
}

impl SimulatedDevice {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            memory: vec![0xFF; size],
            output: VecDeque::new(),
            pending: Pending::Line(Vec::new()),
            frames: Vec::new(),
            version: *b"v1.03",
            unlock_reply: b'%',
            bulk_trailer: Some(0x00),
            silent_writes: false,
            timeout: Duration::from_secs(1),
        }
    }

    pub(crate) fn with_memory(memory: Vec<u8>) -> Self {
        Self {
            memory,
            ..Self::new(0)
        }
    }

    /// Never acknowledge written blocks.
    pub(crate) fn silent_writes(mut self) -> Self {
        self.silent_writes = true;
        self
    }

    /// Answer unlock with `reply` instead of `%`.
    pub(crate) fn unlock_reply(mut self, reply: u8) -> Self {
        self.unlock_reply = reply;
        self
    }

    /// Byte sent after a bulk read, `None` to send nothing.
    pub(crate) fn bulk_trailer(mut self, trailer: Option<u8>) -> Self {
        self.bulk_trailer = trailer;
        self
    }

    pub(crate) fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Frames received so far, without the newline.
    pub(crate) fn frames(&self) -> &[String] {
        &self.frames
    }

    pub(crate) fn unread(&self) -> usize {
        self.output.len()
    }

    fn receive(&mut self, byte: u8) {
        match &mut self.pending {
            Pending::Line(line) => {
                if byte == b'\n' {
                    let line = std::mem::take(line);
                    self.execute(&String::from_utf8_lossy(&line));
                } else {
                    line.push(byte);
                }
            },
            Pending::Block { address, data } => {
                data.push(byte);
                if data.len() == WRITE_BLOCK_SIZE {
                    let address = *address;
                    let data = std::mem::take(data);
                    self.memory[address..address + WRITE_BLOCK_SIZE].copy_from_slice(&data);
                    self.pending = Pending::Line(Vec::new());
                    if !self.silent_writes {
                        self.output.push_back(b'%');
                    }
                }
            },
        }
    }

    fn execute(&mut self, frame: &str) {
        self.frames.push(frame.to_string());
        let parts: Vec<&str> = frame.split(' ').collect();
        let field = |i: usize| usize::from_str_radix(parts[i], 16).unwrap_or(0);

        match parts[0] {
            "B" => {
                let (address, len) = (field(1), field(2));
                self.output.extend(&self.memory[address..address + len]);
                if let Some(trailer) = self.bulk_trailer {
                    self.output.push_back(trailer);
                }
            },
            "R" => {
                let (start, end) = (field(1), field(2));
                self.output.extend(b"\r\n");
                for row in self.memory[start..end].chunks(16) {
                    let hex: Vec<String> = row.iter().map(|b| format!("{b:02x}")).collect();
                    self.output.extend(hex.join(" ").bytes());
                    self.output.extend(b"\r\n");
                }
            },
            "W" => {
                self.pending = Pending::Block {
                    address: field(1),
                    data: Vec::with_capacity(WRITE_BLOCK_SIZE),
                };
            },
            "U" => self.output.push_back(self.unlock_reply),
            "V" => {
                self.output.push_back(b'E');
                self.output.extend(self.version);
            },
            _ => {},
        }
    }
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            return Err(timed_out());
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.receive(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedDevice {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_input(&mut self) -> Result<()> {
        self.output.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
