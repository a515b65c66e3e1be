//! Byte sources and sinks for the protocol engine.
//!
//! Write and verify pull image bytes from a [`Source`]; dump pushes device
//! bytes into a [`Sink`]. The engine never cares whether those live in a file
//! or in memory.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// Where image bytes come from.
pub trait Source {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// A region extending past the end of the source is an error.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

/// Where device bytes go to.
pub trait Sink {
    /// Store all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// A read-only file region.
pub struct FileSource {
    file: File,
    path: PathBuf,
}

impl FileSource {
    /// Open `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("{} not found or unreadable: {e}", path.display()),
            ))
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Source for FileSource {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| short_read(e, &self.path.display().to_string(), offset, len))?;
        Ok(buf)
    }
}

/// A file created (or truncated) on the first write.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// Prepare a sink writing to `path`. Nothing is touched until data arrives.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

impl Sink for FileSink {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self
            .file
            .is_none()
        {
            let file = File::create(&self.path).map_err(|e| {
                Error::Io(io::Error::new(
                    e.kind(),
                    format!(
                        "{} cannot be opened, verify it is not in use: {e}",
                        self.path.display()
                    ),
                ))
            })?;
            debug!("Created {}", self.path.display());
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            Write::write_all(file, data)?;
            file.flush()?;
        }
        Ok(())
    }
}

/// An in-memory source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Wrap a byte buffer.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

impl Source for MemorySource {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                short_read(
                    io::Error::from(io::ErrorKind::UnexpectedEof),
                    "memory source",
                    offset,
                    len,
                )
            })
    }
}

/// An in-memory sink.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    data: Vec<u8>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the collected bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Sink for MemorySink {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.data
            .extend_from_slice(data);
        Ok(())
    }
}

fn short_read(e: io::Error, what: &str, offset: u64, len: usize) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{what} has fewer than {len} bytes at offset {offset:#x}"),
        ))
    } else {
        Error::Io(e)
    }
}
