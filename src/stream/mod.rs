//! Byte stream abstraction underneath the decoders.
//!
//! A `ByteStream` is a seekable, bounded byte source with 32-bit
//! positions (streams larger than 4 GiB are out of scope). EOF is
//! reported by a short or zero-length read, never by an error.

mod file;
mod memory;

pub use file::FileStream;
pub use memory::MemoryStream;

use std::io::{self, Read, Seek, SeekFrom};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Begin,
    Current,
    End,
}

/// Seekable bounded byte source.
///
/// `seek` clamps into `[0, length]` and returns the resulting position;
/// `read_next` returns the bytes actually copied, `0` at end of stream.
pub trait ByteStream: Send {
    fn length(&self) -> u32;

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> u32;

    fn read_next(&mut self, buf: &mut [u8]) -> u32;

    fn tell(&mut self) -> u32 {
        self.seek(0, SeekOrigin::Current)
    }
}

/// Clamp a seek target into `[0, length]`.
pub(crate) fn clamp_position(base: u32, offset: i64, length: u32) -> u32 {
    let target = (base as i64).saturating_add(offset);
    target.clamp(0, length as i64) as u32
}

/// Adapts a boxed byte stream to `io::Read + io::Seek` so decoder crates
/// can consume it directly.
pub struct StreamReader(Box<dyn ByteStream>);

impl StreamReader {
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        Self(stream)
    }

    pub fn into_inner(self) -> Box<dyn ByteStream> {
        self.0
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.0.read_next(buf) as usize)
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new = match pos {
            SeekFrom::Start(n) => {
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                self.0.seek(n, SeekOrigin::Begin)
            }
            SeekFrom::Current(n) => self.0.seek(n, SeekOrigin::Current),
            SeekFrom::End(n) => self.0.seek(n, SeekOrigin::End),
        };
        Ok(new as u64)
    }
}
