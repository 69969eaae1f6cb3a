//! Byte stream over caller-provided bytes.

use crate::stream::{clamp_position, ByteStream, SeekOrigin};

pub struct MemoryStream {
    data: Vec<u8>,
    position: u32,
}

impl MemoryStream {
    /// Data larger than 4 GiB is truncated; streams use 32-bit positions.
    pub fn new(data: Vec<u8>) -> Self {
        let mut data = data;
        data.truncate(u32::MAX as usize);
        Self { data, position: 0 }
    }
}

impl ByteStream for MemoryStream {
    fn length(&self) -> u32 {
        self.data.len() as u32
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> u32 {
        let base = match origin {
            SeekOrigin::Begin => 0,
            SeekOrigin::Current => self.position,
            SeekOrigin::End => self.length(),
        };
        self.position = clamp_position(base, offset, self.length());
        self.position
    }

    fn read_next(&mut self, buf: &mut [u8]) -> u32 {
        let start = self.position as usize;
        let left = self.data.len() - start;
        let n = buf.len().min(left);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u32;
        n as u32
    }
}
