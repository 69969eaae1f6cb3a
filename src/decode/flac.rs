//! FLAC decode stream via claxon, normalized to 16-bit PCM.

use claxon::FlacReader;
use tracing::{debug, warn};

use crate::base::WaveFormat;
use crate::decode::DecodeStream;
use crate::error::{AudioError, AudioResult};
use crate::stream::{ByteStream, SeekOrigin, StreamReader};

pub struct FlacStream {
    /// `None` after an unrecoverable reader error; reads then return 0.
    reader: Option<FlacReader<StreamReader>>,
    format: WaveFormat,
    length: u32,
    /// Right shift from the source bit depth down to 16 bits; negative
    /// values shift left (depths below 16).
    shift: i32,
    scratch: Vec<i32>,
    pending: Vec<i16>,
    pending_pos: usize,
    position: u32,
}

impl FlacStream {
    pub fn open(stream: Box<dyn ByteStream>) -> AudioResult<Self> {
        let reader = FlacReader::new(StreamReader::new(stream))
            .map_err(|e| AudioError::Unsupported(format!("flac: {e}")))?;
        let info = reader.streaminfo();
        if info.channels == 0 || info.channels > 8 {
            return Err(AudioError::Unsupported(format!(
                "flac: {} channels",
                info.channels
            )));
        }
        let format = WaveFormat::pcm16(info.sample_rate, info.channels as u8);
        let frames = info.samples.ok_or_else(|| {
            AudioError::Unsupported("flac: stream length unknown".into())
        })?;
        let length = frames
            .checked_mul(format.block_align() as u64)
            .and_then(|b| u32::try_from(b).ok())
            .ok_or_else(|| {
                AudioError::Unsupported("flac: decoded length over 4 GiB".into())
            })?;
        debug!(
            rate = format.samples_per_sec,
            channels = format.channels,
            bits = info.bits_per_sample,
            length,
            "opened flac stream"
        );

        Ok(Self {
            reader: Some(reader),
            format,
            length,
            shift: info.bits_per_sample as i32 - 16,
            scratch: Vec::new(),
            pending: Vec::new(),
            pending_pos: 0,
            position: 0,
        })
    }

    fn to_i16(&self, sample: i32) -> i16 {
        scale_to_i16(sample, self.shift)
    }

    /// Decodes the next non-empty frame into `pending`. False at end of
    /// stream or on an unrecoverable decode error.
    fn refill_pending(&mut self) -> bool {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return false;
            };
            let scratch = std::mem::take(&mut self.scratch);
            let block = match reader.blocks().read_next_or_eof(scratch) {
                Ok(Some(block)) => block,
                Ok(None) => return false,
                Err(e) => {
                    warn!("flac decode error, ending stream: {e}");
                    return false;
                }
            };
            let frames = block.duration();
            let channels = block.channels();
            self.pending.clear();
            self.pending
                .reserve((frames as usize) * (channels as usize));
            for i in 0..frames {
                for ch in 0..channels {
                    let s = self.to_i16(block.sample(ch, i));
                    self.pending.push(s);
                }
            }
            self.pending_pos = 0;
            self.scratch = block.into_buffer();
            if !self.pending.is_empty() {
                return true;
            }
        }
    }

    /// Rebuilds the reader from offset 0. Used for backward seeks.
    fn rewind(&mut self) -> bool {
        let Some(reader) = self.reader.take() else {
            return false;
        };
        self.pending.clear();
        self.pending_pos = 0;
        self.position = 0;
        let mut inner = reader.into_inner().into_inner();
        inner.seek(0, SeekOrigin::Begin);
        match FlacReader::new(StreamReader::new(inner)) {
            Ok(r) => {
                self.reader = Some(r);
                true
            }
            Err(e) => {
                // Reader stays absent; subsequent reads report exhaustion.
                warn!("flac rewind failed: {e}");
                true
            }
        }
    }
}

/// Rescale a decoded sample from the source bit depth to 16 bits.
fn scale_to_i16(sample: i32, shift: i32) -> i16 {
    let v = if shift >= 0 {
        sample >> shift
    } else {
        sample << -shift
    };
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

impl DecodeStream for FlacStream {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn tell(&mut self) -> u32 {
        self.position
    }

    fn seek_bytes(&mut self, offset: u32) -> u32 {
        let align = self.format.block_align();
        let target = (offset.min(self.length) / align) * align;
        if target < self.position && !self.rewind() {
            return self.position;
        }
        if target == 0 {
            return self.position;
        }
        // Decode forward, discarding up to the target offset.
        let mut sink = [0u8; 4096];
        while self.position < target {
            let want = ((target - self.position) as usize).min(sink.len());
            if self.read_next(&mut sink[..want]) == 0 {
                break;
            }
        }
        self.position
    }

    fn read_next(&mut self, buf: &mut [u8]) -> u32 {
        let mut written = 0usize;
        while buf.len() - written >= 2 {
            if self.pending_pos >= self.pending.len() && !self.refill_pending() {
                break;
            }
            let room = (buf.len() - written) / 2;
            let avail = self.pending.len() - self.pending_pos;
            let take = room.min(avail);
            if take == 0 {
                break;
            }
            for &s in &self.pending[self.pending_pos..self.pending_pos + take] {
                let le = s.to_le_bytes();
                buf[written] = le[0];
                buf[written + 1] = le[1];
                written += 2;
            }
            self.pending_pos += take;
        }
        self.position = self.position.saturating_add(written as u32);
        written as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    /// fLaC magic plus a single last-block STREAMINFO: 4096-sample block
    /// sizes, 44.1 kHz stereo 16-bit, 44100 total samples, zero MD5. No
    /// audio frames follow.
    fn streaminfo_only() -> Vec<u8> {
        let mut data = b"fLaC".to_vec();
        data.extend_from_slice(&[0x80, 0x00, 0x00, 0x22]);
        data.extend_from_slice(&[0x10, 0x00, 0x10, 0x00]);
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        data.extend_from_slice(&[0x0A, 0xC4, 0x42, 0xF0, 0x00, 0x00, 0xAC, 0x44]);
        data.extend_from_slice(&[0u8; 16]);
        data
    }

    #[test]
    fn truncated_flac_is_unsupported() {
        let mut data = b"fLaC".to_vec();
        data.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            FlacStream::open(Box::new(MemoryStream::new(data))),
            Err(AudioError::Unsupported(_))
        ));
    }

    #[test]
    fn streaminfo_yields_format_and_length() {
        let mut s =
            FlacStream::open(Box::new(MemoryStream::new(streaminfo_only()))).unwrap();
        assert_eq!(s.format(), WaveFormat::pcm16(44100, 2));
        assert_eq!(s.length(), 176_400);
        assert_eq!(s.tell(), 0);
        // No frames behind the header: reads report exhaustion.
        let mut buf = [0u8; 64];
        assert_eq!(s.read_next(&mut buf), 0);
    }

    #[test]
    fn sample_width_conversion() {
        // 24-bit source shifts right by 8.
        assert_eq!(scale_to_i16(0x123456, 8), 0x1234);
        // 8-bit source shifts left by 8.
        assert_eq!(scale_to_i16(0x12, -8), 0x1200);
        // 16-bit source passes through.
        assert_eq!(scale_to_i16(-1234, 0), -1234);
    }
}
