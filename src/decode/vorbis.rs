//! Ogg Vorbis decode stream via lewton.

use lewton::inside_ogg::OggStreamReader;
use tracing::{debug, warn};

use crate::base::WaveFormat;
use crate::decode::DecodeStream;
use crate::error::{AudioError, AudioResult};
use crate::stream::{ByteStream, SeekOrigin, StreamReader};

pub struct VorbisStream {
    reader: OggStreamReader<StreamReader>,
    format: WaveFormat,
    length: u32,
    /// Decoded samples not yet handed out.
    pending: Vec<i16>,
    pending_pos: usize,
    /// Decoded byte offset of the next `read_next`.
    position: u32,
}

impl VorbisStream {
    /// Builds the stream, validating headers and computing the total
    /// decoded length up front. Fails on anything lewton rejects.
    pub fn open(mut stream: Box<dyn ByteStream>) -> AudioResult<Self> {
        let total_frames = scan_last_granule(stream.as_mut());
        stream.seek(0, SeekOrigin::Begin);

        let reader = OggStreamReader::new(StreamReader::new(stream))
            .map_err(|e| AudioError::Unsupported(format!("vorbis: {e}")))?;
        let hdr = &reader.ident_hdr;
        let format = WaveFormat::pcm16(hdr.audio_sample_rate, hdr.audio_channels);

        let frames = total_frames.ok_or_else(|| {
            AudioError::Unsupported("vorbis: no final granule position".into())
        })?;
        let length = frames
            .checked_mul(format.block_align() as u64)
            .and_then(|b| u32::try_from(b).ok())
            .ok_or_else(|| {
                AudioError::Unsupported("vorbis: decoded length over 4 GiB".into())
            })?;
        debug!(
            rate = format.samples_per_sec,
            channels = format.channels,
            length,
            "opened vorbis stream"
        );

        Ok(Self {
            reader,
            format,
            length,
            pending: Vec::new(),
            pending_pos: 0,
            position: 0,
        })
    }

    /// Pulls the next audio packet into `pending`. False at end of stream.
    fn refill_pending(&mut self) -> bool {
        loop {
            match self.reader.read_dec_packet_itl() {
                Ok(Some(samples)) => {
                    if samples.is_empty() {
                        continue;
                    }
                    self.pending = samples;
                    self.pending_pos = 0;
                    return true;
                }
                Ok(None) => return false,
                Err(e) => {
                    warn!("vorbis decode error, ending stream: {e}");
                    return false;
                }
            }
        }
    }
}

impl DecodeStream for VorbisStream {
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
        // lewton seeks to the page containing the granule, so the first
        // packets decoded after this may predate `target` by up to one
        // Ogg page. The reported position is the requested target; the
        // discrepancy is bounded by the encoder's page size.
        match self.reader.seek_absgp_pg((target / align) as u64) {
            Ok(()) => {
                self.pending.clear();
                self.pending_pos = 0;
                self.position = target;
            }
            Err(e) => warn!("vorbis seek failed: {e}"),
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

/// Scans the tail of the physical stream backwards for the last Ogg page
/// capture pattern and returns its granule position (total frames).
pub(crate) fn scan_last_granule(stream: &mut dyn ByteStream) -> Option<u64> {
    const TAIL: usize = 64 * 1024;
    let len = stream.length() as usize;
    let take = len.min(TAIL);
    stream.seek(-(take as i64), SeekOrigin::End);
    let mut tail = vec![0u8; take];
    let got = stream.read_next(&mut tail) as usize;
    tail.truncate(got);

    let mut best = None;
    let mut i = 0usize;
    while i + 14 <= tail.len() {
        if &tail[i..i + 4] == b"OggS" {
            let mut g = [0u8; 8];
            g.copy_from_slice(&tail[i + 6..i + 14]);
            let granule = u64::from_le_bytes(g);
            // -1 marks a page with no finished packet.
            if granule != u64::MAX {
                best = Some(granule);
            }
            i += 4;
        } else {
            i += 1;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    /// Minimal fake Ogg page header: capture pattern, version, header type,
    /// then the 64-bit LE granule position.
    fn page(granule: u64) -> Vec<u8> {
        let mut p = b"OggS".to_vec();
        p.push(0); // version
        p.push(0x04); // header type
        p.extend_from_slice(&granule.to_le_bytes());
        p.extend_from_slice(&[0u8; 12]); // serial, sequence, checksum
        p
    }

    #[test]
    fn scan_finds_last_granule() {
        let mut data = vec![0u8; 256];
        data.extend(page(11_000));
        data.extend(vec![0u8; 64]);
        data.extend(page(44_100));
        data.extend(vec![0u8; 32]);
        let mut s = MemoryStream::new(data);
        assert_eq!(scan_last_granule(&mut s), Some(44_100));
    }

    #[test]
    fn scan_skips_unfinished_pages() {
        let mut data = page(2_000);
        data.extend(page(u64::MAX));
        let mut s = MemoryStream::new(data);
        assert_eq!(scan_last_granule(&mut s), Some(2_000));
    }

    #[test]
    fn scan_without_pages_is_none() {
        let mut s = MemoryStream::new(vec![0u8; 512]);
        assert_eq!(scan_last_granule(&mut s), None);
    }

    #[test]
    fn open_rejects_non_vorbis_pages() {
        let mut data = page(100);
        data.extend(vec![0u8; 128]);
        assert!(VorbisStream::open(Box::new(MemoryStream::new(data))).is_err());
    }
}
