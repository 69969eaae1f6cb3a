//! Decode streams: compressed bytes in, interleaved PCM out.
//!
//! A `DecodeStream` exposes the decoded data as a flat byte range with a
//! known total length, so transport math (duration, seek targets, position
//! markers) is plain integer arithmetic on decoded byte offsets.

#[cfg(feature = "flac")]
pub mod flac;
pub mod vorbis;

use crate::base::{WaveFormat, AUDIO_HEADER_PEEK_LENGTH};
use crate::error::{AudioError, AudioResult};
use crate::stream::{ByteStream, SeekOrigin};

const OGG_MAGIC: &[u8; 4] = b"OggS";
const FLAC_MAGIC: &[u8; 4] = b"fLaC";

/// Pull decoder with a byte-addressed decoded timeline.
///
/// Positions and lengths are decoded (PCM) byte counts, frame-aligned.
/// `read_next` returning less than the buffer means the stream is near its
/// end; returning `0` means it is exhausted.
pub trait DecodeStream: Send {
    fn format(&self) -> WaveFormat;

    /// Total decoded length in bytes. Known up front for seekable sources.
    fn length(&self) -> u32;

    /// Current decoded byte offset.
    fn tell(&mut self) -> u32;

    /// Repositions to a frame-aligned decoded byte offset (clamped to the
    /// stream length) and returns the resulting position.
    fn seek_bytes(&mut self, offset: u32) -> u32;

    /// Decodes into `buf`, returning the bytes produced.
    fn read_next(&mut self, buf: &mut [u8]) -> u32;
}

/// Identifies the container by its leading magic and builds the matching
/// decode stream. The byte stream is rewound before handoff, so decoder
/// construction sees it from offset 0.
pub fn open_decode_stream(
    mut stream: Box<dyn ByteStream>,
) -> AudioResult<Box<dyn DecodeStream>> {
    let mut header = [0u8; AUDIO_HEADER_PEEK_LENGTH];
    let got = stream.read_next(&mut header) as usize;
    stream.seek(0, SeekOrigin::Begin);
    if got < 4 {
        return Err(AudioError::Unsupported("stream shorter than a header".into()));
    }

    if &header[..4] == OGG_MAGIC {
        return Ok(Box::new(vorbis::VorbisStream::open(stream)?));
    }
    if &header[..4] == FLAC_MAGIC {
        #[cfg(feature = "flac")]
        return Ok(Box::new(flac::FlacStream::open(stream)?));
        #[cfg(not(feature = "flac"))]
        return Err(AudioError::Unsupported(
            "FLAC data but the flac feature is disabled".into(),
        ));
    }

    Err(AudioError::Unsupported(format!(
        "no known magic in header {:02x?}",
        &header[..4]
    )))
}
