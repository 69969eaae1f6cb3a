//! Shared value types and engine constants.
//!
//! Everything here is plain data: the PCM format descriptor with its
//! byte/time arithmetic, the clip creation flags, and the fixed sizing
//! constants the refill protocol and group table are built around.

/// Length of one bucket submitted to a voice, in bytes.
pub const BUCKET_LENGTH: usize = 8 * 1024;

/// Number of bucket slots in a clip's ring arena.
pub const BUCKET_COUNT: usize = 3;

/// Capacity of the engine's group table.
pub const MAX_GROUP_COUNT: usize = 8;

/// Group names longer than this are truncated at creation.
pub const MAX_GROUP_NAME_LENGTH: usize = 16;

/// Bytes peeked from a byte stream to identify its container format.
pub const AUDIO_HEADER_PEEK_LENGTH: usize = 16;

/// Sample encoding of a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    /// Integer PCM (8 or 16 bit here).
    Pcm,
    /// 32-bit float PCM.
    IeeeFloat,
    /// Anything the engine cannot submit to a device.
    Unknown,
}

/// Decoded wave format: enough to size buffers and convert bytes to time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub samples_per_sec: u32,
    pub bits_per_sample: u16,
    pub channels: u8,
    pub fmt_tag: FormatTag,
}

impl WaveFormat {
    /// 16-bit integer PCM, the format both bundled decoders emit.
    pub fn pcm16(samples_per_sec: u32, channels: u8) -> Self {
        Self {
            samples_per_sec,
            bits_per_sample: 16,
            channels,
            fmt_tag: FormatTag::Pcm,
        }
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> u32 {
        (self.bits_per_sample as u32 / 8) * self.channels as u32
    }

    /// Bytes consumed per second of playback at ratio 1.0.
    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.block_align() * self.samples_per_sec
    }

    /// Convert a decoded byte count to seconds.
    pub fn bytes_to_seconds(&self, bytes: u64) -> f64 {
        let rate = self.avg_bytes_per_sec();
        if rate == 0 {
            return 0.0;
        }
        bytes as f64 / rate as f64
    }

    /// Convert seconds to a frame-aligned decoded byte offset.
    pub fn seconds_to_bytes(&self, seconds: f64) -> u64 {
        if seconds <= 0.0 {
            return 0;
        }
        let frames = (seconds * self.samples_per_sec as f64) as u64;
        frames * self.block_align() as u64
    }
}

/// Clip creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClipFlags(u32);

impl ClipFlags {
    pub const NONE: ClipFlags = ClipFlags(0);
    /// Restart from the beginning instead of stopping at stream end.
    pub const LOOPING: ClipFlags = ClipFlags(1 << 0);
    /// Push-mode clip fed by the caller; no decode stream, no bucket ring.
    pub(crate) const LIVE: ClipFlags = ClipFlags(1 << 16);

    pub fn contains(&self, other: ClipFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ClipFlags {
    type Output = ClipFlags;
    fn bitor(self, rhs: ClipFlags) -> ClipFlags {
        ClipFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ClipFlags {
    fn bitor_assign(&mut self, rhs: ClipFlags) {
        self.0 |= rhs.0;
    }
}

/// Which backend level to initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiLevel {
    /// Probe the device backend first, fall back to headless.
    Auto,
    /// Real audio device via the platform output.
    Device,
    /// No device; wall-clock accounting only.
    Headless,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(44100, 16, 2, 4, 176_400)]
    #[case(44100, 16, 1, 2, 88_200)]
    #[case(22050, 8, 1, 1, 22_050)]
    #[case(48000, 16, 2, 4, 192_000)]
    fn format_arithmetic(
        #[case] rate: u32,
        #[case] bits: u16,
        #[case] channels: u8,
        #[case] align: u32,
        #[case] avg: u32,
    ) {
        let fmt = WaveFormat {
            samples_per_sec: rate,
            bits_per_sample: bits,
            channels,
            fmt_tag: FormatTag::Pcm,
        };
        assert_eq!(fmt.block_align(), align);
        assert_eq!(fmt.avg_bytes_per_sec(), avg);
    }

    #[test]
    fn bytes_to_seconds_matches_duration_formula() {
        // 1 second of 44.1 kHz stereo 16-bit is 176400 bytes.
        let fmt = WaveFormat::pcm16(44100, 2);
        assert!((fmt.bytes_to_seconds(176_400) - 1.0).abs() < 1e-9);
        assert!((fmt.bytes_to_seconds(88_200) - 0.5).abs() < 1e-9);
        assert_eq!(fmt.bytes_to_seconds(0), 0.0);
    }

    #[test]
    fn seconds_to_bytes_is_frame_aligned() {
        let fmt = WaveFormat::pcm16(44100, 2);
        let bytes = fmt.seconds_to_bytes(0.5);
        assert_eq!(bytes % fmt.block_align() as u64, 0);
        assert_eq!(bytes, 88_200);
        assert_eq!(fmt.seconds_to_bytes(-1.0), 0);
    }

    #[test]
    fn round_trip_stays_within_one_frame() {
        let fmt = WaveFormat::pcm16(22050, 1);
        for secs in [0.1, 0.25, 1.5, 10.0] {
            let back = fmt.bytes_to_seconds(fmt.seconds_to_bytes(secs));
            assert!((back - secs).abs() <= 1.0 / fmt.samples_per_sec as f64);
        }
    }

    #[test]
    fn flags_combine() {
        let f = ClipFlags::NONE | ClipFlags::LOOPING;
        assert!(f.contains(ClipFlags::LOOPING));
        assert!(!f.contains(ClipFlags::LIVE));
        let mut g = ClipFlags::default();
        g |= ClipFlags::LIVE;
        assert!(g.contains(ClipFlags::LIVE));
    }

    #[test]
    fn zero_rate_format_reports_zero_duration() {
        let fmt = WaveFormat {
            samples_per_sec: 0,
            bits_per_sample: 16,
            channels: 2,
            fmt_tag: FormatTag::Pcm,
        };
        assert_eq!(fmt.bytes_to_seconds(1000), 0.0);
    }
}
