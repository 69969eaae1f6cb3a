//! Per-voice bookkeeping: transport state machine, the bucket refill
//! protocol, position markers, and wall-clock consumption accounting.
//!
//! Nothing here touches an output device; the worker owns that side.
//! Consumption is estimated from elapsed wall-clock time at the voice's
//! byte rate (scaled by the frequency ratio), the same estimation rodio
//! playback forces on the queue-processed side.

use std::collections::VecDeque;
use std::time::Instant;

use crate::backend::bucket::Bucket;
use crate::backend::SubmixId;
use crate::base::{WaveFormat, BUCKET_COUNT, BUCKET_LENGTH};
use crate::decode::DecodeStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoiceState {
    Stopped,
    Playing,
    Paused,
}

/// One submitted bucket awaiting (or undergoing) consumption.
pub(crate) struct Queued {
    /// Decoded byte offset reported by `tell` while this bucket plays:
    /// the stream offset before the read plus half the bytes read.
    pub marker: u32,
    pub len: u32,
    /// Set when a short read marked this bucket as the last one.
    pub eos: bool,
}

/// A refill that produced data: which arena slot to submit, and how much.
pub(crate) struct RefillOut {
    pub slot: usize,
    pub len: usize,
    pub eos: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PumpOutcome {
    /// Buckets whose consumption began during this pump. Each one owes
    /// the voice exactly one refill attempt.
    pub starts: u32,
}

pub(crate) struct Voice {
    pub format: WaveFormat,
    pub stream: Option<Box<dyn DecodeStream>>,
    pub bucket: Option<Bucket>,
    pub state: VoiceState,
    pub queue: VecDeque<Queued>,
    pub marker: u32,
    pub volume: f32,
    pub ratio: f32,
    pub looping: bool,
    pub group: Option<SubmixId>,
    /// Total bytes ever pushed to a live voice.
    pub live_submitted: u64,
    /// Cumulative bytes of all buckets whose consumption has begun.
    advanced: u64,
    /// Bytes consumed before the clock last started.
    played_base: u64,
    play_start: Option<Instant>,
}

impl Voice {
    pub fn new_streaming(stream: Box<dyn DecodeStream>, looping: bool) -> Self {
        Self {
            format: stream.format(),
            stream: Some(stream),
            bucket: Some(Bucket::new()),
            state: VoiceState::Stopped,
            queue: VecDeque::new(),
            marker: 0,
            volume: 1.0,
            ratio: 1.0,
            looping,
            group: None,
            live_submitted: 0,
            advanced: 0,
            played_base: 0,
            play_start: None,
        }
    }

    /// Live voices have no stream and no bucket ring; they start playing
    /// immediately and consume whatever the caller pushes.
    pub fn new_live(format: WaveFormat, now: Instant) -> Self {
        Self {
            format,
            stream: None,
            bucket: None,
            state: VoiceState::Playing,
            queue: VecDeque::new(),
            marker: 0,
            volume: 1.0,
            ratio: 1.0,
            looping: false,
            group: None,
            live_submitted: 0,
            advanced: 0,
            played_base: 0,
            play_start: Some(now),
        }
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_none()
    }

    /// Estimated bytes consumed since the last transport reset.
    pub fn bytes_played(&self, now: Instant) -> u64 {
        let running = match self.play_start {
            Some(start) => {
                let secs = now.saturating_duration_since(start).as_secs_f64();
                (secs * self.format.avg_bytes_per_sec() as f64 * self.ratio as f64)
                    as u64
            }
            None => 0,
        };
        self.played_base + running
    }

    /// Starts (or restarts) the consumption clock.
    pub fn begin(&mut self, now: Instant) {
        self.play_start = Some(now);
    }

    /// Stops the clock, banking consumption so far. Used by pause/suspend.
    pub fn freeze(&mut self, now: Instant) {
        self.played_base = self.bytes_played(now);
        self.play_start = None;
    }

    /// Changes the frequency ratio without disturbing past accounting.
    pub fn rebase_ratio(&mut self, now: Instant, ratio: f32) {
        if self.play_start.is_some() {
            self.played_base = self.bytes_played(now);
            self.play_start = Some(now);
        }
        self.ratio = ratio;
    }

    /// Advances consumption: pops every bucket whose playback has begun,
    /// updating the position marker. Live voices idle their clock while
    /// the queue is empty so silence is not counted as consumption.
    pub fn pump(&mut self, now: Instant) -> PumpOutcome {
        let mut outcome = PumpOutcome::default();
        if self.state != VoiceState::Playing {
            return outcome;
        }
        let played = self.bytes_played(now);
        while let Some(front) = self.queue.front() {
            if played < self.advanced {
                break;
            }
            self.advanced += front.len as u64;
            self.marker = front.marker;
            self.queue.pop_front();
            outcome.starts += 1;
        }
        if self.is_live() && self.queue.is_empty() && played >= self.advanced {
            self.played_base = self.advanced;
            self.play_start = Some(now);
        }
        outcome
    }

    /// True when a playing streaming voice has consumed everything it
    /// will ever get: queue empty and the clock past the last bucket.
    pub fn drained(&self, now: Instant) -> bool {
        self.state == VoiceState::Playing
            && !self.is_live()
            && self.queue.is_empty()
            && self.bytes_played(now) >= self.advanced
    }

    /// Reads one bucket from the stream into the next arena slot and
    /// queues it. Returns `None` when the stream has nothing left (the
    /// slot rotation still advances, matching the submission protocol).
    pub fn refill_next(&mut self) -> Option<RefillOut> {
        let stream = self.stream.as_mut()?;
        let bucket = self.bucket.as_mut()?;
        let slot = bucket.take_slot();
        let buf = bucket.slot_mut(slot);

        let mut pos = stream.tell();
        let mut len = stream.read_next(buf) as usize;
        if len == 0 && self.looping {
            stream.seek_bytes(0);
            pos = 0;
            len = stream.read_next(buf) as usize;
        }
        if len == 0 {
            return None;
        }
        let eos = !self.looping && len < BUCKET_LENGTH;
        self.queue.push_back(Queued {
            marker: pos + (len as u32) / 2,
            len: len as u32,
            eos,
        });
        Some(RefillOut { slot, len, eos })
    }

    /// Fills the queue up to one below the ring depth, the priming step
    /// of a fresh play. The held-back slot is refilled on the first
    /// buffer start.
    pub fn prime(&mut self) -> Vec<RefillOut> {
        let want = BUCKET_COUNT.saturating_sub(self.queue.len() + 1);
        let mut out = Vec::with_capacity(want);
        for _ in 0..want {
            match self.refill_next() {
                Some(r) => out.push(r),
                None => break,
            }
        }
        out
    }

    /// Pushes caller-provided bytes onto a live voice's queue. Markers
    /// saturate at `u32::MAX` once a long-lived voice has consumed past
    /// the 32-bit byte range.
    pub fn push_live(&mut self, len: u32) {
        let marker =
            (self.live_submitted + (len as u64) / 2).min(u32::MAX as u64) as u32;
        self.queue.push_back(Queued {
            marker,
            len,
            eos: false,
        });
        self.live_submitted += len as u64;
    }

    /// Unconsumed bytes on a live voice.
    pub fn live_buffer_left(&self, now: Instant) -> u32 {
        self.live_submitted
            .saturating_sub(self.bytes_played(now).min(self.live_submitted))
            as u32
    }

    /// Full transport reset: flush the queue, rewind, zero the clock.
    /// Explicit stop and implicit stream-end stop both land here.
    pub fn reset_transport(&mut self) {
        self.queue.clear();
        self.advanced = 0;
        self.played_base = 0;
        self.play_start = None;
        self.marker = 0;
        self.state = VoiceState::Stopped;
        if let Some(stream) = self.stream.as_mut() {
            stream.seek_bytes(0);
        }
    }

    /// Repositions the voice: flushes queued buckets, moves the decode
    /// cursor, and reports the new offset from the marker immediately.
    /// The caller restarts the clock and re-primes if it was playing.
    pub fn apply_seek(&mut self, target: u32) -> u32 {
        let aligned = match self.stream.as_mut() {
            Some(stream) => {
                let align = self.format.block_align().max(1);
                let clamped = (target.min(stream.length()) / align) * align;
                stream.seek_bytes(clamped)
            }
            None => return self.marker,
        };
        self.queue.clear();
        self.advanced = 0;
        self.played_base = 0;
        self.play_start = None;
        self.marker = aligned;
        aligned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Synthetic PCM source with a counting byte pattern.
    struct PcmStream {
        format: WaveFormat,
        len: u32,
        pos: u32,
    }

    impl PcmStream {
        fn new(len: u32) -> Self {
            Self {
                format: WaveFormat::pcm16(44100, 2),
                len,
                pos: 0,
            }
        }
    }

    impl DecodeStream for PcmStream {
        fn format(&self) -> WaveFormat {
            self.format
        }
        fn length(&self) -> u32 {
            self.len
        }
        fn tell(&mut self) -> u32 {
            self.pos
        }
        fn seek_bytes(&mut self, offset: u32) -> u32 {
            self.pos = offset.min(self.len);
            self.pos
        }
        fn read_next(&mut self, buf: &mut [u8]) -> u32 {
            let n = buf.len().min((self.len - self.pos) as usize) as u32;
            for (i, b) in buf[..n as usize].iter_mut().enumerate() {
                *b = (self.pos as usize + i) as u8;
            }
            self.pos += n;
            n
        }
    }

    fn streaming(len: u32) -> Voice {
        Voice::new_streaming(Box::new(PcmStream::new(len)), false)
    }

    const BUCKET: u32 = BUCKET_LENGTH as u32;

    #[test]
    fn prime_fills_one_below_ring_depth() {
        let mut v = streaming(10 * BUCKET);
        let refills = v.prime();
        assert_eq!(refills.len(), BUCKET_COUNT - 1);
        assert_eq!(v.queue.len(), BUCKET_COUNT - 1);
        // Midpoint markers of the first two buckets.
        assert_eq!(v.queue[0].marker, BUCKET / 2);
        assert_eq!(v.queue[1].marker, BUCKET + BUCKET / 2);
    }

    #[test]
    fn refill_slots_rotate() {
        let mut v = streaming(10 * BUCKET);
        let slots: Vec<usize> =
            (0..6).filter_map(|_| v.refill_next().map(|r| r.slot)).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn first_pump_starts_first_bucket_and_updates_marker() {
        let mut v = streaming(10 * BUCKET);
        v.prime();
        let base = Instant::now();
        v.state = VoiceState::Playing;
        v.begin(base);

        let outcome = v.pump(base);
        assert_eq!(outcome.starts, 1);
        assert_eq!(v.marker, BUCKET / 2);
        assert_eq!(v.queue.len(), BUCKET_COUNT - 2);
    }

    #[test]
    fn consumption_tracks_wall_clock_and_ratio() {
        let v = {
            let mut v = streaming(100 * BUCKET);
            v.state = VoiceState::Playing;
            v
        };
        let base = Instant::now();
        let mut v = v;
        v.begin(base);
        // 44.1 kHz stereo 16-bit consumes 176400 B/s.
        let played = v.bytes_played(base + Duration::from_millis(500));
        assert!((88_000..89_000).contains(&played), "played {played}");

        // Rebase banks the first 88,200 bytes; the next 500 ms run at
        // double rate, adding 176,400 more.
        v.rebase_ratio(base + Duration::from_millis(500), 2.0);
        let played = v.bytes_played(base + Duration::from_millis(1000));
        assert!((264_000..265_200).contains(&played), "played {played}");
    }

    #[test]
    fn freeze_halts_consumption() {
        let mut v = streaming(100 * BUCKET);
        let base = Instant::now();
        v.state = VoiceState::Playing;
        v.begin(base);
        v.freeze(base + Duration::from_millis(100));
        let banked = v.bytes_played(base + Duration::from_millis(100));
        assert_eq!(v.bytes_played(base + Duration::from_secs(10)), banked);
    }

    #[test]
    fn short_read_flags_end_of_stream() {
        let mut v = streaming(2 * BUCKET + 1000);
        assert!(!v.refill_next().unwrap().eos);
        assert!(!v.refill_next().unwrap().eos);
        let last = v.refill_next().unwrap();
        assert!(last.eos);
        assert_eq!(last.len, 1000);
        // Exhausted stream refuses to submit.
        assert!(v.refill_next().is_none());
    }

    #[test]
    fn exact_multiple_ends_with_empty_refill() {
        let mut v = streaming(2 * BUCKET);
        assert!(!v.refill_next().unwrap().eos);
        assert!(!v.refill_next().unwrap().eos);
        assert!(v.refill_next().is_none());
    }

    #[test]
    fn looping_wraps_instead_of_flagging_eos() {
        let mut v = Voice::new_streaming(Box::new(PcmStream::new(12_000)), true);
        let r1 = v.refill_next().unwrap();
        assert_eq!(r1.len, BUCKET_LENGTH);
        let r2 = v.refill_next().unwrap();
        assert_eq!(r2.len, 12_000 - BUCKET_LENGTH);
        assert!(!r2.eos);
        // Wrap: read hits EOF, rewinds, reads a full bucket from 0.
        let r3 = v.refill_next().unwrap();
        assert_eq!(r3.len, BUCKET_LENGTH);
        assert_eq!(v.queue.back().unwrap().marker, BUCKET / 2);
    }

    #[test]
    fn drained_after_queue_empties() {
        let mut v = streaming(1000);
        v.prime();
        assert_eq!(v.queue.len(), 1);
        let base = Instant::now();
        v.state = VoiceState::Playing;
        v.begin(base);
        v.pump(base);
        assert!(!v.drained(base));
        // 1000 bytes last ~5.7 ms at 176400 B/s.
        let later = base + Duration::from_millis(50);
        v.pump(later);
        assert!(v.drained(later));
        v.reset_transport();
        assert_eq!(v.state, VoiceState::Stopped);
        assert_eq!(v.marker, 0);
        assert_eq!(v.stream.as_mut().unwrap().tell(), 0);
    }

    #[test]
    fn seek_flushes_and_reports_aligned_position() {
        let mut v = streaming(10 * BUCKET);
        v.prime();
        let got = v.apply_seek(BUCKET + 3); // not frame aligned
        assert_eq!(got % v.format.block_align(), 0);
        assert_eq!(got, BUCKET);
        assert!(v.queue.is_empty());
        assert_eq!(v.marker, BUCKET);
        // Next refill reads from the new cursor.
        let _ = v.refill_next().unwrap();
        assert_eq!(v.queue[0].marker, BUCKET + BUCKET / 2);
    }

    #[test]
    fn seek_past_end_clamps_to_length() {
        let mut v = streaming(5000);
        let got = v.apply_seek(1_000_000);
        assert!(got <= 5000);
        assert_eq!(got % v.format.block_align(), 0);
    }

    #[test]
    fn live_voice_idles_clock_and_tracks_backpressure() {
        let base = Instant::now();
        let mut v = Voice::new_live(WaveFormat::pcm16(44100, 2), base);
        // A long silent gap consumes nothing.
        let t1 = base + Duration::from_secs(5);
        v.pump(t1);
        assert_eq!(v.live_buffer_left(t1), 0);

        v.push_live(17_640); // 100 ms worth
        assert_eq!(v.live_buffer_left(t1), 17_640);
        v.pump(t1);
        assert_eq!(v.marker, 17_640 / 2);

        // Half consumed after 50 ms.
        let t2 = t1 + Duration::from_millis(50);
        let left = v.live_buffer_left(t2);
        assert!((8_000..10_000).contains(&left), "left {left}");

        // Fully drained after 100 ms, and stays drained.
        let t3 = t1 + Duration::from_millis(150);
        v.pump(t3);
        assert_eq!(v.live_buffer_left(t3), 0);
        assert_eq!(v.state, VoiceState::Playing);
    }

    #[test]
    fn live_markers_accumulate_across_submissions() {
        let base = Instant::now();
        let mut v = Voice::new_live(WaveFormat::pcm16(22050, 1), base);
        v.push_live(1000);
        v.push_live(2000);
        assert_eq!(v.queue[0].marker, 500);
        assert_eq!(v.queue[1].marker, 2000);
        assert_eq!(v.live_submitted, 3000);
    }

    #[test]
    fn live_marker_saturates_past_the_32_bit_range() {
        let base = Instant::now();
        let mut v = Voice::new_live(WaveFormat::pcm16(44100, 2), base);
        v.live_submitted = u32::MAX as u64 - 100;
        v.push_live(1000);
        // Submission totals keep counting in 64 bits; the reported
        // marker pins to the top of the 32-bit range instead of wrapping.
        assert_eq!(v.queue[0].marker, u32::MAX);
        assert_eq!(v.live_submitted, u32::MAX as u64 + 900);
    }
}
