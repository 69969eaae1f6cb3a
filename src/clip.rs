//! Clip handles: the public transport surface.
//!
//! A `Clip` is nullsafe: factories return a null handle instead of
//! failing, and every operation on a null (or backend-less) clip is a
//! no-op returning a zero-valued default. Time is expressed in seconds;
//! conversion to decoded byte offsets happens here.

use std::sync::Arc;

use tracing::warn;

use crate::backend::{AudioApi, VoiceId};
use crate::base::{ClipFlags, WaveFormat};

pub struct Clip {
    inner: Option<ClipInner>,
}

struct ClipInner {
    api: Arc<dyn AudioApi>,
    voice: VoiceId,
    format: WaveFormat,
    /// Total decoded length in bytes; 0 for live clips.
    length: u32,
    flags: ClipFlags,
}

impl Clip {
    pub(crate) fn new(
        api: Arc<dyn AudioApi>,
        voice: VoiceId,
        format: WaveFormat,
        length: u32,
        flags: ClipFlags,
    ) -> Self {
        Self {
            inner: Some(ClipInner {
                api,
                voice,
                format,
                length,
                flags,
            }),
        }
    }

    /// The handle every failed factory returns.
    pub fn null() -> Self {
        Self { inner: None }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    pub fn is_live(&self) -> bool {
        self.inner
            .as_ref()
            .map(|i| i.flags.contains(ClipFlags::LIVE))
            .unwrap_or(false)
    }

    /// Decoded wave format, if the clip is real.
    pub fn format(&self) -> Option<WaveFormat> {
        self.inner.as_ref().map(|i| i.format)
    }

    /// Total length in seconds; 0 for null and live clips.
    pub fn duration(&self) -> f64 {
        match &self.inner {
            Some(i) => i.format.bytes_to_seconds(i.length as u64),
            None => 0.0,
        }
    }

    /// Starts playback, or resumes it after a pause.
    pub fn play(&self) {
        if let Some(i) = &self.inner {
            i.api.play_clip(i.voice);
        }
    }

    /// Halts playback keeping the position.
    pub fn pause(&self) {
        if let Some(i) = &self.inner {
            i.api.pause_clip(i.voice);
        }
    }

    /// Halts playback and rewinds to the beginning.
    pub fn stop(&self) {
        if let Some(i) = &self.inner {
            i.api.stop_clip(i.voice);
        }
    }

    /// Repositions to `seconds` from the start, frame aligned. Takes
    /// effect immediately, whether playing, paused, or stopped.
    pub fn seek(&self, seconds: f64) {
        if let Some(i) = &self.inner {
            let bytes = i
                .format
                .seconds_to_bytes(seconds)
                .min(i.length as u64) as u32;
            i.api.seek_clip(i.voice, bytes);
        }
    }

    /// Playback position in seconds: the midpoint marker of the bucket
    /// currently being consumed.
    pub fn tell(&self) -> f64 {
        match &self.inner {
            Some(i) => i.format.bytes_to_seconds(i.api.tell_clip(i.voice) as u64),
            None => 0.0,
        }
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(i) = &self.inner {
            i.api.volume_clip(i.voice, Some(volume));
        }
    }

    pub fn volume(&self) -> f32 {
        match &self.inner {
            Some(i) => i.api.volume_clip(i.voice, None),
            None => 0.0,
        }
    }

    /// Playback rate multiplier; consumption accounting scales with it.
    pub fn set_frequency_ratio(&self, ratio: f32) {
        if let Some(i) = &self.inner {
            i.api.ratio_clip(i.voice, Some(ratio));
        }
    }

    pub fn frequency_ratio(&self) -> f32 {
        match &self.inner {
            Some(i) => i.api.ratio_clip(i.voice, None),
            None => 0.0,
        }
    }

    /// When looping, stream exhaustion rewinds and keeps refilling
    /// instead of stopping.
    pub fn set_loop(&self, looping: bool) {
        if let Some(i) = &self.inner {
            i.api.set_clip_loop(i.voice, looping);
        }
    }

    /// Unconsumed bytes on a live clip; 0 otherwise.
    pub fn live_buffer_left(&self) -> u32 {
        match &self.inner {
            Some(i) if i.flags.contains(ClipFlags::LIVE) => {
                i.api.live_buffer_left(i.voice)
            }
            _ => 0,
        }
    }

    /// Queues caller-owned bytes on a live clip. The shared buffer is
    /// consumed without copying; the caller may hold onto its clone.
    pub fn submit_live_buffer(&self, data: Arc<[u8]>) {
        match &self.inner {
            Some(i) if i.flags.contains(ClipFlags::LIVE) => {
                i.api.submit_live(i.voice, data);
            }
            Some(_) => warn!("live submit on a streaming clip, ignored"),
            None => {}
        }
    }

    /// Tears the clip down synchronously. Dropping the handle does the
    /// same; this form just makes the teardown point explicit.
    pub fn destroy(self) {}
}

impl Drop for Clip {
    fn drop(&mut self) {
        if let Some(i) = self.inner.take() {
            i.api.dispose_clip_ctx(i.voice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_clip_is_inert() {
        let c = Clip::null();
        assert!(c.is_null());
        assert!(!c.is_live());
        c.play();
        c.pause();
        c.stop();
        c.seek(12.5);
        c.set_volume(0.5);
        c.set_loop(true);
        assert_eq!(c.tell(), 0.0);
        assert_eq!(c.duration(), 0.0);
        assert_eq!(c.volume(), 0.0);
        assert_eq!(c.frequency_ratio(), 0.0);
        assert_eq!(c.live_buffer_left(), 0);
        c.submit_live_buffer(vec![0u8; 4].into());
        assert!(c.format().is_none());
        c.destroy();
    }
}
