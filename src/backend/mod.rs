//! Backend layer: one shared command-thread implementation driving either
//! a real device output or the headless fallback.

pub(crate) mod bucket;
pub(crate) mod device;
pub(crate) mod output;
pub(crate) mod voice;
pub(crate) mod worker;

use std::sync::Arc;

use tracing::warn;

use crate::base::{ApiLevel, WaveFormat};
use crate::config::Configure;
use crate::decode::DecodeStream;
use crate::error::{AudioError, AudioResult};

use device::DeviceOutput;
use output::HeadlessOutput;
use worker::Backend;

/// Handle into the backend's voice table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VoiceId(pub u64);

/// Handle to a backend submix (group volume node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubmixId(pub u32);

/// Everything the backend needs to stand up one voice.
pub(crate) struct ClipCtxSpec {
    pub format: WaveFormat,
    /// `None` builds a live (push-mode) voice.
    pub stream: Option<Box<dyn DecodeStream>>,
    pub looping: bool,
    pub group: Option<SubmixId>,
}

/// Operation set the engine and clips program against. Commands are
/// fire-and-forget; queries and teardown block on a reply from the
/// backend thread.
pub(crate) trait AudioApi: Send + Sync {
    fn level(&self) -> ApiLevel;

    fn suspend(&self);
    fn resume(&self);
    fn shutdown(&self);

    fn make_clip_ctx(&self, spec: ClipCtxSpec) -> AudioResult<VoiceId>;
    /// Synchronous: returns only after the voice is fully torn down.
    fn dispose_clip_ctx(&self, voice: VoiceId);

    fn play_clip(&self, voice: VoiceId);
    fn pause_clip(&self, voice: VoiceId);
    fn stop_clip(&self, voice: VoiceId);
    fn seek_clip(&self, voice: VoiceId, offset: u32);
    fn tell_clip(&self, voice: VoiceId) -> u32;

    /// Get-or-set: `Some` stores and echoes, `None` reads.
    fn volume_clip(&self, voice: VoiceId, set: Option<f32>) -> f32;
    fn ratio_clip(&self, voice: VoiceId, set: Option<f32>) -> f32;
    fn set_clip_loop(&self, voice: VoiceId, looping: bool);

    fn live_buffer_left(&self, voice: VoiceId) -> u32;
    fn submit_live(&self, voice: VoiceId, data: Arc<[u8]>);

    fn create_group(&self) -> AudioResult<SubmixId>;
    fn dispose_group(&self, group: SubmixId);
    fn group_volume(&self, group: SubmixId, set: Option<f32>) -> f32;
}

/// Brings up the requested backend level. `Auto` probes the device
/// output first and falls back to headless, failing only if both refuse.
pub(crate) fn init_backend(
    config: &Arc<dyn Configure>,
    level: ApiLevel,
) -> AudioResult<Arc<dyn AudioApi>> {
    match level {
        ApiLevel::Device => {
            Ok(Arc::new(Backend::<DeviceOutput>::init(config.clone())?))
        }
        ApiLevel::Headless => {
            Ok(Arc::new(Backend::<HeadlessOutput>::init(config.clone())?))
        }
        ApiLevel::Auto => match Backend::<DeviceOutput>::init(config.clone()) {
            Ok(backend) => Ok(Arc::new(backend)),
            Err(e) => {
                warn!("device backend unavailable ({e}), trying headless");
                Backend::<HeadlessOutput>::init(config.clone())
                    .map(|b| Arc::new(b) as Arc<dyn AudioApi>)
                    .map_err(|e| {
                        AudioError::BackendInitFailed(format!(
                            "no backend level available: {e}"
                        ))
                    })
            }
        },
    }
}
