//! Output seam between the shared backend and whatever renders audio.
//!
//! Two implementations exist: `DeviceOutput` (rodio, in `device.rs`) and
//! the headless fallback below, which accepts everything and renders
//! nothing. Consumption accounting lives in the voice layer, so the
//! headless backend still honors transport semantics and timing.

use crate::base::{ApiLevel, WaveFormat};
use crate::error::AudioResult;

/// One render sink per voice. Outputs are created on the backend thread
/// and never leave it, so neither the output nor its voices need `Send`.
pub(crate) trait Output: Sized + 'static {
    type Voice;

    fn open(device: Option<&str>) -> AudioResult<Self>;

    fn level() -> ApiLevel;

    fn create_voice(&mut self, format: &WaveFormat) -> AudioResult<Self::Voice>;

    fn destroy_voice(&mut self, voice: Self::Voice);

    /// Begin or resume rendering.
    fn start(&mut self, voice: &mut Self::Voice);

    /// Halt rendering, keeping queued data.
    fn pause(&mut self, voice: &mut Self::Voice);

    /// Drop all queued data.
    fn flush(&mut self, voice: &mut Self::Voice);

    fn submit(&mut self, voice: &mut Self::Voice, format: &WaveFormat, data: &[u8]);

    fn set_volume(&mut self, voice: &mut Self::Voice, volume: f32);

    fn set_ratio(&mut self, voice: &mut Self::Voice, ratio: f32);
}

/// Accounting-only output: always opens, renders silence.
pub(crate) struct HeadlessOutput;

impl Output for HeadlessOutput {
    type Voice = ();

    fn open(_device: Option<&str>) -> AudioResult<Self> {
        Ok(HeadlessOutput)
    }

    fn level() -> ApiLevel {
        ApiLevel::Headless
    }

    fn create_voice(&mut self, _format: &WaveFormat) -> AudioResult<()> {
        Ok(())
    }

    fn destroy_voice(&mut self, _voice: ()) {}
    fn start(&mut self, _voice: &mut ()) {}
    fn pause(&mut self, _voice: &mut ()) {}
    fn flush(&mut self, _voice: &mut ()) {}
    fn submit(&mut self, _voice: &mut (), _format: &WaveFormat, _data: &[u8]) {}
    fn set_volume(&mut self, _voice: &mut (), _volume: f32) {}
    fn set_ratio(&mut self, _voice: &mut (), _ratio: f32) {}
}
