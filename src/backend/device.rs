//! Real-device output via rodio: one `Sink` per voice, byte buckets
//! converted to sample buffers on submission.

use rodio::buffer::SamplesBuffer;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, error, warn};

use crate::backend::output::Output;
use crate::base::{ApiLevel, FormatTag, WaveFormat};
use crate::error::{AudioError, AudioResult};

pub(crate) struct DeviceOutput {
    // Keeps the device stream alive for as long as the backend runs.
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

pub(crate) struct DeviceVoice {
    /// `None` only if a sink rebuild after `flush` failed.
    sink: Option<Sink>,
    volume: f32,
    ratio: f32,
    paused: bool,
}

impl DeviceOutput {
    fn open_named(name: &str) -> Option<(OutputStream, OutputStreamHandle)> {
        let host = rodio::cpal::default_host();
        let devices = match host.output_devices() {
            Ok(d) => d,
            Err(e) => {
                warn!("output device enumeration failed: {e}");
                return None;
            }
        };
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                match OutputStream::try_from_device(&device) {
                    Ok(pair) => return Some(pair),
                    Err(e) => {
                        warn!("picked device {name:?} refused to open: {e}");
                        return None;
                    }
                }
            }
        }
        warn!("picked device {name:?} not present, using default");
        None
    }

    fn apply(&self, voice: &mut DeviceVoice) {
        if let Some(sink) = &voice.sink {
            sink.set_volume(voice.volume);
            sink.set_speed(voice.ratio);
            if voice.paused {
                sink.pause();
            } else {
                sink.play();
            }
        }
    }
}

impl Output for DeviceOutput {
    type Voice = DeviceVoice;

    fn open(device: Option<&str>) -> AudioResult<Self> {
        let named = device.and_then(Self::open_named);
        let (stream, handle) = match named {
            Some(pair) => pair,
            None => OutputStream::try_default().map_err(|e| {
                AudioError::BackendInitFailed(format!("no output device: {e}"))
            })?,
        };
        debug!("device output opened");
        Ok(Self {
            _stream: stream,
            handle,
        })
    }

    fn level() -> ApiLevel {
        ApiLevel::Device
    }

    fn create_voice(&mut self, _format: &WaveFormat) -> AudioResult<DeviceVoice> {
        let sink = Sink::try_new(&self.handle)
            .map_err(|_| AudioError::OutOfResources("device voice"))?;
        sink.pause();
        Ok(DeviceVoice {
            sink: Some(sink),
            volume: 1.0,
            ratio: 1.0,
            paused: true,
        })
    }

    fn destroy_voice(&mut self, voice: DeviceVoice) {
        if let Some(sink) = voice.sink {
            sink.stop();
        }
    }

    fn start(&mut self, voice: &mut DeviceVoice) {
        voice.paused = false;
        if let Some(sink) = &voice.sink {
            sink.play();
        }
    }

    fn pause(&mut self, voice: &mut DeviceVoice) {
        voice.paused = true;
        if let Some(sink) = &voice.sink {
            sink.pause();
        }
    }

    fn flush(&mut self, voice: &mut DeviceVoice) {
        // rodio cannot drop queued sources from a sink; rebuild it.
        if let Some(sink) = voice.sink.take() {
            sink.stop();
        }
        match Sink::try_new(&self.handle) {
            Ok(sink) => {
                voice.sink = Some(sink);
                self.apply(voice);
            }
            Err(e) => error!("voice sink rebuild failed, voice is dead: {e}"),
        }
    }

    fn submit(&mut self, voice: &mut DeviceVoice, format: &WaveFormat, data: &[u8]) {
        let Some(sink) = &voice.sink else {
            return;
        };
        let channels = format.channels as u16;
        let rate = format.samples_per_sec;
        match (format.fmt_tag, format.bits_per_sample) {
            (FormatTag::Pcm, 16) => {
                let samples: Vec<i16> = data
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect();
                sink.append(SamplesBuffer::new(channels, rate, samples));
            }
            (FormatTag::Pcm, 8) => {
                // Unsigned 8-bit PCM recentered to signed 16-bit.
                let samples: Vec<i16> = data
                    .iter()
                    .map(|&b| ((b as i16) - 128) << 8)
                    .collect();
                sink.append(SamplesBuffer::new(channels, rate, samples));
            }
            (FormatTag::IeeeFloat, 32) => {
                let samples: Vec<f32> = data
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                sink.append(SamplesBuffer::new(channels, rate, samples));
            }
            (tag, bits) => {
                warn!("dropping bucket with unplayable format {tag:?}/{bits}");
            }
        }
    }

    fn set_volume(&mut self, voice: &mut DeviceVoice, volume: f32) {
        voice.volume = volume;
        if let Some(sink) = &voice.sink {
            sink.set_volume(volume);
        }
    }

    fn set_ratio(&mut self, voice: &mut DeviceVoice, ratio: f32) {
        voice.ratio = ratio;
        if let Some(sink) = &voice.sink {
            sink.set_speed(ratio);
        }
    }
}
