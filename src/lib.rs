//! clipstream: a streaming audio clip engine.
//!
//! Compressed audio (Ogg Vorbis, FLAC) is pulled through a small ring of
//! fixed buckets into a per-clip voice, giving low-latency playback with
//! bounded memory per clip. Clips expose a seconds-based transport
//! (play/pause/stop/seek/tell, volume, frequency ratio, looping), can be
//! grouped onto named submix buses, and can run in push mode where the
//! caller submits raw PCM.
//!
//! The backend runs on its own thread. `ApiLevel::Auto` drives a real
//! output device when one exists and falls back to a headless backend
//! with identical transport semantics, which is also what the test suite
//! runs against.
//!
//! ```no_run
//! use clipstream::{ApiLevel, AudioEngine, ClipFlags};
//!
//! let mut engine = AudioEngine::new();
//! engine.initialize(None, ApiLevel::Auto)?;
//! let clip = engine.create_clip_from_file(ClipFlags::NONE, "intro.ogg", Some("BGM"));
//! clip.play();
//! # Ok::<(), clipstream::AudioError>(())
//! ```

mod backend;
pub mod base;
pub mod clip;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod group;
pub mod stream;

pub use base::{
    ApiLevel, ClipFlags, FormatTag, WaveFormat, AUDIO_HEADER_PEEK_LENGTH,
    BUCKET_COUNT, BUCKET_LENGTH, MAX_GROUP_COUNT, MAX_GROUP_NAME_LENGTH,
};
pub use clip::Clip;
pub use config::{Configure, DefaultConfigure};
pub use decode::{open_decode_stream, DecodeStream};
pub use engine::AudioEngine;
pub use error::{AudioError, AudioResult};
pub use group::AudioGroup;
pub use stream::{ByteStream, FileStream, MemoryStream, SeekOrigin};
