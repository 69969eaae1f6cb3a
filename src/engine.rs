//! Engine lifecycle, the fixed group table, and the clip factories.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{init_backend, AudioApi, ClipCtxSpec, SubmixId};
use crate::base::{ApiLevel, ClipFlags, WaveFormat, MAX_GROUP_COUNT};
use crate::clip::Clip;
use crate::config::{Configure, DefaultConfigure};
use crate::decode::{open_decode_stream, DecodeStream};
use crate::error::{AudioError, AudioResult};
use crate::group::{truncate_name, AudioGroup};
use crate::stream::{ByteStream, FileStream};

/// The engine owns the backend and the group table. Clip factories never
/// fail loudly: a clip that cannot be built comes back null, with the
/// reason logged.
pub struct AudioEngine {
    api: Option<Arc<dyn AudioApi>>,
    groups: [Option<AudioGroup>; MAX_GROUP_COUNT],
}

impl AudioEngine {
    pub fn new() -> Self {
        Self {
            api: None,
            groups: Default::default(),
        }
    }

    /// Brings the backend up at the requested level. `None` config uses
    /// the default device with inline refills.
    pub fn initialize(
        &mut self,
        config: Option<Arc<dyn Configure>>,
        level: ApiLevel,
    ) -> AudioResult<()> {
        if self.api.is_some() {
            return Err(AudioError::InvalidState("engine already initialized"));
        }
        let config = config.unwrap_or_else(|| Arc::new(DefaultConfigure));
        let api = init_backend(&config, level)?;
        debug!(level = ?api.level(), "audio engine initialized");
        self.api = Some(api);
        Ok(())
    }

    /// Tears down every group and shuts the backend thread down. Live
    /// clip handles survive as inert handles.
    pub fn uninitialize(&mut self) {
        let Some(api) = self.api.take() else {
            return;
        };
        for slot in self.groups.iter_mut() {
            if let Some(group) = slot.take() {
                api.dispose_group(group.submix());
            }
        }
        api.shutdown();
        debug!("audio engine uninitialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.api.is_some()
    }

    /// The backend level actually running.
    pub fn level(&self) -> Option<ApiLevel> {
        self.api.as_ref().map(|api| api.level())
    }

    /// Freezes consumption across all voices.
    pub fn suspend(&self) {
        if let Some(api) = &self.api {
            api.suspend();
        }
    }

    pub fn resume(&self) {
        if let Some(api) = &self.api {
            api.resume();
        }
    }

    /// Finds a group by exact name. The table is dense: the scan stops
    /// at the first empty slot.
    pub fn find_group(&self, name: &str) -> Option<&AudioGroup> {
        let index = self.group_index(name)?;
        self.groups[index].as_ref()
    }

    /// Creates a group bound to a fresh backend submix, or returns the
    /// existing group carrying this name. `None` when the table is full
    /// or the engine is down.
    pub fn create_empty_group(&mut self, name: &str) -> Option<&AudioGroup> {
        if name.is_empty() {
            return None;
        }
        let api = self.api.as_ref()?.clone();
        let name = truncate_name(name);

        if let Some(index) = self.group_index(&name) {
            return self.groups[index].as_ref();
        }
        let empty = self.groups.iter().position(|g| g.is_none())?;
        let submix = match api.create_group() {
            Ok(s) => s,
            Err(e) => {
                warn!("group {name:?} not created: {e}");
                return None;
            }
        };
        debug!(name, slot = empty, "group created");
        self.groups[empty] = Some(AudioGroup::new(name, submix, api));
        self.groups[empty].as_ref()
    }

    fn group_index(&self, name: &str) -> Option<usize> {
        for (i, slot) in self.groups.iter().enumerate() {
            match slot {
                Some(group) if group.name() == name => return Some(i),
                Some(_) => {}
                None => return None,
            }
        }
        None
    }

    fn resolve_group(&mut self, name: Option<&str>) -> Option<SubmixId> {
        let name = name?;
        match self.create_empty_group(name) {
            Some(group) => Some(group.submix()),
            None => {
                warn!("group {name:?} unavailable, clip stays ungrouped");
                None
            }
        }
    }

    /// Opens a file, sniffs its container, and builds a streaming clip.
    pub fn create_clip_from_file(
        &mut self,
        flags: ClipFlags,
        path: impl AsRef<Path>,
        group: Option<&str>,
    ) -> Clip {
        let path = path.as_ref();
        match FileStream::open(path) {
            Ok(stream) => self.create_clip_from_stream(flags, Box::new(stream), group),
            Err(e) => {
                warn!("clip from {}: {e}", path.display());
                Clip::null()
            }
        }
    }

    /// Sniffs the byte stream's container and builds a streaming clip.
    pub fn create_clip_from_stream(
        &mut self,
        flags: ClipFlags,
        stream: Box<dyn ByteStream>,
        group: Option<&str>,
    ) -> Clip {
        match open_decode_stream(stream) {
            Ok(decoded) => self.create_clip_from_decode_stream(flags, decoded, group),
            Err(e) => {
                warn!("clip from byte stream: {e}");
                Clip::null()
            }
        }
    }

    /// Builds a streaming clip from an already-decoded source.
    pub fn create_clip_from_decode_stream(
        &mut self,
        flags: ClipFlags,
        stream: Box<dyn DecodeStream>,
        group: Option<&str>,
    ) -> Clip {
        let Some(api) = self.api.clone() else {
            warn!("clip factory called before initialize");
            return Clip::null();
        };
        let submix = self.resolve_group(group);
        let format = stream.format();
        let length = stream.length();
        let spec = ClipCtxSpec {
            format,
            stream: Some(stream),
            looping: flags.contains(ClipFlags::LOOPING),
            group: submix,
        };
        match api.make_clip_ctx(spec) {
            Ok(voice) => Clip::new(api, voice, format, length, flags),
            Err(e) => {
                warn!("voice creation failed: {e}");
                Clip::null()
            }
        }
    }

    /// Builds a push-mode clip: the caller submits PCM buffers, playback
    /// starts immediately as data arrives.
    pub fn create_live_clip(&mut self, format: WaveFormat, group: Option<&str>) -> Clip {
        let Some(api) = self.api.clone() else {
            warn!("clip factory called before initialize");
            return Clip::null();
        };
        let submix = self.resolve_group(group);
        let spec = ClipCtxSpec {
            format,
            stream: None,
            looping: false,
            group: submix,
        };
        match api.make_clip_ctx(spec) {
            Ok(voice) => Clip::new(api, voice, format, 0, ClipFlags::LIVE),
            Err(e) => {
                warn!("live voice creation failed: {e}");
                Clip::null()
            }
        }
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.uninitialize();
    }
}
