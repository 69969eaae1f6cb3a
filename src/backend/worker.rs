//! The backend thread: a command loop with a periodic pump that advances
//! consumption accounting and fires bucket refills.
//!
//! The output (and its device handles) is created on this thread and
//! never leaves it; callers talk to it through `Backend`, which wraps
//! the command channel behind the `AudioApi` trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::output::Output;
use crate::backend::voice::{RefillOut, Voice, VoiceState};
use crate::backend::{AudioApi, ClipCtxSpec, SubmixId, VoiceId};
use crate::base::ApiLevel;
use crate::config::Configure;
use crate::error::{AudioError, AudioResult};

/// Pump cadence; well under one bucket duration at typical rates.
const PUMP_TICK: Duration = Duration::from_millis(5);
/// How long callers wait for query replies before giving up.
const REPLY_TIMEOUT: Duration = Duration::from_millis(500);
/// Backend thread startup handshake deadline.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum Command {
    MakeVoice(ClipCtxSpec, Sender<AudioResult<VoiceId>>),
    DisposeVoice(VoiceId, Sender<()>),
    Play(VoiceId),
    Pause(VoiceId),
    Stop(VoiceId),
    Seek(VoiceId, u32),
    Tell(VoiceId, Sender<u32>),
    Volume(VoiceId, Option<f32>, Sender<f32>),
    Ratio(VoiceId, Option<f32>, Sender<f32>),
    SetLoop(VoiceId, bool),
    LiveSubmit(VoiceId, Arc<[u8]>),
    LiveBufferLeft(VoiceId, Sender<u32>),
    CreateGroup(Sender<AudioResult<SubmixId>>),
    DisposeGroup(SubmixId),
    GroupVolume(SubmixId, Option<f32>, Sender<f32>),
    Suspend,
    Resume,
    Shutdown(Sender<()>),
}

/// Caller-side handle; implements `AudioApi` over the command channel.
pub(crate) struct Backend<O: Output> {
    tx: Sender<Command>,
    join: Mutex<Option<JoinHandle<()>>>,
    _output: std::marker::PhantomData<fn() -> O>,
}

impl<O: Output> Backend<O> {
    /// Spawns the backend thread and waits for its output to open.
    pub fn init(config: Arc<dyn Configure>) -> AudioResult<Self> {
        let (tx, rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let device = config.pick_device();
        let join = thread::Builder::new()
            .name("clipstream-backend".into())
            .spawn(move || match O::open(device.as_deref()) {
                Ok(output) => {
                    let _ = ready_tx.send(Ok(()));
                    Worker::new(output, config).run(rx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| {
                AudioError::BackendInitFailed(format!("thread spawn: {e}"))
            })?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                tx,
                join: Mutex::new(Some(join)),
                _output: std::marker::PhantomData,
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err(AudioError::BackendInitFailed(
                "backend thread did not come up".into(),
            )),
        }
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            warn!("audio backend is gone, command dropped");
        }
    }

    /// Sends a query and waits briefly for the reply; a dead or wedged
    /// backend yields the zero-valued default.
    fn query<T>(&self, make: impl FnOnce(Sender<T>) -> Command, default: T) -> T {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(make(reply_tx)).is_err() {
            return default;
        }
        match reply_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(v) => v,
            Err(_) => {
                warn!("audio backend query timed out");
                default
            }
        }
    }
}

impl<O: Output> AudioApi for Backend<O> {
    fn level(&self) -> ApiLevel {
        O::level()
    }

    fn suspend(&self) {
        self.send(Command::Suspend);
    }

    fn resume(&self) {
        self.send(Command::Resume);
    }

    fn shutdown(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(OPEN_TIMEOUT);
        }
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }

    fn make_clip_ctx(&self, spec: ClipCtxSpec) -> AudioResult<VoiceId> {
        self.query(
            |tx| Command::MakeVoice(spec, tx),
            Err(AudioError::InvalidState("audio backend offline")),
        )
    }

    fn dispose_clip_ctx(&self, voice: VoiceId) {
        self.query(|tx| Command::DisposeVoice(voice, tx), ());
    }

    fn play_clip(&self, voice: VoiceId) {
        self.send(Command::Play(voice));
    }

    fn pause_clip(&self, voice: VoiceId) {
        self.send(Command::Pause(voice));
    }

    fn stop_clip(&self, voice: VoiceId) {
        self.send(Command::Stop(voice));
    }

    fn seek_clip(&self, voice: VoiceId, offset: u32) {
        self.send(Command::Seek(voice, offset));
    }

    fn tell_clip(&self, voice: VoiceId) -> u32 {
        self.query(|tx| Command::Tell(voice, tx), 0)
    }

    fn volume_clip(&self, voice: VoiceId, set: Option<f32>) -> f32 {
        self.query(|tx| Command::Volume(voice, set, tx), 0.0)
    }

    fn ratio_clip(&self, voice: VoiceId, set: Option<f32>) -> f32 {
        self.query(|tx| Command::Ratio(voice, set, tx), 0.0)
    }

    fn set_clip_loop(&self, voice: VoiceId, looping: bool) {
        self.send(Command::SetLoop(voice, looping));
    }

    fn live_buffer_left(&self, voice: VoiceId) -> u32 {
        self.query(|tx| Command::LiveBufferLeft(voice, tx), 0)
    }

    fn submit_live(&self, voice: VoiceId, data: Arc<[u8]>) {
        self.send(Command::LiveSubmit(voice, data));
    }

    fn create_group(&self) -> AudioResult<SubmixId> {
        self.query(
            Command::CreateGroup,
            Err(AudioError::InvalidState("audio backend offline")),
        )
    }

    fn dispose_group(&self, group: SubmixId) {
        self.send(Command::DisposeGroup(group));
    }

    fn group_volume(&self, group: SubmixId, set: Option<f32>) -> f32 {
        self.query(|tx| Command::GroupVolume(group, set, tx), 0.0)
    }
}

impl<O: Output> Drop for Backend<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Entry<V> {
    voice: Voice,
    out: V,
}

struct Worker<O: Output> {
    output: O,
    config: Arc<dyn Configure>,
    voices: HashMap<u64, Entry<O::Voice>>,
    groups: HashMap<u32, f32>,
    next_voice: u64,
    next_group: u32,
    suspended: bool,
}

impl<O: Output> Worker<O> {
    fn new(output: O, config: Arc<dyn Configure>) -> Self {
        Self {
            output,
            config,
            voices: HashMap::new(),
            groups: HashMap::new(),
            next_voice: 1,
            next_group: 1,
            suspended: false,
        }
    }

    fn run(mut self, rx: Receiver<Command>) {
        debug!(level = ?O::level(), "audio backend thread up");
        loop {
            match rx.recv_timeout(PUMP_TICK) {
                Ok(Command::Shutdown(ack)) => {
                    self.teardown();
                    let _ = ack.send(());
                    break;
                }
                Ok(cmd) => self.handle(cmd),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.teardown();
                    break;
                }
            }
            self.pump(Instant::now());
        }
        debug!("audio backend thread down");
    }

    fn teardown(&mut self) {
        for (_, entry) in self.voices.drain() {
            self.output.destroy_voice(entry.out);
        }
        self.groups.clear();
    }

    fn group_volume_of(groups: &HashMap<u32, f32>, group: Option<SubmixId>) -> f32 {
        group
            .and_then(|g| groups.get(&g.0).copied())
            .unwrap_or(1.0)
    }

    fn handle(&mut self, cmd: Command) {
        let now = Instant::now();
        match cmd {
            Command::MakeVoice(spec, reply) => {
                let _ = reply.send(self.make_voice(spec, now));
            }
            Command::DisposeVoice(id, ack) => {
                if let Some(entry) = self.voices.remove(&id.0) {
                    self.output.destroy_voice(entry.out);
                }
                let _ = ack.send(());
            }
            Command::Play(id) => self.play(id, now),
            Command::Pause(id) => {
                if let Some(entry) = self.voices.get_mut(&id.0) {
                    if entry.voice.state == VoiceState::Playing {
                        entry.voice.freeze(now);
                        entry.voice.state = VoiceState::Paused;
                        self.output.pause(&mut entry.out);
                    }
                }
            }
            Command::Stop(id) => {
                if let Some(entry) = self.voices.get_mut(&id.0) {
                    entry.voice.reset_transport();
                    self.output.flush(&mut entry.out);
                    self.output.pause(&mut entry.out);
                }
            }
            Command::Seek(id, offset) => self.seek(id, offset, now),
            Command::Tell(id, reply) => {
                let marker = self
                    .voices
                    .get(&id.0)
                    .map(|e| e.voice.marker)
                    .unwrap_or(0);
                let _ = reply.send(marker);
            }
            Command::Volume(id, set, reply) => {
                let mut current = 0.0;
                if let Some(entry) = self.voices.get_mut(&id.0) {
                    if let Some(v) = set {
                        entry.voice.volume = v.max(0.0);
                        let eff = entry.voice.volume
                            * Self::group_volume_of(&self.groups, entry.voice.group);
                        self.output.set_volume(&mut entry.out, eff);
                    }
                    current = entry.voice.volume;
                }
                let _ = reply.send(current);
            }
            Command::Ratio(id, set, reply) => {
                let mut current = 0.0;
                if let Some(entry) = self.voices.get_mut(&id.0) {
                    if let Some(r) = set {
                        let r = r.max(0.0);
                        entry.voice.rebase_ratio(now, r);
                        self.output.set_ratio(&mut entry.out, r);
                    }
                    current = entry.voice.ratio;
                }
                let _ = reply.send(current);
            }
            Command::SetLoop(id, looping) => {
                if let Some(entry) = self.voices.get_mut(&id.0) {
                    entry.voice.looping = looping;
                }
            }
            Command::LiveSubmit(id, data) => {
                if let Some(entry) = self.voices.get_mut(&id.0) {
                    if !entry.voice.is_live() {
                        warn!("live submit on a streaming voice, ignored");
                        return;
                    }
                    entry.voice.push_live(data.len() as u32);
                    self.output
                        .submit(&mut entry.out, &entry.voice.format, &data);
                }
            }
            Command::LiveBufferLeft(id, reply) => {
                let left = self
                    .voices
                    .get(&id.0)
                    .map(|e| e.voice.live_buffer_left(now))
                    .unwrap_or(0);
                let _ = reply.send(left);
            }
            Command::CreateGroup(reply) => {
                let id = self.next_group;
                self.next_group += 1;
                self.groups.insert(id, 1.0);
                let _ = reply.send(Ok(SubmixId(id)));
            }
            Command::DisposeGroup(group) => {
                self.groups.remove(&group.0);
                let Self { output, voices, .. } = self;
                for entry in voices.values_mut() {
                    if entry.voice.group == Some(group) {
                        entry.voice.group = None;
                        output.set_volume(&mut entry.out, entry.voice.volume);
                    }
                }
            }
            Command::GroupVolume(group, set, reply) => {
                if let Some(v) = set {
                    if let Some(slot) = self.groups.get_mut(&group.0) {
                        *slot = v.max(0.0);
                        let Self { output, voices, groups, .. } = self;
                        for entry in voices.values_mut() {
                            if entry.voice.group == Some(group) {
                                let eff = entry.voice.volume
                                    * Self::group_volume_of(groups, Some(group));
                                output.set_volume(&mut entry.out, eff);
                            }
                        }
                    }
                }
                let current = self.groups.get(&group.0).copied().unwrap_or(0.0);
                let _ = reply.send(current);
            }
            Command::Suspend => {
                if !self.suspended {
                    self.suspended = true;
                    let Self { output, voices, .. } = self;
                    for entry in voices.values_mut() {
                        if entry.voice.state == VoiceState::Playing {
                            entry.voice.freeze(now);
                            output.pause(&mut entry.out);
                        }
                    }
                }
            }
            Command::Resume => {
                if self.suspended {
                    self.suspended = false;
                    let Self { output, voices, .. } = self;
                    for entry in voices.values_mut() {
                        if entry.voice.state == VoiceState::Playing {
                            entry.voice.begin(now);
                            output.start(&mut entry.out);
                        }
                    }
                }
            }
            // Matched in `run` before dispatch; acknowledge if it ever
            // lands here so callers are not left waiting.
            Command::Shutdown(ack) => {
                let _ = ack.send(());
            }
        }
    }

    fn make_voice(&mut self, spec: ClipCtxSpec, now: Instant) -> AudioResult<VoiceId> {
        let live = spec.stream.is_none();
        let mut out = self.output.create_voice(&spec.format)?;
        let mut voice = match spec.stream {
            Some(stream) => Voice::new_streaming(stream, spec.looping),
            None => Voice::new_live(spec.format, now),
        };
        voice.group = spec.group;
        let eff = voice.volume * Self::group_volume_of(&self.groups, voice.group);
        self.output.set_volume(&mut out, eff);
        if live {
            self.output.start(&mut out);
        }
        let id = self.next_voice;
        self.next_voice += 1;
        self.voices.insert(id, Entry { voice, out });
        debug!(id, live, "voice created");
        Ok(VoiceId(id))
    }

    fn play(&mut self, id: VoiceId, now: Instant) {
        let Self { output, voices, .. } = self;
        let Some(entry) = voices.get_mut(&id.0) else {
            return;
        };
        match entry.voice.state {
            VoiceState::Playing => {}
            VoiceState::Paused => {
                // A seek while paused flushed the queue; rebuild it here,
                // otherwise the drain check fires on the next pump and
                // rewinds the voice to zero.
                if !entry.voice.is_live() && entry.voice.queue.is_empty() {
                    let refills = entry.voice.prime();
                    for r in &refills {
                        submit_bucket(output, entry, r);
                    }
                }
                entry.voice.state = VoiceState::Playing;
                entry.voice.begin(now);
                output.start(&mut entry.out);
            }
            VoiceState::Stopped => {
                // Prime the ring to one below depth; the first buffer
                // start owes the final refill.
                let refills = entry.voice.prime();
                for r in &refills {
                    submit_bucket(output, entry, r);
                }
                entry.voice.state = VoiceState::Playing;
                entry.voice.begin(now);
                output.start(&mut entry.out);
            }
        }
    }

    fn seek(&mut self, id: VoiceId, offset: u32, now: Instant) {
        let Self { output, voices, .. } = self;
        let Some(entry) = voices.get_mut(&id.0) else {
            return;
        };
        if entry.voice.is_live() {
            return;
        }
        entry.voice.apply_seek(offset);
        output.flush(&mut entry.out);
        if entry.voice.state == VoiceState::Playing {
            let refills = entry.voice.prime();
            for r in &refills {
                submit_bucket(output, entry, r);
            }
            entry.voice.begin(now);
            output.start(&mut entry.out);
        }
    }

    /// Advances every voice, firing one refill per started bucket and
    /// stopping streaming voices that have drained.
    fn pump(&mut self, now: Instant) {
        if self.suspended {
            return;
        }
        let Self { output, voices, config, .. } = self;
        for entry in voices.values_mut() {
            let outcome = entry.voice.pump(now);
            if !entry.voice.is_live() {
                for _ in 0..outcome.starts {
                    let mut refill = || {
                        if let Some(r) = entry.voice.refill_next() {
                            submit_bucket(&mut *output, &mut *entry, &r);
                        }
                    };
                    config.call_context(&mut refill);
                }
                if entry.voice.drained(now) {
                    debug!("stream ended, voice stopped and rewound");
                    entry.voice.reset_transport();
                    output.flush(&mut entry.out);
                    output.pause(&mut entry.out);
                }
            }
        }
    }
}

fn submit_bucket<O: Output>(output: &mut O, entry: &mut Entry<O::Voice>, r: &RefillOut) {
    if let Some(bucket) = entry.voice.bucket.as_ref() {
        let data = &bucket.slot(r.slot)[..r.len];
        output.submit(&mut entry.out, &entry.voice.format, data);
        if r.eos {
            debug!("final bucket submitted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::output::HeadlessOutput;
    use crate::base::WaveFormat;
    use crate::config::DefaultConfigure;
    use crate::decode::DecodeStream;
    use std::thread::sleep;

    struct Silence {
        format: WaveFormat,
        len: u32,
        pos: u32,
    }

    impl Silence {
        fn new(len: u32) -> Self {
            Self {
                format: WaveFormat::pcm16(44100, 2),
                len,
                pos: 0,
            }
        }
    }

    impl DecodeStream for Silence {
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
            buf[..n as usize].fill(0);
            self.pos += n;
            n
        }
    }

    fn headless() -> Backend<HeadlessOutput> {
        Backend::init(Arc::new(DefaultConfigure)).unwrap()
    }

    fn spec(len: u32) -> ClipCtxSpec {
        ClipCtxSpec {
            format: WaveFormat::pcm16(44100, 2),
            stream: Some(Box::new(Silence::new(len))),
            looping: false,
            group: None,
        }
    }

    #[test]
    fn transport_round_trip() {
        let api = headless();
        let id = api.make_clip_ctx(spec(4_000_000)).unwrap();
        assert_eq!(api.tell_clip(id), 0);

        api.play_clip(id);
        sleep(Duration::from_millis(120));
        let playing = api.tell_clip(id);
        assert!(playing > 0, "marker did not advance: {playing}");

        api.pause_clip(id);
        let paused = api.tell_clip(id);
        sleep(Duration::from_millis(60));
        assert_eq!(api.tell_clip(id), paused);

        // Resume keeps the position; stop rewinds.
        api.play_clip(id);
        sleep(Duration::from_millis(20));
        assert!(api.tell_clip(id) >= paused);
        api.stop_clip(id);
        assert_eq!(api.tell_clip(id), 0);

        api.dispose_clip_ctx(id);
        assert_eq!(api.tell_clip(id), 0);
        api.shutdown();
    }

    #[test]
    fn seek_while_paused_resumes_from_target() {
        let api = headless();
        // ~22.7 s at 176400 B/s.
        let id = api.make_clip_ctx(spec(4_000_000)).unwrap();
        api.play_clip(id);
        sleep(Duration::from_millis(60));
        api.pause_clip(id);

        // 10 s in, applied while paused: reported immediately.
        let target = 1_764_000;
        api.seek_clip(id, target);
        sleep(Duration::from_millis(20));
        assert_eq!(api.tell_clip(id), target);

        // Resume continues from the seek target, not from zero.
        api.play_clip(id);
        sleep(Duration::from_millis(80));
        let pos = api.tell_clip(id);
        assert!(pos >= target, "rewound to {pos}");
        assert!(pos < target + 60_000, "ran away to {pos}");
        api.shutdown();
    }

    #[test]
    fn volume_and_ratio_get_or_set() {
        let api = headless();
        let id = api.make_clip_ctx(spec(100_000)).unwrap();
        assert_eq!(api.volume_clip(id, None), 1.0);
        assert_eq!(api.volume_clip(id, Some(0.25)), 0.25);
        assert_eq!(api.volume_clip(id, None), 0.25);
        assert_eq!(api.ratio_clip(id, Some(2.0)), 2.0);
        assert_eq!(api.ratio_clip(id, None), 2.0);
        api.shutdown();
    }

    #[test]
    fn live_voice_drains() {
        let api = headless();
        let id = api
            .make_clip_ctx(ClipCtxSpec {
                format: WaveFormat::pcm16(44100, 2),
                stream: None,
                looping: false,
                group: None,
            })
            .unwrap();
        assert_eq!(api.live_buffer_left(id), 0);

        // 50 ms worth of audio.
        let data: Arc<[u8]> = vec![0u8; 8_820].into();
        api.submit_live(id, data);
        let left = api.live_buffer_left(id);
        assert!(left > 0);
        sleep(Duration::from_millis(150));
        assert_eq!(api.live_buffer_left(id), 0);
        api.shutdown();
    }

    #[test]
    fn short_stream_stops_and_rewinds_itself() {
        let api = headless();
        // ~11 ms of audio; drains fast.
        let id = api.make_clip_ctx(spec(2_000)).unwrap();
        api.play_clip(id);
        sleep(Duration::from_millis(150));
        assert_eq!(api.tell_clip(id), 0);
        // The voice is stopped; play starts from the beginning again.
        api.play_clip(id);
        sleep(Duration::from_millis(10));
        assert!(api.tell_clip(id) <= 2_000);
        api.shutdown();
    }

    #[test]
    fn dead_backend_yields_defaults() {
        let api = headless();
        let id = api.make_clip_ctx(spec(10_000)).unwrap();
        api.shutdown();
        assert_eq!(api.tell_clip(id), 0);
        assert_eq!(api.volume_clip(id, None), 0.0);
        assert!(api.make_clip_ctx(spec(10_000)).is_err());
        // A second shutdown is harmless.
        api.shutdown();
    }
}
