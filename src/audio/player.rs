// Audio player implementation
// Playback controller: owns the decode stream, the output line and the
// advisory position clock, and drives them from one state machine.

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::controls::{self, ControlBank};
use super::decoder::{count_frames, DecodeStream, StreamProvider, SymphoniaProvider};
use super::format::{AudioFormat, FileFormat};
use super::output::{CpalOutput, OutputLine, OutputProvider};
use super::workers;
use crate::diagnostics::DiagnosticLog;
use crate::error::{Result, TailwindError};
use crate::events::{EventManager, TailwindStatus};
use crate::metadata::{MediaInfo, MetadataExtractor};
use crate::settings::{BufferSize, PlayerSettings};

// Frames discarded per read while scanning towards a seek target
const SCAN_CHUNK_FRAMES: usize = 1024;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Closed,
    Open,
    Playing,
    Paused,
}

/// The media behind an open session
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub path: PathBuf,
    pub file_format: FileFormat,
    pub format: AudioFormat,
    pub frame_length: u64,
    pub microsecond_length: u64,
}

impl MediaSource {
    pub fn length_ms(&self) -> u64 {
        self.microsecond_length / 1000
    }
}

pub(crate) struct Session {
    pub(crate) state: PlayerState,
    pub(crate) media: Option<MediaSource>,
    /// Advisory position in milliseconds
    pub(crate) position_ms: u64,
    /// Bumped whenever running workers must exit
    pub(crate) generation: u64,
}

impl Session {
    fn closed(generation: u64) -> Self {
        Self {
            state: PlayerState::Closed,
            media: None,
            position_ms: 0,
            generation,
        }
    }
}

pub(crate) struct Pipeline {
    pub(crate) stream: Box<dyn DecodeStream>,
    pub(crate) line: Box<dyn OutputLine>,
}

/// Events raised while the control lock is held, dispatched after release
pub(crate) enum Emit {
    Status(TailwindStatus),
    Generic(MediaInfo),
    Error(String),
}

// Lock order: control -> pipeline -> session. Workers never take `control`
// while holding another lock.
pub(crate) struct Inner {
    control: Mutex<()>,
    pub(crate) pipeline: Mutex<Option<Pipeline>>,
    pub(crate) session: Mutex<Session>,
    pub(crate) wake: Condvar,
    controls: RwLock<ControlBank>,
    /// Bank of the last released line; its values carry over to the next open
    carried: Mutex<ControlBank>,
    pub(crate) settings: RwLock<PlayerSettings>,
    streams: Arc<dyn StreamProvider>,
    outputs: Arc<dyn OutputProvider>,
    pub(crate) events: EventManager,
    diagnostics: DiagnosticLog,
}

/// Builder for [`Tailwind`]
pub struct TailwindBuilder {
    settings: PlayerSettings,
    streams: Arc<dyn StreamProvider>,
    outputs: Arc<dyn OutputProvider>,
    diagnostics: Option<DiagnosticLog>,
}

impl TailwindBuilder {
    pub fn settings(mut self, settings: PlayerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn stream_provider(mut self, provider: impl StreamProvider + 'static) -> Self {
        self.streams = Arc::new(provider);
        self
    }

    pub fn output_provider(mut self, provider: impl OutputProvider + 'static) -> Self {
        self.outputs = Arc::new(provider);
        self
    }

    pub fn diagnostics(mut self, log: DiagnosticLog) -> Self {
        self.diagnostics = Some(log);
        self
    }

    pub fn build(self) -> Tailwind {
        let diagnostics = self.diagnostics.unwrap_or_else(|| {
            let dir = self.settings.diagnostics_dir(&PlayerSettings::default_dir());
            DiagnosticLog::from_settings(&self.settings.diagnostics, dir)
        });
        Tailwind {
            inner: Arc::new(Inner {
                control: Mutex::new(()),
                pipeline: Mutex::new(None),
                session: Mutex::new(Session::closed(0)),
                wake: Condvar::new(),
                controls: RwLock::new(ControlBank::default()),
                carried: Mutex::new(ControlBank::default()),
                settings: RwLock::new(self.settings),
                streams: self.streams,
                outputs: self.outputs,
                events: EventManager::new(),
                diagnostics,
            }),
        }
    }
}

/// Playback controller. One instance is reused across files by closing and
/// opening again.
pub struct Tailwind {
    inner: Arc<Inner>,
}

impl Default for Tailwind {
    fn default() -> Self {
        Self::new()
    }
}

impl Tailwind {
    /// Controller on the default output device with default settings
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TailwindBuilder {
        TailwindBuilder {
            settings: PlayerSettings::default(),
            streams: Arc::new(SymphoniaProvider),
            outputs: Arc::new(CpalOutput),
            diagnostics: None,
        }
    }

    /// Open `path` for playback.
    ///
    /// Returns `Ok(false)` without doing anything when media is already open
    /// and force-close-on-open is disabled.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        self.inner.run(|inner, out| inner.open_locked(path, out))
    }

    /// Start (or restart) the producer and clock workers
    pub fn play(&self) -> Result<()> {
        self.inner.run(|inner, out| inner.play_locked(out))
    }

    /// Pause if playing. Returns whether the state changed.
    pub fn pause(&self) -> bool {
        self.inner.run(|inner, out| inner.pause_locked(out))
    }

    /// Resume a paused session, or start playback otherwise
    pub fn resume(&self) -> Result<()> {
        self.inner.run(|inner, out| inner.resume_locked(out))
    }

    /// Stop playback and rewind to the start. The line stays open.
    pub fn stop(&self) -> Result<()> {
        self.inner.run(|inner, out| inner.stop_locked(out))
    }

    /// Release the stream and line. Does nothing when nothing is open.
    pub fn close(&self) {
        self.inner.run(|inner, out| {
            inner.close_locked(out);
        })
    }

    /// Close and open the current resource again
    pub fn reset(&self) -> Result<bool> {
        self.inner.run(|inner, out| inner.reopen_locked(out))
    }

    /// Move the advisory position by `delta_ms` and reposition the stream.
    ///
    /// `-2` jumps to the start and `-1` to the end; any other result is
    /// clamped to `[0, length]`. Returns the new position.
    pub fn seek_to(&self, delta_ms: i64) -> Result<u64> {
        self.inner.run(|inner, out| inner.seek_locked(delta_ms, out))
    }

    /// Position the stream at `millis` from the start
    pub fn set_position(&self, millis: u64) -> Result<()> {
        self.inner.run(|inner, out| -> Result<()> {
            let format = inner.media()?.format;
            inner.set_frame_position_locked(format.millis_to_frames(millis), out)?;
            inner.session.lock().position_ms = millis;
            Ok(())
        })
    }

    /// Position the stream at `frame`
    pub fn set_frame_position(&self, frame: u64) -> Result<()> {
        self.inner.run(|inner, out| -> Result<()> {
            let format = inner.media()?.format;
            inner.set_frame_position_locked(frame, out)?;
            inner.session.lock().position_ms = format.frames_to_millis(frame);
            Ok(())
        })
    }

    /// Set master gain in decibels; returns the applied, clamped value
    pub fn set_gain(&self, db: f32) -> Result<f32> {
        let controls = self.line_controls()?;
        let gain = controls.float(controls::MASTER_GAIN)?;
        let applied = gain.set_value(db);
        if applied >= gain.maximum() {
            debug!("Master gain at maximum ({} dB)", applied);
        }
        Ok(applied)
    }

    pub fn set_balance(&self, balance: f32) -> Result<f32> {
        Ok(self.line_controls()?.float(controls::BALANCE)?.set_value(balance))
    }

    pub fn set_pan(&self, pan: f32) -> Result<f32> {
        Ok(self.line_controls()?.float(controls::PAN)?.set_value(pan))
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        self.line_controls()?.boolean(controls::MUTE)?.set_value(mute);
        Ok(())
    }

    fn line_controls(&self) -> Result<RwLockReadGuard<'_, ControlBank>> {
        let controls = self.inner.controls.read();
        if controls.is_empty() && !self.is_open() {
            return Err(TailwindError::NotOpen);
        }
        Ok(controls)
    }

    /// Fade master gain down to its minimum over `duration` on a helper
    /// thread. The line is left open.
    pub fn fade_out(&self, duration: Duration) -> Result<JoinHandle<()>> {
        let gain = self.line_controls()?.float(controls::MASTER_GAIN)?.clone();
        let from = gain.value();
        let to = gain.minimum();
        debug!("Fading out from {} dB over {:?}", from, duration);
        let handle = thread::Builder::new()
            .name("tailwind-fade".to_string())
            .spawn(move || gain.shift(from, to, duration))?;
        Ok(handle)
    }

    pub fn status(&self) -> PlayerState {
        self.inner.session.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.status() != PlayerState::Closed
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlayerState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.status() == PlayerState::Paused
    }

    /// Advisory position in milliseconds, including seeks
    pub fn position(&self) -> u64 {
        self.inner.session.lock().position_ms
    }

    /// Length in milliseconds, 0 when nothing is open
    pub fn length(&self) -> u64 {
        self.media().map(|m| m.length_ms()).unwrap_or(0)
    }

    pub fn microsecond_length(&self) -> u64 {
        self.media().map(|m| m.microsecond_length).unwrap_or(0)
    }

    pub fn frame_length(&self) -> u64 {
        self.media().map(|m| m.frame_length).unwrap_or(0)
    }

    /// Time the line has played since it was opened; ignores seeking
    pub fn line_microsecond_position(&self) -> u64 {
        self.inner
            .pipeline
            .lock()
            .as_ref()
            .map(|p| p.line.microsecond_position())
            .unwrap_or(0)
    }

    pub fn media(&self) -> Option<MediaSource> {
        self.inner.session.lock().media.clone()
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.media().map(|m| m.format)
    }

    pub fn file_format(&self) -> Option<FileFormat> {
        self.media().map(|m| m.file_format)
    }

    pub fn media_path(&self) -> Option<PathBuf> {
        self.media().map(|m| m.path)
    }

    /// Controls of the current line, empty while closed
    pub fn controls(&self) -> ControlBank {
        self.inner.controls.read().clone()
    }

    pub fn settings(&self) -> PlayerSettings {
        self.inner.settings.read().clone()
    }

    pub fn is_force_close_on_open(&self) -> bool {
        self.inner.settings.read().force_close_on_open
    }

    pub fn set_force_close_on_open(&self, force: bool) {
        self.inner.settings.write().force_close_on_open = force;
    }

    /// Applies from the next `play`
    pub fn set_dynamic_allocation(&self, dynamic: bool) {
        self.inner.settings.write().dynamic_allocation = dynamic;
    }

    /// Applies from the next `play`
    pub fn set_buffer_size(&self, size: BufferSize) {
        self.inner.settings.write().buffer_size = size;
    }

    pub fn add_status_listener<F>(&self, listener: F)
    where
        F: Fn(TailwindStatus) + Send + Sync + 'static,
    {
        self.inner.events.add_status_listener(listener);
    }

    pub fn add_generic_listener<F>(&self, listener: F)
    where
        F: Fn(&MediaInfo) + Send + Sync + 'static,
    {
        self.inner.events.add_generic_listener(listener);
    }

    pub fn add_time_listener<F>(&self, listener: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.inner.events.add_time_listener(listener);
    }

    pub fn add_error_listener<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.events.add_error_listener(listener);
    }

    pub fn subscribe_status(&self) -> mpsc::Receiver<TailwindStatus> {
        self.inner.events.subscribe_status()
    }
}

impl Drop for Tailwind {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    /// Run a control operation under the control lock, then dispatch the
    /// events it raised.
    pub(crate) fn run<T>(self: &Arc<Self>, op: impl FnOnce(&Arc<Self>, &mut Vec<Emit>) -> T) -> T {
        let mut out = Vec::new();
        let result = {
            let _control = self.control.lock();
            op(self, &mut out)
        };
        self.emit(out);
        result
    }

    fn emit(&self, out: Vec<Emit>) {
        for event in out {
            match event {
                Emit::Status(status) => self.events.dispatch_status(status),
                Emit::Generic(info) => self.events.dispatch_generic(&info),
                Emit::Error(message) => self.events.dispatch_error(&message),
            }
        }
    }

    fn media(&self) -> Result<MediaSource> {
        self.session.lock().media.clone().ok_or(TailwindError::NotOpen)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.session.lock().generation == generation
    }

    fn describe(&self) -> String {
        let session = self.session.lock();
        format!(
            "state={:?} position_ms={} generation={} media={:?}",
            session.state,
            session.position_ms,
            session.generation,
            session.media.as_ref().map(|m| &m.path)
        )
    }

    fn open_locked(&self, path: &Path, out: &mut Vec<Emit>) -> Result<bool> {
        if self.session.lock().state != PlayerState::Closed {
            if self.settings.read().force_close_on_open {
                debug!("Force closing before opening {:?}", path);
                self.close_locked(out);
            } else {
                debug!("Ignoring open of {:?}: media already open", path);
                return Ok(false);
            }
        }

        match self.open_resource(path) {
            Ok(info) => {
                out.push(Emit::Status(TailwindStatus::Open));
                out.push(Emit::Generic(info));
                Ok(true)
            }
            Err(e) => {
                self.fail_locked("open", &e, out);
                Err(e)
            }
        }
    }

    fn open_resource(&self, path: &Path) -> Result<MediaInfo> {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let file_format = FileFormat::from_path(&path);
        info!("Opening {:?}", path);

        let mut stream = self.streams.open_stream(&path, file_format)?;
        let format = stream.format();
        if format.frame_size() == 0 || format.sample_rate == 0 {
            return Err(TailwindError::UnsupportedFormat {
                path,
                reason: format!("unusable frame format {:?}", format),
            });
        }

        let info = MetadataExtractor::extract(&path);
        let frame_length = match (stream.total_frames(), info.duration_ms) {
            (Some(frames), _) => frames,
            (None, Some(ms)) => format.millis_to_frames(ms),
            (None, None) => {
                warn!("No duration known for {:?}, scanning the whole stream", path);
                let frames = count_frames(stream.as_mut())?;
                stream.close();
                stream = self.streams.open_stream(&path, file_format)?;
                frames
            }
        };

        let line = self.outputs.open_line(&format)?;
        self.retire_controls();
        let bank = ControlBank::snapshot(line.controls(), Some(&*self.carried.lock()));
        *self.controls.write() = bank;
        *self.pipeline.lock() = Some(Pipeline { stream, line });

        let media = MediaSource {
            path,
            file_format,
            format,
            frame_length,
            microsecond_length: format.frames_to_micros(frame_length),
        };
        debug!("Opened {:?}", media);

        let mut session = self.session.lock();
        session.state = PlayerState::Open;
        session.media = Some(media);
        session.position_ms = 0;
        Ok(info)
    }

    fn play_locked(self: &Arc<Self>, out: &mut Vec<Emit>) -> Result<()> {
        let generation = {
            let mut session = self.session.lock();
            match session.state {
                PlayerState::Closed => return Err(TailwindError::NotOpen),
                PlayerState::Playing | PlayerState::Paused => {
                    debug!("Restarting the write loop");
                }
                PlayerState::Open => {}
            }
            session.generation += 1;
            session.state = PlayerState::Playing;
            self.wake.notify_all();
            session.generation
        };

        let quantum = Duration::from_millis(self.settings.read().clock_quantum_ms.max(1));

        let producer = self.clone();
        thread::Builder::new()
            .name("tailwind-producer".to_string())
            .spawn(move || workers::run_producer(producer, generation))?;

        let clock = self.clone();
        thread::Builder::new()
            .name("tailwind-clock".to_string())
            .spawn(move || workers::run_clock(clock, generation, quantum))?;

        debug!("Playback started (generation {})", generation);
        out.push(Emit::Status(TailwindStatus::Playing));
        Ok(())
    }

    pub(crate) fn pause_locked(&self, out: &mut Vec<Emit>) -> bool {
        let mut session = self.session.lock();
        if session.state != PlayerState::Playing {
            return false;
        }
        session.state = PlayerState::Paused;
        self.wake.notify_all();
        debug!("Paused at {} ms", session.position_ms);
        out.push(Emit::Status(TailwindStatus::Paused));
        true
    }

    fn resume_locked(self: &Arc<Self>, out: &mut Vec<Emit>) -> Result<()> {
        let resumed = {
            let mut session = self.session.lock();
            if session.state == PlayerState::Paused {
                session.state = PlayerState::Playing;
                self.wake.notify_all();
                true
            } else {
                false
            }
        };
        if !resumed {
            self.play_locked(out)?;
        }
        out.push(Emit::Status(TailwindStatus::Resumed));
        Ok(())
    }

    fn stop_locked(&self, out: &mut Vec<Emit>) -> Result<()> {
        {
            let mut session = self.session.lock();
            if session.state == PlayerState::Closed {
                out.push(Emit::Status(TailwindStatus::Closed));
                return Ok(());
            }
            session.generation += 1;
            session.state = PlayerState::Open;
            session.position_ms = 0;
            self.wake.notify_all();
        }
        if let Err(e) = self.position_stream(0) {
            self.fail_locked("stop", &e, out);
            return Err(e);
        }
        debug!("Stopped");
        out.push(Emit::Status(TailwindStatus::Closed));
        Ok(())
    }

    pub(crate) fn close_locked(&self, out: &mut Vec<Emit>) -> bool {
        {
            let mut session = self.session.lock();
            if session.state == PlayerState::Closed {
                return false;
            }
            let generation = session.generation + 1;
            *session = Session::closed(generation);
            self.wake.notify_all();
        }

        let drain_timeout = Duration::from_millis(self.settings.read().drain_timeout_ms);
        if let Some(mut pipeline) = self.pipeline.lock().take() {
            pipeline.line.stop();
            pipeline.line.drain(drain_timeout);
            pipeline.line.close();
            pipeline.stream.close();
        }
        self.retire_controls();

        info!("Closed");
        out.push(Emit::Status(TailwindStatus::Closed));
        true
    }

    /// Close and open the same resource again
    pub(crate) fn reopen_locked(&self, out: &mut Vec<Emit>) -> Result<bool> {
        let path = match self.session.lock().media.as_ref() {
            Some(media) => media.path.clone(),
            None => return Ok(false),
        };
        self.close_locked(out);
        self.open_locked(&path, out)
    }

    fn seek_locked(self: &Arc<Self>, delta_ms: i64, out: &mut Vec<Emit>) -> Result<u64> {
        let (position, length, format) = {
            let session = self.session.lock();
            let media = session.media.as_ref().ok_or(TailwindError::NotOpen)?;
            (session.position_ms, media.length_ms(), media.format)
        };

        let target = match delta_ms {
            -2 => 0,
            -1 => length,
            delta => {
                let wanted = (position as i64).saturating_add(delta);
                if wanted < 0 {
                    warn!("Seek of {} ms clamped to the start", delta);
                    0
                } else if wanted as u64 > length {
                    warn!("Seek of {} ms clamped to the end ({} ms)", delta, length);
                    length
                } else {
                    wanted as u64
                }
            }
        };
        debug!("Seek {} ms: {} -> {} ms", delta_ms, position, target);

        self.set_frame_position_locked(format.millis_to_frames(target), out)?;
        self.session.lock().position_ms = target;
        Ok(target)
    }

    /// Pause while the stream is repositioned, resuming afterwards if this
    /// call paused it.
    fn set_frame_position_locked(self: &Arc<Self>, frame: u64, out: &mut Vec<Emit>) -> Result<()> {
        let paused_here = self.pause_locked(out);
        if let Err(e) = self.position_stream(frame) {
            self.fail_locked("seek", &e, out);
            return Err(e);
        }
        if paused_here {
            self.resume_locked(out)?;
        }
        Ok(())
    }

    /// Point the decode stream at `frame`, natively when the decoder can
    fn position_stream(&self, frame: u64) -> Result<()> {
        let media = self.media()?;
        let frame = frame.min(media.frame_length);

        let mut guard = self.pipeline.lock();
        let pipeline = guard.as_mut().ok_or(TailwindError::NotOpen)?;
        if pipeline.stream.seek_frame(frame)? {
            debug!("Seeked natively to frame {}", frame);
            return Ok(());
        }
        self.seek_by_sequential_scan(pipeline, &media, frame)
    }

    /// Reopen the decode stream and discard frames until `frame`
    fn seek_by_sequential_scan(&self, pipeline: &mut Pipeline, media: &MediaSource, frame: u64) -> Result<()> {
        pipeline.stream.close();
        pipeline.stream = self.streams.open_stream(&media.path, media.file_format)?;

        let frame_size = media.format.frame_size();
        let mut buffer = vec![0u8; frame_size * SCAN_CHUNK_FRAMES];
        let mut skipped = 0u64;
        while skipped < frame {
            let wanted = (frame - skipped).min(SCAN_CHUNK_FRAMES as u64) as usize;
            let read = pipeline.stream.read(&mut buffer[..wanted * frame_size])?;
            if read == 0 {
                break;
            }
            skipped += (read / frame_size) as u64;
        }
        warn!("Skipped {} frames by scanning", skipped);
        Ok(())
    }

    /// Move the active bank aside so setters stop reaching a released line
    fn retire_controls(&self) {
        let bank = std::mem::take(&mut *self.controls.write());
        if !bank.is_empty() {
            *self.carried.lock() = bank;
        }
    }

    /// Log, persist a report, release everything and report CLOSED
    pub(crate) fn fail_locked(&self, context: &str, err: &TailwindError, out: &mut Vec<Emit>) {
        error!("Playback {} failed: {}", context, err);
        match self.diagnostics.write_report(context, err, &self.describe()) {
            Ok(Some(path)) => debug!("Diagnostic report written to {:?}", path),
            Ok(None) => {}
            Err(e) => warn!("Failed to write diagnostic report: {}", e),
        }

        {
            let mut session = self.session.lock();
            let generation = session.generation + 1;
            *session = Session::closed(generation);
            self.wake.notify_all();
        }
        if let Some(mut pipeline) = self.pipeline.lock().take() {
            pipeline.line.stop();
            pipeline.line.close();
            pipeline.stream.close();
        }
        self.retire_controls();

        out.push(Emit::Error(err.to_string()));
        out.push(Emit::Status(TailwindStatus::Closed));
    }
}
