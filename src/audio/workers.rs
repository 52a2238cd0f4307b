// Producer and clock loops spawned by `play`.
// A worker exits as soon as its generation is no longer current.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::player::{Emit, Inner, PlayerState};
use crate::error::TailwindError;
use crate::events::TailwindStatus;

impl Inner {
    /// Block while paused. `None` means the worker must exit; otherwise
    /// reports whether it had to wait.
    pub(crate) fn wait_while_paused(&self, generation: u64) -> Option<bool> {
        let mut session = self.session.lock();
        let mut waited = false;
        loop {
            if session.generation != generation {
                return None;
            }
            match session.state {
                PlayerState::Playing => return Some(waited),
                PlayerState::Paused => {
                    waited = true;
                    self.wake.wait(&mut session);
                }
                _ => return None,
            }
        }
    }

    fn runtime_failure(self: &Arc<Self>, generation: u64, context: &str, err: TailwindError) {
        self.run(|inner, out| {
            if inner.is_current(generation) {
                inner.fail_locked(context, &err, out);
            } else {
                debug!("Dropping {} error from retired worker: {}", context, err);
            }
        })
    }

    /// Reopen the resource after natural exhaustion and report END
    fn finish_stream(self: &Arc<Self>, generation: u64) {
        self.run(|inner, out| {
            {
                let session = inner.session.lock();
                if session.generation != generation || session.state != PlayerState::Playing {
                    return;
                }
            }
            info!("End of stream");
            let drain_timeout = Duration::from_millis(inner.settings.read().drain_timeout_ms);
            if let Some(pipeline) = inner.pipeline.lock().as_mut() {
                pipeline.line.drain(drain_timeout);
            }
            // A failed reopen has already reported itself
            if inner.reopen_locked(out).is_ok() {
                out.push(Emit::Status(TailwindStatus::End));
            }
        })
    }
}

pub(crate) fn run_producer(inner: Arc<Inner>, generation: u64) {
    let buffer_len = {
        let session = inner.session.lock();
        match session.media.as_ref() {
            Some(media) => inner.settings.read().buffer_bytes(&media.format),
            None => return,
        }
    };
    let mut buffer = vec![0u8; buffer_len];
    debug!("Producer {} started with a {} byte buffer", generation, buffer_len);

    match inner.pipeline.lock().as_mut() {
        Some(pipeline) => pipeline.line.start(),
        None => return,
    }

    loop {
        if inner.wait_while_paused(generation).is_none() {
            break;
        }

        let mut guard = inner.pipeline.lock();
        // State may have moved while waiting for the pipeline
        let playing = {
            let session = inner.session.lock();
            session.generation == generation && session.state == PlayerState::Playing
        };
        if !playing {
            continue;
        }
        let pipeline = match guard.as_mut() {
            Some(pipeline) => pipeline,
            None => break,
        };

        let read = match pipeline.stream.read(&mut buffer) {
            Ok(read) => read,
            Err(e) => {
                drop(guard);
                inner.runtime_failure(generation, "read", e);
                break;
            }
        };
        if read == 0 {
            drop(guard);
            // Exhausted while paused: report END once resumed
            if inner.wait_while_paused(generation).is_some() {
                inner.finish_stream(generation);
            }
            break;
        }
        if let Err(e) = pipeline.line.write(&buffer[..read]) {
            drop(guard);
            inner.runtime_failure(generation, "write", e);
            break;
        }
    }
    debug!("Producer {} exited", generation);
}

pub(crate) fn run_clock(inner: Arc<Inner>, generation: u64, quantum: Duration) {
    let step = quantum.as_millis() as u64;
    let mut next = Instant::now() + quantum;

    loop {
        match inner.wait_while_paused(generation) {
            None => break,
            Some(true) => next = Instant::now() + quantum,
            Some(false) => {}
        }

        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        }
        next += quantum;

        let position = {
            let mut session = inner.session.lock();
            if session.generation != generation || session.state != PlayerState::Playing {
                continue;
            }
            let length = session.media.as_ref().map(|m| m.length_ms()).unwrap_or(0);
            session.position_ms = (session.position_ms + step).min(length);
            session.position_ms
        };
        inner.events.dispatch_time(position);
    }
    debug!("Clock {} exited", generation);
}
