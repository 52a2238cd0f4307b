// Silent output line for headless playback
use std::thread;
use std::time::{Duration, Instant};

use super::controls::{self, Control};
use super::format::AudioFormat;
use super::output::{OutputLine, OutputProvider};
use crate::error::{Result, TailwindError};

const MAX_LAG: Duration = Duration::from_millis(100);

/// Provider of lines that discard audio.
///
/// A real-time line paces writes at the format's frame rate, the way a
/// device would; otherwise writes return immediately.
#[derive(Debug, Clone, Copy)]
pub struct NullOutput {
    pub realtime: bool,
}

impl NullOutput {
    pub fn realtime() -> Self {
        Self { realtime: true }
    }

    pub fn instant() -> Self {
        Self { realtime: false }
    }
}

impl OutputProvider for NullOutput {
    fn open_line(&self, format: &AudioFormat) -> Result<Box<dyn OutputLine>> {
        Ok(Box::new(NullLine::new(*format, self.realtime)))
    }
}

pub struct NullLine {
    format: AudioFormat,
    realtime: bool,
    running: bool,
    closed: bool,
    frames_written: u64,
    // Wall-clock anchor for pacing; reset whenever the line restarts
    paced_since: Option<(Instant, u64)>,
    controls: Vec<Control>,
}

impl NullLine {
    pub fn new(format: AudioFormat, realtime: bool) -> Self {
        Self {
            format,
            realtime,
            running: false,
            closed: false,
            frames_written: 0,
            paced_since: None,
            controls: controls::standard_controls(&format),
        }
    }

    /// Sleep until the buffer of `frames` just written is due
    fn pace(&mut self, frames: u64) {
        let before = self.frames_written - frames;
        let (anchor, base) = match self.paced_since {
            Some(anchor) => anchor,
            None => {
                let anchor = (Instant::now(), before);
                self.paced_since = Some(anchor);
                anchor
            }
        };
        let mut due = Duration::from_micros(self.format.frames_to_micros(self.frames_written - base));
        let mut elapsed = anchor.elapsed();
        // Writer stalled (paused): re-anchor instead of bursting to catch up
        if elapsed > due + MAX_LAG {
            self.paced_since = Some((Instant::now(), before));
            due = Duration::from_micros(self.format.frames_to_micros(frames));
            elapsed = Duration::ZERO;
        }
        if due > elapsed {
            thread::sleep(due - elapsed);
        }
    }
}

impl OutputLine for NullLine {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(TailwindError::Output("write to a closed line".to_string()));
        }
        let frames = self.format.bytes_to_frames(data.len() as u64);
        self.frames_written += frames;
        if self.realtime {
            self.pace(frames);
        }
        Ok(frames as usize * self.format.frame_size())
    }

    fn drain(&mut self, _timeout: Duration) {}

    fn stop(&mut self) {
        self.running = false;
        self.paced_since = None;
    }

    fn close(&mut self) {
        self.stop();
        self.closed = true;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn controls(&self) -> Vec<Control> {
        self.controls.clone()
    }

    fn microsecond_position(&self) -> u64 {
        self.format.frames_to_micros(self.frames_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_line_counts_frames() {
        let mut line = NullLine::new(AudioFormat::pcm16(1000, 2), false);
        line.start();
        assert_eq!(line.write(&[0u8; 4 * 500 + 2]).unwrap(), 2000);
        assert_eq!(line.microsecond_position(), 500_000);
    }

    #[test]
    fn test_realtime_line_paces_writes() {
        let mut line = NullLine::new(AudioFormat::pcm16(1000, 1), true);
        line.start();
        let start = Instant::now();
        for _ in 0..5 {
            line.write(&[0u8; 2 * 20]).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_first_buffer_is_paced() {
        let mut line = NullLine::new(AudioFormat::pcm16(1000, 1), true);
        line.start();
        let start = Instant::now();
        line.write(&[0u8; 2 * 100]).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(95));
    }

    #[test]
    fn test_closed_line_rejects_writes() {
        let mut line = NullLine::new(AudioFormat::pcm16(1000, 1), false);
        line.close();
        assert!(line.write(&[0u8; 2]).is_err());
    }
}
