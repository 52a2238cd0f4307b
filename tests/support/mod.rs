// Mock decode streams and output lines for controller scenarios
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tailwind::audio::controls::Control;
use tailwind::audio::null::NullLine;
use tailwind::{
    AudioFormat, DecodeStream, DiagnosticLog, FileFormat, NullOutput, OutputLine, OutputProvider,
    PlayerSettings, Result, StreamProvider, Tailwind, TailwindError, TailwindStatus,
};

pub const RATE: u32 = 8000;

/// Provider of synthetic 16-bit streams with a fixed length
#[derive(Clone)]
pub struct ToneProvider {
    pub format: AudioFormat,
    pub frames: u64,
    /// Whether streams report their frame count up front
    pub report_total: bool,
    pub native_seek: bool,
    /// Reads fail once the stream passes this frame
    pub fail_after: Option<u64>,
    pub fail_open: bool,
    pub opens: Arc<AtomicUsize>,
    /// Frame the most recently opened stream will read next
    pub cursor: Arc<AtomicU64>,
}

impl ToneProvider {
    pub fn millis(ms: u64) -> Self {
        Self {
            format: AudioFormat::pcm16(RATE, 1),
            frames: ms * RATE as u64 / 1000,
            report_total: true,
            native_seek: true,
            fail_after: None,
            fail_open: false,
            opens: Arc::new(AtomicUsize::new(0)),
            cursor: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl StreamProvider for ToneProvider {
    fn open_stream(&self, path: &Path, _file_format: FileFormat) -> Result<Box<dyn DecodeStream>> {
        if self.fail_open {
            return Err(TailwindError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "unreadable test file".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.cursor.store(0, Ordering::SeqCst);
        Ok(Box::new(ToneStream {
            provider: self.clone(),
            frame: 0,
        }))
    }
}

struct ToneStream {
    provider: ToneProvider,
    frame: u64,
}

impl DecodeStream for ToneStream {
    fn format(&self) -> AudioFormat {
        self.provider.format
    }

    fn total_frames(&self) -> Option<u64> {
        self.provider.report_total.then_some(self.provider.frames)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(limit) = self.provider.fail_after {
            if self.frame >= limit {
                return Err(TailwindError::Decode("corrupt packet".to_string()));
            }
        }
        let frame_size = self.provider.format.frame_size();
        let wanted = (buf.len() / frame_size) as u64;
        let frames = wanted.min(self.provider.frames - self.frame);
        for (i, sample) in buf[..frames as usize * frame_size].chunks_mut(2).enumerate() {
            let value = (((self.frame + i as u64) % 64) as i16 - 32) * 512;
            sample.copy_from_slice(&value.to_le_bytes());
        }
        self.frame += frames;
        self.provider.cursor.store(self.frame, Ordering::SeqCst);
        Ok(frames as usize * frame_size)
    }

    fn seek_frame(&mut self, frame: u64) -> Result<bool> {
        if !self.provider.native_seek {
            return Ok(false);
        }
        self.frame = frame.min(self.provider.frames);
        self.provider.cursor.store(self.frame, Ordering::SeqCst);
        Ok(true)
    }
}

/// Lines that expose no controls at all
pub struct BareOutput;

impl OutputProvider for BareOutput {
    fn open_line(&self, format: &AudioFormat) -> Result<Box<dyn OutputLine>> {
        Ok(Box::new(BareLine(NullLine::new(*format, false))))
    }
}

struct BareLine(NullLine);

impl OutputLine for BareLine {
    fn format(&self) -> AudioFormat {
        self.0.format()
    }

    fn start(&mut self) {
        self.0.start()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.0.write(data)
    }

    fn drain(&mut self, timeout: Duration) {
        self.0.drain(timeout)
    }

    fn stop(&mut self) {
        self.0.stop()
    }

    fn close(&mut self) {
        self.0.close()
    }

    fn is_running(&self) -> bool {
        self.0.is_running()
    }

    fn controls(&self) -> Vec<Control> {
        Vec::new()
    }

    fn microsecond_position(&self) -> u64 {
        self.0.microsecond_position()
    }
}

/// Controller over `provider` with a paced null line and no reports
pub fn realtime_player(provider: &ToneProvider) -> Tailwind {
    Tailwind::builder()
        .stream_provider(provider.clone())
        .output_provider(NullOutput::realtime())
        .diagnostics(DiagnosticLog::disabled())
        .build()
}

/// Controller over `provider` whose line never blocks
pub fn instant_player(provider: &ToneProvider) -> Tailwind {
    Tailwind::builder()
        .stream_provider(provider.clone())
        .output_provider(NullOutput::instant())
        .settings(PlayerSettings::default())
        .diagnostics(DiagnosticLog::disabled())
        .build()
}

/// Receive statuses until `wanted` arrives, returning everything seen
pub fn wait_for(rx: &Receiver<TailwindStatus>, wanted: TailwindStatus) -> Vec<TailwindStatus> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(status) => {
                seen.push(status);
                if status == wanted {
                    return seen;
                }
            }
            Err(_) => break,
        }
    }
    panic!("never saw {:?}, got {:?}", wanted, seen);
}

/// Statuses already delivered
pub fn drain(rx: &Receiver<TailwindStatus>) -> Vec<TailwindStatus> {
    rx.try_iter().collect()
}
