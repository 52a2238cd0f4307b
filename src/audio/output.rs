// Audio output using cpal
// A blocking, line-style writer in front of the device callback

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, SupportedStreamConfig, SupportedStreamConfigRange};
use ringbuf::{HeapRb, traits::{Consumer, Observer, Producer, Split}};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::controls::{self, db_to_linear, BooleanControl, Control, FloatControl};
use super::format::AudioFormat;
use super::resample::RateConverter;
use crate::error::{Result, TailwindError};

const RING_BUFFER_MILLIS: usize = 250;

// A device that stops pulling samples for this long fails the write
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// A writable output line, the device side of the pipeline
pub trait OutputLine: Send {
    fn format(&self) -> AudioFormat;

    /// Begin consuming written data
    fn start(&mut self);

    /// Write whole frames, blocking until the line has accepted them.
    /// Returns the number of bytes consumed.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Block until queued data has been played or `timeout` elapses
    fn drain(&mut self, timeout: Duration);

    /// Stop consuming data; queued data is kept
    fn stop(&mut self);

    /// Release the device. Further writes fail.
    fn close(&mut self);

    fn is_running(&self) -> bool;

    /// Control handles; setting them affects the line immediately
    fn controls(&self) -> Vec<Control>;

    /// Time played since the line was opened, ignoring any seeking
    fn microsecond_position(&self) -> u64;
}

/// Opens output lines for a frame format
pub trait OutputProvider: Send + Sync {
    fn open_line(&self, format: &AudioFormat) -> Result<Box<dyn OutputLine>>;
}

/// Default provider: the host's default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl OutputProvider for CpalOutput {
    fn open_line(&self, format: &AudioFormat) -> Result<Box<dyn OutputLine>> {
        Ok(Box::new(CpalLine::open(*format)?))
    }
}

struct LineShared {
    running: AtomicBool,
    closed: AtomicBool,
    frames_played: AtomicU64,
}

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// Values the device callback reads on every period
#[derive(Clone)]
struct CallbackControls {
    gain: FloatControl,
    mute: BooleanControl,
    balance: Option<FloatControl>,
}

impl CallbackControls {
    fn from_controls(list: &[Control]) -> Option<Self> {
        let mut gain = None;
        let mut mute = None;
        let mut balance = None;
        for control in list {
            match (control.name(), control) {
                (controls::MASTER_GAIN, Control::Float(c)) => gain = Some(c.clone()),
                (controls::MUTE, Control::Boolean(c)) => mute = Some(c.clone()),
                (controls::BALANCE, Control::Float(c)) | (controls::PAN, Control::Float(c)) => {
                    balance = Some(c.clone())
                }
                _ => {}
            }
        }
        Some(Self {
            gain: gain?,
            mute: mute?,
            balance,
        })
    }
}

pub struct CpalLine {
    format: AudioFormat,
    producer: RingProducer,
    shared: Arc<LineShared>,
    controls: Vec<Control>,
    scratch: Vec<f32>,
    /// Set when the device runs at a different rate than the source
    converter: Option<RateConverter>,
    converted: Vec<f32>,
    device_rate: u32,
    shutdown: Option<mpsc::Sender<()>>,
    device_thread: Option<JoinHandle<()>>,
}

impl CpalLine {
    /// Open the default output device, at the format's sample rate when the
    /// device supports it and at the device's own rate otherwise.
    ///
    /// The cpal stream lives on its own thread because it is not `Send` on
    /// every host; the line talks to it through the ring buffer and atomics.
    pub fn open(format: AudioFormat) -> Result<Self> {
        let capacity = (format.sample_rate as usize * format.channels as usize * RING_BUFFER_MILLIS
            / 1000)
            .max(format.channels as usize * 1024);
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();

        let shared = Arc::new(LineShared {
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            frames_played: AtomicU64::new(0),
        });

        let controls = controls::standard_controls(&format);
        let callback_controls = CallbackControls::from_controls(&controls)
            .ok_or_else(|| TailwindError::Output("line controls are incomplete".to_string()))?;

        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_shared = shared.clone();

        let device_thread = thread::Builder::new()
            .name("tailwind-output".to_string())
            .spawn(move || {
                let (stream, device_rate) = match Self::build_device_stream(
                    format,
                    consumer,
                    callback_controls,
                    thread_shared,
                ) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(TailwindError::Output(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(device_rate));
                // Hold the stream until the line is closed or dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = device_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = device_thread.join();
                return Err(TailwindError::Output("output thread exited".to_string()));
            }
        };

        let converter = if device_rate != format.sample_rate {
            Some(RateConverter::new(format.sample_rate, device_rate, format.channels)?)
        } else {
            None
        };

        debug!(
            "Output line open: {:?} on a {} Hz device, ring capacity {}",
            format, device_rate, capacity
        );
        Ok(Self {
            format,
            producer,
            shared,
            controls,
            scratch: Vec::new(),
            converter,
            converted: Vec::new(),
            device_rate,
            shutdown: Some(shutdown_tx),
            device_thread: Some(device_thread),
        })
    }

    fn build_device_stream(
        format: AudioFormat,
        consumer: RingConsumer,
        controls: CallbackControls,
        shared: Arc<LineShared>,
    ) -> Result<(Stream, u32)> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| TailwindError::Output("No output device available".to_string()))?;

        let supported = Self::choose_config(&device, &format)?;
        let config = supported.config();
        let device_rate = config.sample_rate.0;

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config, format, consumer, controls, shared)
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config, format, consumer, controls, shared)
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config, format, consumer, controls, shared)
            }
            other => Err(TailwindError::Output(format!(
                "Unsupported sample format: {:?}",
                other
            ))),
        }?;
        Ok((stream, device_rate))
    }

    fn choose_config(device: &cpal::Device, format: &AudioFormat) -> Result<SupportedStreamConfig> {
        let default = device
            .default_output_config()
            .map_err(|e| TailwindError::Output(format!("Failed to get default output config: {}", e)))?;
        if default.sample_rate().0 == format.sample_rate {
            return Ok(default);
        }
        match device.supported_output_configs() {
            Ok(ranges) => Ok(pick_config(default, ranges, format.sample_rate)),
            Err(e) => {
                warn!("Could not list output configs, using the device default: {}", e);
                Ok(default)
            }
        }
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        format: AudioFormat,
        mut consumer: RingConsumer,
        controls: CallbackControls,
        shared: Arc<LineShared>,
    ) -> Result<Stream> {
        let device_channels = config.channels.max(1) as usize;
        let source_channels = format.channels.max(1) as usize;
        let mut source_frame = vec![0f32; source_channels];
        let mut device_frame = vec![0f32; device_channels];

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let running = shared.running.load(Ordering::Acquire);
                    let gain = if controls.mute.value() {
                        0.0
                    } else {
                        db_to_linear(controls.gain.value())
                    };
                    let balance = controls.balance.as_ref().map(|c| c.value()).unwrap_or(0.0);

                    for frame in data.chunks_mut(device_channels) {
                        if !running || consumer.occupied_len() < source_channels {
                            for sample in frame.iter_mut() {
                                *sample = T::from_sample(0.0f32);
                            }
                            continue;
                        }
                        for slot in source_frame.iter_mut() {
                            *slot = consumer.try_pop().unwrap_or(0.0);
                        }
                        map_frame(&source_frame, &mut device_frame, balance);
                        for (sample, value) in frame.iter_mut().zip(device_frame.iter()) {
                            *sample = T::from_sample(value * gain);
                        }
                        shared.frames_played.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    error!("Audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| TailwindError::Output(format!("Failed to build output stream: {}", e)))?;

        Ok(stream)
    }
}

impl OutputLine for CpalLine {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) {
        self.shared.running.store(true, Ordering::Release);
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TailwindError::Output("write to a closed line".to_string()));
        }
        let usable = data.len() - data.len() % self.format.frame_size().max(1);
        self.scratch.clear();
        decode_samples(&data[..usable], self.format.bits_per_sample, &mut self.scratch);

        match self.converter.as_mut() {
            Some(converter) => {
                self.converted.clear();
                converter.process(&self.scratch, &mut self.converted)?;
                push_samples(&mut self.producer, &self.shared, &self.converted)?;
            }
            None => push_samples(&mut self.producer, &self.shared, &self.scratch)?,
        }
        Ok(usable)
    }

    fn drain(&mut self, timeout: Duration) {
        if let Some(converter) = self.converter.as_mut() {
            self.converted.clear();
            let flushed = converter
                .flush(&mut self.converted)
                .and_then(|_| push_samples(&mut self.producer, &self.shared, &self.converted));
            if let Err(e) = flushed {
                warn!("Failed to flush resampled tail: {}", e);
            }
        }
        let start = Instant::now();
        while self.shared.running.load(Ordering::Acquire) && !self.producer.is_empty() {
            if start.elapsed() > timeout {
                warn!("Drain timed out with {} samples queued", self.producer.occupied_len());
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
    }

    fn close(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.closed.store(true, Ordering::Release);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.device_thread.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn controls(&self) -> Vec<Control> {
        self.controls.clone()
    }

    fn microsecond_position(&self) -> u64 {
        // Frames are counted at the device rate
        let frames = self.shared.frames_played.load(Ordering::Relaxed) as u128;
        (frames * 1_000_000 / self.device_rate.max(1) as u128) as u64
    }
}

impl Drop for CpalLine {
    fn drop(&mut self) {
        self.close();
    }
}

/// The default config when it already runs at `rate`, else a supported range
/// containing `rate` (preferring the default's channels and sample format),
/// else the default, which means the line resamples
fn pick_config(
    default: SupportedStreamConfig,
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    rate: u32,
) -> SupportedStreamConfig {
    let wanted = SampleRate(rate);
    if default.sample_rate() == wanted {
        return default;
    }
    let matching = ranges
        .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
        .filter(|r| {
            matches!(
                r.sample_format(),
                cpal::SampleFormat::F32 | cpal::SampleFormat::I16 | cpal::SampleFormat::U16
            )
        })
        .max_by_key(|r| {
            (
                r.channels() == default.channels(),
                r.sample_format() == default.sample_format(),
            )
        });

    match matching {
        Some(range) => range.with_sample_rate(wanted),
        None => {
            debug!(
                "Device cannot run at {} Hz, resampling to {} Hz",
                rate,
                default.sample_rate().0
            );
            default
        }
    }
}

/// Push every sample into the ring, blocking while it is full
fn push_samples(producer: &mut RingProducer, shared: &LineShared, samples: &[f32]) -> Result<()> {
    let mut remaining = samples;
    let mut last_progress = Instant::now();
    while !remaining.is_empty() {
        if shared.closed.load(Ordering::Acquire) {
            return Err(TailwindError::Output("line closed during write".to_string()));
        }
        let pushed = producer.push_slice(remaining);
        if pushed > 0 {
            remaining = &remaining[pushed..];
            last_progress = Instant::now();
        } else if last_progress.elapsed() > WRITE_STALL_TIMEOUT {
            return Err(TailwindError::Output("output device stopped consuming".to_string()));
        } else {
            // Buffer full, wait a bit
            thread::sleep(Duration::from_millis(1));
        }
    }
    Ok(())
}

/// Convert signed little-endian PCM bytes to f32 samples in [-1, 1]
pub fn decode_samples(bytes: &[u8], bits_per_sample: u16, out: &mut Vec<f32>) {
    match bits_per_sample {
        8 => out.extend(bytes.iter().map(|&b| b as i8 as f32 / 128.0)),
        16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0),
        ),
        24 => out.extend(bytes.chunks_exact(3).map(|c| {
            let value = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
            value as f32 / 8388608.0
        })),
        32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2147483648.0),
        ),
        other => warn!("Unsupported sample width: {} bits", other),
    }
}

/// Map one source frame onto the device's channel layout.
///
/// `balance` is the stereo balance for two-channel sources and the pan
/// position for mono sources; -1.0 is full left.
pub fn map_frame(source: &[f32], device: &mut [f32], balance: f32) {
    let left_gain = (1.0 - balance).min(1.0);
    let right_gain = (1.0 + balance).min(1.0);

    device.iter_mut().for_each(|s| *s = 0.0);
    match (source.len(), device.len()) {
        (_, 0) | (0, _) => {}
        (1, 1) => device[0] = source[0],
        (1, _) => {
            device[0] = source[0] * left_gain;
            device[1] = source[0] * right_gain;
        }
        (2, 1) => device[0] = (source[0] * left_gain + source[1] * right_gain) * 0.5,
        (2, _) => {
            device[0] = source[0] * left_gain;
            device[1] = source[1] * right_gain;
        }
        _ => {
            for (out, value) in device.iter_mut().zip(source.iter()) {
                *out = *value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_16_bit() {
        let mut out = Vec::new();
        let bytes: Vec<u8> = [0i16, i16::MAX, i16::MIN]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        decode_samples(&bytes, 16, &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 1.0).abs() < 1e-4);
        assert_eq!(out[2], -1.0);
    }

    #[test]
    fn test_decode_24_bit_sign_extends() {
        let mut out = Vec::new();
        decode_samples(&[0x00, 0x00, 0x80], 24, &mut out);
        assert_eq!(out, vec![-1.0]);
    }

    #[test]
    fn test_map_mono_pan() {
        let mut device = [0.0; 2];
        map_frame(&[1.0], &mut device, -1.0);
        assert_eq!(device, [1.0, 0.0]);
        map_frame(&[1.0], &mut device, 0.0);
        assert_eq!(device, [1.0, 1.0]);
    }

    #[test]
    fn test_map_stereo_balance() {
        let mut device = [0.0; 2];
        map_frame(&[0.5, 0.5], &mut device, 0.5);
        assert_eq!(device, [0.25, 0.5]);
    }

    #[test]
    fn test_map_to_surround_device_leaves_rear_silent() {
        let mut device = [9.0; 6];
        map_frame(&[0.3, 0.6], &mut device, 0.0);
        assert_eq!(device, [0.3, 0.6, 0.0, 0.0, 0.0, 0.0]);
    }

    fn range(channels: u16, min: u32, max: u32, format: cpal::SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            cpal::SupportedBufferSize::Unknown,
            format,
        )
    }

    fn device_default() -> SupportedStreamConfig {
        SupportedStreamConfig::new(
            2,
            SampleRate(48_000),
            cpal::SupportedBufferSize::Unknown,
            cpal::SampleFormat::F32,
        )
    }

    #[test]
    fn test_pick_config_runs_at_source_rate_when_supported() {
        let ranges = vec![
            range(1, 8_000, 96_000, cpal::SampleFormat::F32),
            range(2, 8_000, 96_000, cpal::SampleFormat::I16),
            range(2, 8_000, 96_000, cpal::SampleFormat::F32),
        ];
        let config = pick_config(device_default(), ranges.into_iter(), 44_100);
        assert_eq!(config.sample_rate(), SampleRate(44_100));
        assert_eq!(config.channels(), 2);
        assert_eq!(config.sample_format(), cpal::SampleFormat::F32);
    }

    #[test]
    fn test_pick_config_falls_back_to_device_rate() {
        let ranges = vec![range(2, 48_000, 48_000, cpal::SampleFormat::F32)];
        let config = pick_config(device_default(), ranges.into_iter(), 22_050);
        assert_eq!(config.sample_rate(), SampleRate(48_000));
    }
}
