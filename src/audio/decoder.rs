// Audio decoder using Symphonia
// Exposes a file as a sequential stream of 16-bit PCM frames

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

use super::format::{AudioFormat, FileFormat};
use crate::error::{Result, TailwindError};

/// A sequential reader over decoded sample frames
pub trait DecodeStream: Send {
    fn format(&self) -> AudioFormat;

    /// Total number of frames, if the container reports it
    fn total_frames(&self) -> Option<u64>;

    /// Fill `buf` with whole frames. Returns 0 at end of data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Position the stream so the next read starts at `frame`.
    ///
    /// Returns `Ok(false)` when the stream cannot seek natively; the caller
    /// then reopens it and skips frames instead.
    fn seek_frame(&mut self, frame: u64) -> Result<bool> {
        let _ = frame;
        Ok(false)
    }

    fn close(&mut self) {}
}

/// Opens decode streams for media files
pub trait StreamProvider: Send + Sync {
    fn open_stream(&self, path: &Path, file_format: FileFormat) -> Result<Box<dyn DecodeStream>>;
}

/// Default provider backed by Symphonia's probe and codec registry
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaProvider;

impl StreamProvider for SymphoniaProvider {
    fn open_stream(&self, path: &Path, file_format: FileFormat) -> Result<Box<dyn DecodeStream>> {
        Ok(Box::new(SymphoniaStream::open(path, file_format)?))
    }
}

pub struct SymphoniaStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    format: AudioFormat,
    total_frames: Option<u64>,
    // Decoded bytes not yet handed out by `read`
    pending: Vec<u8>,
    pending_pos: usize,
    // Frames still to discard after an inexact seek
    skip_frames: u64,
    finished: bool,
}

impl SymphoniaStream {
    /// Open an audio file and prepare for decoding
    pub fn open(path: &Path, file_format: FileFormat) -> Result<Self> {
        let file = File::open(path)?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = file_format.extension() {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| TailwindError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let reader = probed.format;

        // Find the first audio track
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| TailwindError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "no audio track found".to_string(),
            })?;

        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| TailwindError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut stream = Self {
            reader,
            decoder,
            track_id,
            time_base: params.time_base,
            format: AudioFormat::pcm16(
                params.sample_rate.unwrap_or(44100),
                params.channels.map(|c| c.count() as u16).unwrap_or(2),
            ),
            total_frames: params.n_frames,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
            finished: false,
        };

        // Some containers only reveal the layout once a packet is decoded
        if params.sample_rate.is_none() || params.channels.is_none() {
            if let Some(spec) = stream.decode_next()? {
                stream.format = AudioFormat::pcm16(spec.rate, spec.channels.count() as u16);
            }
        }

        debug!(
            "Decoder ready for {:?}: {:?}, {:?} frames",
            path, stream.format, stream.total_frames
        );
        Ok(stream)
    }

    /// Decode the next packet of our track into `pending`.
    /// Returns None when end of stream is reached.
    fn decode_next(&mut self) -> Result<Option<SignalSpec>> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            let channels = spec.channels.count().max(1);
            let mut interleaved = samples.samples();
            if self.skip_frames > 0 {
                let frames = (interleaved.len() / channels) as u64;
                let skipped = self.skip_frames.min(frames);
                self.skip_frames -= skipped;
                interleaved = &interleaved[skipped as usize * channels..];
            }

            self.pending.clear();
            self.pending_pos = 0;
            self.pending.reserve(interleaved.len() * 2);
            for sample in interleaved {
                self.pending.extend_from_slice(&sample.to_le_bytes());
            }
            return Ok(Some(spec));
        }
    }

    /// Convert a timestamp difference in track time base into frames
    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                let rate = self.format.sample_rate as f64;
                time.seconds * self.format.sample_rate as u64 + (time.frac * rate).round() as u64
            }
            None => ts,
        }
    }
}

impl DecodeStream for SymphoniaStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.format.frame_size();
        let wanted = buf.len() - buf.len() % frame_size.max(1);
        let mut written = 0;

        while written < wanted {
            if self.pending_pos >= self.pending.len() {
                if self.finished || self.decode_next()?.is_none() {
                    break;
                }
                continue;
            }
            let available = self.pending.len() - self.pending_pos;
            let n = available.min(wanted - written);
            buf[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }

        Ok(written)
    }

    fn seek_frame(&mut self, frame: u64) -> Result<bool> {
        let rate = self.format.sample_rate.max(1) as u64;
        let seconds = frame / rate;
        let frac = (frame % rate) as f64 / rate as f64;
        let time = Time::new(seconds, frac);

        let seeked_to = match self.reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => seeked,
            Err(SymphoniaError::SeekError(e)) => {
                debug!("Native seek to frame {} unavailable: {:?}", frame, e);
                return Ok(false);
            }
            Err(SymphoniaError::Unsupported(what)) => {
                debug!("Native seek unsupported: {}", what);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        // Reset decoder state after seek
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.finished = false;
        self.skip_frames =
            self.ts_to_frames(seeked_to.required_ts.saturating_sub(seeked_to.actual_ts));
        Ok(true)
    }

    fn close(&mut self) {
        self.pending.clear();
        self.pending_pos = 0;
        self.finished = true;
    }
}

/// Count frames by draining `stream`. Used when neither the container nor
/// the tags report a duration.
pub fn count_frames(stream: &mut dyn DecodeStream) -> Result<u64> {
    let format = stream.format();
    let mut buffer = vec![0u8; format.frame_size().max(1) * 4096];
    let mut bytes = 0u64;
    loop {
        let read = stream.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        bytes += read as u64;
    }
    Ok(format.bytes_to_frames(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counted {
        remaining: usize,
    }

    impl DecodeStream for Counted {
        fn format(&self) -> AudioFormat {
            AudioFormat::pcm16(1000, 1)
        }

        fn total_frames(&self) -> Option<u64> {
            None
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = self.remaining.min(buf.len() - buf.len() % 2);
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_count_frames_drains_stream() {
        let mut stream = Counted { remaining: 2 * 12_345 };
        assert_eq!(count_frames(&mut stream).unwrap(), 12_345);
        assert_eq!(stream.remaining, 0);
    }

    #[test]
    fn test_default_seek_is_unsupported() {
        let mut stream = Counted { remaining: 0 };
        assert!(!stream.seek_frame(10).unwrap());
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let err = SymphoniaStream::open(Path::new("/definitely/not/here.wav"), FileFormat::Wav)
            .err()
            .unwrap();
        assert!(matches!(err, TailwindError::Io(_)));
    }
}
