// Sample rate conversion for devices that cannot run at the source rate
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::{Result, TailwindError};

/// Input frames per rubato call
const CHUNK_FRAMES: usize = 1024;

/// Streaming converter over interleaved f32 samples.
///
/// Input is buffered until a whole chunk is available; `flush` pushes out
/// whatever is left.
pub struct RateConverter {
    resampler: FastFixedIn<f32>,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl RateConverter {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Result<Self> {
        let channels = channels.max(1) as usize;
        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate.max(1) as f64,
            1.0,
            PolynomialDegree::Cubic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| TailwindError::Output(format!("Failed to create resampler: {}", e)))?;
        debug!("Resampling {} Hz -> {} Hz ({} channels)", from_rate, to_rate, channels);
        Ok(Self {
            resampler,
            channels,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
        })
    }

    /// Convert `input`, appending interleaved output to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        for frame in input.chunks_exact(self.channels) {
            for (channel, sample) in self.pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        while self.pending[0].len() >= self.resampler.input_frames_next() {
            let needed = self.resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let converted = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| TailwindError::Output(format!("Resampling failed: {}", e)))?;
            interleave(&converted, out);
        }
        Ok(())
    }

    /// Convert the buffered tail
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        if self.pending[0].is_empty() {
            return Ok(());
        }
        let converted = self
            .resampler
            .process_partial(Some(self.pending.as_slice()), None)
            .map_err(|e| TailwindError::Output(format!("Resampling failed: {}", e)))?;
        for channel in self.pending.iter_mut() {
            channel.clear();
        }
        interleave(&converted, out);
        Ok(())
    }
}

fn interleave(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let frames = planar.first().map(|c| c.len()).unwrap_or(0);
    out.reserve(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsampling_doubles_frame_count() {
        let mut converter = RateConverter::new(22050, 44100, 2).unwrap();
        let input: Vec<f32> = (0..4096 * 2).map(|i| ((i / 2) as f32 * 0.01).sin()).collect();
        let mut out = Vec::new();
        converter.process(&input, &mut out).unwrap();
        converter.flush(&mut out).unwrap();

        let frames = out.len() / 2;
        assert_eq!(out.len() % 2, 0);
        assert!((8000..=8400).contains(&frames), "got {} frames", frames);
    }

    #[test]
    fn test_short_input_waits_for_a_full_chunk() {
        let mut converter = RateConverter::new(44100, 48000, 1).unwrap();
        let mut out = Vec::new();
        converter.process(&[0.5; 100], &mut out).unwrap();
        assert!(out.is_empty());
        converter.flush(&mut out).unwrap();
        assert!(!out.is_empty());
    }
}
