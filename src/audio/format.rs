// PCM frame format and container detection
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Layout of the frames a decode stream produces.
///
/// Samples are signed, little-endian and interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// 16-bit PCM, the layout produced by the bundled decoder
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, 16)
    }

    /// Size of one frame (one sample for every channel) in bytes
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize + 7) / 8
    }

    pub fn frames_to_millis(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (frames as u128 * 1000 / self.sample_rate as u128) as u64
    }

    pub fn frames_to_micros(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (frames as u128 * 1_000_000 / self.sample_rate as u128) as u64
    }

    pub fn millis_to_frames(&self, millis: u64) -> u64 {
        (millis as u128 * self.sample_rate as u128 / 1000) as u64
    }

    /// Number of whole frames covered by `bytes`
    pub fn bytes_to_frames(&self, bytes: u64) -> u64 {
        match self.frame_size() {
            0 => 0,
            size => bytes / size as u64,
        }
    }
}

/// Container kind, resolved from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    Wav,
    Mp3,
    Flac,
    Ogg,
    Aac,
    Aiff,
    Unknown,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(FileFormat::Unknown)
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "wav" | "wave" => FileFormat::Wav,
            "mp3" => FileFormat::Mp3,
            "flac" => FileFormat::Flac,
            "ogg" | "oga" => FileFormat::Ogg,
            "aac" | "m4a" | "mp4" => FileFormat::Aac,
            "aif" | "aiff" => FileFormat::Aiff,
            _ => FileFormat::Unknown,
        }
    }

    /// Extension passed to the decoder probe as a hint
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            FileFormat::Wav => Some("wav"),
            FileFormat::Mp3 => Some("mp3"),
            FileFormat::Flac => Some("flac"),
            FileFormat::Ogg => Some("ogg"),
            FileFormat::Aac => Some("m4a"),
            FileFormat::Aiff => Some("aiff"),
            FileFormat::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(AudioFormat::pcm16(44100, 2).frame_size(), 4);
        assert_eq!(AudioFormat::new(48000, 1, 24).frame_size(), 3);
    }

    #[test]
    fn test_time_conversions() {
        let format = AudioFormat::pcm16(44100, 2);
        assert_eq!(format.frames_to_millis(441_000), 10_000);
        assert_eq!(format.millis_to_frames(2_000), 88_200);
        assert_eq!(format.frames_to_micros(44_100), 1_000_000);
        assert_eq!(format.bytes_to_frames(4 * 100 + 3), 100);
    }

    #[test]
    fn test_zero_rate_does_not_divide() {
        let format = AudioFormat::pcm16(0, 2);
        assert_eq!(format.frames_to_millis(1000), 0);
    }

    #[test]
    fn test_file_format_from_path() {
        assert_eq!(FileFormat::from_path(Path::new("/music/a.FLAC")), FileFormat::Flac);
        assert_eq!(FileFormat::from_path(Path::new("song.m4a")), FileFormat::Aac);
        assert_eq!(FileFormat::from_path(Path::new("noext")), FileFormat::Unknown);
        assert_eq!(FileFormat::Unknown.extension(), None);
    }
}
