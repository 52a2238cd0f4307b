// Metadata extractor using lofty with id3 fallback for problematic MP3 files
use id3::TagLike;
use lofty::prelude::{Accessor, AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::audio::FileFormat;
use crate::error::Result;

/// "Now playing" payload delivered to generic listeners on open
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub file_format: FileFormat,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    /// Duration as reported by the tags or container properties
    pub duration_ms: Option<u64>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
}

impl MediaInfo {
    /// Minimal entry when no metadata could be read
    pub fn untagged(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file_format: FileFormat::from_path(path),
            title: title_from_stem(path),
            artist: None,
            album: None,
            genre: None,
            duration_ms: None,
            bitrate: None,
            sample_rate: None,
        }
    }
}

fn title_from_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string()
}

pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Read tags and properties. Never fails: falls back to id3 for MP3 files
    /// and then to an untagged entry.
    pub fn extract(path: &Path) -> MediaInfo {
        match Self::extract_with_lofty(path) {
            Ok(info) => info,
            Err(e) => {
                debug!("lofty could not read {:?}: {}", path, e);
                Self::extract_with_fallback(path)
            }
        }
    }

    fn extract_with_lofty(path: &Path) -> Result<MediaInfo> {
        let tagged_file = Probe::open(path)?.guess_file_type()?.read()?;

        let tag = tagged_file.primary_tag().or(tagged_file.first_tag());
        let properties = tagged_file.properties();

        let duration = properties.duration();
        let mut info = MediaInfo::untagged(path);
        info.title = tag
            .and_then(|t| t.title().map(|s| s.to_string()))
            .unwrap_or(info.title);
        info.artist = tag.and_then(|t| t.artist().map(|s| s.to_string()));
        info.album = tag.and_then(|t| t.album().map(|s| s.to_string()));
        info.genre = tag.and_then(|t| t.genre().map(|s| s.to_string()));
        info.duration_ms = (!duration.is_zero()).then(|| duration.as_millis() as u64);
        info.bitrate = properties.audio_bitrate();
        info.sample_rate = properties.sample_rate();
        Ok(info)
    }

    /// Fallback extraction method - uses id3 crate for MP3 files, minimal info for others
    fn extract_with_fallback(path: &Path) -> MediaInfo {
        if FileFormat::from_path(path) == FileFormat::Mp3 {
            match id3::Tag::read_from_path(path) {
                Ok(tag) => {
                    debug!("Extracted metadata using id3 fallback for {:?}", path);
                    let mut info = MediaInfo::untagged(path);
                    if let Some(title) = tag.title() {
                        info.title = title.to_string();
                    }
                    info.artist = tag.artist().map(|s| s.to_string());
                    info.album = tag.album().map(|s| s.to_string());
                    info.genre = tag.genre_parsed().map(|g| g.to_string());
                    // TLEN is in milliseconds
                    info.duration_ms = tag.duration().map(|d| d as u64);
                    return info;
                }
                Err(e) => warn!("id3 fallback failed for {:?}: {}", path, e),
            }
        }
        MediaInfo::untagged(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_untagged_info() {
        let info = MetadataExtractor::extract(Path::new("/no/such/dir/Night Drive.flac"));
        assert_eq!(info.title, "Night Drive");
        assert_eq!(info.file_format, FileFormat::Flac);
        assert_eq!(info.duration_ms, None);
    }

    #[test]
    fn test_id3_length_is_read_as_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.mp3");
        std::fs::write(&path, [0u8; 64]).unwrap();

        let mut tag = id3::Tag::new();
        tag.set_title("Tagged");
        tag.set_duration(10_000);
        tag.write_to_path(&path, id3::Version::Id3v24).unwrap();

        let info = MetadataExtractor::extract_with_fallback(&path);
        assert_eq!(info.title, "Tagged");
        assert_eq!(info.duration_ms, Some(10_000));
    }
}
