// Settings management and persistence
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::audio::AudioFormat;
use crate::error::Result;

/// Frames per buffer when allocation is not dynamic
pub const MAGIC_NUMBER: usize = 2048;

/// Producer buffer size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferSize {
    /// Derived from the stream format
    Auto,
    /// A fixed number of bytes
    #[serde(untagged)]
    Bytes(usize),
}

impl Default for BufferSize {
    fn default() -> Self {
        BufferSize::Auto
    }
}

/// Diagnostic report settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub enabled: bool,
    /// Where reports are written; the settings directory when unset
    pub directory: Option<PathBuf>,
    pub max_reports: usize,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            max_reports: 20,
        }
    }
}

/// Playback controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub version: i32, // Settings schema version for future migrations
    /// Close the current media instead of ignoring an `open` while active
    pub force_close_on_open: bool,
    pub buffer_size: BufferSize,
    /// Size automatic buffers to ~100ms of audio instead of MAGIC_NUMBER frames
    pub dynamic_allocation: bool,
    /// Advisory clock step
    pub clock_quantum_ms: u64,
    pub drain_timeout_ms: u64,
    pub diagnostics: DiagnosticsSettings,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            version: 1,
            force_close_on_open: true,
            buffer_size: BufferSize::Auto,
            dynamic_allocation: false,
            clock_quantum_ms: 5,
            drain_timeout_ms: 500,
            diagnostics: DiagnosticsSettings::default(),
        }
    }
}

impl PlayerSettings {
    /// Default settings directory
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("tailwind")
    }

    /// Get the settings file path
    pub fn get_settings_path(dir: &Path) -> PathBuf {
        dir.join("settings.json")
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::get_settings_path(dir);

        if !path.exists() {
            info!("No settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let settings: PlayerSettings = serde_json::from_str(&content)?;

        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self, dir: &Path) -> Result<()> {
        // Ensure directory exists
        fs::create_dir_all(dir)?;

        let path = Self::get_settings_path(dir);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Producer buffer length in bytes for `format`: always whole frames and
    /// at least one frame.
    pub fn buffer_bytes(&self, format: &AudioFormat) -> usize {
        let frame = format.frame_size().max(1);
        let bytes = match self.buffer_size {
            BufferSize::Bytes(n) => n,
            BufferSize::Auto if self.dynamic_allocation => {
                (format.sample_rate as usize / 10) * frame
            }
            BufferSize::Auto => MAGIC_NUMBER * frame,
        };
        (bytes - bytes % frame).max(frame)
    }

    pub fn diagnostics_dir(&self, settings_dir: &Path) -> PathBuf {
        self.diagnostics
            .directory
            .clone()
            .unwrap_or_else(|| settings_dir.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_buffer_uses_magic_number() {
        let settings = PlayerSettings::default();
        assert_eq!(settings.buffer_bytes(&AudioFormat::pcm16(44100, 2)), 2048 * 4);
    }

    #[test]
    fn test_dynamic_buffer_tracks_rate() {
        let settings = PlayerSettings {
            dynamic_allocation: true,
            ..Default::default()
        };
        assert_eq!(settings.buffer_bytes(&AudioFormat::pcm16(48000, 2)), 4800 * 4);
    }

    #[test]
    fn test_fixed_buffer_rounds_to_frames() {
        let mut settings = PlayerSettings::default();
        settings.buffer_size = BufferSize::Bytes(4099);
        assert_eq!(settings.buffer_bytes(&AudioFormat::pcm16(44100, 2)), 4096);
        settings.buffer_size = BufferSize::Bytes(1);
        assert_eq!(settings.buffer_bytes(&AudioFormat::pcm16(44100, 2)), 4);
    }

    #[test]
    fn test_buffer_size_json() {
        assert_eq!(serde_json::to_string(&BufferSize::Auto).unwrap(), "\"auto\"");
        assert_eq!(serde_json::from_str::<BufferSize>("8192").unwrap(), BufferSize::Bytes(8192));
        assert_eq!(serde_json::from_str::<BufferSize>("\"auto\"").unwrap(), BufferSize::Auto);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = PlayerSettings::default();
        settings.force_close_on_open = false;
        settings.clock_quantum_ms = 10;
        settings.save(dir.path()).unwrap();

        let loaded = PlayerSettings::load(dir.path()).unwrap();
        assert!(!loaded.force_close_on_open);
        assert_eq!(loaded.clock_quantum_ms, 10);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = PlayerSettings::load(dir.path()).unwrap();
        assert!(loaded.force_close_on_open);
        assert_eq!(loaded.buffer_size, BufferSize::Auto);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), r#"{"buffer_size": 1024}"#).unwrap();
        let loaded = PlayerSettings::load(dir.path()).unwrap();
        assert_eq!(loaded.buffer_size, BufferSize::Bytes(1024));
        assert_eq!(loaded.clock_quantum_ms, 5);
    }
}
