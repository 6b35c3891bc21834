use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use log::{info, error};

/// Tunables for the audio-driven playback engine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Frames buffered before playback starts (~100ms of startup jitter).
    pub min_buffer_frames: usize,
    /// How far ahead of the clock audio is handed to the output.
    pub lookahead_ms: f64,
    /// How long past a frame's end its weights are reused before going neutral.
    pub selection_grace_ms: f64,
    /// How long finished frames are kept for rollback search.
    pub retention_ms: f64,
    pub default_sample_rate: u32,
    /// Log one in every N frames dropped while stopped.
    pub stopped_drop_log_every: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_buffer_frames: 3,
            lookahead_ms: 150.0,
            selection_grace_ms: 50.0,
            retention_ms: 1000.0,
            default_sample_rate: 24000,
            stopped_drop_log_every: 50,
        }
    }
}

/// Tunables for the discrete (non-paired) blendshape path.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct IdleConfig {
    pub capacity: usize,
    pub target_fps: f64,
    pub interpolate: bool,
    pub smoothing: f32,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            target_fps: 30.0,
            interpolate: true,
            smoothing: 0.3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Words starting before `cutoff + tolerance` count as spoken on interrupt.
    pub word_tolerance_ms: f64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self { word_tolerance_ms: 300.0 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SubtitleConfig {
    pub min_words: usize,
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            min_words: 2,
            min_chars: 12,
            max_chars: 42,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub playback: PlaybackConfig,
    pub idle: IdleConfig,
    pub transcript: TranscriptConfig,
    pub subtitles: SubtitleConfig,
}

pub struct ConfigManager {
    file_path: PathBuf,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self { file_path: file_path.as_ref().to_path_buf() }
    }

    /// Reads the config file, falling back to (and writing out) defaults.
    pub fn load(&self) -> SyncConfig {
        if self.file_path.exists() {
            match fs::read_to_string(&self.file_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => {
                        info!("Config loaded from {:?}", self.file_path);
                        return config;
                    },
                    Err(e) => error!("Failed to parse config: {}", e),
                },
                Err(e) => error!("Failed to read config file: {}", e),
            }
            // Leave a broken file in place for the user to fix.
            return SyncConfig::default();
        }
        info!("Using default config and saving to {:?}", self.file_path);
        let defaults = SyncConfig::default();
        self.save(&defaults);
        defaults
    }

    pub fn save(&self, config: &SyncConfig) {
        match serde_json::to_string_pretty(config) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.file_path, json) {
                    error!("Failed to write config: {}", e);
                } else {
                    info!("Config saved.");
                }
            },
            Err(e) => error!("Failed to serialize config: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{ "playback": { "lookahead_ms": 200.0 }, "subtitles": { "max_chars": 30 } }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.playback.lookahead_ms, 200.0);
        assert_eq!(config.playback.min_buffer_frames, 3);
        assert_eq!(config.subtitles.max_chars, 30);
        assert_eq!(config.subtitles.min_words, 2);
        assert_eq!(config.transcript.word_tolerance_ms, 300.0);
    }

    #[test]
    fn test_load_writes_defaults_when_missing() {
        let path = std::env::temp_dir().join(format!("avatar-sync-config-{}.json", std::process::id()));
        let _ = fs::remove_file(&path);

        let mgr = ConfigManager::new(&path);
        let config = mgr.load();
        assert_eq!(config, SyncConfig::default());
        assert!(path.exists());

        let mut changed = config.clone();
        changed.idle.target_fps = 60.0;
        mgr.save(&changed);
        assert_eq!(mgr.load().idle.target_fps, 60.0);

        let _ = fs::remove_file(&path);
    }
}
