use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use facesnap_core::shared::constants::{
    APP_DIR_NAME, CAPTURE_FILE_PREFIX, DEFAULT_FRAME_INTERVAL_MS, DEFAULT_JPEG_QUALITY,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub jpeg_quality: u8,
    pub frame_interval_ms: u64,
    /// Longer side frames are downscaled to before detection; 0 keeps them
    /// at full size.
    pub analysis_max_dimension: u32,
    pub rotation_degrees: u16,
    pub loop_frames: bool,
    pub open_on_capture: bool,
    pub sessions: u32,
}

fn default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: CAPTURE_FILE_PREFIX.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            analysis_max_dimension: 640,
            rotation_degrees: 0,
            loop_frames: false,
            open_on_capture: false,
            sessions: 1,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("settings.json"))
    }

    /// Loads settings from `path`, or the platform config file when `None`.
    /// A missing or unreadable file yields the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).or_else(Self::config_path);
        let Some(path) = path else {
            return Self::default();
        };
        match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Ignoring invalid settings in {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::config_path)
            .ok_or("no config directory on this platform")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}
