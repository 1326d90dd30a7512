use anyhow::{Context, Result};
use facecam_vision::ModelSet;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACECAM_CONFIG_PATH").unwrap_or("/usr/local/etc/facecam/config.toml"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    /// Delay between the starts of consecutive ticks.
    pub interval_ms: u64,
    /// Display surface size; unset means the camera's own size.
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub snapshot_dir: PathBuf,
    pub preview_path: Option<PathBuf>,
    /// Directory searched for model files before downloading them.
    pub model_dir: Option<PathBuf>,
    pub models: ModelSet,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            interval_ms: 200,
            display_width: None,
            display_height: None,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            snapshot_dir: PathBuf::from("."),
            preview_path: None,
            model_dir: None,
            models: ModelSet::default(),
        }
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Display size for a source of `frame` dimensions. A single configured
    /// axis keeps the frame's aspect ratio.
    pub fn display_size(&self, frame: (u32, u32)) -> (u32, u32) {
        let (fw, fh) = frame;
        match (self.display_width, self.display_height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if fw > 0 => (w, ((w as u64 * fh as u64) / fw as u64) as u32),
            (None, Some(h)) if fh > 0 => (((h as u64 * fw as u64) / fh as u64) as u32, h),
            _ => frame,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "camera = \"/dev/video2\"\ninterval_ms = 500\nmodel_dir = \"/opt/models\"\n\n[models.age]\nname = \"age.onnx\"\nurl = \"https://models.example/age.onnx\"\n",
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.camera, "/dev/video2");
        assert_eq!(cfg.interval_ms, 500);
        assert_eq!(cfg.score_threshold, 0.6);
        assert_eq!(cfg.model_dir, Some(PathBuf::from("/opt/models")));
        assert_eq!(cfg.models.age.name, "age.onnx");
        assert_eq!(cfg.models.detector, ModelSet::default().detector);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            display_width: Some(320),
            preview_path: Some(PathBuf::from("/tmp/preview.png")),
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn test_display_size() {
        let mut cfg = Config::default();
        assert_eq!(cfg.display_size((640, 480)), (640, 480));
        cfg.display_width = Some(320);
        assert_eq!(cfg.display_size((640, 480)), (320, 240));
        cfg.display_height = Some(100);
        assert_eq!(cfg.display_size((640, 480)), (320, 100));
    }
}
