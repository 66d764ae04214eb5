use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Preview configuration: built-in defaults, then an optional TOML file,
/// then `FACESCOPE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD model file name inside `model_dir`.
    pub detector_model: String,
    /// Run face detection at all. Off means background analysis only.
    pub detector_enabled: bool,
    pub confidence_threshold: f32,
    pub learning_rate: f32,
    pub history_capacity: usize,
    pub min_face_ratio: f32,
    pub detect_interval: u32,
    /// Write an overlay PNG every N frames; 0 disables snapshots.
    pub snapshot_every: u64,
    pub snapshot_dir: PathBuf,
    /// Mirror face boxes horizontally (front-facing camera).
    pub mirror: bool,
    /// TTF/OTF font for the overlay status banner. No font, no banner.
    pub font_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            model_dir: facescope_core::default_model_dir(),
            detector_model: "det_10g.onnx".to_string(),
            detector_enabled: true,
            confidence_threshold: facescope_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            learning_rate: facescope_core::pipeline::DEFAULT_LEARNING_RATE,
            history_capacity: facescope_core::consistency::DEFAULT_HISTORY_CAPACITY,
            min_face_ratio: facescope_core::pipeline::DEFAULT_MIN_FACE_RATIO,
            detect_interval: 1,
            snapshot_every: 0,
            snapshot_dir: PathBuf::from("."),
            mirror: true,
            font_path: None,
        }
    }
}

impl Config {
    /// Load from `path` (or `FACESCOPE_CONFIG` when `path` is `None`), then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var("FACESCOPE_CONFIG").ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `FACESCOPE_*` overrides. Unparsable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup("FACESCOPE_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = lookup("FACESCOPE_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "FACESCOPE_LEARNING_RATE", &mut self.learning_rate);
        override_parsed(&lookup, "FACESCOPE_HISTORY_CAPACITY", &mut self.history_capacity);
        override_parsed(&lookup, "FACESCOPE_SNAPSHOT_EVERY", &mut self.snapshot_every);
        override_parsed(&lookup, "FACESCOPE_MIN_FACE_RATIO", &mut self.min_face_ratio);
        if let Some(font) = lookup("FACESCOPE_FONT") {
            self.font_path = Some(PathBuf::from(font));
        }
        if let Some(v) = lookup("FACESCOPE_MIRROR") {
            self.mirror = v != "0";
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be within [0, 1], got {}",
                self.learning_rate
            )));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.min_face_ratio) {
            return Err(ConfigError::Invalid(format!(
                "min_face_ratio must be within [0, 1), got {}",
                self.min_face_ratio
            )));
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(ConfigError::Invalid("capture size must be non-zero".into()));
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn pipeline_options(&self) -> facescope_core::PipelineOptions {
        facescope_core::PipelineOptions {
            learning_rate: self.learning_rate,
            history_capacity: self.history_capacity,
            min_face_ratio: self.min_face_ratio,
            detect_interval: self.detect_interval.max(1),
            ..Default::default()
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history_capacity, 100);
        assert!(config.scrfd_model_path().ends_with("det_10g.onnx"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("camera_device = \"/dev/video4\"\nsnapshot_every = 30\n").unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.snapshot_every, 30);
        assert_eq!(config.capture_width, 640);
        assert!(config.mirror);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = Config::from_toml("history_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = Config::from_toml("learning_rate = 0.2").unwrap();
        config.apply_overrides(lookup_from(&[
            ("FACESCOPE_LEARNING_RATE", "0.01"),
            ("FACESCOPE_HISTORY_CAPACITY", "50"),
            ("FACESCOPE_MIRROR", "0"),
            ("FACESCOPE_MODEL_DIR", "/opt/models"),
        ]));
        assert!((config.learning_rate - 0.01).abs() < 1e-6);
        assert_eq!(config.history_capacity, 50);
        assert!(!config.mirror);
        assert_eq!(config.scrfd_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
    }

    #[test]
    fn test_font_path_from_toml_and_env() {
        let config = Config::default();
        assert!(config.font_path.is_none());

        let mut config = Config::from_toml("font_path = \"/usr/share/fonts/a.ttf\"").unwrap();
        assert_eq!(config.font_path, Some(PathBuf::from("/usr/share/fonts/a.ttf")));
        config.apply_overrides(lookup_from(&[("FACESCOPE_FONT", "/opt/b.otf")]));
        assert_eq!(config.font_path, Some(PathBuf::from("/opt/b.otf")));
    }

    #[test]
    fn test_unparsable_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("FACESCOPE_SNAPSHOT_EVERY", "often")]));
        assert_eq!(config.snapshot_every, 0);
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let config = Config {
            history_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_rejects_learning_rate_out_of_range() {
        let config = Config {
            learning_rate: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_options_carry_tunables() {
        let config = Config {
            detect_interval: 0,
            min_face_ratio: 0.4,
            ..Config::default()
        };
        let options = config.pipeline_options();
        assert_eq!(options.detect_interval, 1);
        assert!((options.min_face_ratio - 0.4).abs() < 1e-6);
        assert_eq!(options.consistency_factor, 8);
    }
}
