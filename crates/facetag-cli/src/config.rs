use anyhow::{Context, Result};
use facetag_core::types::{clamp_tolerance, DEFAULT_TOLERANCE};
use facetag_core::DuplicatePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "facetag.toml";

/// Runtime configuration: defaults, then `facetag.toml`, then `FACETAG_*`
/// environment variables. Command-line flags are applied on top by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the encoding store and enrollment photos.
    pub data_dir: PathBuf,
    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// V4L2 device used by `watch --camera` without an explicit path.
    pub camera_device: String,
    /// Maximum embedding distance for a match (0.1–1.0).
    pub tolerance: f32,
    /// Pause after each camera frame, in milliseconds. 0 disables it.
    pub throttle_ms: u64,
    /// Per-frame processing budget; slower frames are logged.
    pub frame_budget_ms: Option<u64>,
    /// TrueType font for overlay labels. Common system fonts are tried when unset.
    pub font: Option<PathBuf>,
    /// Reject tiny, dark or washed-out enrollment photos before detection.
    pub strict_validation: bool,
    /// What enrolling an existing name does.
    pub duplicate_policy: DuplicatePolicy,
    /// Equalize frame contrast before recognition.
    pub equalize: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: facetag_core::default_data_dir(),
            model_dir: facetag_core::default_model_dir(),
            camera_device: "/dev/video0".to_string(),
            tolerance: DEFAULT_TOLERANCE,
            throttle_ms: 100,
            frame_budget_ms: None,
            font: None,
            strict_validation: false,
            duplicate_policy: DuplicatePolicy::Append,
            equalize: false,
        }
    }
}

impl Config {
    /// Load configuration. An explicitly named file must exist; otherwise
    /// `$FACETAG_CONFIG` or `<default data dir>/facetag.toml` is used if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os("FACETAG_CONFIG")
                .map(PathBuf::from)
                .or_else(|| Some(facetag_core::default_data_dir().join(CONFIG_FILE)).filter(|p| p.exists())),
        };

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                let config = Self::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))?;
                tracing::debug!(path = %path.display(), "loaded config file");
                config
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `FACETAG_*` overrides looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACETAG_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACETAG_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACETAG_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("FACETAG_FONT") {
            self.font = Some(PathBuf::from(v));
        }
        self.tolerance = env_parse(&var, "FACETAG_TOLERANCE", self.tolerance);
        self.throttle_ms = env_parse(&var, "FACETAG_THROTTLE_MS", self.throttle_ms);
        self.strict_validation = env_flag(&var, "FACETAG_STRICT_VALIDATION", self.strict_validation);
        self.equalize = env_flag(&var, "FACETAG_EQUALIZE", self.equalize);
        self.duplicate_policy = env_parse(&var, "FACETAG_DUPLICATE_POLICY", self.duplicate_policy);
    }

    /// Clamp values into their accepted ranges.
    pub fn normalize(&mut self) {
        let clamped = clamp_tolerance(self.tolerance);
        if clamped != self.tolerance {
            tracing::warn!(requested = self.tolerance, using = clamped, "tolerance out of range; clamped");
            self.tolerance = clamped;
        }
    }

    pub fn throttle(&self) -> Option<Duration> {
        (self.throttle_ms > 0).then(|| Duration::from_millis(self.throttle_ms))
    }

    pub fn frame_budget(&self) -> Option<Duration> {
        self.frame_budget_ms.map(Duration::from_millis)
    }
}

fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            default
        }),
        None => default,
    }
}

fn env_flag(var: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    var(key).map(|v| v != "0" && !v.eq_ignore_ascii_case("false")).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("tolerance = 0.45\nduplicate_policy = \"reject\"\n").unwrap();
        assert_eq!(config.tolerance, 0.45);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.throttle(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Config::from_toml("tolerence = 0.5").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(vars(&[
            ("FACETAG_DATA_DIR", "/srv/faces"),
            ("FACETAG_TOLERANCE", "0.5"),
            ("FACETAG_THROTTLE_MS", "0"),
            ("FACETAG_STRICT_VALIDATION", "1"),
            ("FACETAG_DUPLICATE_POLICY", "replace"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.tolerance, 0.5);
        assert_eq!(config.throttle(), None);
        assert!(config.strict_validation);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Replace);
    }

    #[test]
    fn test_bad_env_value_keeps_previous() {
        let mut config = Config::default();
        config.apply_env(vars(&[("FACETAG_TOLERANCE", "lots"), ("FACETAG_EQUALIZE", "false")]));
        assert_eq!(config.tolerance, DEFAULT_TOLERANCE);
        assert!(!config.equalize);
    }

    #[test]
    fn test_normalize_clamps_tolerance() {
        let mut config = Config { tolerance: 3.0, ..Config::default() };
        config.normalize();
        assert_eq!(config.tolerance, 1.0);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facetag.toml");
        std::fs::write(&path, "frame_budget_ms = 250\nequalize = true\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.frame_budget(), Some(Duration::from_millis(250)));
        assert!(config.equalize);
    }
}
