use facefind_core::{
    default_model_dir, DetectionProfile, ModelPaths, DEFAULT_CROP_PADDING, DEFAULT_MATCH_THRESHOLD,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Effective configuration: defaults, then the optional TOML file, then
/// `FACEFIND_*` environment variables. Command-line flags override last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for a photo to count as a match.
    #[serde(serialize_with = "shortest_decimal")]
    pub threshold: f32,
    /// Fraction of the face box added on each side of exported crops.
    #[serde(serialize_with = "shortest_decimal")]
    pub crop_padding: f32,
    /// Minimal (embeddings only) or enriched (plus expression, age, gender).
    pub profile: DetectionProfile,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            threshold: DEFAULT_MATCH_THRESHOLD,
            crop_padding: DEFAULT_CROP_PADDING,
            profile: DetectionProfile::Minimal,
            intra_threads: 2,
        }
    }
}

impl Config {
    /// Load from `file` (or `FACEFIND_CONFIG` when not given) and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let env_file = std::env::var_os("FACEFIND_CONFIG").map(PathBuf::from);
        let mut config = match file.or(env_file.as_deref()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FACEFIND_*` overrides looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("FACEFIND_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse(&lookup, "FACEFIND_THRESHOLD")? {
            self.threshold = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEFIND_CROP_PADDING")? {
            self.crop_padding = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEFIND_PROFILE")? {
            self.profile = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEFIND_INTRA_THREADS")? {
            self.intra_threads = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("threshold", self.threshold)?;
        non_negative("crop_padding", self.crop_padding)?;
        if self.intra_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "intra_threads",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Write an `f32` as the shortest decimal that reads back to it, so `0.6`
/// does not widen to `0.6000000238418579`.
fn shortest_decimal<S: serde::Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    let widened = value.to_string().parse::<f64>().unwrap_or(f64::from(*value));
    serializer.serialize_f64(widened)
}

pub fn non_negative(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be a finite, non-negative number".into(),
        })
    }
}
