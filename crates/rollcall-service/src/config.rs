use std::path::{Path, PathBuf};
use std::time::Duration;

use rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD;
use rollcall_core::normalize::DEFAULT_MAX_DIMENSION;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::selection::MultiFacePolicy;

/// Environment variable naming a TOML configuration file.
pub const CONFIG_PATH_ENV: &str = "ROLLCALL_CONFIG";

/// Service configuration.
///
/// Resolved in three layers: built-in defaults, then an optional TOML file,
/// then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root for `identities.db`, `attendance.csv` and `evidence/`.
    pub data_dir: PathBuf,
    /// Embedding length produced by the embedder (128 for dlib encoders).
    pub embedding_dimension: usize,
    /// Euclidean distance below which a probe matches an identity.
    pub match_threshold: f32,
    /// What to do when an image contains several faces.
    pub multi_face_policy: MultiFacePolicy,
    /// Whether enrolling an existing id overwrites it (last write wins).
    pub allow_reenrollment: bool,
    /// Longest side of a normalized image, in pixels.
    pub max_image_dimension: u32,
    /// Source tag recorded when the caller does not supply one.
    pub default_source: String,
    /// Executable that turns a PNG on stdin into face embeddings on stdout.
    pub embedder_command: Option<PathBuf>,
    pub embedder_args: Vec<String>,
    pub embedder_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_dimension: 128,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            multi_face_policy: MultiFacePolicy::default(),
            allow_reenrollment: true,
            max_image_dimension: DEFAULT_MAX_DIMENSION,
            default_source: "upload".to_string(),
            embedder_command: None,
            embedder_args: Vec::new(),
            embedder_timeout_secs: 30,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

impl Config {
    /// Load configuration from `path` (or `$ROLLCALL_CONFIG`) and the
    /// process environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Overlay `ROLLCALL_*` variables read through `lookup`.
    ///
    /// Unparseable values are errors rather than silently falling back to
    /// the previous layer.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDING_DIMENSION") {
            self.embedding_dimension = env_parse("ROLLCALL_EMBEDDING_DIMENSION", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_MATCH_THRESHOLD") {
            self.match_threshold = env_parse("ROLLCALL_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_MULTI_FACE_POLICY") {
            self.multi_face_policy = env_parse("ROLLCALL_MULTI_FACE_POLICY", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_ALLOW_REENROLLMENT") {
            self.allow_reenrollment = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(v) = lookup("ROLLCALL_MAX_IMAGE_DIMENSION") {
            self.max_image_dimension = env_parse("ROLLCALL_MAX_IMAGE_DIMENSION", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_DEFAULT_SOURCE") {
            self.default_source = v;
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDER_COMMAND") {
            self.embedder_command = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDER_ARGS") {
            self.embedder_args = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDER_TIMEOUT_SECS") {
            self.embedder_timeout_secs = env_parse("ROLLCALL_EMBEDDER_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "match_threshold",
                message: format!("must be a positive number, got {}", self.match_threshold),
            });
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "embedding_dimension",
                message: "must be greater than zero".into(),
            });
        }
        if self.max_image_dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_image_dimension",
                message: "must be greater than zero".into(),
            });
        }
        if self.default_source.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "default_source",
                message: "must not be empty".into(),
            });
        }
        if self.embedder_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "embedder_timeout_secs",
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Path to the SQLite identity gallery.
    pub fn identities_path(&self) -> PathBuf {
        self.data_dir.join("identities.db")
    }

    /// Path to the attendance ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("attendance.csv")
    }

    /// Directory holding probe images referenced by the ledger.
    pub fn evidence_dir(&self) -> PathBuf {
        self.data_dir.join("evidence")
    }

    pub fn embedder_timeout(&self) -> Duration {
        Duration::from_secs(self.embedder_timeout_secs)
    }
}

fn env_parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        message: format!("{value:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.embedding_dimension, 128);
        assert_eq!(config.multi_face_policy, MultiFacePolicy::Primary);
        assert!(config.allow_reenrollment);
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/rollcall"
match_threshold = 0.5
multi_face_policy = "reject"
embedder_command = "/usr/local/bin/face-embed"
embedder_args = ["--model", "small"]
"#,
        )
        .unwrap();

        let mut config = Config::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/rollcall"));
        assert_eq!(config.multi_face_policy, MultiFacePolicy::Reject);
        assert_eq!(config.embedder_args, vec!["--model", "small"]);
        assert_eq!(config.embedding_dimension, 128);

        config
            .apply_env(env(&[
                ("ROLLCALL_MATCH_THRESHOLD", "0.6"),
                ("ROLLCALL_ALLOW_REENROLLMENT", "false"),
            ]))
            .unwrap();
        assert_eq!(config.match_threshold, 0.6);
        assert!(!config.allow_reenrollment);
        assert_eq!(config.ledger_path(), PathBuf::from("/srv/rollcall/attendance.csv"));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "similarity_threshold = 0.4\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_bad_env_value_is_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("ROLLCALL_MATCH_THRESHOLD", "close-enough")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ROLLCALL_MATCH_THRESHOLD", .. }));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        for threshold in [0.0, -0.1, f32::NAN] {
            let config = Config {
                match_threshold: threshold,
                ..Config::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { key: "match_threshold", .. })
            ));
        }
    }

    #[test]
    fn test_validate_rejects_zero_dimension() {
        let config = Config {
            embedding_dimension: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
