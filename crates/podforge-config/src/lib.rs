pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_ENV: &str = "PODFORGE_CONFIG";

pub const DEFAULT_POD_NAME_PREFIX: &str = "podforge";
pub const KANIKO_VERSION: &str = "1.9.0";
pub const BUILDAH_VERSION: &str = "1.23.3";
pub const BUILDAH_DEFAULT_IMAGE_NAME: &str = "quay.io/buildah/stable";

/// Engine-wide settings. Every field has a default so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Worker pods are named `<prefix>-<build-name>-builder`
    pub pod_name_prefix: String,
    pub kaniko_executor_image: String,
    pub buildah_image: String,
    /// Timeout applied to builds whose platform sets none. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    pub recovery: RecoveryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pod_name_prefix: DEFAULT_POD_NAME_PREFIX.to_string(),
            kaniko_executor_image: format!("gcr.io/kaniko-project/executor:v{}", KANIKO_VERSION),
            buildah_image: format!("{}:v{}", BUILDAH_DEFAULT_IMAGE_NAME, BUILDAH_VERSION),
            default_timeout: Duration::from_secs(5 * 60),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// 失敗したビルドのリトライ方針 (指数バックオフ、ジッターなし)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryConfig {
    #[serde(with = "humantime_serde")]
    pub min_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
    pub factor: f64,
    /// 諦めるまでのリトライ回数
    pub attempt_max: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
            factor: 2.0,
            attempt_max: 5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pod_name_prefix.is_empty() {
            return Err(ConfigError::Invalid("podNamePrefix must not be empty".into()));
        }
        if self.recovery.factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "recovery.factor must be >= 1, got {}",
                self.recovery.factor
            )));
        }
        if self.recovery.min_wait > self.recovery.max_wait {
            return Err(ConfigError::Invalid(
                "recovery.minWait must not exceed recovery.maxWait".into(),
            ));
        }
        Ok(())
    }
}

/// podforgeの設定ディレクトリ (`<config_dir>/podforge`)
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("podforge");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the engine config file.
///
/// Search order:
/// 1. `PODFORGE_CONFIG` environment variable (direct path)
/// 2. current directory: `podforge.yaml`, `.podforge.yaml`
/// 3. `~/.config/podforge/config.yaml`
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        tracing::warn!("{} points at a missing file: {}", CONFIG_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;
    for filename in ["podforge.yaml", ".podforge.yaml"] {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("podforge").join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// エンジン設定を読み込む (ファイルがなければデフォルト)
pub fn load() -> Result<EngineConfig> {
    match find_config_file()? {
        Some(path) => load_from(&path),
        None => {
            tracing::debug!("No config file found, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

pub fn load_from(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = if content.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.validate()?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}
