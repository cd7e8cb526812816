use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> = Lazy::new(|| ProjectDirs::from("", "", "facereg"));

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEREG_CONFIG_PATH") {
    Some(p) => PathBuf::from(p),
    None => PROJECT_DIRS
        .as_ref()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/etc/facereg/config.toml")),
});

pub static STORE_DIR: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEREG_STORE_DIR") {
    Some(p) => PathBuf::from(p),
    None => PROJECT_DIRS
        .as_ref()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/var/lib/facereg")),
});

/// What to do when the persisted collection cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Log a warning, drop the stored data and start empty.
    #[default]
    Reset,
    /// Refuse to start.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub model_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: "facereg-extract".to_string(),
            args: Vec::new(),
            model_dir: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest descriptor distance still accepted as the same person.
    pub threshold: f32,
    pub camera: String,
    pub store_dir: Option<PathBuf>,
    pub on_corrupt: CorruptPolicy,
    pub extractor: ExtractorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: crate::matcher::DEFAULT_THRESHOLD,
            camera: "/dev/video0".to_string(),
            store_dir: None,
            on_corrupt: CorruptPolicy::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl Config {
    pub fn store_dir(&self) -> &Path {
        self.store_dir.as_deref().unwrap_or(STORE_DIR.as_path())
    }

    fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            anyhow::bail!("threshold must be a non-negative number, got {}", self.threshold);
        }
        if self.extractor.timeout_secs == 0 {
            anyhow::bail!("extractor.timeout_secs must be at least 1");
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
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
