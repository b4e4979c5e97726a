#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::index::IndexKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embedding_model: String,
    pub vision_model: String,
    pub batch_size: u32,
    pub temperature: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 11434,
            embedding_model: "nomic-embed-text:latest".to_string(),
            vision_model: "gemma3:27b".to_string(),
            batch_size: 16,
            temperature: 0.1,
        }
    }
}

/// Nearest-neighbor algorithm used when an index has to be built
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexAlgorithm {
    #[default]
    Flat,
    Ivf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub index_kind: IndexAlgorithm,
    /// Number of clusters for the IVF index
    pub nlist: usize,
    /// Number of clusters probed per IVF query
    pub nprobe: usize,
    pub default_k: usize,
    pub max_results: usize,
    pub query_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_kind: IndexAlgorithm::Flat,
            nlist: 100,
            nprobe: 8,
            default_k: 50,
            max_results: crate::search::DEFAULT_MAX_RESULTS,
            query_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid cluster count: {0} (must be between 1 and 65536)")]
    InvalidNlist(usize),
    #[error("Invalid probe count: {0} (must be between 1 and nlist ({1}))")]
    InvalidNprobe(usize, usize),
    #[error("Invalid default k: {0} (must be between 1 and 1000)")]
    InvalidDefaultK(usize),
    #[error("Invalid max results: {0} (must be between 1 and 100)")]
    InvalidMaxResults(usize),
    #[error("Invalid query timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidQueryTimeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default base directory, `<platform config dir>/style-search`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("style-search"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.search.validate()?;
        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Path of the persisted vector store produced by ingestion
    #[inline]
    pub fn store_path(&self) -> PathBuf {
        self.get_base_dir().join("catalog.bin")
    }

    /// Directory holding one persisted index per facet
    #[inline]
    pub fn index_dir(&self) -> PathBuf {
        self.get_base_dir().join("indexes")
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.vision_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.vision_model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.ollama_url()?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.embedding_model = model;
        Ok(())
    }

    #[inline]
    pub fn set_vision_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.vision_model = model;
        Ok(())
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}

impl SearchConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=65536).contains(&self.nlist) {
            return Err(ConfigError::InvalidNlist(self.nlist));
        }

        if self.nprobe == 0 || self.nprobe > self.nlist {
            return Err(ConfigError::InvalidNprobe(self.nprobe, self.nlist));
        }

        if !(1..=1000).contains(&self.default_k) {
            return Err(ConfigError::InvalidDefaultK(self.default_k));
        }

        if !(1..=100).contains(&self.max_results) {
            return Err(ConfigError::InvalidMaxResults(self.max_results));
        }

        if !(1..=300).contains(&self.query_timeout_secs) {
            return Err(ConfigError::InvalidQueryTimeout(self.query_timeout_secs));
        }

        Ok(())
    }

    /// Index algorithm and parameters to record in newly built indices
    #[inline]
    pub fn index_kind(&self) -> IndexKind {
        match self.index_kind {
            IndexAlgorithm::Flat => IndexKind::Flat,
            IndexAlgorithm::Ivf => IndexKind::Ivf {
                nlist: self.nlist,
                nprobe: self.nprobe,
            },
        }
    }

    #[inline]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    #[inline]
    pub fn set_index_kind(&mut self, kind: IndexAlgorithm) {
        self.index_kind = kind;
    }

    #[inline]
    pub fn set_nlist(&mut self, nlist: usize) -> Result<(), ConfigError> {
        if !(1..=65536).contains(&nlist) {
            return Err(ConfigError::InvalidNlist(nlist));
        }
        self.nlist = nlist;
        self.nprobe = self.nprobe.min(nlist);
        Ok(())
    }

    #[inline]
    pub fn set_nprobe(&mut self, nprobe: usize) -> Result<(), ConfigError> {
        if nprobe == 0 || nprobe > self.nlist {
            return Err(ConfigError::InvalidNprobe(nprobe, self.nlist));
        }
        self.nprobe = nprobe;
        Ok(())
    }

    #[inline]
    pub fn set_default_k(&mut self, k: usize) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&k) {
            return Err(ConfigError::InvalidDefaultK(k));
        }
        self.default_k = k;
        Ok(())
    }

    #[inline]
    pub fn set_max_results(&mut self, max_results: usize) -> Result<(), ConfigError> {
        if !(1..=100).contains(&max_results) {
            return Err(ConfigError::InvalidMaxResults(max_results));
        }
        self.max_results = max_results;
        Ok(())
    }
}
