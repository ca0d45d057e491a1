use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "TUNNELSCOPE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interface: Option<String>,
    pub bpf_filter: String,
    pub promiscuous: bool,
    pub read_timeout_ms: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            bpf_filter: "tcp or udp".to_string(),
            promiscuous: true,
            read_timeout_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub binary_model: PathBuf,
    #[serde(default)]
    pub multiclass_model: Option<PathBuf>,
    #[serde(default)]
    pub class_map: Option<PathBuf>,
    #[serde(default = "default_attack_threshold")]
    pub attack_threshold: f32,
}

fn default_attack_threshold() -> f32 {
    0.85
}

/// Tunables for the extraction pipeline and its runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub flow_timeout_secs: u64,
    pub dns_window_secs: u64,
    pub domain_idle_timeout_secs: u64,
    pub shard_count: usize,
    /// Per-packet header size used for the header length estimate (IPv4 + TCP).
    pub header_len_estimate: u32,
    pub eviction_interval_ms: u64,
    pub stats_interval_ms: u64,
    pub output_queue_capacity: usize,
    pub capture: CaptureConfig,
    pub classifier: Option<ClassifierConfig>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            flow_timeout_secs: 60,
            dns_window_secs: 60,
            domain_idle_timeout_secs: 600,
            shard_count: 16,
            header_len_estimate: 40,
            eviction_interval_ms: 1_000,
            stats_interval_ms: 1_000,
            output_queue_capacity: 4_096,
            capture: CaptureConfig::default(),
            classifier: None,
        }
    }
}

impl ExtractorConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&s)
    }

    /// Loads the file named by `TUNNELSCOPE_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_json_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flow_timeout_secs == 0 {
            return Err(ConfigError::Invalid("flow_timeout_secs must be > 0".into()));
        }
        if self.dns_window_secs == 0 {
            return Err(ConfigError::Invalid("dns_window_secs must be > 0".into()));
        }
        if self.domain_idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("domain_idle_timeout_secs must be > 0".into()));
        }
        if self.shard_count == 0 {
            return Err(ConfigError::Invalid("shard_count must be >= 1".into()));
        }
        if self.output_queue_capacity == 0 {
            return Err(ConfigError::Invalid("output_queue_capacity must be >= 1".into()));
        }
        if self.eviction_interval_ms == 0 || self.stats_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick intervals must be > 0".into()));
        }
        if let Some(c) = &self.classifier {
            if !(0.0..=1.0).contains(&c.attack_threshold) {
                return Err(ConfigError::Invalid(format!(
                    "attack_threshold {} outside [0, 1]",
                    c.attack_threshold
                )));
            }
        }
        Ok(())
    }

    pub fn flow_timeout_us(&self) -> u64 {
        self.flow_timeout_secs.saturating_mul(1_000_000)
    }

    pub fn dns_window_us(&self) -> u64 {
        self.dns_window_secs.saturating_mul(1_000_000)
    }

    pub fn domain_idle_timeout_us(&self) -> u64 {
        self.domain_idle_timeout_secs.saturating_mul(1_000_000)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}
