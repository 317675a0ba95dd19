//! Service configuration.
//!
//! Sources, in order: built-in defaults, then an optional JSON file
//! named by `VAULT_CONFIG`, then individual `VAULT_*` environment
//! variables. There is no command-line surface.
//!
//! Recognized environment variables:
//!   VAULT_BIND_RPC          - binary RPC listen address (default 0.0.0.0:50051)
//!   VAULT_BIND_TOOL         - tool-call HTTP listen address (default 0.0.0.0:50080)
//!   VAULT_KEY_DIR           - on-disk key directory (default ./vault_keys)
//!   VAULT_TOKENS            - comma-separated bearer token allow-list (required)
//!   VAULT_K_MAX             - hard cap on top_k (default 10)
//!   VAULT_M_MAX             - per-call metadata list cap (default = k_max)
//!   VAULT_DEADLINE_SECS     - per-request deadline, tool transport (default 30);
//!                             RPC callers propagate their own deadlines
//!   VAULT_EXECUTOR_WIDTH    - blocking-decrypt concurrency (default min(cores, 4))
//!   VAULT_MAX_FRAME_BYTES   - inbound/outbound message cap (default 256 MiB)
//!   VAULT_FHE_DIM           - lattice dimension for first-boot key-gen (default 1024)
//!   VAULT_INDEX_NAME        - optional index-name hint in the public bundle
//!   VAULT_SCORE_SHAPE       - tool-transport result shape: structured | flat
//!   VAULT_RATE_LIMIT_RPS    - per-token refill rate (default 20)
//!   VAULT_RATE_LIMIT_BURST  - per-token burst capacity (default 50)
//!   VAULT_LOG_FORMAT        - "json" for structured logging, "pretty" for dev

use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_K_MAX: u32 = 10;
pub const DEFAULT_DEADLINE_SECS: u64 = 30;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;
pub const DEFAULT_FHE_DIM: u32 = 1024;

#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// On-wire shape of tool-transport score results. Chosen once at
/// startup, never per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreShape {
    /// `{shard_idx, row_idx, score}`, same as the binary RPC.
    Structured,
    /// `{index, score}`, for legacy single-shard agents.
    Flat,
}

impl FromStr for ScoreShape {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "structured" => Ok(Self::Structured),
            "flat" => Ok(Self::Flat),
            other => Err(ConfigError(format!(
                "invalid score shape {:?} (valid: structured, flat)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bind_rpc: SocketAddr,
    pub bind_tool: SocketAddr,
    pub key_dir: PathBuf,
    pub tokens: Vec<String>,
    pub k_max: u32,
    pub m_max: Option<u32>,
    pub deadline_secs: u64,
    pub executor_width: usize,
    pub max_frame_bytes: usize,
    pub fhe_dim: u32,
    pub index_name: Option<String>,
    pub score_shape: ScoreShape,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: u32,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_rpc: "0.0.0.0:50051".parse().expect("static address"),
            bind_tool: "0.0.0.0:50080".parse().expect("static address"),
            key_dir: PathBuf::from("./vault_keys"),
            tokens: Vec::new(),
            k_max: DEFAULT_K_MAX,
            m_max: None,
            deadline_secs: DEFAULT_DEADLINE_SECS,
            executor_width: num_cpus::get().min(4).max(1),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            fhe_dim: DEFAULT_FHE_DIM,
            index_name: None,
            score_shape: ScoreShape::Structured,
            rate_limit_rps: 20.0,
            rate_limit_burst: 50,
            log_format: "pretty".into(),
        }
    }
}

impl Config {
    /// Load from `VAULT_CONFIG` (if set) and the environment, then
    /// validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var("VAULT_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("read {}: {}", path, e)))?;
        serde_json::from_str(&data).map_err(|e| ConfigError(format!("parse {}: {}", path, e)))
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        read_env("VAULT_BIND_RPC", &mut self.bind_rpc)?;
        read_env("VAULT_BIND_TOOL", &mut self.bind_tool)?;
        if let Ok(v) = std::env::var("VAULT_KEY_DIR") {
            self.key_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VAULT_TOKENS") {
            self.tokens = parse_tokens(&v);
        }
        read_env("VAULT_K_MAX", &mut self.k_max)?;
        if let Ok(v) = std::env::var("VAULT_M_MAX") {
            let parsed = v
                .parse()
                .map_err(|e| ConfigError(format!("VAULT_M_MAX: {}", e)))?;
            self.m_max = Some(parsed);
        }
        read_env("VAULT_DEADLINE_SECS", &mut self.deadline_secs)?;
        read_env("VAULT_EXECUTOR_WIDTH", &mut self.executor_width)?;
        read_env("VAULT_MAX_FRAME_BYTES", &mut self.max_frame_bytes)?;
        read_env("VAULT_FHE_DIM", &mut self.fhe_dim)?;
        if let Ok(v) = std::env::var("VAULT_INDEX_NAME") {
            self.index_name = Some(v);
        }
        read_env("VAULT_SCORE_SHAPE", &mut self.score_shape)?;
        read_env("VAULT_RATE_LIMIT_RPS", &mut self.rate_limit_rps)?;
        read_env("VAULT_RATE_LIMIT_BURST", &mut self.rate_limit_burst)?;
        if let Ok(v) = std::env::var("VAULT_LOG_FORMAT") {
            self.log_format = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.is_empty() {
            return Err(ConfigError(
                "no bearer tokens configured (set VAULT_TOKENS); refusing to start".into(),
            ));
        }
        if self.k_max == 0 {
            return Err(ConfigError("k_max must be at least 1".into()));
        }
        if self.executor_width == 0 {
            return Err(ConfigError("executor_width must be at least 1".into()));
        }
        if self.max_frame_bytes < DEFAULT_MAX_FRAME_BYTES {
            return Err(ConfigError(format!(
                "max_frame_bytes must be at least {} (the evaluation key must fit)",
                DEFAULT_MAX_FRAME_BYTES
            )));
        }
        Ok(())
    }

    pub fn m_max(&self) -> u32 {
        self.m_max.unwrap_or(self.k_max)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

fn read_env<T>(var: &str, field: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Ok(v) = std::env::var(var) {
        *field = v.parse().map_err(|e| ConfigError(format!("{}: {}", var, e)))?;
    }
    Ok(())
}

fn parse_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
