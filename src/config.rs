//! Configuration management for the parse server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backend::{Backend, RuntimeMode};

const DEFAULT_PORT: u16 = 7434;
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 100;
const DEFAULT_CLEANUP_DELAY_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub pool: PoolConfig,
    pub scratch: ScratchConfig,
    pub upload: UploadConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Backend family selection
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mode: RuntimeMode,
    /// Active backend in VLM mode
    pub vlm_backend: String,
    /// Default external server URL
    pub server_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub device_count: usize,
    pub processes_per_device: usize,
    /// Overrides `device_count × processes_per_device`
    pub worker_count: Option<usize>,
    /// Per-worker converter bound (0 = unbounded)
    pub converter_cache_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ScratchConfig {
    pub root: PathBuf,
    pub cleanup_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// MuPDF text-layer extraction
    TextLayer,
    /// External parse command
    Command,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Program run by the command engine
    pub command: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: DEFAULT_PORT,
            },
            runtime: RuntimeConfig::default(),
            pool: PoolConfig::default(),
            scratch: ScratchConfig::default(),
            upload: UploadConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::Pipeline,
            vlm_backend: Backend::VlmSglangEngine.id().to_string(),
            server_url: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            device_count: 0,
            processes_per_device: 1,
            worker_count: None,
            converter_cache_capacity: 0,
        }
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: env::temp_dir(),
            cleanup_delay: Duration::from_secs(DEFAULT_CLEANUP_DELAY_SECS),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE_MB * 1024 * 1024,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::TextLayer,
            command: "mineru".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mode = match var("PARSE_MODE") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Unknown PARSE_MODE '{}', using pipeline", raw);
                RuntimeMode::Pipeline
            }),
            None => RuntimeMode::Pipeline,
        };

        let device_count = match var("ACCELERATOR_DEVICES") {
            Some(raw) => parse("ACCELERATOR_DEVICES", raw)?,
            None => var("CUDA_VISIBLE_DEVICES")
                .map(|v| count_visible_devices(&v))
                .unwrap_or(0),
        };

        let processes_per_device = match var("PROCESSES_PER_DEVICE").or_else(|| var("PROCESSES_PER_GPU")) {
            Some(raw) => parse::<usize>("PROCESSES_PER_DEVICE", raw)?.max(1),
            None => 1,
        };

        let engine_kind = match var("PARSE_ENGINE").as_deref() {
            None | Some("text-layer") | Some("text_layer") | Some("mupdf") => EngineKind::TextLayer,
            Some("command") | Some("mineru") => EngineKind::Command,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "PARSE_ENGINE",
                    value: other.to_string(),
                })
            }
        };

        let max_file_size_mb: u64 = match var("MAX_FILE_SIZE_MB") {
            Some(raw) => parse("MAX_FILE_SIZE_MB", raw)?,
            None => DEFAULT_MAX_FILE_SIZE_MB,
        };

        let cleanup_delay_secs: u64 = match var("CLEANUP_DELAY_SECS") {
            Some(raw) => parse("CLEANUP_DELAY_SECS", raw)?,
            None => DEFAULT_CLEANUP_DELAY_SECS,
        };

        Ok(Config {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: match var("SERVER_PORT") {
                    Some(raw) => parse("SERVER_PORT", raw)?,
                    None => DEFAULT_PORT,
                },
            },
            runtime: RuntimeConfig {
                mode,
                vlm_backend: var("PARSE_VLM_BACKEND")
                    .unwrap_or_else(|| Backend::VlmSglangEngine.id().to_string()),
                server_url: var("PARSE_SERVER_URL"),
            },
            pool: PoolConfig {
                device_count,
                processes_per_device,
                worker_count: var("WORKER_COUNT")
                    .map(|raw| parse("WORKER_COUNT", raw))
                    .transpose()?,
                converter_cache_capacity: match var("CONVERTER_CACHE_CAPACITY") {
                    Some(raw) => parse("CONVERTER_CACHE_CAPACITY", raw)?,
                    None => 0,
                },
            },
            scratch: ScratchConfig {
                root: var("SCRATCH_ROOT").map(PathBuf::from).unwrap_or_else(env::temp_dir),
                cleanup_delay: Duration::from_secs(cleanup_delay_secs),
            },
            upload: UploadConfig {
                max_file_size: max_file_size_mb * 1024 * 1024,
            },
            engine: EngineConfig {
                kind: engine_kind,
                command: var("PARSE_ENGINE_COMMAND").unwrap_or_else(|| "mineru".to_string()),
            },
        })
    }
}

fn parse<T: FromStr>(var: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid { var, value: raw })
}

/// Devices listed in a `CUDA_VISIBLE_DEVICES` value
fn count_visible_devices(value: &str) -> usize {
    value
        .split(',')
        .map(str::trim)
        .take_while(|id| !id.is_empty() && !id.starts_with('-'))
        .count()
}
