use crate::sources::RecordFilter;
use crate::view_core::{codec_by_name, BinaryCodec};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Jsonl,
    Sqlite,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration of one view build, loaded from environment variables
#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub passive_sources: Vec<PathBuf>,
    pub active_sources: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub backend: BackendType,
    pub category: Option<String>,
    pub sensor: Option<String>,
    pub recontypes: Option<Vec<String>>,
    pub binary_encoding: String,
    pub probes_path: Option<PathBuf>,
    pub ipdata_url: Option<String>,
    pub channel_buffer: usize,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ViewConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(Self::parse_backend_from_args(), |key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(backend: BackendType, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let passive_sources: Vec<PathBuf> = var("VIEW_PASSIVE_SOURCES")
            .map(|s| split_list(&s).into_iter().map(PathBuf::from).collect())
            .unwrap_or_default();
        let active_sources: Vec<PathBuf> = var("VIEW_ACTIVE_SOURCES")
            .map(|s| split_list(&s).into_iter().map(PathBuf::from).collect())
            .unwrap_or_default();

        if passive_sources.is_empty() && active_sources.is_empty() {
            return Err(ConfigError::InvalidValue("no sources configured".to_string()));
        }

        let output_path = var("VIEW_OUTPUT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| match backend {
                BackendType::Jsonl => PathBuf::from("data/view.jsonl"),
                BackendType::Sqlite => PathBuf::from("data/view.db"),
            });

        let binary_encoding = var("VIEW_BINARY_ENCODING")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "base64".to_string());
        if codec_by_name(&binary_encoding).is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "VIEW_BINARY_ENCODING must be base64 or hex, got '{}'",
                binary_encoding
            )));
        }

        let channel_buffer = var("VIEW_CHANNEL_BUFFER")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1000);

        Ok(Self {
            passive_sources,
            active_sources,
            output_path,
            backend,
            category: var("VIEW_CATEGORY"),
            sensor: var("VIEW_SENSOR"),
            recontypes: var("VIEW_RECONTYPES").map(|s| split_list(&s)),
            binary_encoding,
            probes_path: var("VIEW_PROBES_PATH").map(PathBuf::from),
            ipdata_url: var("IPDATA_URL"),
            channel_buffer,
        })
    }

    pub fn parse_backend_from_args() -> BackendType {
        let args: Vec<String> = env::args().collect();
        Self::parse_backend(&args)
    }

    /// `--backend sqlite|jsonl`, defaulting to JSONL
    pub fn parse_backend(args: &[String]) -> BackendType {
        if let Some(idx) = args.iter().position(|x| x == "--backend") {
            match args.get(idx + 1).map(|s| s.as_str()) {
                Some("sqlite") => return BackendType::Sqlite,
                Some("jsonl") => return BackendType::Jsonl,
                other => log::warn!("Unknown --backend value {:?}, using jsonl", other),
            }
        }
        BackendType::Jsonl
    }

    pub fn record_filter(&self) -> RecordFilter {
        RecordFilter::new(self.sensor.clone(), self.recontypes.clone())
    }

    pub fn codec(&self) -> Result<Arc<dyn BinaryCodec>, ConfigError> {
        codec_by_name(&self.binary_encoding).ok_or_else(|| {
            ConfigError::InvalidValue(format!("unknown binary encoding '{}'", self.binary_encoding))
        })
    }
}
