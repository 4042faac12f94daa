use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use facetlab_core::{FacetError, FacetResult};

const DEFAULT_CONFIG_NAME: &str = "facetlab.json";
const DEFAULT_TABLE: &str = "dataset";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory,
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Records sampled by facet type inference.
    pub sample_size: Option<usize>,
    /// Distinct values kept per categorial facet by relational scans.
    pub category_limit: Option<usize>,
    /// Rows per insert statement during imports.
    pub max_ingest_batch: Option<usize>,
}

impl LimitsConfig {
    pub fn with_defaults() -> Self {
        Self {
            sample_size: Some(10),
            category_limit: Some(50),
            max_ingest_batch: Some(500),
        }
    }
}

/// Resolved limits with defaults applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub sample_size: usize,
    pub category_limit: usize,
    pub max_ingest_batch: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::from_config(&LimitsConfig::with_defaults())
    }
}

impl Limits {
    pub fn from_config(config: &LimitsConfig) -> Self {
        Self {
            sample_size: config.sample_size.unwrap_or(10).max(1),
            category_limit: config.category_limit.unwrap_or(50).max(1),
            max_ingest_batch: config.max_ingest_batch.unwrap_or(500).max(1),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FacetLabConfig {
    pub database: BackendConfig,
    pub table: Option<String>,
    pub pool: Option<PoolConfig>,
    pub limits: Option<LimitsConfig>,
}

impl FacetLabConfig {
    pub fn memory() -> Self {
        Self {
            database: BackendConfig::Memory,
            table: None,
            pool: None,
            limits: Some(LimitsConfig::with_defaults()),
        }
    }

    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: BackendConfig::Sqlite {
                path: Some(path.into()),
            },
            table: Some(DEFAULT_TABLE.to_string()),
            pool: None,
            limits: Some(LimitsConfig::with_defaults()),
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> FacetResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| FacetError::configuration(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| FacetError::configuration(format!("read config: {err}")))?;
            let config: FacetLabConfig = serde_json::from_str(&raw)
                .map_err(|err| FacetError::configuration(err.to_string()))?;
            return Ok(config);
        }
        let default = FacetLabConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| FacetError::configuration(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| FacetError::configuration(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> FacetResult<PathBuf> {
        match &self.database {
            BackendConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| "facetlab.sqlite".to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(FacetError::configuration("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            BackendConfig::Memory => "memory",
            BackendConfig::Sqlite { .. } => "sqlite",
            BackendConfig::Postgres { .. } => "postgres",
            BackendConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            BackendConfig::Memory | BackendConfig::Sqlite { .. } => None,
            BackendConfig::Postgres { url } | BackendConfig::Mysql { url } => Some(url.as_str()),
        }
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(DEFAULT_TABLE)
    }

    pub fn limits(&self) -> Limits {
        self.limits
            .as_ref()
            .map(Limits::from_config)
            .unwrap_or_default()
    }
}
