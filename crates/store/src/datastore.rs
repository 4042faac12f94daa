use std::path::{Path, PathBuf};

use facetlab_core::{Dataset, DatasetBackend, FacetResult};

use crate::config::{BackendConfig, FacetLabConfig};
use crate::memory::MemoryBackend;
use crate::sql::SqlBackend;

const DEFAULT_DB_NAME: &str = "facetlab.sqlite";

pub fn load_or_init_config(base: &Path) -> FacetResult<FacetLabConfig> {
    let default_sqlite = base.join(DEFAULT_DB_NAME);
    FacetLabConfig::load_or_init(base, &default_sqlite)
}

/// Resolves the configured backend once.
pub async fn connect_backend(
    config: &FacetLabConfig,
    base: &Path,
) -> FacetResult<Box<dyn DatasetBackend>> {
    match config.database {
        BackendConfig::Memory => Ok(Box::new(MemoryBackend::new(config.limits()))),
        _ => Ok(Box::new(SqlBackend::connect(config, base).await?)),
    }
}

pub async fn open_dataset(base: &Path) -> FacetResult<Dataset> {
    let config = load_or_init_config(base)?;
    let backend = connect_backend(&config, base).await?;
    Ok(Dataset::new(backend))
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

#[cfg(test)]
mod tests {
    use super::{default_sqlite_path, load_or_init_config, open_dataset};
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_dataset_with_default_config() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let config = load_or_init_config(base).expect("config");
        assert_eq!(config.backend_name(), "sqlite");
        assert_eq!(config.table_name(), "dataset");
        let dataset = open_dataset(base).await.expect("open dataset");
        assert_eq!(dataset.backend_name(), "sqlite");
        assert!(default_sqlite_path(base).exists());
    }
}
