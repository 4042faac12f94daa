pub mod config;
pub mod datastore;
mod db;
pub mod memory;
pub mod sql;

pub mod transform {
    pub use facetlab_core::transform::*;
}

pub mod value {
    pub use facetlab_core::value::*;
}

pub use config::{BackendConfig, FacetLabConfig, Limits, LimitsConfig, PoolConfig};
pub use datastore::{connect_backend, default_sqlite_path, load_or_init_config, open_dataset};
pub use facetlab_core::*;
pub use memory::MemoryBackend;
pub use sql::SqlBackend;
