//! SQLite storage and query engine for bi-temporal entity attributes.

pub mod config;
pub mod datastore;
mod db;
pub mod expiry;
pub mod query;
pub mod sample;
pub mod schema;
pub mod store;
pub mod write;

pub use config::{
    DatabaseConfig, EvaConfig, IndexProfile, InsertMode, IntegrityConfig, LimitsConfig, PoolConfig,
    SchemaConfig, TuningConfig, WriteConfig,
};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use eva_core::*;
pub use sample::{
    NODE_ID_ATTRIBUTE, QueryGenerator, QueryMix, QueryShape, REGIONS, SampleSnapshot, VM_TYPES,
    WORKLOAD_ID_ATTRIBUTE,
};
pub use schema::{IndexSpec, SchemaBuilder};
pub use store::{EvaStore, ReadPin};
