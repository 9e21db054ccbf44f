//! Retrieval, storage and registry collaborators.

pub mod align;
pub mod cache;
pub mod registry;
pub mod retriever;
pub mod sql;
pub mod store;

pub use cache::ParquetStore;
pub use registry::{AuxiliaryNames, DatasetConfig, IndicatorDefaults, Registry, RevisionPolicy};
pub use retriever::{CsvRetriever, RawColumn, RawTable, Retriever};
pub use sql::SqliteStore;
pub use store::{CacheStore, CachedDataset, MemoryStore};
