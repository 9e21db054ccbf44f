//! econlab core: tagged economic-indicator datasets.
//!
//! This crate contains:
//! - The metadata model (per-column semantic tags and derivation rules)
//! - The dataset entity (time-indexed table plus metadata, similarity guard)
//! - The transformation pipeline (resample, change, decompose, convert, rebase, rolling)
//! - Storage contracts and backends (Parquet + JSON sidecar, SQLite, in-memory)
//! - The retriever contract, a CSV retriever and the read-only registry

/// Declares a closed tag enum whose string form is shared by serde,
/// `Display` and `FromStr` (case-insensitive).
macro_rules! tag_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let needle = s.trim().to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(&needle))
                    .ok_or_else(|| format!("'{s}' is not a valid {}", stringify!($name)))
            }
        }
    };
}

pub mod data;
pub mod dataset;
pub mod error;
pub mod metadata;
pub mod period;
pub mod transform;

pub use data::cache::ParquetStore;
pub use data::registry::{AuxiliaryNames, DatasetConfig, Registry, RevisionPolicy};
pub use data::retriever::{CsvRetriever, RawColumn, RawTable, Retriever};
pub use data::sql::SqliteStore;
pub use data::store::{CacheStore, CachedDataset, MemoryStore};
pub use dataset::{Dataset, SimilarityConfig};
pub use error::{DataError, DeriveError, RetrievalError};
pub use metadata::{DatasetMetadata, IndicatorMetadata, MetadataOp};
pub use period::Frequency;
pub use transform::{
    apply_chain, AuxiliarySource, ClassicalDecomposer, ConvertFlavor, Decomposer, Transform,
    TransformContext,
};
