//! Configuration canonicalization and per-worker converter reuse

mod cache;
mod key;

pub use cache::{CacheStats, ConverterCache};
pub(crate) use key::parse_bool;
pub use key::{ConfigurationKey, ConverterConfig};
