//! Worker Pool
//!
//! Device assignment plus the fixed-size pool of sequential workers that
//! execute parse jobs.

mod device;
mod manager;
mod types;
mod worker;

pub use device::{Device, DeviceRegistry};
pub use manager::WorkerPool;
pub use types::{JobOutcome, PoolError, PoolStats, RequestJob, WorkerIdentity};
