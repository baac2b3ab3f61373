//! Document Parse Server Library
//!
//! Orchestrates document parsing over HTTP: requests are validated against
//! the active backend set, given a scratch directory, and executed by a fixed
//! pool of device-bound workers that reuse converters per configuration.
//!
//! The server binary is in main.rs; the library is used by integration tests
//! and benchmarks.
//!
//! # Modules
//!
//! - `backend`: Backend capability registry
//! - `converter`: Configuration canonicalizer and per-worker converter cache
//! - `engine`: Converter traits and engines
//! - `pool`: Device registry and worker pool
//! - `scratch`: Per-request scratch directories
//! - `dispatch`: Request orchestration and response shaping
//! - `routes`: HTTP surface

pub mod backend;
pub mod config;
pub mod converter;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod pool;
pub mod routes;
pub mod scratch;
pub mod state;

pub use config::Config;
pub use error::{AppError, ParseFailure};
pub use state::AppState;
