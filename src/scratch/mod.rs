//! Per-request scratch storage

mod cleanup;
mod manager;

pub use cleanup::remove_dir_all_safe;
pub use manager::{ScratchDirectory, ScratchError, ScratchManager, ScratchStats};
