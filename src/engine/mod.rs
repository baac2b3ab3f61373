//! Processing Engines
//!
//! The parsing engine is opaque to the rest of the server. Workers only see
//! two seams:
//!
//! - [`ConverterFactory`]: builds a converter for a configuration on a device
//! - [`Converter`]: turns one source file into an [`EngineOutput`]
//!
//! # Implementations
//!
//! - [`TextLayerFactory`]: MuPDF text-layer extraction (default)
//! - [`CommandFactory`]: external MinerU-compatible CLI

mod command;
mod pages;
mod refine;
mod settings;
mod text_layer;
mod types;

use std::fs;
use std::path::Path;
use std::sync::Arc;

pub use command::{collect_results, page_count, CommandConverter, CommandFactory};
pub use pages::{PageSelection, MAX_PAGE_INDEX};
pub use refine::RefinementService;
pub use settings::ConvertSettings;
pub use text_layer::{TextLayerConverter, TextLayerFactory};
pub use types::{Chunk, ConverterKind, EngineError, EngineOutput, OutputFormat};

use crate::config::{EngineConfig, EngineKind};
use crate::converter::ConverterConfig;
use crate::pool::Device;

/// A constructed, reusable processing object
pub trait Converter: Send + Sync {
    /// Shape this converter was built as
    fn kind(&self) -> ConverterKind;

    /// Process `source`, writing artifacts below `output_dir`
    fn convert(&self, source: &Path, output_dir: &Path) -> Result<EngineOutput, EngineError>;
}

/// Builds converters; shared by every worker
pub trait ConverterFactory: Send + Sync {
    /// Engine name for logs and health output
    fn name(&self) -> &'static str;

    /// Construct a converter for `config` bound to `device`
    fn build(&self, config: &ConverterConfig, device: &Device) -> Result<Arc<dyn Converter>, EngineError>;
}

/// Factory for the configured engine
pub fn factory_from_config(config: &EngineConfig) -> Arc<dyn ConverterFactory> {
    match config.kind {
        EngineKind::TextLayer => Arc::new(TextLayerFactory::new()),
        EngineKind::Command => Arc::new(CommandFactory::new(config.command.clone())),
    }
}

/// Persist an output's markdown, content list, JSON and images
pub(crate) fn write_artifacts(output_dir: &Path, stem: &str, output: &EngineOutput) -> Result<(), EngineError> {
    fs::create_dir_all(output_dir)?;

    if let Some(markdown) = &output.markdown {
        fs::write(output_dir.join(format!("{}.md", stem)), markdown)?;
    }
    if let Some(content_list) = &output.content_list {
        fs::write(
            output_dir.join(format!("{}_content_list.json", stem)),
            serde_json::to_vec_pretty(content_list).map_err(|e| EngineError::execution(e.to_string()))?,
        )?;
    }
    if let Some(json) = &output.json {
        fs::write(
            output_dir.join(format!("{}.json", stem)),
            serde_json::to_vec_pretty(json).map_err(|e| EngineError::execution(e.to_string()))?,
        )?;
    }
    if !output.images.is_empty() {
        let images_dir = output_dir.join("images");
        fs::create_dir_all(&images_dir)?;
        for (name, bytes) in &output.images {
            fs::write(images_dir.join(name), bytes)?;
        }
    }

    Ok(())
}
