//! Command Engine
//!
//! Runs an external parsing CLI (MinerU-compatible flags) once per document
//! and collects its result layout:
//!
//! ```text
//! <output_dir>/<stem>/<subdir>/
//!     <stem>.md
//!     <stem>_content_list.json
//!     <stem>_middle.json
//!     <stem><model_output_suffix>
//!     images/*.{jpg,jpeg,png,bmp}
//! ```
//!
//! `subdir` is the parse method for the pipeline backend and `vlm` otherwise.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::refine::truncate;
use super::settings::ConvertSettings;
use super::types::{ConverterKind, EngineError, EngineOutput, OutputFormat};
use super::{Converter, ConverterFactory};
use crate::converter::ConverterConfig;
use crate::pool::Device;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];
const STDERR_TAIL: usize = 4000;

/// Builds converters that shell out to an external parser
#[derive(Debug, Clone)]
pub struct CommandFactory {
    program: String,
}

impl CommandFactory {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ConverterFactory for CommandFactory {
    fn name(&self) -> &'static str {
        "command"
    }

    fn build(&self, config: &ConverterConfig, device: &Device) -> Result<Arc<dyn Converter>, EngineError> {
        let settings = ConvertSettings::from_config(config)?;

        if settings.kind != ConverterKind::Standard {
            return Err(EngineError::construction(format!(
                "Converter '{}' is not available with the command engine",
                settings.kind
            )));
        }
        if let Some(pages) = settings.pages.as_ref().filter(|p| !p.is_contiguous()) {
            return Err(EngineError::construction(format!(
                "The command engine only processes a contiguous page span, got '{}'",
                pages
            )));
        }
        if settings.backend.descriptor().requires_accelerator_device && !device.is_accelerator() {
            tracing::warn!(
                backend = %settings.backend,
                "Backend expects an accelerator but this worker is CPU-bound"
            );
        }

        Ok(Arc::new(CommandConverter {
            program: self.program.clone(),
            settings,
            device: *device,
        }))
    }
}

pub struct CommandConverter {
    program: String,
    settings: ConvertSettings,
    device: Device,
}

impl CommandConverter {
    /// Command-line arguments for one document
    fn args(&self, source: &Path, output_dir: &Path) -> Vec<String> {
        let s = &self.settings;
        let descriptor = s.backend.descriptor();

        let mut args = vec![
            "-p".to_string(),
            source.display().to_string(),
            "-o".to_string(),
            output_dir.display().to_string(),
            "-b".to_string(),
            s.backend.id().to_string(),
            "-d".to_string(),
            self.device.to_string(),
        ];

        if descriptor.supports_parse_method_choice {
            args.extend(["-m".to_string(), s.parse_method.to_string()]);
        }
        if descriptor.supports_ocr_lang {
            args.extend(["-l".to_string(), s.lang.clone()]);
        }
        if descriptor.supports_formula_table_toggle {
            args.extend(["-f".to_string(), s.formula_enable.to_string()]);
            args.extend(["-t".to_string(), s.table_enable.to_string()]);
        }
        if let Some((start, end)) = s.page_bounds() {
            args.extend(["-s".to_string(), start.to_string()]);
            args.extend(["-e".to_string(), end.to_string()]);
        }
        if let Some(url) = &s.server_url {
            args.extend(["-u".to_string(), url.clone()]);
        }
        if descriptor.supports_generation_parameters {
            for (name, value) in &s.generation {
                args.push(format!("--{}", name));
                args.push(arg_value(value));
            }
        }
        for (name, value) in &s.runtime {
            args.push(format!("--{}", name.replace('_', "-")));
            args.push(arg_value(value));
        }

        args
    }
}

impl Converter for CommandConverter {
    fn kind(&self) -> ConverterKind {
        self.settings.kind
    }

    fn convert(&self, source: &Path, output_dir: &Path) -> Result<EngineOutput, EngineError> {
        let args = self.args(source, output_dir);
        tracing::debug!(program = %self.program, ?args, "Running parse command");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                EngineError::execution(format!("Failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = {
                let chars: Vec<char> = stderr.chars().collect();
                chars[chars.len().saturating_sub(STDERR_TAIL)..].iter().collect()
            };
            return Err(EngineError::execution(format!(
                "{} exited with {}",
                self.program, output.status
            ))
            .with_details(tail));
        }

        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let descriptor = self.settings.backend.descriptor();
        let result_dir = output_dir
            .join(stem)
            .join(descriptor.result_subdir_for(self.settings.parse_method));

        let mut result = collect_results(&result_dir, stem, descriptor.model_output_suffix)?;

        if let (Some(refiner), Some(markdown)) = (&self.settings.refiner, result.markdown.take()) {
            let prompt = self
                .settings
                .block_correction_prompt
                .as_deref()
                .unwrap_or("Fix text extraction errors in the following markdown. Keep the structure and return only the corrected markdown.");
            result.markdown = Some(match refiner.complete(prompt, &markdown) {
                Ok(refined) if !refined.is_empty() => refined,
                Ok(_) => markdown,
                Err(e) => {
                    tracing::warn!(service = refiner.name(), "Refinement failed: {}", e);
                    markdown
                }
            });
        }

        if self.settings.output_format == OutputFormat::Json && result.json.is_none() {
            result.json = result.middle_json.clone();
        }

        result.metadata.insert("engine".into(), json!("command"));
        result.metadata.insert("program".into(), json!(self.program));
        result.metadata.insert("device".into(), json!(self.device.to_string()));
        result
            .metadata
            .insert("resultDir".into(), json!(result_dir.display().to_string()));

        Ok(result)
    }
}

fn arg_value(value: &Value) -> String {
    match value {
        Value::String(v) => v.clone(),
        other => other.to_string(),
    }
}

/// Read the command's result directory into an [`EngineOutput`]
pub fn collect_results(
    result_dir: &Path,
    stem: &str,
    model_output_suffix: &str,
) -> Result<EngineOutput, EngineError> {
    if !result_dir.is_dir() {
        return Err(EngineError::execution(format!(
            "Result directory not found: {}",
            result_dir.display()
        )));
    }

    let markdown = read_optional(&result_dir.join(format!("{}.md", stem)))?;
    let content_list = read_json(&result_dir.join(format!("{}_content_list.json", stem)))?;
    let middle_json = read_json(&result_dir.join(format!("{}_middle.json", stem)))?;
    let model_output = read_optional(&result_dir.join(format!("{}{}", stem, model_output_suffix)))?;
    let images = read_images(&result_dir.join("images"))?;

    let pages = page_count(content_list.as_ref(), middle_json.as_ref());

    let mut metadata = Map::new();
    metadata.insert("imageCount".into(), json!(images.len()));

    Ok(EngineOutput {
        pages,
        markdown,
        content_list,
        middle_json,
        model_output,
        images,
        metadata,
        ..Default::default()
    })
}

/// Last content-list `page_idx` + 1, falling back to the middle JSON page list
pub fn page_count(content_list: Option<&Value>, middle_json: Option<&Value>) -> usize {
    let from_content = content_list
        .and_then(Value::as_array)
        .and_then(|items| items.last())
        .and_then(|last| last.get("page_idx"))
        .and_then(Value::as_u64)
        .map(|idx| idx as usize + 1);

    from_content
        .or_else(|| {
            middle_json
                .and_then(|m| m.get("pdf_info"))
                .and_then(Value::as_array)
                .map(Vec::len)
        })
        .unwrap_or(0)
}

fn read_optional(path: &Path) -> Result<Option<String>, EngineError> {
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(fs::read_to_string(path)?))
}

fn read_json(path: &Path) -> Result<Option<Value>, EngineError> {
    match read_optional(path)? {
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            EngineError::execution(format!("Invalid JSON in {}: {}", path.display(), e))
                .with_details(truncate(&raw, 500))
        }),
        None => Ok(None),
    }
}

fn read_images(dir: &Path) -> Result<BTreeMap<String, Vec<u8>>, EngineError> {
    let mut images = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(images);
    }

    for entry in fs::read_dir(dir)? {
        let path: PathBuf = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image || !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            images.insert(name.to_string(), fs::read(&path)?);
        }
    }

    Ok(images)
}
