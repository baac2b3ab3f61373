//! Typed view of a [`ConverterConfig`] used at converter construction

use std::collections::BTreeMap;

use serde_json::Value;

use super::pages::PageSelection;
use super::refine::RefinementService;
use super::types::{ConverterKind, EngineError, OutputFormat};
use crate::backend::{Backend, ParseMethod, DEFAULT_LANG, GENERATION_PARAMETERS, RUNTIME_PARAMETERS};
use crate::converter::ConverterConfig;

/// Construction-time settings shared by every engine
#[derive(Debug, Clone)]
pub struct ConvertSettings {
    pub backend: Backend,
    pub parse_method: ParseMethod,
    pub kind: ConverterKind,
    pub output_format: OutputFormat,
    pub lang: String,
    pub formula_enable: bool,
    pub table_enable: bool,
    pub server_url: Option<String>,
    /// Zero-based pages to process; `None` = all
    pub pages: Option<PageSelection>,
    pub paginate_output: bool,
    pub extract_images: bool,
    pub force_ocr: bool,
    pub generation: BTreeMap<String, Value>,
    /// Model-runtime sizing forwarded to every backend
    pub runtime: BTreeMap<String, Value>,
    pub page_schema: Option<Value>,
    pub block_correction_prompt: Option<String>,
    pub refiner: Option<RefinementService>,
}

impl ConvertSettings {
    pub fn from_config(config: &ConverterConfig) -> Result<Self, EngineError> {
        let backend = match config.get_str("backend") {
            Some(id) => Backend::from_id(id)
                .ok_or_else(|| EngineError::construction(format!("Unknown backend '{}'", id)))?,
            None => Backend::Pipeline,
        };

        let parse_method = match config.get_str("parse_method") {
            Some(m) => m.parse().map_err(EngineError::construction)?,
            None => backend.descriptor().default_parse_method,
        };

        let kind = match config.get_str("converter") {
            Some(k) => k.parse().map_err(EngineError::construction)?,
            None => ConverterKind::Standard,
        };

        let output_format = match config.get_str("output_format") {
            Some(f) => f.parse().map_err(EngineError::construction)?,
            None => OutputFormat::Markdown,
        };

        let pages = config
            .get("pages")
            .map(PageSelection::from_value)
            .transpose()
            .map_err(EngineError::construction)?;

        let generation = GENERATION_PARAMETERS
            .iter()
            .filter_map(|name| config.get(name).map(|v| (name.to_string(), v.clone())))
            .collect();

        let runtime = RUNTIME_PARAMETERS
            .iter()
            .filter_map(|name| config.get(name).map(|v| (name.to_string(), v.clone())))
            .collect();

        let page_schema = match config.get("page_schema") {
            Some(Value::String(raw)) => Some(serde_json::from_str(raw).map_err(|e| {
                EngineError::construction(format!("page_schema is not valid JSON: {}", e))
            })?),
            Some(schema) => Some(schema.clone()),
            None => None,
        };

        let refiner = RefinementService::from_config(config)?;

        if kind == ConverterKind::Extraction {
            if page_schema.is_none() {
                return Err(EngineError::construction(
                    "Extraction converter requires page_schema",
                ));
            }
            if refiner.is_none() {
                return Err(EngineError::construction(
                    "Extraction converter requires use_llm",
                ));
            }
        }

        Ok(Self {
            backend,
            parse_method,
            kind,
            output_format,
            lang: config.get_str("lang").unwrap_or(DEFAULT_LANG).to_string(),
            formula_enable: config.get_bool("formula_enable").unwrap_or(true),
            table_enable: config.get_bool("table_enable").unwrap_or(true),
            server_url: config.get_str("server_url").map(String::from),
            pages,
            paginate_output: config.get_bool("paginate_output").unwrap_or(false),
            extract_images: !config.get_bool("disable_image_extraction").unwrap_or(false),
            force_ocr: config.get_bool("force_ocr").unwrap_or(false),
            generation,
            runtime,
            page_schema,
            block_correction_prompt: config.get_str("block_correction_prompt").map(String::from),
            refiner,
        })
    }

    /// Inclusive first/last page bounds of the selection
    pub fn page_bounds(&self) -> Option<(usize, usize)> {
        self.pages.as_ref().map(PageSelection::bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = ConvertSettings::from_config(&ConverterConfig::new()).unwrap();
        assert_eq!(settings.backend, Backend::Pipeline);
        assert_eq!(settings.parse_method, ParseMethod::Auto);
        assert_eq!(settings.kind, ConverterKind::Standard);
        assert_eq!(settings.lang, "ch");
        assert!(settings.extract_images);
        assert!(settings.refiner.is_none());
        assert_eq!(settings.page_bounds(), None);
    }

    #[test]
    fn test_generation_and_pages() {
        let config = ConverterConfig::new()
            .with("backend", "vlm-sglang-engine")
            .with("temperature", 0.2)
            .with("max_new_tokens", 1024)
            .with("tp_size", 2)
            .with("pages", json!([4, 1, 2]));
        let settings = ConvertSettings::from_config(&config).unwrap();
        assert_eq!(settings.parse_method, ParseMethod::Vlm);
        assert_eq!(settings.generation.len(), 2);
        assert_eq!(settings.runtime.get("tp_size"), Some(&json!(2)));
        assert_eq!(settings.page_bounds(), Some((1, 4)));
    }

    #[test]
    fn test_extraction_requirements() {
        let config = ConverterConfig::new().with("converter", "extraction");
        assert!(ConvertSettings::from_config(&config).is_err());

        let config = config
            .with("page_schema", r#"{"type":"object"}"#)
            .with("use_llm", true);
        let settings = ConvertSettings::from_config(&config).unwrap();
        assert_eq!(settings.page_schema, Some(json!({"type": "object"})));
    }
}
