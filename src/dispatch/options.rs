//! Form options for a parse request

use std::collections::{BTreeMap, HashMap};

use axum::body::Bytes;
use axum::extract::Multipart;
use serde_json::{Number, Value};

use crate::backend::{
    Backend, EffectiveBackend, ParseMethod, DEFAULT_LANG, GENERATION_PARAMETERS, RUNTIME_PARAMETERS,
};
use crate::converter::{parse_bool, ConverterConfig};
use crate::engine::{ConverterKind, OutputFormat, PageSelection};
use crate::error::AppError;

/// Multipart field names accepted for the document
const FILE_FIELDS: &[&str] = &["file", "files"];

/// Boolean engine options forwarded as-is
const ENGINE_FLAGS: &[&str] = &["use_llm", "force_ocr", "paginate_output", "disable_image_extraction"];

/// String engine options forwarded as-is
const ENGINE_STRINGS: &[&str] = &[
    "llm_service",
    "block_correction_prompt",
    "ollama_base_url",
    "ollama_model",
    "openai_base_url",
    "openai_api_key",
    "openai_model",
];

// ============================================================================
// Upload
// ============================================================================

/// Uploaded document plus its flat form fields
#[derive(Debug, Default)]
pub struct ParseUpload {
    pub filename: Option<String>,
    pub data: Option<Bytes>,
    pub fields: HashMap<String, String>,
}

impl ParseUpload {
    /// Drain a multipart body
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut upload = ParseUpload::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();

            if FILE_FIELDS.contains(&name.as_str()) || field.file_name().is_some() {
                if upload.data.is_some() {
                    tracing::debug!(field = %name, "Ignoring additional file field");
                    continue;
                }
                upload.filename = field.file_name().map(String::from);
                upload.data = Some(field.bytes().await?);
            } else if !name.is_empty() {
                let value = field.text().await?;
                upload.fields.insert(name, value);
            }
        }

        Ok(upload)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Typed view of the request's form fields
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub backend: String,
    pub parse_method: ParseMethod,
    pub server_url: Option<String>,
    pub lang: String,
    pub formula_enable: bool,
    pub table_enable: bool,
    pub generation: BTreeMap<String, Value>,
    /// Model-runtime sizing (`tp_size`, `dp_size`, ...), only when supplied
    pub runtime: BTreeMap<String, Value>,
    pub output_format: OutputFormat,
    pub converter: ConverterKind,
    pub page_schema: Option<Value>,
    /// Zero-based page selection
    pub pages: Option<PageSelection>,
    pub return_md: bool,
    pub return_content_list: bool,
    pub return_middle_json: bool,
    pub return_model_output: bool,
    pub return_images: bool,
    pub embed_images: bool,
    /// Engine options passed through untouched
    pub engine: BTreeMap<String, Value>,
}

impl ParseOptions {
    pub fn from_form(fields: &HashMap<String, String>, default_backend: Backend) -> Result<Self, AppError> {
        let text = |name: &str| {
            fields
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let flag = |name: &str, default: bool| -> Result<bool, AppError> {
            match text(name) {
                Some(raw) => parse_bool(raw).ok_or_else(|| {
                    AppError::InvalidParameter(format!("{} must be a boolean, got '{}'", name, raw))
                }),
                None => Ok(default),
            }
        };

        let parse_method = match text("parse_method") {
            Some(raw) => raw.parse().map_err(AppError::InvalidParameter)?,
            None => ParseMethod::Auto,
        };

        let output_format = match text("output_format") {
            Some(raw) => raw.parse().map_err(AppError::InvalidParameter)?,
            None => OutputFormat::Markdown,
        };

        let converter = match text("converter").or_else(|| text("converter_cls")) {
            Some(raw) => raw.parse().map_err(AppError::InvalidParameter)?,
            None => ConverterKind::Standard,
        };

        let page_schema = match text("page_schema") {
            Some(raw) => Some(serde_json::from_str::<Value>(raw).map_err(|e| {
                AppError::InvalidParameter(format!("page_schema is not valid JSON: {}", e))
            })?),
            None => None,
        };
        if converter == ConverterKind::Extraction && page_schema.is_none() {
            return Err(AppError::InvalidParameter(
                "page_schema is required for the extraction converter".to_string(),
            ));
        }

        let mut generation = BTreeMap::new();
        for &name in GENERATION_PARAMETERS {
            if let Some(raw) = text(name) {
                generation.insert(name.to_string(), parse_number(name, raw)?);
            }
        }

        let mut runtime = BTreeMap::new();
        for &name in RUNTIME_PARAMETERS {
            if let Some(raw) = text(name) {
                runtime.insert(name.to_string(), parse_runtime_parameter(name, raw)?);
            }
        }

        let pages = match text("page_range") {
            Some(raw) => Some(PageSelection::parse(raw).map_err(AppError::InvalidParameter)?),
            None => page_bounds(text("start_page_id"), text("end_page_id"))?,
        };

        let mut engine = BTreeMap::new();
        for &name in ENGINE_FLAGS {
            if text(name).is_some() {
                engine.insert(name.to_string(), Value::Bool(flag(name, false)?));
            }
        }
        for &name in ENGINE_STRINGS {
            if let Some(value) = text(name) {
                engine.insert(name.to_string(), Value::String(value.to_string()));
            }
        }

        Ok(Self {
            backend: text("backend")
                .map(String::from)
                .unwrap_or_else(|| default_backend.id().to_string()),
            parse_method,
            server_url: text("server_url").map(String::from),
            lang: text("lang")
                .or_else(|| text("lang_list"))
                .unwrap_or(DEFAULT_LANG)
                .to_string(),
            formula_enable: flag("formula_enable", true)?,
            table_enable: flag("table_enable", true)?,
            generation,
            runtime,
            output_format,
            converter,
            page_schema,
            pages,
            return_md: flag("return_md", true)?,
            return_content_list: flag("return_content_list", false)?,
            return_middle_json: flag("return_middle_json", false)?,
            return_model_output: flag("return_model_output", false)?,
            return_images: flag("return_images", true)?,
            embed_images: flag("embed_images", true)?,
            engine,
        })
    }

    /// Engine configuration after backend adaptation
    ///
    /// Options the effective backend does not understand are left out so
    /// they cannot split the converter cache.
    pub fn converter_config(&self, effective: &EffectiveBackend) -> ConverterConfig {
        let descriptor = &effective.descriptor;
        let mut config = ConverterConfig::new()
            .with("backend", effective.backend.id())
            .with("parse_method", effective.parse_method.as_str())
            .with("converter", self.converter.as_str())
            .with("output_format", self.output_format.as_str());

        config.insert(
            "lang",
            if descriptor.supports_ocr_lang {
                self.lang.as_str()
            } else {
                DEFAULT_LANG
            },
        );

        if descriptor.supports_formula_table_toggle {
            config.insert("formula_enable", self.formula_enable);
            config.insert("table_enable", self.table_enable);
        }

        if descriptor.supports_generation_parameters {
            for (name, value) in &self.generation {
                config.insert(name.clone(), value.clone());
            }
        }

        for (name, value) in &self.runtime {
            config.insert(name.clone(), value.clone());
        }

        if let Some(url) = &effective.server_url {
            config.insert("server_url", url.clone());
        }
        if let Some(pages) = &self.pages {
            config.insert("pages", pages.to_value());
        }
        if let Some(schema) = &self.page_schema {
            config.insert("page_schema", schema.clone());
        }
        for (name, value) in &self.engine {
            config.insert(name.clone(), value.clone());
        }

        config
    }
}

fn parse_number(name: &str, raw: &str) -> Result<Value, AppError> {
    let invalid = || AppError::InvalidParameter(format!("{} must be a number, got '{}'", name, raw));
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Value::from(n));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(invalid)
}

fn parse_runtime_parameter(name: &str, raw: &str) -> Result<Value, AppError> {
    match name {
        "enable_torch_compile" => parse_bool(raw).map(Value::Bool).ok_or_else(|| {
            AppError::InvalidParameter(format!("{} must be a boolean, got '{}'", name, raw))
        }),
        "mem_fraction_static" => match raw.parse::<f64>() {
            Ok(v) if v > 0.0 && v <= 1.0 => parse_number(name, raw),
            _ => Err(AppError::InvalidParameter(format!(
                "{} must be a fraction in (0, 1], got '{}'",
                name, raw
            ))),
        },
        _ => match raw.parse::<u32>() {
            Ok(v) if v >= 1 => Ok(Value::from(v)),
            _ => Err(AppError::InvalidParameter(format!(
                "{} must be a positive integer, got '{}'",
                name, raw
            ))),
        },
    }
}

fn page_bounds(start: Option<&str>, end: Option<&str>) -> Result<Option<PageSelection>, AppError> {
    let index = |name: &str, raw: &str| {
        raw.parse::<usize>().map_err(|_| {
            AppError::InvalidParameter(format!("{} must be a non-negative integer, got '{}'", name, raw))
        })
    };

    let (start, end) = match (start, end) {
        (None, None) => return Ok(None),
        (Some(start), None) => {
            if index("start_page_id", start)? == 0 {
                return Ok(None);
            }
            return Err(AppError::InvalidParameter(
                "end_page_id is required when start_page_id is set".to_string(),
            ));
        }
        (start, Some(end)) => (
            start.map(|s| index("start_page_id", s)).transpose()?.unwrap_or(0),
            index("end_page_id", end)?,
        ),
    };

    if start > end {
        return Err(AppError::InvalidParameter(format!(
            "start_page_id ({}) is after end_page_id ({})",
            start, end
        )));
    }
    PageSelection::from_ranges([(start, end)])
        .map(Some)
        .map_err(AppError::InvalidParameter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRegistry;
    use crate::backend::RuntimeMode;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let options = ParseOptions::from_form(&HashMap::new(), Backend::Pipeline).unwrap();
        assert_eq!(options.backend, "pipeline");
        assert_eq!(options.parse_method, ParseMethod::Auto);
        assert_eq!(options.output_format, OutputFormat::Markdown);
        assert_eq!(options.lang, "ch");
        assert!(options.formula_enable && options.table_enable);
        assert!(options.return_md && options.embed_images);
        assert!(!options.return_content_list);
        assert!(options.pages.is_none());
    }

    #[test]
    fn test_page_range() {
        let options = ParseOptions::from_form(
            &form(&[("page_range", "3, 1,3"), ("start_page_id", "7"), ("end_page_id", "9")]),
            Backend::Pipeline,
        )
        .unwrap();
        assert_eq!(options.pages.unwrap().to_string(), "1,3");
        assert!(ParseOptions::from_form(&form(&[("page_range", "7-5")]), Backend::Pipeline).is_err());
    }

    #[test]
    fn test_start_end_pages() {
        let options = ParseOptions::from_form(
            &form(&[("start_page_id", "1"), ("end_page_id", "3")]),
            Backend::Pipeline,
        )
        .unwrap();
        assert_eq!(options.pages.unwrap().ranges(), &[(1, 3)]);

        assert!(ParseOptions::from_form(&form(&[("start_page_id", "2")]), Backend::Pipeline).is_err());
        assert!(ParseOptions::from_form(
            &form(&[("start_page_id", "4"), ("end_page_id", "2")]),
            Backend::Pipeline
        )
        .is_err());
    }

    #[test]
    fn test_huge_page_bounds_are_rejected() {
        let max = usize::MAX.to_string();
        for pairs in [
            vec![("end_page_id", max.as_str())],
            vec![("start_page_id", "0"), ("end_page_id", "10000000000")],
            vec![("page_range", "0-50000000")],
        ] {
            let err = ParseOptions::from_form(&form(&pairs), Backend::Pipeline).unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST, "{:?}", pairs);
            assert!(err.to_string().contains("maximum"), "{}", err);
        }
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for pairs in [
            [("parse_method", "magic")],
            [("output_format", "pdf")],
            [("formula_enable", "maybe")],
            [("temperature", "warm")],
            [("page_schema", "{not json")],
        ] {
            let err = ParseOptions::from_form(&form(&pairs), Backend::Pipeline).unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST, "{:?}", pairs);
        }
    }

    #[test]
    fn test_extraction_requires_schema() {
        let err = ParseOptions::from_form(&form(&[("converter", "extraction")]), Backend::Pipeline)
            .unwrap_err();
        assert!(err.to_string().contains("page_schema"));
    }

    #[test]
    fn test_pipeline_config_drops_generation_parameters() {
        let registry = BackendRegistry::new(RuntimeMode::Pipeline, None, None);
        let options = ParseOptions::from_form(
            &form(&[("temperature", "0.2"), ("lang", "en"), ("table_enable", "false")]),
            Backend::Pipeline,
        )
        .unwrap();
        let effective = registry.validate(&options.backend, options.parse_method, None).unwrap();
        let config = options.converter_config(&effective);

        assert!(!config.contains("temperature"));
        assert_eq!(config.get_str("lang"), Some("en"));
        assert_eq!(config.get_bool("table_enable"), Some(false));
    }

    #[test]
    fn test_vlm_config_keeps_generation_and_forces_lang() {
        let registry = BackendRegistry::new(RuntimeMode::Vlm, Some("vlm-sglang-engine"), None);
        let options = ParseOptions::from_form(
            &form(&[
                ("backend", "vlm-sglang-engine"),
                ("temperature", "0.2"),
                ("top_k", "40"),
                ("lang", "en"),
                ("formula_enable", "false"),
            ]),
            Backend::VlmSglangEngine,
        )
        .unwrap();
        let effective = registry.validate(&options.backend, options.parse_method, None).unwrap();
        let config = options.converter_config(&effective);

        assert_eq!(config.get_f64("temperature"), Some(0.2));
        assert_eq!(config.get_u64("top_k"), Some(40));
        assert_eq!(config.get_str("lang"), Some("ch"));
        assert!(!config.contains("formula_enable"));
    }

    #[test]
    fn test_vlm_transformers_config_drops_generation() {
        let registry = BackendRegistry::new(RuntimeMode::Vlm, Some("vlm-transformers"), None);
        let options = ParseOptions::from_form(
            &form(&[("backend", "vlm-transformers"), ("temperature", "0.2"), ("top_k", "40")]),
            Backend::VlmTransformers,
        )
        .unwrap();
        let effective = registry.validate(&options.backend, options.parse_method, None).unwrap();
        let config = options.converter_config(&effective);

        assert!(!config.contains("temperature"));
        assert!(!config.contains("top_k"));
        assert_eq!(config.get_str("backend"), Some("vlm-transformers"));
    }

    #[test]
    fn test_runtime_parameters_forwarded_for_every_backend() {
        let registry = BackendRegistry::new(RuntimeMode::Pipeline, None, None);
        let options = ParseOptions::from_form(
            &form(&[
                ("tp_size", "2"),
                ("dp_size", "1"),
                ("enable_torch_compile", "false"),
                ("mem_fraction_static", "0.5"),
            ]),
            Backend::Pipeline,
        )
        .unwrap();
        let effective = registry.validate(&options.backend, options.parse_method, None).unwrap();
        let config = options.converter_config(&effective);

        assert_eq!(config.get_u64("tp_size"), Some(2));
        assert_eq!(config.get_u64("dp_size"), Some(1));
        assert_eq!(config.get_bool("enable_torch_compile"), Some(false));
        assert_eq!(config.get_f64("mem_fraction_static"), Some(0.5));

        let defaults = ParseOptions::from_form(&HashMap::new(), Backend::Pipeline).unwrap();
        assert!(!defaults.converter_config(&effective).contains("tp_size"));

        for pairs in [
            [("tp_size", "0")],
            [("dp_size", "two")],
            [("mem_fraction_static", "1.5")],
            [("enable_torch_compile", "sometimes")],
        ] {
            assert!(ParseOptions::from_form(&form(&pairs), Backend::Pipeline).is_err(), "{:?}", pairs);
        }
    }

    #[test]
    fn test_same_options_any_order_same_key() {
        let registry = BackendRegistry::new(RuntimeMode::Pipeline, None, None);
        let a = form(&[("lang", "en"), ("use_llm", "true"), ("page_range", "0-2")]);
        let b = form(&[("page_range", "0,1,2"), ("use_llm", "yes"), ("lang", "en")]);

        let key = |fields: &HashMap<String, String>| {
            let options = ParseOptions::from_form(fields, Backend::Pipeline).unwrap();
            let effective = registry.validate(&options.backend, options.parse_method, None).unwrap();
            options.converter_config(&effective).key()
        };
        assert_eq!(key(&a), key(&b));
    }
}
