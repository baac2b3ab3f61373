//! Per-backend parameter guides served by the metadata endpoints

use serde::Serialize;
use serde_json::{json, Value};

use super::types::{Backend, ParseMethod};

/// OCR language hints accepted by the pipeline backend
pub const OCR_LANGUAGES: &[&str] = &[
    "ch", "ch_server", "ch_lite", "en", "korean", "japan", "chinese_cht", "ta", "te", "ka",
    "latin", "arabic", "east_slavic", "cyrillic", "devanagari",
];

/// Language used when a backend ignores the caller's hint
pub const DEFAULT_LANG: &str = "ch";

/// Generation parameters forwarded to backends that support them
pub const GENERATION_PARAMETERS: &[&str] = &[
    "temperature",
    "top_p",
    "top_k",
    "repetition_penalty",
    "presence_penalty",
    "no_repeat_ngram_size",
    "max_new_tokens",
];

/// Model-runtime parameters forwarded to every backend
pub const RUNTIME_PARAMETERS: &[&str] = &["tp_size", "dp_size", "enable_torch_compile", "mem_fraction_static"];

/// Parameters every backend accepts
const COMMON_PARAMETERS: &[&str] = &[
    "output_format",
    "page_range",
    "start_page_id",
    "end_page_id",
    "return_md",
    "return_content_list",
    "return_middle_json",
    "return_model_output",
    "return_images",
    "embed_images",
    "converter",
    "use_llm",
    "llm_service",
    "tp_size",
    "dp_size",
    "enable_torch_compile",
    "mem_fraction_static",
];

/// Which request parameters a backend honors
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterGuide {
    pub required: Vec<&'static str>,
    pub optional: Vec<&'static str>,
    pub not_supported: Vec<&'static str>,
    /// Selectable parse methods, or the single fixed one
    pub parse_methods: Vec<ParseMethod>,
    pub parse_method_fixed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_languages: Option<&'static [&'static str]>,
}

pub fn parameter_guide(backend: Backend) -> ParameterGuide {
    let d = backend.descriptor();
    let mut required = Vec::new();
    let mut optional: Vec<&'static str> = COMMON_PARAMETERS.to_vec();
    let mut not_supported = Vec::new();

    if d.requires_external_server_url {
        required.push("server_url");
    }

    if d.supports_parse_method_choice {
        optional.push("parse_method");
    } else {
        not_supported.push("parse_method");
    }

    if d.supports_formula_table_toggle {
        optional.extend(["formula_enable", "table_enable"]);
    } else {
        not_supported.extend(["formula_enable", "table_enable"]);
    }

    if d.supports_ocr_lang {
        optional.push("lang");
    } else {
        not_supported.push("lang");
    }

    if d.supports_generation_parameters {
        optional.extend(GENERATION_PARAMETERS);
    } else {
        not_supported.extend(GENERATION_PARAMETERS);
    }

    let parse_methods = if d.supports_parse_method_choice {
        ParseMethod::SELECTABLE.to_vec()
    } else {
        vec![d.default_parse_method]
    };

    ParameterGuide {
        required,
        optional,
        not_supported,
        parse_methods,
        parse_method_fixed: !d.supports_parse_method_choice,
        ocr_languages: d.supports_ocr_lang.then_some(OCR_LANGUAGES),
    }
}

/// Example form parameters for a backend
pub fn example_parameters(backend: Backend) -> Value {
    match backend {
        Backend::Pipeline => json!({
            "backend": backend.id(),
            "parse_method": "auto",
            "lang": DEFAULT_LANG,
            "formula_enable": true,
            "table_enable": true,
            "output_format": "markdown",
        }),
        Backend::VlmTransformers => json!({
            "backend": backend.id(),
            "output_format": "markdown",
            "return_images": true,
        }),
        Backend::VlmSglangEngine => json!({
            "backend": backend.id(),
            "temperature": 0.0,
            "max_new_tokens": 4096,
            "output_format": "markdown",
        }),
        Backend::VlmSglangClient => json!({
            "backend": backend.id(),
            "server_url": "http://localhost:30000",
            "temperature": 0.0,
            "output_format": "markdown",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_backend_requires_server_url() {
        let guide = parameter_guide(Backend::VlmSglangClient);
        assert_eq!(guide.required, vec!["server_url"]);
        assert!(guide.parse_method_fixed);
        assert_eq!(guide.parse_methods, vec![ParseMethod::Vlm]);
        assert!(guide.optional.contains(&"temperature"));
        assert!(guide.not_supported.contains(&"lang"));
    }

    #[test]
    fn test_pipeline_guide_lists_languages() {
        let guide = parameter_guide(Backend::Pipeline);
        assert!(guide.required.is_empty());
        assert!(guide.optional.contains(&"formula_enable"));
        assert!(guide.not_supported.contains(&"max_new_tokens"));
        assert_eq!(guide.ocr_languages.map(|l| l[0]), Some("ch"));
    }

    #[test]
    fn test_runtime_parameters_are_common() {
        for backend in Backend::ALL {
            let guide = parameter_guide(backend);
            for name in RUNTIME_PARAMETERS {
                assert!(guide.optional.contains(name), "{} missing for {}", name, backend);
            }
        }
    }
}
