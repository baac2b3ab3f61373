//! Backend Types
//!
//! Static capability table for every known processing backend, plus the
//! runtime mode that selects which of them are active.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Known processing backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Layout/OCR pipeline
    Pipeline,
    /// Vision-language model running in-process via transformers
    VlmTransformers,
    /// Vision-language model running in-process via an sglang engine
    VlmSglangEngine,
    /// Vision-language model served by an external sglang server
    VlmSglangClient,
}

impl Backend {
    /// Every backend the server knows about, active or not
    pub const ALL: [Backend; 4] = [
        Backend::Pipeline,
        Backend::VlmTransformers,
        Backend::VlmSglangEngine,
        Backend::VlmSglangClient,
    ];

    /// Wire identifier
    pub fn id(self) -> &'static str {
        match self {
            Backend::Pipeline => "pipeline",
            Backend::VlmTransformers => "vlm-transformers",
            Backend::VlmSglangEngine => "vlm-sglang-engine",
            Backend::VlmSglangClient => "vlm-sglang-client",
        }
    }

    /// Look up a backend by its wire identifier
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.id() == id)
    }

    /// Runtime mode this backend belongs to
    pub fn family(self) -> RuntimeMode {
        match self {
            Backend::Pipeline => RuntimeMode::Pipeline,
            _ => RuntimeMode::Vlm,
        }
    }

    /// Capability descriptor
    pub fn descriptor(self) -> BackendDescriptor {
        match self {
            Backend::Pipeline => BackendDescriptor {
                id: self.id(),
                supports_parse_method_choice: true,
                supports_formula_table_toggle: true,
                default_parse_method: ParseMethod::Auto,
                requires_accelerator_device: false,
                requires_external_server_url: false,
                supports_generation_parameters: false,
                supports_ocr_lang: true,
                result_subdir: ResultSubdir::ParseMethod,
                model_output_suffix: "_model.json",
            },
            Backend::VlmTransformers => BackendDescriptor {
                id: self.id(),
                supports_parse_method_choice: false,
                supports_formula_table_toggle: false,
                default_parse_method: ParseMethod::Vlm,
                requires_accelerator_device: true,
                requires_external_server_url: false,
                supports_generation_parameters: false,
                supports_ocr_lang: false,
                result_subdir: ResultSubdir::Vlm,
                model_output_suffix: "_model_output.txt",
            },
            Backend::VlmSglangEngine => BackendDescriptor {
                id: self.id(),
                supports_parse_method_choice: false,
                supports_formula_table_toggle: false,
                default_parse_method: ParseMethod::Vlm,
                requires_accelerator_device: true,
                requires_external_server_url: false,
                supports_generation_parameters: true,
                supports_ocr_lang: false,
                result_subdir: ResultSubdir::Vlm,
                model_output_suffix: "_model_output.txt",
            },
            Backend::VlmSglangClient => BackendDescriptor {
                id: self.id(),
                supports_parse_method_choice: false,
                supports_formula_table_toggle: false,
                default_parse_method: ParseMethod::Vlm,
                requires_accelerator_device: false,
                requires_external_server_url: true,
                supports_generation_parameters: true,
                supports_ocr_lang: false,
                result_subdir: ResultSubdir::Vlm,
                model_output_suffix: "_model_output.txt",
            },
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Capability descriptor for one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    pub id: &'static str,
    pub supports_parse_method_choice: bool,
    pub supports_formula_table_toggle: bool,
    pub default_parse_method: ParseMethod,
    pub requires_accelerator_device: bool,
    pub requires_external_server_url: bool,
    pub supports_generation_parameters: bool,
    pub supports_ocr_lang: bool,
    /// Where the engine writes results below `output/<stem>/`
    pub result_subdir: ResultSubdir,
    /// Suffix of the raw model output artifact
    pub model_output_suffix: &'static str,
}

impl BackendDescriptor {
    /// Result subdirectory name for a resolved parse method
    pub fn result_subdir_for(&self, method: ParseMethod) -> &'static str {
        match self.result_subdir {
            ResultSubdir::ParseMethod => method.as_str(),
            ResultSubdir::Vlm => "vlm",
        }
    }
}

/// Result directory naming scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultSubdir {
    /// Named after the parse method (`auto`, `txt`, `ocr`)
    ParseMethod,
    /// Always `vlm`
    Vlm,
}

/// Parse method requested for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    Auto,
    Txt,
    Ocr,
    Vlm,
}

impl ParseMethod {
    /// Methods a caller may pick when the backend supports choice
    pub const SELECTABLE: [ParseMethod; 3] = [ParseMethod::Auto, ParseMethod::Txt, ParseMethod::Ocr];

    pub fn as_str(self) -> &'static str {
        match self {
            ParseMethod::Auto => "auto",
            ParseMethod::Txt => "txt",
            ParseMethod::Ocr => "ocr",
            ParseMethod::Vlm => "vlm",
        }
    }
}

impl Default for ParseMethod {
    fn default() -> Self {
        Self::Auto
    }
}

impl fmt::Display for ParseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ParseMethod::Auto),
            "txt" => Ok(ParseMethod::Txt),
            "ocr" => Ok(ParseMethod::Ocr),
            "vlm" => Ok(ParseMethod::Vlm),
            other => Err(format!(
                "Unknown parse method '{}'. Expected one of: auto, txt, ocr, vlm",
                other
            )),
        }
    }
}

/// Process-wide backend family selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Pipeline,
    Vlm,
}

impl RuntimeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeMode::Pipeline => "pipeline",
            RuntimeMode::Vlm => "vlm",
        }
    }

    /// Backends belonging to this family
    pub fn family(self) -> Vec<Backend> {
        Backend::ALL
            .into_iter()
            .filter(|b| b.family() == self)
            .collect()
    }
}

impl Default for RuntimeMode {
    fn default() -> Self {
        Self::Pipeline
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pipeline" => Ok(RuntimeMode::Pipeline),
            "vlm" => Ok(RuntimeMode::Vlm),
            other => Err(format!("Unknown runtime mode '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_ids_round_trip() {
        for backend in Backend::ALL {
            assert_eq!(Backend::from_id(backend.id()), Some(backend));
        }
        assert_eq!(Backend::from_id("vlm-unknown"), None);
    }

    #[test]
    fn test_vlm_descriptors_fix_parse_method() {
        for backend in RuntimeMode::Vlm.family() {
            let descriptor = backend.descriptor();
            assert!(!descriptor.supports_parse_method_choice);
            assert_eq!(descriptor.default_parse_method, ParseMethod::Vlm);
            assert_eq!(descriptor.result_subdir_for(ParseMethod::Vlm), "vlm");
        }
    }

    #[test]
    fn test_pipeline_result_subdir_follows_method() {
        let descriptor = Backend::Pipeline.descriptor();
        assert_eq!(descriptor.result_subdir_for(ParseMethod::Ocr), "ocr");
        assert_eq!(descriptor.result_subdir_for(ParseMethod::Auto), "auto");
    }

    #[test]
    fn test_parse_method_from_str() {
        assert_eq!("OCR".parse::<ParseMethod>(), Ok(ParseMethod::Ocr));
        assert!("fast".parse::<ParseMethod>().is_err());
    }

    #[test]
    fn test_runtime_mode_families() {
        assert_eq!(RuntimeMode::Pipeline.family(), vec![Backend::Pipeline]);
        assert_eq!(RuntimeMode::Vlm.family().len(), 3);
    }
}
