//! Engine-facing types shared by every converter implementation

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Converter shape
// ============================================================================

/// Mutually exclusive converter shapes selected by the `converter` option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterKind {
    Standard,
    Table,
    Ocr,
    Extraction,
}

impl ConverterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConverterKind::Standard => "standard",
            ConverterKind::Table => "table",
            ConverterKind::Ocr => "ocr",
            ConverterKind::Extraction => "extraction",
        }
    }
}

impl Default for ConverterKind {
    fn default() -> Self {
        Self::Standard
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConverterKind {
    type Err = String;

    /// Accepts short names and marker-style class paths
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "standard" | "pdf" | "marker.converters.pdf.PdfConverter" => Ok(Self::Standard),
            "table" | "marker.converters.table.TableConverter" => Ok(Self::Table),
            "ocr" | "marker.converters.ocr.OCRConverter" => Ok(Self::Ocr),
            "extraction" | "marker.converters.extraction.ExtractionConverter" => {
                Ok(Self::Extraction)
            }
            other => Err(format!(
                "Unknown converter '{}'. Expected one of: standard, table, ocr, extraction",
                other
            )),
        }
    }
}

// ============================================================================
// Output format
// ============================================================================

/// Requested response representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Json,
    Html,
    Chunks,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Markdown,
        OutputFormat::Json,
        OutputFormat::Html,
        OutputFormat::Chunks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Html => "html",
            OutputFormat::Chunks => "chunks",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Markdown
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            "chunks" => Ok(Self::Chunks),
            other => Err(format!(
                "Output format '{}' not supported. Must be one of: markdown, json, html, chunks",
                other
            )),
        }
    }
}

// ============================================================================
// Engine output
// ============================================================================

/// One retrievable unit of a parsed document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub page: usize,
    pub block_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
}

/// Everything a converter produced for one document
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub pages: usize,
    pub markdown: Option<String>,
    pub html: Option<String>,
    /// Structured representation (`output_format = json`, extraction results)
    pub json: Option<Value>,
    pub chunks: Option<Vec<Chunk>>,
    /// Image file name to raw bytes
    pub images: BTreeMap<String, Vec<u8>>,
    pub metadata: serde_json::Map<String, Value>,
    pub content_list: Option<Value>,
    pub middle_json: Option<Value>,
    pub model_output: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Engine failures, surfaced to the submitter of the failing job
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to construct converter: {message}")]
    Construction {
        message: String,
        details: Option<String>,
    },

    #[error("Document processing failed: {message}")]
    Execution {
        message: String,
        details: Option<String>,
    },
}

impl EngineError {
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction {
            message: message.into(),
            details: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            details: None,
        }
    }

    /// Attach a diagnostic trace
    pub fn with_details(self, trace: impl Into<String>) -> Self {
        let trace = Some(trace.into());
        match self {
            Self::Construction { message, .. } => Self::Construction {
                message,
                details: trace,
            },
            Self::Execution { message, .. } => Self::Execution {
                message,
                details: trace,
            },
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Construction { details, .. } | Self::Execution { details, .. } => {
                details.as_deref()
            }
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::execution(format!("IO error: {}", err))
    }
}

impl From<mupdf::Error> for EngineError {
    fn from(err: mupdf::Error) -> Self {
        EngineError::execution(format!("MuPDF error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converter_kind_aliases() {
        assert_eq!(
            "marker.converters.table.TableConverter".parse::<ConverterKind>(),
            Ok(ConverterKind::Table)
        );
        assert_eq!("".parse::<ConverterKind>(), Ok(ConverterKind::Standard));
        assert!("marker.converters.fancy.Fancy".parse::<ConverterKind>().is_err());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        let err = "docx".parse::<OutputFormat>().unwrap_err();
        assert!(err.contains("markdown, json, html, chunks"));
    }

    #[test]
    fn test_error_details() {
        let err = EngineError::execution("boom").with_details("trace line");
        assert_eq!(err.details(), Some("trace line"));
        assert_eq!(err.to_string(), "Document processing failed: boom");
    }
}
