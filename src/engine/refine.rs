//! LLM Refinement Services
//!
//! Optional language-model pass wired into a converter at construction time.
//! Runs on the worker thread, so requests use the blocking reqwest client.

use std::time::Duration;

use serde_json::{json, Value};

use super::types::EngineError;
use crate::converter::ConverterConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Configured refinement backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementService {
    /// Ollama `/api/generate`
    Ollama { base_url: String, model: String },
    /// OpenAI-compatible `/chat/completions`
    OpenAi {
        base_url: String,
        api_key: String,
        model: String,
    },
}

impl RefinementService {
    /// Resolve the service named by `llm_service`.
    ///
    /// Returns `None` unless `use_llm` is set. Unknown names and missing
    /// credentials are construction failures.
    pub fn from_config(config: &ConverterConfig) -> Result<Option<Self>, EngineError> {
        if !config.get_bool("use_llm").unwrap_or(false) {
            return Ok(None);
        }

        let name = config.get_str("llm_service").unwrap_or("ollama");
        let setting = |key: &str, default: &str| {
            config
                .get_str(key)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(default)
                .trim_end_matches('/')
                .to_string()
        };

        match name {
            "ollama" | "marker.services.ollama.OllamaService" => Ok(Some(Self::Ollama {
                base_url: setting("ollama_base_url", DEFAULT_OLLAMA_URL),
                model: setting("ollama_model", DEFAULT_OLLAMA_MODEL),
            })),
            "openai" | "marker.services.openai.OpenAIService" => {
                let api_key = config
                    .get_str("openai_api_key")
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        EngineError::construction("LLM service 'openai' requires openai_api_key")
                    })?;
                Ok(Some(Self::OpenAi {
                    base_url: setting("openai_base_url", DEFAULT_OPENAI_URL),
                    api_key: api_key.to_string(),
                    model: setting("openai_model", DEFAULT_OPENAI_MODEL),
                }))
            }
            other => Err(EngineError::construction(format!(
                "Unknown LLM service '{}'. Expected one of: ollama, openai",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ollama { .. } => "ollama",
            Self::OpenAi { .. } => "openai",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Ollama { model, .. } | Self::OpenAi { model, .. } => model,
        }
    }

    /// Run `instruction` over `content` and return the model's reply
    pub fn complete(&self, instruction: &str, content: &str) -> Result<String, EngineError> {
        let client = http_client()?;

        let reply = match self {
            Self::Ollama { base_url, model } => {
                let request = json!({
                    "model": model,
                    "prompt": format!("{}\n\n{}", instruction, content),
                    "stream": false
                });
                let result = send(client.post(format!("{}/api/generate", base_url)).json(&request), "Ollama")?;
                result["response"].as_str().unwrap_or("").to_string()
            }
            Self::OpenAi {
                base_url,
                api_key,
                model,
            } => {
                let request = json!({
                    "model": model,
                    "messages": [
                        {"role": "system", "content": instruction},
                        {"role": "user", "content": content}
                    ],
                    "temperature": 0
                });
                let result = send(
                    client
                        .post(format!("{}/chat/completions", base_url))
                        .bearer_auth(api_key)
                        .json(&request),
                    "OpenAI",
                )?;
                result["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap_or("")
                    .to_string()
            }
        };

        Ok(reply.trim().to_string())
    }

    /// Transcribe the text of a rendered page image
    pub fn recognize(&self, png: &[u8], lang: Option<&str>) -> Result<String, EngineError> {
        use base64::Engine;

        let client = http_client()?;

        let image_base64 = base64::engine::general_purpose::STANDARD.encode(png);
        let lang_hint = lang
            .map(|l| format!(" The text is in {}.", l))
            .unwrap_or_default();
        let prompt = format!(
            "Extract all text from this image exactly as written.{} Return only the extracted text as markdown, nothing else.",
            lang_hint
        );

        let reply = match self {
            Self::Ollama { base_url, model } => {
                let request = json!({
                    "model": model,
                    "prompt": prompt,
                    "images": [image_base64],
                    "stream": false
                });
                let result = send(client.post(format!("{}/api/generate", base_url)).json(&request), "Ollama")?;
                result["response"].as_str().unwrap_or("").to_string()
            }
            Self::OpenAi {
                base_url,
                api_key,
                model,
            } => {
                let request = json!({
                    "model": model,
                    "messages": [{
                        "role": "user",
                        "content": [
                            {"type": "text", "text": prompt},
                            {"type": "image_url", "image_url": {"url": format!("data:image/png;base64,{}", image_base64)}}
                        ]
                    }]
                });
                let result = send(
                    client
                        .post(format!("{}/chat/completions", base_url))
                        .bearer_auth(api_key)
                        .json(&request),
                    "OpenAI",
                )?;
                result["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap_or("")
                    .to_string()
            }
        };

        Ok(reply.trim().to_string())
    }

    /// Ask for JSON conforming to `schema`
    pub fn extract(&self, schema: &Value, content: &str) -> Result<Value, EngineError> {
        let instruction = format!(
            "Extract data from the document below. Reply with a single JSON object matching this JSON schema and nothing else:\n{}",
            schema
        );
        let reply = self.complete(&instruction, content)?;
        parse_json_reply(&reply).ok_or_else(|| {
            EngineError::execution(format!("{} returned invalid JSON", self.name()))
                .with_details(truncate(&reply, 2000))
        })
    }
}

fn http_client() -> Result<reqwest::blocking::Client, EngineError> {
    reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| EngineError::execution(format!("Failed to create HTTP client: {}", e)))
}

fn send(request: reqwest::blocking::RequestBuilder, service: &str) -> Result<Value, EngineError> {
    let response = request
        .send()
        .map_err(|e| EngineError::execution(format!("Failed to call {}: {}", service, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(EngineError::execution(format!("{} returned {}", service, status))
            .with_details(truncate(&body, 2000)));
    }

    response
        .json()
        .map_err(|e| EngineError::execution(format!("Failed to parse {} response: {}", service, e)))
}

/// Parse a model reply that may be wrapped in a fenced code block
pub(crate) fn parse_json_reply(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_use_llm() {
        let config = ConverterConfig::new().with("llm_service", "openai");
        assert_eq!(RefinementService::from_config(&config).unwrap(), None);
    }

    #[test]
    fn test_defaults_to_ollama() {
        let config = ConverterConfig::new()
            .with("use_llm", true)
            .with("ollama_base_url", "http://gpu-box:11434/");
        let service = RefinementService::from_config(&config).unwrap().unwrap();
        assert_eq!(
            service,
            RefinementService::Ollama {
                base_url: "http://gpu-box:11434".into(),
                model: DEFAULT_OLLAMA_MODEL.into(),
            }
        );
    }

    #[test]
    fn test_unknown_service_fails_construction() {
        let config = ConverterConfig::new()
            .with("use_llm", true)
            .with("llm_service", "marker.services.nope.Nope");
        let err = RefinementService::from_config(&config).unwrap_err();
        assert!(matches!(err, EngineError::Construction { .. }));
        assert!(err.to_string().contains("marker.services.nope.Nope"));
    }

    #[test]
    fn test_openai_requires_key() {
        let config = ConverterConfig::new()
            .with("use_llm", true)
            .with("llm_service", "openai");
        assert!(RefinementService::from_config(&config).is_err());

        let config = config.with("openai_api_key", "sk-test");
        let service = RefinementService::from_config(&config).unwrap().unwrap();
        assert_eq!(service.name(), "openai");
        assert_eq!(service.model(), DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn test_parse_json_reply() {
        assert_eq!(
            parse_json_reply("```json\n{\"a\": 1}\n```"),
            Some(json!({"a": 1}))
        );
        assert_eq!(parse_json_reply(" {\"a\": 2} "), Some(json!({"a": 2})));
        assert_eq!(parse_json_reply("not json"), None);
    }
}
