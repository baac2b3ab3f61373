//! Backend Capability Registry
//!
//! Resolves a requested backend against the set that is active for the
//! current runtime mode and adapts the caller's parameters to what the
//! backend actually supports. Runs before any file I/O.

use serde::Serialize;

use super::types::{Backend, BackendDescriptor, ParseMethod, RuntimeMode};

/// Backend validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown backend: {backend}. Available backends: {active:?}")]
    UnknownBackend {
        backend: String,
        active: Vec<&'static str>,
    },

    #[error("Backend '{backend}' not available in {mode} mode. Available backends: {active:?}")]
    InactiveBackend {
        backend: String,
        mode: RuntimeMode,
        active: Vec<&'static str>,
    },

    #[error("Backend '{backend}' requires server_url parameter or PARSE_SERVER_URL environment variable")]
    MissingServerUrl { backend: &'static str },
}

/// Validated, adapted backend parameters for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveBackend {
    pub backend: Backend,
    pub parse_method: ParseMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    pub descriptor: BackendDescriptor,
    /// Non-fatal adaptation notice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Registry of all backends and the subset active in this process
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    mode: RuntimeMode,
    active: Vec<Backend>,
    default_server_url: Option<String>,
}

impl BackendRegistry {
    /// Build the registry for a runtime mode.
    ///
    /// In VLM mode exactly one backend is active: `vlm_backend` when it names a
    /// VLM backend, otherwise `vlm-sglang-engine`.
    pub fn new(mode: RuntimeMode, vlm_backend: Option<&str>, default_server_url: Option<String>) -> Self {
        let active = match mode {
            RuntimeMode::Pipeline => vec![Backend::Pipeline],
            RuntimeMode::Vlm => {
                let chosen = vlm_backend
                    .and_then(Backend::from_id)
                    .filter(|b| b.family() == RuntimeMode::Vlm);
                match chosen {
                    Some(backend) => vec![backend],
                    None => {
                        tracing::warn!(
                            requested = ?vlm_backend,
                            "Invalid VLM backend, falling back to {}",
                            Backend::VlmSglangEngine
                        );
                        vec![Backend::VlmSglangEngine]
                    }
                }
            }
        };

        Self {
            mode,
            active,
            default_server_url: default_server_url.filter(|url| !url.trim().is_empty()),
        }
    }

    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    /// Backends usable in this process
    pub fn active(&self) -> &[Backend] {
        &self.active
    }

    /// Known backends that are not usable in this process
    pub fn inactive(&self) -> Vec<Backend> {
        Backend::ALL
            .into_iter()
            .filter(|b| !self.active.contains(b))
            .collect()
    }

    /// Backend used when a request does not name one
    pub fn default_backend(&self) -> Backend {
        self.active[0]
    }

    /// Process-wide default external server URL
    pub fn default_server_url(&self) -> Option<&str> {
        self.default_server_url.as_deref()
    }

    /// Identifiers of active backends
    pub fn active_ids(&self) -> Vec<&'static str> {
        self.active.iter().map(|b| b.id()).collect()
    }

    /// Resolve an identifier to an active backend
    pub fn lookup(&self, id: &str) -> Result<Backend, ValidationError> {
        match Backend::from_id(id) {
            Some(backend) if self.active.contains(&backend) => Ok(backend),
            Some(_) => Err(ValidationError::InactiveBackend {
                backend: id.to_string(),
                mode: self.mode,
                active: self.active_ids(),
            }),
            None => Err(ValidationError::UnknownBackend {
                backend: id.to_string(),
                active: self.active_ids(),
            }),
        }
    }

    /// Validate a request's backend selection and adapt its parameters
    pub fn validate(
        &self,
        requested_backend: &str,
        requested_method: ParseMethod,
        requested_server_url: Option<&str>,
    ) -> Result<EffectiveBackend, ValidationError> {
        let backend = self.lookup(requested_backend)?;
        let descriptor = backend.descriptor();

        let (parse_method, warning) = if descriptor.supports_parse_method_choice {
            (requested_method, None)
        } else {
            let forced = descriptor.default_parse_method;
            let warning = (requested_method != ParseMethod::Auto && requested_method != forced)
                .then(|| {
                    format!(
                        "Parse method '{}' not supported by {}, using '{}'",
                        requested_method, backend, forced
                    )
                });
            (forced, warning)
        };

        let server_url = if descriptor.requires_external_server_url {
            let url = requested_server_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .or(self.default_server_url())
                .ok_or(ValidationError::MissingServerUrl {
                    backend: backend.id(),
                })?;
            Some(url.to_string())
        } else {
            None
        };

        Ok(EffectiveBackend {
            backend,
            parse_method,
            server_url,
            descriptor,
            warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlm_registry(backend: &str, url: Option<&str>) -> BackendRegistry {
        BackendRegistry::new(RuntimeMode::Vlm, Some(backend), url.map(String::from))
    }

    #[test]
    fn test_pipeline_mode_accepts_pipeline() {
        let registry = BackendRegistry::new(RuntimeMode::Pipeline, None, None);
        let effective = registry
            .validate("pipeline", ParseMethod::Ocr, None)
            .unwrap();
        assert_eq!(effective.backend, Backend::Pipeline);
        assert_eq!(effective.parse_method, ParseMethod::Ocr);
        assert!(effective.warning.is_none());
        assert!(effective.server_url.is_none());
    }

    #[test]
    fn test_inactive_and_unknown_are_distinguishable() {
        let registry = BackendRegistry::new(RuntimeMode::Pipeline, None, None);

        let inactive = registry
            .validate("vlm-transformers", ParseMethod::Auto, None)
            .unwrap_err();
        assert!(matches!(inactive, ValidationError::InactiveBackend { .. }));
        assert!(inactive.to_string().contains("pipeline"));

        let unknown = registry
            .validate("magic", ParseMethod::Auto, None)
            .unwrap_err();
        assert!(matches!(unknown, ValidationError::UnknownBackend { .. }));
        assert!(unknown.to_string().contains("[\"pipeline\"]"));
    }

    #[test]
    fn test_fixed_parse_method_warns_only_on_conflict() {
        let registry = vlm_registry("vlm-transformers", None);

        let auto = registry
            .validate("vlm-transformers", ParseMethod::Auto, None)
            .unwrap();
        assert_eq!(auto.parse_method, ParseMethod::Vlm);
        assert!(auto.warning.is_none());

        let same = registry
            .validate("vlm-transformers", ParseMethod::Vlm, None)
            .unwrap();
        assert!(same.warning.is_none());

        let conflicting = registry
            .validate("vlm-transformers", ParseMethod::Ocr, None)
            .unwrap();
        assert_eq!(conflicting.parse_method, ParseMethod::Vlm);
        assert!(conflicting.warning.unwrap().contains("'ocr'"));
    }

    #[test]
    fn test_server_url_resolution() {
        let without_default = vlm_registry("vlm-sglang-client", None);
        assert_eq!(
            without_default.validate("vlm-sglang-client", ParseMethod::Auto, None),
            Err(ValidationError::MissingServerUrl {
                backend: "vlm-sglang-client"
            })
        );
        assert!(without_default
            .validate("vlm-sglang-client", ParseMethod::Auto, Some("  "))
            .is_err());

        let effective = without_default
            .validate("vlm-sglang-client", ParseMethod::Auto, Some("http://gpu:30000"))
            .unwrap();
        assert_eq!(effective.server_url.as_deref(), Some("http://gpu:30000"));

        let with_default = vlm_registry("vlm-sglang-client", Some("http://default:30000"));
        let effective = with_default
            .validate("vlm-sglang-client", ParseMethod::Auto, None)
            .unwrap();
        assert_eq!(effective.server_url.as_deref(), Some("http://default:30000"));
    }

    #[test]
    fn test_invalid_vlm_backend_falls_back() {
        let registry = vlm_registry("pipeline", None);
        assert_eq!(registry.active(), &[Backend::VlmSglangEngine]);
        assert_eq!(registry.default_backend(), Backend::VlmSglangEngine);
        assert_eq!(registry.inactive().len(), 3);
    }
}
