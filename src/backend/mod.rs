//! Backend Capability Registry
//!
//! Static capability descriptors for every processing backend, and the
//! runtime-mode dependent validation applied to each request.

mod guide;
mod registry;
mod types;

pub use guide::{
    example_parameters, parameter_guide, ParameterGuide, DEFAULT_LANG, GENERATION_PARAMETERS,
    OCR_LANGUAGES, RUNTIME_PARAMETERS,
};
pub use registry::{BackendRegistry, EffectiveBackend, ValidationError};
pub use types::{Backend, BackendDescriptor, ParseMethod, ResultSubdir, RuntimeMode};
