//! Modelgate Core Library
//!
//! A provider-agnostic pipeline for invoking remote generative model APIs:
//!
//! - [`api`]: where a provider lives (base URL, headers) and its default
//!   retry and throttle policies, plus the executor that applies them
//! - [`http`]: the transport, request bodies, failed-response
//!   classification, buffered and streamed response decoding
//! - [`model`]: the settings-merging model abstraction and model functions
//! - [`prompt`]: generic prompts and prompt mapping in front of text models
//! - [`config`]: YAML/JSON configuration of API deployments
//!
//! Every failure surfaces as an [`ApiCallError`], classified once where it
//! happens and propagated unchanged.

pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod prompt;

pub use api::{
    call_with_retry_and_throttle, ApiConfiguration, BaseUrlApiConfiguration, BaseUrlParts,
    ExponentialBackoff, HeaderContext, MaxConcurrency, NoRetry, RateLimit, ResilientExecutor,
};
pub use error::{ApiCallError, ApiResult, ErrorPayload, NetworkFailureKind};
pub use http::{ApiRequest, EventStream, HttpClient};
pub use model::{
    generate_speech, generate_text, stream_text, FunctionOptions, Model, ModelBase,
    ModelSettings,
};
pub use prompt::{ChatPrompt, InstructionPrompt, MapPrompt, PromptTemplate};

/// Returns the version of the Modelgate Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
