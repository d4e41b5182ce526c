//! Model abstraction shared by every provider model
//!
//! A model owns an immutable settings value. [`Model::with_settings`] never
//! touches the receiver; it returns a new model whose settings are
//! [`ModelSettings::merge`] of the old settings and the partial update.
//!
//! Provider models embed a [`ModelBase`], build requests from
//! [`ModelSettings::api`], and run them through [`Model::executor`] so the
//! api's retry and throttle policies apply.

pub mod function;

pub use function::{
    generate_speech, generate_text, stream_text, FunctionEvent, FunctionEventType,
    FunctionObserver, FunctionOptions, FunctionOutcome, FunctionType,
};

use crate::api::{ApiConfiguration, ResilientExecutor};
use crate::config::strip_sensitive_fields;
use crate::error::ApiResult;
use crate::http::EventStream;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Settings of a model
pub trait ModelSettings: Clone + fmt::Debug + Serialize + Send + Sync + 'static {
    /// Partial update; every field optional
    type Partial: Default + Send;

    /// API configuration, if one was supplied
    fn api(&self) -> Option<&Arc<dyn ApiConfiguration>>;

    /// New settings with the fields set in `partial` replaced
    fn merge(&self, partial: Self::Partial) -> Self;
}

/// Provider and model identity, as reported in function events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInformation {
    pub provider: String,
    pub model_name: Option<String>,
}

/// Base contract of every model
pub trait Model: Send + Sync + Sized {
    type Settings: ModelSettings;

    /// Provider name, e.g. `"lmnt"`
    fn provider(&self) -> &str;

    /// Model name, when the provider has several
    fn model_name(&self) -> Option<&str>;

    fn settings(&self) -> &Self::Settings;

    /// A copy of this model with `partial` merged into its settings
    fn with_settings(&self, partial: <Self::Settings as ModelSettings>::Partial) -> Self;

    /// Settings as reported to observers; the api configuration and secrets are left out
    fn settings_for_event(&self) -> Map<String, Value> {
        let mut settings = match serde_json::to_value(self.settings()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        settings.remove("api");
        strip_sensitive_fields(&mut settings);
        settings
    }

    fn model_information(&self) -> ModelInformation {
        ModelInformation {
            provider: self.provider().to_string(),
            model_name: self.model_name().map(str::to_string),
        }
    }

    /// Executor carrying the retry and throttle policies of the settings' api
    fn executor(&self) -> ResilientExecutor {
        match self.settings().api() {
            Some(api) => ResilientExecutor::new(api.retry(), api.throttle()),
            None => ResilientExecutor::default(),
        }
    }
}

/// Shared immutable settings holder for provider models
pub struct ModelBase<S> {
    settings: Arc<S>,
}

impl<S: ModelSettings> ModelBase<S> {
    pub fn new(settings: S) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &S {
        &self.settings
    }

    /// A new base with merged settings; `self` is unchanged
    pub fn with_settings(&self, partial: S::Partial) -> Self {
        Self::new(self.settings.merge(partial))
    }
}

impl<S> Clone for ModelBase<S> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ModelBase<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBase")
            .field("settings", &self.settings)
            .finish()
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
    Other,
    Unknown,
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Output of a text generation call
#[derive(Debug, Clone, PartialEq)]
pub struct TextGenerationResult {
    pub texts: Vec<String>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    pub raw_response: Option<Value>,
}

impl TextGenerationResult {
    /// A result with a single text and nothing else
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            texts: vec![text.into()],
            finish_reason: None,
            usage: None,
            raw_response: None,
        }
    }
}

/// Models that generate text from a provider-specific prompt
#[async_trait]
pub trait TextGenerationModel: Model {
    type Prompt: Send + Sync;

    /// Sequences that end generation
    fn stop_sequences(&self) -> Vec<String> {
        Vec::new()
    }

    /// A copy of this model with `stop_sequences` replacing its stop sequences
    fn with_stop_sequences(&self, stop_sequences: Vec<String>) -> Self;

    async fn do_generate_texts(
        &self,
        prompt: &Self::Prompt,
        options: &FunctionOptions,
    ) -> ApiResult<TextGenerationResult>;
}

/// Text models that can stream their output
#[async_trait]
pub trait TextStreamingModel: TextGenerationModel {
    /// Stream text deltas; the stream is established when this returns
    async fn do_stream_text(
        &self,
        prompt: &Self::Prompt,
        options: &FunctionOptions,
    ) -> ApiResult<EventStream<String>>;
}

/// Models that synthesize speech
#[async_trait]
pub trait SpeechGenerationModel: Model {
    /// Synthesize `text` into encoded audio
    async fn do_generate_speech_standard(
        &self,
        text: &str,
        options: &FunctionOptions,
    ) -> ApiResult<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BaseUrlApiConfiguration;

    #[derive(Debug, Clone, Serialize)]
    struct VoiceSettings {
        #[serde(skip)]
        api: Option<Arc<dyn ApiConfiguration>>,
        voice: String,
        speed: Option<f64>,
        max_tokens: Option<u32>,
        api_key: Option<String>,
    }

    #[derive(Default)]
    struct VoicePartial {
        voice: Option<String>,
        speed: Option<f64>,
    }

    impl ModelSettings for VoiceSettings {
        type Partial = VoicePartial;

        fn api(&self) -> Option<&Arc<dyn ApiConfiguration>> {
            self.api.as_ref()
        }

        fn merge(&self, partial: VoicePartial) -> Self {
            Self {
                voice: partial.voice.unwrap_or_else(|| self.voice.clone()),
                speed: partial.speed.or(self.speed),
                ..self.clone()
            }
        }
    }

    struct VoiceModel {
        base: ModelBase<VoiceSettings>,
    }

    impl Model for VoiceModel {
        type Settings = VoiceSettings;

        fn provider(&self) -> &str {
            "test-voice"
        }

        fn model_name(&self) -> Option<&str> {
            None
        }

        fn settings(&self) -> &VoiceSettings {
            self.base.settings()
        }

        fn with_settings(&self, partial: VoicePartial) -> Self {
            Self {
                base: self.base.with_settings(partial),
            }
        }
    }

    fn model() -> VoiceModel {
        let api = BaseUrlApiConfiguration::new("https://api.example.com/v1")
            .unwrap()
            .with_retry(crate::api::ExponentialBackoff::new(2));
        VoiceModel {
            base: ModelBase::new(VoiceSettings {
                api: Some(Arc::new(api)),
                voice: "lily".to_string(),
                speed: None,
                max_tokens: Some(256),
                api_key: Some("secret-key".to_string()),
            }),
        }
    }

    #[test]
    fn test_with_settings_leaves_original() {
        let original = model();
        let faster = original.with_settings(VoicePartial {
            speed: Some(1.5),
            ..Default::default()
        });

        assert_eq!(original.settings().speed, None);
        assert_eq!(faster.settings().speed, Some(1.5));
        assert_eq!(faster.settings().voice, "lily");
    }

    #[test]
    fn test_settings_for_event_hides_secrets() {
        let event_settings = model().settings_for_event();
        assert_eq!(event_settings["voice"], "lily");
        assert_eq!(event_settings["max_tokens"], 256);
        assert!(!event_settings.contains_key("api_key"));
        assert!(!event_settings.contains_key("api"));
    }

    #[test]
    fn test_executor_uses_api_policies() {
        let executor = model().executor();
        assert!(executor.retry().is_some());
        assert!(executor.throttle().is_none());
        assert_eq!(
            model().model_information(),
            ModelInformation {
                provider: "test-voice".to_string(),
                model_name: None
            }
        );
    }
}
