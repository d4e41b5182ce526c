//! Model functions: the caller-facing entry points around model primitives
//!
//! Each function reports `started` and `finished` events to the observers in
//! its [`FunctionOptions`] and logs through `tracing`. Errors from the model
//! are returned unchanged.

use super::{
    Model, ModelInformation, SpeechGenerationModel, TextGenerationModel, TextStreamingModel,
};
use crate::api::HeaderContext;
use crate::error::{ApiCallError, ApiResult};
use crate::http::EventStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Receives function lifecycle events
pub trait FunctionObserver: Send + Sync {
    fn on_event(&self, event: &FunctionEvent);
}

/// Per-call options; never persisted
#[derive(Clone)]
pub struct FunctionOptions {
    /// Cancels the call and any stream it produced
    pub cancel: CancellationToken,
    pub observers: Vec<Arc<dyn FunctionObserver>>,
    /// Caller-assigned id of the function
    pub function_id: Option<String>,
    /// Id of the enclosing run
    pub run_id: Option<String>,
    /// Unique id of this call
    pub call_id: String,
}

impl FunctionOptions {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            observers: Vec::new(),
            function_id: None,
            run_id: None,
            call_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn FunctionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_function_id(mut self, function_id: impl Into<String>) -> Self {
        self.function_id = Some(function_id.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Context handed to header functions of the api configuration
    pub fn header_context(&self) -> HeaderContext {
        HeaderContext {
            function_id: self.function_id.clone(),
            call_id: self.call_id.clone(),
            run_id: self.run_id.clone(),
        }
    }
}

impl Default for FunctionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FunctionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionOptions")
            .field("call_id", &self.call_id)
            .field("function_id", &self.function_id)
            .field("run_id", &self.run_id)
            .field("observers", &self.observers.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionType {
    GenerateText,
    StreamText,
    GenerateSpeech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionEventType {
    Started,
    Finished,
}

/// How a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FunctionOutcome {
    Success,
    Error { message: String },
    Abort,
}

impl FunctionOutcome {
    fn from_error(error: &ApiCallError) -> Self {
        match error {
            ApiCallError::Aborted => Self::Abort,
            e => Self::Error {
                message: e.to_string(),
            },
        }
    }

    fn from_result<T>(result: &ApiResult<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::from_error(e),
        }
    }
}

/// A lifecycle event of one function call
#[derive(Debug, Clone, Serialize)]
pub struct FunctionEvent {
    pub event_type: FunctionEventType,
    pub function_type: FunctionType,
    pub call_id: String,
    pub function_id: Option<String>,
    pub run_id: Option<String>,
    pub model: ModelInformation,
    pub settings: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    /// Set on `finished`
    pub duration_ms: Option<u64>,
    /// Set on `finished`
    pub outcome: Option<FunctionOutcome>,
}

/// Event bookkeeping for one call; owned so a stream can finish it later
#[derive(Clone)]
struct FunctionRun {
    started: FunctionEvent,
    observers: Vec<Arc<dyn FunctionObserver>>,
    started_at: Instant,
}

impl FunctionRun {
    fn start<M: Model>(function_type: FunctionType, model: &M, options: &FunctionOptions) -> Self {
        let started = FunctionEvent {
            event_type: FunctionEventType::Started,
            function_type,
            call_id: options.call_id.clone(),
            function_id: options.function_id.clone(),
            run_id: options.run_id.clone(),
            model: model.model_information(),
            settings: model.settings_for_event(),
            timestamp: Utc::now(),
            duration_ms: None,
            outcome: None,
        };
        let run = Self {
            started,
            observers: options.observers.clone(),
            started_at: Instant::now(),
        };
        run.notify(&run.started);
        run
    }

    fn finish(&self, outcome: FunctionOutcome) {
        let duration_ms = self.started_at.elapsed().as_millis() as u64;
        match &outcome {
            FunctionOutcome::Error { message } => warn!(duration_ms, "call failed: {}", message),
            FunctionOutcome::Abort => debug!(duration_ms, "call aborted"),
            FunctionOutcome::Success => debug!(duration_ms, "call finished"),
        }

        let event = FunctionEvent {
            event_type: FunctionEventType::Finished,
            timestamp: Utc::now(),
            duration_ms: Some(duration_ms),
            outcome: Some(outcome),
            ..self.started.clone()
        };
        self.notify(&event);
    }

    fn notify(&self, event: &FunctionEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// Generate text; returns the first generated text
pub async fn generate_text<M>(
    model: &M,
    prompt: &M::Prompt,
    options: &FunctionOptions,
) -> ApiResult<String>
where
    M: TextGenerationModel,
{
    let span = info_span!(
        "generate_text",
        provider = model.provider(),
        call_id = %options.call_id
    );
    async {
        let run = FunctionRun::start(FunctionType::GenerateText, model, options);
        let result = model
            .do_generate_texts(prompt, options)
            .await
            .map(|result| result.texts.into_iter().next().unwrap_or_default());
        run.finish(FunctionOutcome::from_result(&result));
        result
    }
    .instrument(span)
    .await
}

/// Reports `finished` exactly once for a streamed call, even when the caller
/// drops or closes the stream before reading it to the end
struct StreamRunGuard {
    run: Option<FunctionRun>,
    error: Option<FunctionOutcome>,
}

impl StreamRunGuard {
    fn new(run: FunctionRun) -> Self {
        Self {
            run: Some(run),
            error: None,
        }
    }

    fn complete(&mut self) {
        if let Some(run) = self.run.take() {
            run.finish(self.error.take().unwrap_or(FunctionOutcome::Success));
        }
    }
}

impl Drop for StreamRunGuard {
    fn drop(&mut self) {
        // Not read to its end
        if let Some(run) = self.run.take() {
            run.finish(self.error.take().unwrap_or(FunctionOutcome::Abort));
        }
    }
}

/// Stream text deltas
///
/// The `finished` event is reported once the returned stream has been read
/// to its end or its error. A stream dropped or closed earlier reports
/// `Abort`.
pub async fn stream_text<M>(
    model: &M,
    prompt: &M::Prompt,
    options: &FunctionOptions,
) -> ApiResult<EventStream<String>>
where
    M: TextStreamingModel,
{
    let span = info_span!(
        "stream_text",
        provider = model.provider(),
        call_id = %options.call_id
    );
    async {
        let run = FunctionRun::start(FunctionType::StreamText, model, options);
        let mut inner = match model.do_stream_text(prompt, options).await {
            Ok(stream) => stream,
            Err(e) => {
                run.finish(FunctionOutcome::from_error(&e));
                return Err(e);
            }
        };

        let mut guard = StreamRunGuard::new(run);
        let stream = async_stream::stream! {
            while let Some(item) = inner.next().await {
                if let Err(e) = &item {
                    guard.error = Some(FunctionOutcome::from_error(e));
                }
                yield item;
            }
            guard.complete();
        };
        Ok(EventStream::from_stream(stream))
    }
    .instrument(span)
    .await
}

/// Synthesize speech; returns the encoded audio
pub async fn generate_speech<M>(
    model: &M,
    text: &str,
    options: &FunctionOptions,
) -> ApiResult<Bytes>
where
    M: SpeechGenerationModel,
{
    let span = info_span!(
        "generate_speech",
        provider = model.provider(),
        call_id = %options.call_id
    );
    async {
        let run = FunctionRun::start(FunctionType::GenerateSpeech, model, options);
        let result = model.do_generate_speech_standard(text, options).await;
        run.finish(FunctionOutcome::from_result(&result));
        result
    }
    .instrument(span)
    .await
}
