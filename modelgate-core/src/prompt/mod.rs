//! Generic prompts and prompt mapping
//!
//! A [`PromptTemplate`] is a pure conversion from a generic prompt to the
//! prompt type a model accepts. [`MapPrompt::map_prompt`] puts one in front
//! of a text model. Only the accepted prompt type changes. Provider, model
//! name, settings and errors pass through unchanged. Mapped models can be
//! mapped again: `m.map_prompt(a).map_prompt(b)` formats with `a(b(prompt))`.

pub mod templates;

pub use templates::{ChatMessagesTemplate, Llama2PromptTemplate, TextPromptTemplate};

use crate::error::ApiResult;
use crate::http::EventStream;
use crate::model::{
    FunctionOptions, Model, ModelSettings, TextGenerationModel, TextGenerationResult,
    TextStreamingModel,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A single instruction, optionally with a system message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionPrompt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub instruction: String,
}

impl InstructionPrompt {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            system: None,
            instruction: instruction.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A conversation, optionally with a system message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPrompt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
}

/// Converts prompts of type `S` into prompts of type `T`
pub trait PromptTemplate<S, T>: Send + Sync {
    fn format(&self, prompt: &S) -> T;

    /// Stop sequences the target format needs
    fn stop_sequences(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A template defined by a function
pub struct FnTemplate<F> {
    format: F,
    stop_sequences: Vec<String>,
}

impl<F> FnTemplate<F> {
    pub fn new(format: F) -> Self {
        Self {
            format,
            stop_sequences: Vec::new(),
        }
    }

    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = stop_sequences;
        self
    }
}

impl<S, T, F> PromptTemplate<S, T> for FnTemplate<F>
where
    F: Fn(&S) -> T + Send + Sync,
{
    fn format(&self, prompt: &S) -> T {
        (self.format)(prompt)
    }

    fn stop_sequences(&self) -> Vec<String> {
        self.stop_sequences.clone()
    }
}

/// A text model that accepts prompts of type `S` and formats them with a template
pub struct PromptMappedModel<M, P, S> {
    model: M,
    template: Arc<P>,
    _prompt: PhantomData<fn(&S)>,
}

impl<M, P, S> PromptMappedModel<M, P, S> {
    /// The wrapped model
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn template(&self) -> &P {
        &self.template
    }
}

impl<M: Clone, P, S> Clone for PromptMappedModel<M, P, S> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            template: Arc::clone(&self.template),
            _prompt: PhantomData,
        }
    }
}

impl<M: fmt::Debug, P, S> fmt::Debug for PromptMappedModel<M, P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptMappedModel")
            .field("model", &self.model)
            .field("prompt", &std::any::type_name::<S>())
            .finish()
    }
}

impl<M, P, S> Model for PromptMappedModel<M, P, S>
where
    M: TextGenerationModel,
    P: PromptTemplate<S, M::Prompt>,
{
    type Settings = M::Settings;

    fn provider(&self) -> &str {
        self.model.provider()
    }

    fn model_name(&self) -> Option<&str> {
        self.model.model_name()
    }

    fn settings(&self) -> &M::Settings {
        self.model.settings()
    }

    fn with_settings(&self, partial: <M::Settings as ModelSettings>::Partial) -> Self {
        Self {
            model: self.model.with_settings(partial),
            template: Arc::clone(&self.template),
            _prompt: PhantomData,
        }
    }

    fn settings_for_event(&self) -> serde_json::Map<String, serde_json::Value> {
        self.model.settings_for_event()
    }
}

#[async_trait]
impl<M, P, S> TextGenerationModel for PromptMappedModel<M, P, S>
where
    M: TextGenerationModel + 'static,
    P: PromptTemplate<S, M::Prompt> + 'static,
    S: Send + Sync + 'static,
{
    type Prompt = S;

    fn stop_sequences(&self) -> Vec<String> {
        self.model.stop_sequences()
    }

    fn with_stop_sequences(&self, stop_sequences: Vec<String>) -> Self {
        Self {
            model: self.model.with_stop_sequences(stop_sequences),
            template: Arc::clone(&self.template),
            _prompt: PhantomData,
        }
    }

    async fn do_generate_texts(
        &self,
        prompt: &S,
        options: &FunctionOptions,
    ) -> ApiResult<TextGenerationResult> {
        let mapped = self.template.format(prompt);
        self.model.do_generate_texts(&mapped, options).await
    }
}

#[async_trait]
impl<M, P, S> TextStreamingModel for PromptMappedModel<M, P, S>
where
    M: TextStreamingModel + 'static,
    P: PromptTemplate<S, M::Prompt> + 'static,
    S: Send + Sync + 'static,
{
    async fn do_stream_text(
        &self,
        prompt: &S,
        options: &FunctionOptions,
    ) -> ApiResult<EventStream<String>> {
        let mapped = self.template.format(prompt);
        self.model.do_stream_text(&mapped, options).await
    }
}

/// Prompt mapping for any text model
pub trait MapPrompt: TextGenerationModel {
    /// Accept prompts of type `S`, formatted by `template`
    ///
    /// The template's stop sequences are added to the model's.
    fn map_prompt<S, P>(self, template: P) -> PromptMappedModel<Self, P, S>
    where
        P: PromptTemplate<S, Self::Prompt>,
    {
        let mut stop_sequences = self.stop_sequences();
        for stop in template.stop_sequences() {
            if !stop_sequences.contains(&stop) {
                stop_sequences.push(stop);
            }
        }
        let model = if stop_sequences == self.stop_sequences() {
            self
        } else {
            self.with_stop_sequences(stop_sequences)
        };

        PromptMappedModel {
            model,
            template: Arc::new(template),
            _prompt: PhantomData,
        }
    }

    /// Accept plain text prompts
    fn with_text_prompt<P>(self, template: P) -> PromptMappedModel<Self, P, String>
    where
        P: PromptTemplate<String, Self::Prompt>,
    {
        self.map_prompt(template)
    }

    /// Accept instruction prompts
    fn with_instruction_prompt<P>(self, template: P) -> PromptMappedModel<Self, P, InstructionPrompt>
    where
        P: PromptTemplate<InstructionPrompt, Self::Prompt>,
    {
        self.map_prompt(template)
    }

    /// Accept chat prompts
    fn with_chat_prompt<P>(self, template: P) -> PromptMappedModel<Self, P, ChatPrompt>
    where
        P: PromptTemplate<ChatPrompt, Self::Prompt>,
    {
        self.map_prompt(template)
    }
}

impl<M: TextGenerationModel> MapPrompt for M {}
