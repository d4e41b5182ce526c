//! Prompt templates for common model formats

use super::{ChatMessage, ChatPrompt, ChatRole, InstructionPrompt, PromptTemplate};

const BEGIN_SEGMENT: &str = "<s>";
const END_SEGMENT: &str = " </s>";
const BEGIN_INSTRUCTION: &str = "[INST] ";
const END_INSTRUCTION: &str = " [/INST] ";
const BEGIN_SYSTEM: &str = "<<SYS>>\n";
const END_SYSTEM: &str = "\n<</SYS>>\n\n";

/// Llama 2 chat format
///
/// ```text
/// <s>[INST] <<SYS>>
/// {system}
/// <</SYS>>
///
/// {user} [/INST] {assistant} </s><s>[INST] {user} [/INST]
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Llama2PromptTemplate;

impl Llama2PromptTemplate {
    fn open(system: Option<&str>) -> String {
        let mut text = format!("{}{}", BEGIN_SEGMENT, BEGIN_INSTRUCTION);
        if let Some(system) = system {
            text.push_str(BEGIN_SYSTEM);
            text.push_str(system);
            text.push_str(END_SYSTEM);
        }
        text
    }
}

impl PromptTemplate<String, String> for Llama2PromptTemplate {
    fn format(&self, prompt: &String) -> String {
        format!("{}{}{}", Self::open(None), prompt, END_INSTRUCTION)
    }

    fn stop_sequences(&self) -> Vec<String> {
        vec![END_SEGMENT.to_string()]
    }
}

impl PromptTemplate<InstructionPrompt, String> for Llama2PromptTemplate {
    fn format(&self, prompt: &InstructionPrompt) -> String {
        format!(
            "{}{}{}",
            Self::open(prompt.system.as_deref()),
            prompt.instruction,
            END_INSTRUCTION
        )
    }

    fn stop_sequences(&self) -> Vec<String> {
        vec![END_SEGMENT.to_string()]
    }
}

impl PromptTemplate<ChatPrompt, String> for Llama2PromptTemplate {
    fn format(&self, prompt: &ChatPrompt) -> String {
        let mut text = Self::open(prompt.system.as_deref());
        for message in &prompt.messages {
            match message.role {
                ChatRole::User => {
                    text.push_str(&message.content);
                    text.push_str(END_INSTRUCTION);
                }
                ChatRole::Assistant => {
                    text.push_str(&message.content);
                    text.push_str(END_SEGMENT);
                    text.push_str(BEGIN_SEGMENT);
                    text.push_str(BEGIN_INSTRUCTION);
                }
            }
        }
        text
    }

    fn stop_sequences(&self) -> Vec<String> {
        vec![END_SEGMENT.to_string()]
    }
}

/// Plain text with `User:` / `Assistant:` turns
#[derive(Debug, Clone)]
pub struct TextPromptTemplate {
    user: String,
    assistant: String,
}

impl TextPromptTemplate {
    pub fn new() -> Self {
        Self::with_labels("User", "Assistant")
    }

    /// Use other speaker labels
    pub fn with_labels(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

impl Default for TextPromptTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptTemplate<String, String> for TextPromptTemplate {
    fn format(&self, prompt: &String) -> String {
        prompt.clone()
    }
}

impl PromptTemplate<InstructionPrompt, String> for TextPromptTemplate {
    fn format(&self, prompt: &InstructionPrompt) -> String {
        match &prompt.system {
            Some(system) => format!("{}\n\n{}", system, prompt.instruction),
            None => prompt.instruction.clone(),
        }
    }
}

impl PromptTemplate<ChatPrompt, String> for TextPromptTemplate {
    fn format(&self, prompt: &ChatPrompt) -> String {
        let mut text = String::new();
        if let Some(system) = &prompt.system {
            text.push_str(system);
            text.push_str("\n\n");
        }
        for message in &prompt.messages {
            let label = match message.role {
                ChatRole::User => &self.user,
                ChatRole::Assistant => &self.assistant,
            };
            text.push_str(&format!("{}:\n{}\n\n", label, message.content));
        }
        text.push_str(&format!("{}:\n", self.assistant));
        text
    }

    fn stop_sequences(&self) -> Vec<String> {
        vec![format!("\n{}:", self.user)]
    }
}

/// Text and instruction prompts for chat models
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatMessagesTemplate;

impl PromptTemplate<String, ChatPrompt> for ChatMessagesTemplate {
    fn format(&self, prompt: &String) -> ChatPrompt {
        ChatPrompt {
            system: None,
            messages: vec![ChatMessage::user(prompt.clone())],
        }
    }
}

impl PromptTemplate<InstructionPrompt, ChatPrompt> for ChatMessagesTemplate {
    fn format(&self, prompt: &InstructionPrompt) -> ChatPrompt {
        ChatPrompt {
            system: prompt.system.clone(),
            messages: vec![ChatMessage::user(prompt.instruction.clone())],
        }
    }
}
