//! Conversation summarization
//!
//! Turns the tail of a conversation into the two-section memory format, or
//! nothing when the user shared no durable facts.

use super::sections::NO_MEMORY;
use crate::llm::ChatModel;
use crate::models::{Message, Role};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Number of user/assistant messages fed to the summarizer.
pub const RECENT_DIALOGUE_MESSAGES: usize = 6;

pub const SUMMARY_PROMPT: &str = "Extract only concrete facts that the USER shared about themselves, their finances, or commitments.
Format exactly as:
User Facts:
- <fact 1>
- <fact 2>
Follow-ups:
- <task 1>
- <task 2>
Rules:
- Quote or paraphrase only what the USER explicitly stated (e.g., \"Name: Rohan\", \"Age: 35\", \"Prefers conservative investing\").
- Follow-ups capture promises or next steps the user agreed to.
- If no facts or follow-ups are present, reply with NO_MEMORY.
- Never describe general knowledge or definitions.";

/// Last `count` user/assistant messages, oldest first. Tool traffic and
/// system prompts are not dialogue.
pub fn recent_dialogue(messages: &[Message], count: usize) -> Vec<&Message> {
    let dialogue: Vec<&Message> = messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .collect();
    let skip = dialogue.len().saturating_sub(count);
    dialogue.into_iter().skip(skip).collect()
}

/// `User:` / `Assistant:` lines, skipping messages with no text.
pub fn transcript(messages: &[&Message]) -> String {
    messages
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            let speaker = match m.role {
                Role::User => "User",
                _ => "Assistant",
            };
            format!("{}: {}", speaker, m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Summarizer {
    model: Arc<dyn ChatModel>,
}

impl Summarizer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// `Ok(None)` when there is nothing to summarize or the model answered
    /// with the sentinel.
    pub async fn summarize(&self, messages: &[Message]) -> Result<Option<String>> {
        let recent = recent_dialogue(messages, RECENT_DIALOGUE_MESSAGES);
        let text = transcript(&recent);
        if text.is_empty() {
            return Ok(None);
        }

        let prompt = [Message::system(SUMMARY_PROMPT), Message::user(text)];
        let reply = self.model.complete(&prompt, &[]).await?;
        let summary = reply.content.trim();

        debug!(
            model = self.model.model_name(),
            chars = summary.len(),
            "Conversation summarized"
        );

        if summary.is_empty() || summary.eq_ignore_ascii_case(NO_MEMORY) {
            return Ok(None);
        }
        Ok(Some(summary.to_string()))
    }
}
