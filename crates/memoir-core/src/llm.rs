//! LLM client capability.
//!
//! The memory subsystem never talks to a provider directly; the
//! consolidator receives a [`ChatClient`] at construction and calls it
//! exactly once per memory group. Provider-specific clients live
//! outside this crate, which only ships deterministic test doubles.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

// ============================================================================
// MESSAGES
// ============================================================================

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// End-user message
    User,
    /// Model reply
    Assistant,
}

impl Role {
    /// String representation used in metadata and transcripts
    pub fn name(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Who produced the message
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// COMPLETION
// ============================================================================

/// Options for a completion call
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// Sampling temperature
    pub temperature: f64,
    /// Response token cap
    pub max_tokens: usize,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// A completion returned by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Generated text
    pub content: String,
}

/// Capability for obtaining chat completions
pub trait ChatClient: Send + Sync {
    /// Run one completion over `conversation`
    fn complete(
        &self,
        conversation: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion>;
}

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Deterministic client: the reply is a pure function of the prompt.
///
/// Useful in tests and offline runs; repeated calls over identical
/// input produce byte-identical output.
#[derive(Debug, Clone, Default)]
pub struct DigestChatClient;

impl ChatClient for DigestChatClient {
    fn complete(
        &self,
        conversation: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<Completion> {
        let prompt = conversation
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let lines = prompt.lines().count();
        let head: String = prompt.chars().take(64).collect();
        Ok(Completion {
            content: format!("[digest:{lines}] {head}"),
        })
    }
}

/// Client that always fails, for exercising failure paths.
#[derive(Debug, Clone)]
pub struct FailingChatClient {
    /// Provider name reported in the error
    pub provider: String,
    /// Error message
    pub message: String,
}

impl Default for FailingChatClient {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            message: "completion unavailable".to_string(),
        }
    }
}

impl ChatClient for FailingChatClient {
    fn complete(
        &self,
        _conversation: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<Completion> {
        Err(MemoryError::api(self.provider.clone(), self.message.clone()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_client_deterministic() {
        let client = DigestChatClient;
        let convo = vec![
            ChatMessage::system("summarize"),
            ChatMessage::user("line one\nline two"),
        ];
        let a = client.complete(&convo, &CompletionOptions::default()).unwrap();
        let b = client.complete(&convo, &CompletionOptions::default()).unwrap();
        assert_eq!(a.content, b.content);
        assert!(a.content.starts_with("[digest:2]"));
    }

    #[test]
    fn test_failing_client_reports_provider() {
        let client = FailingChatClient::default();
        let err = client
            .complete(&[ChatMessage::user("hi")], &CompletionOptions::default())
            .unwrap_err();
        assert!(matches!(err, MemoryError::Api { .. }));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::System.name(), "system");
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.name(), "assistant");
    }
}
