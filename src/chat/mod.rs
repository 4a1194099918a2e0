// 💬 Assistant chat - proxy client for a third-party chat-assistant API
//
// Thread = one conversation, Run = one assistant invocation on a thread.
// A run is polled on a fixed interval until it reaches a terminal status.

pub mod client;
pub mod history;
pub mod poller;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{AssistantApi, OpenAiAssistant};
pub use history::{assign_thread, history, save_message, save_new_replies, thread_for_buyer};
pub use poller::{poll_run, send_and_wait, PollConfig};

// ============================================================================
// RUN STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
                | RunStatus::Expired
                | RunStatus::Incomplete
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
}

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<ChatRole> {
        match value {
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Message id on the assistant service; `None` for locally written messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
            created_at: Utc::now(),
            upstream_id: None,
        }
    }

    pub fn with_upstream_id(mut self, id: impl Into<String>) -> Self {
        self.upstream_id = Some(id.into());
        self
    }
}

/// Last assistant message in an ascending message list
pub fn latest_reply(messages: &[ChatMessage]) -> Option<&ChatMessage> {
    messages.iter().rev().find(|m| m.role == ChatRole::Assistant)
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Assistant is not configured: {0} is missing")]
    NotConfigured(&'static str),

    #[error("Request to assistant API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Assistant API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Run {run_id} still not finished after {attempts} status checks")]
    PollExhausted { run_id: String, attempts: u32 },

    #[error("Run ended with status {0:?}")]
    RunEnded(RunStatus),
}
