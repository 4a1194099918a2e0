// Assistant API client: the trait seam plus the OpenAI Assistants implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ChatError, ChatMessage, ChatRole, Run, RunStatus};
use crate::config::Config;

#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Start a new conversation, returning the thread id
    async fn create_thread(&self) -> Result<String, ChatError>;

    /// Append a user message to a thread, returning the message id
    async fn post_message(&self, thread_id: &str, content: &str) -> Result<String, ChatError>;

    /// Ask the assistant to respond on a thread
    async fn create_run(&self, thread_id: &str) -> Result<Run, ChatError>;

    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, ChatError>;

    /// All messages on a thread, oldest first
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, ChatError>;
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    id: String,
    thread_id: String,
    status: RunStatus,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<WireMessage>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    id: Option<String>,
    role: String,
    created_at: i64,
    content: Vec<WireContent>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<WireText>,
}

#[derive(Deserialize)]
struct WireText {
    value: String,
}

impl WireMessage {
    fn into_message(self) -> Option<ChatMessage> {
        let role = ChatRole::parse(&self.role)?;
        let content = self
            .content
            .into_iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.map(|t| t.value))
            .collect::<Vec<_>>()
            .join("\n");

        Some(ChatMessage {
            role,
            content,
            created_at: DateTime::<Utc>::from_timestamp(self.created_at, 0).unwrap_or_else(Utc::now),
            upstream_id: self.id,
        })
    }
}

/// Decode an Assistants API message list (oldest first as requested)
pub(crate) fn parse_message_list(body: &str) -> Result<Vec<ChatMessage>, serde_json::Error> {
    let list: MessageList = serde_json::from_str(body)?;
    Ok(list
        .data
        .into_iter()
        .filter_map(WireMessage::into_message)
        .collect())
}

// ============================================================================
// OPENAI ASSISTANTS CLIENT
// ============================================================================

pub struct OpenAiAssistant {
    http: Client,
    base_url: String,
    api_key: String,
    assistant_id: String,
}

impl OpenAiAssistant {
    pub fn new(api_key: String, assistant_id: String, base_url: String) -> Self {
        OpenAiAssistant {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            assistant_id,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ChatError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or(ChatError::NotConfigured("OPENAI_API_KEY"))?;
        let assistant_id = config
            .assistant_id
            .clone()
            .ok_or(ChatError::NotConfigured("OPENAI_ASSISTANT_ID"))?;

        Ok(Self::new(api_key, assistant_id, config.openai_base_url.clone()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ChatError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl AssistantApi for OpenAiAssistant {
    async fn create_thread(&self) -> Result<String, ChatError> {
        let thread: IdResponse = self
            .send(self.http.post(self.url("threads")).json(&json!({})))
            .await?;
        debug!(thread_id = %thread.id, "thread created");
        Ok(thread.id)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<String, ChatError> {
        let message: IdResponse = self
            .send(
                self.http
                    .post(self.url(&format!("threads/{}/messages", thread_id)))
                    .json(&json!({ "role": "user", "content": content })),
            )
            .await?;
        Ok(message.id)
    }

    async fn create_run(&self, thread_id: &str) -> Result<Run, ChatError> {
        let run: RunResponse = self
            .send(
                self.http
                    .post(self.url(&format!("threads/{}/runs", thread_id)))
                    .json(&json!({ "assistant_id": self.assistant_id })),
            )
            .await?;
        debug!(run_id = %run.id, thread_id, "run created");
        Ok(Run {
            id: run.id,
            thread_id: run.thread_id,
            status: run.status,
        })
    }

    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, ChatError> {
        let run: RunResponse = self
            .send(
                self.http
                    .get(self.url(&format!("threads/{}/runs/{}", thread_id, run_id))),
            )
            .await?;
        Ok(run.status)
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let response = self
            .authorized(
                self.http
                    .get(self.url(&format!("threads/{}/messages", thread_id)))
                    .query(&[("order", "asc")]),
            )
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        parse_message_list(&body).map_err(|e| ChatError::Api {
            status: status.as_u16(),
            body: format!("unreadable message list: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_list() {
        let body = r#"{
            "object": "list",
            "data": [
                {
                    "id": "msg_1",
                    "role": "user",
                    "created_at": 1700000000,
                    "content": [{"type": "text", "text": {"value": "What is earnest money?", "annotations": []}}]
                },
                {
                    "id": "msg_2",
                    "role": "assistant",
                    "created_at": 1700000005,
                    "content": [
                        {"type": "text", "text": {"value": "A good-faith deposit.", "annotations": []}},
                        {"type": "image_file", "image_file": {"file_id": "file_1"}},
                        {"type": "text", "text": {"value": "It is held in escrow.", "annotations": []}}
                    ]
                },
                {
                    "id": "msg_3",
                    "role": "system",
                    "created_at": 1700000006,
                    "content": []
                }
            ]
        }"#;

        let messages = parse_message_list(body).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[1].content, "A good-faith deposit.\nIt is held in escrow.");
        assert_eq!(messages[1].created_at.timestamp(), 1700000005);
        assert_eq!(messages[1].upstream_id.as_deref(), Some("msg_2"));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert!(matches!(
            OpenAiAssistant::from_config(&config),
            Err(ChatError::NotConfigured("OPENAI_API_KEY"))
        ));

        let config = Config::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "OPENAI_BASE_URL" => Some("http://localhost:9999/v1/".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(matches!(
            OpenAiAssistant::from_config(&config),
            Err(ChatError::NotConfigured("OPENAI_ASSISTANT_ID"))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = OpenAiAssistant::new(
            "sk".to_string(),
            "asst".to_string(),
            "http://localhost:9999/v1/".to_string(),
        );
        assert_eq!(client.url("threads"), "http://localhost:9999/v1/threads");
    }
}
