//! OpenAI-compatible client wrapper.
//!
//! Speaks the `/chat/completions` wire format used by OpenAI and by the many
//! self-hosted servers that imitate it (LMStudio, Ollama, llama.cpp, vLLM),
//! so the same wrapper reaches hosted and local models alike. Point it at a
//! different provider with [`OpenAiCompatClient::new_with_base_url`].
//!
//! Streaming responses arrive as Server-Sent Events; each `data:` line holds
//! one JSON chunk and the stream ends with `data: [DONE]`.

use crate::agentgate::client_wrapper::{
    LlmClient, Message, MessageChunk, MessageChunkStream, MessageStreamFuture, Role,
};
use crate::agentgate::error::GatewayError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct ChunkResponse {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

impl OpenAiCompatClient {
    /// Create a client against the hosted OpenAI endpoint.
    pub fn new(secret_key: &str, model: &str) -> Self {
        Self::new_with_base_url(secret_key, model, DEFAULT_BASE_URL)
    }

    /// Create a client pointing at a custom OpenAI-compatible base URL,
    /// e.g. `"http://localhost:11434/v1"` for a local Ollama server.
    pub fn new_with_base_url(secret_key: &str, model: &str, base_url: &str) -> Self {
        OpenAiCompatClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            model: model.to_string(),
        }
    }

    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(&m.role).to_string(),
                content: m.content.to_string(),
            })
            .collect()
    }

    async fn post_chat(
        &self,
        messages: &[Message],
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::wire_messages(messages),
            stream,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GatewayError::Llm(format!("API error {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn send_message(&self, messages: &[Message]) -> Result<Message, GatewayError> {
        let response = self.post_chat(messages, false).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Llm(format!("malformed completion response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Llm("completion response had no choices".to_string()))?;

        Ok(Message::new(Role::Assistant, choice.message.content))
    }

    fn send_message_stream<'a>(&'a self, messages: &'a [Message]) -> MessageStreamFuture<'a> {
        Box::pin(async move {
            let response = self.post_chat(messages, true).await?;

            let chunks = response
                .bytes_stream()
                .eventsource()
                .take_while(|event| {
                    let keep = match event {
                        Ok(event) => event.data != "[DONE]",
                        Err(_) => true,
                    };
                    futures_util::future::ready(keep)
                })
                .map(|event| match event {
                    Ok(event) => serde_json::from_str::<ChunkResponse>(&event.data)
                        .map_err(|e| {
                            GatewayError::Llm(format!("malformed stream chunk: {}", e))
                        })
                        .map(|chunk| {
                            let choice = chunk.choices.into_iter().next();
                            match choice {
                                Some(choice) => MessageChunk {
                                    content: choice.delta.content.unwrap_or_default(),
                                    finish_reason: choice.finish_reason,
                                },
                                None => MessageChunk {
                                    content: String::new(),
                                    finish_reason: None,
                                },
                            }
                        }),
                    Err(e) => Err(GatewayError::Llm(e.to_string())),
                });

            let boxed: MessageChunkStream = Box::pin(chunks);
            Ok(Some(boxed))
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
