//! Shared primitives for provider-agnostic LLM clients.
//!
//! The gateway talks to its upstream models through the [`LlmClient`] trait
//! and the lightweight data types defined here. The trait abstracts over
//! concrete vendor implementations while the supporting structs describe chat
//! messages and streaming chunks.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agentgate::client_wrapper::{LlmClient, Message, Role};
//! use agentgate::clients::openai::OpenAiCompatClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPEN_AI_SECRET")?;
//!     let client = OpenAiCompatClient::new(&key, "gpt-4o-mini");
//!
//!     let response = client
//!         .send_message(&[Message {
//!             role: Role::User,
//!             content: Arc::from("Who are you?"),
//!         }])
//!         .await?;
//!
//!     println!("Assistant: {}", response.content);
//!     Ok(())
//! }
//! ```
//!
//! # Streaming quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agentgate::client_wrapper::{LlmClient, Message, Role};
//! use agentgate::clients::openai::OpenAiCompatClient;
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPEN_AI_SECRET")?;
//!     let client = OpenAiCompatClient::new(&key, "gpt-4o-mini");
//!     let request = [Message {
//!         role: Role::User,
//!         content: Arc::from("Explain Rust lifetimes in a sentence."),
//!     }];
//!
//!     if let Some(mut chunks) = client.send_message_stream(&request).await? {
//!         while let Some(chunk) = chunks.next().await {
//!             print!("{}", chunk?.content);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::agentgate::error::GatewayError;
use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Represents the possible roles for a chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message (frequently a mirror of a human end-user request).
    User,
    /// An assistant authored message (model responses or prior turns).
    Assistant,
}

/// Represents a generic message exchanged with an LLM.
#[derive(Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body. Stored as `Arc<str>` so that histories can be
    /// cheaply cloned by the orchestrator and downstream components.
    pub content: Arc<str>,
}

impl Message {
    /// Convenience constructor.
    pub fn new(role: Role, content: impl AsRef<str>) -> Self {
        Self {
            role,
            content: Arc::from(content.as_ref()),
        }
    }
}

/// Represents a chunk of content in a streaming response.
/// Each chunk contains a delta (incremental piece) of the assistant's response.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// The incremental content delta in this chunk.
    /// May be empty for chunks that don't contain content (e.g., finish_reason chunks).
    pub content: String,
    /// Optional finish reason mirroring the provider specific completion status (e.g. `"stop"`).
    pub finish_reason: Option<String>,
}

/// Type alias for a stream of message chunks compatible with `Send` executors.
pub type MessageChunkStream =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, GatewayError>> + Send>>;

/// Type alias for the future returned by [`LlmClient::send_message_stream`].
pub type MessageStreamFuture<'a> = Pin<
    Box<
        dyn std::future::Future<Output = Result<Option<MessageChunkStream>, GatewayError>>
            + Send
            + 'a,
    >,
>;

/// Trait-driven abstraction for a concrete model provider.
///
/// An [`LlmClient`] instance is responsible for translating gateway requests
/// into the provider specific wire format and for returning provider
/// responses in a uniform shape. The abstraction deliberately excludes any
/// conversation bookkeeping: that lives in
/// [`ConversationContext`](crate::agentgate::context::ConversationContext).
///
/// All implementations **must** be thread-safe (`Send + Sync`) so they can be
/// shared between async tasks.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a full request/response style chat completion.
    ///
    /// The `messages` slice must include any system priming messages the
    /// caller wishes to send. On success the returned [`Message`] carries the
    /// assistant's complete reply.
    async fn send_message(&self, messages: &[Message]) -> Result<Message, GatewayError>;

    /// Request a streaming response from the provider.
    ///
    /// Implementors that sit in front of providers without streaming support
    /// can inherit the default implementation which simply resolves to
    /// `Ok(None)`; callers then fall back to [`send_message`](LlmClient::send_message).
    /// A `Some(MessageChunkStream)` return value must yield [`MessageChunk`]
    /// instances that mirror the incremental tokens supplied by the upstream
    /// service, in emission order.
    fn send_message_stream<'a>(&'a self, _messages: &'a [Message]) -> MessageStreamFuture<'a> {
        Box::pin(async { Ok(None) })
    }

    /// Return the identifier used to select the upstream model (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;
}
