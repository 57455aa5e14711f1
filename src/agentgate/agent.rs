//! Agent contract.
//!
//! This module defines the closed capability set every specialist shares:
//! identity, advertised capabilities, buffered [`process`](GatewayAgent::process),
//! streaming [`stream`](GatewayAgent::stream), and a health probe. The
//! [`AgentRegistry`](crate::agentgate::registry::AgentRegistry) owns agents
//! for their registered lifetime; callers receive borrowed `Arc` handles.
//!
//! [`LlmAgent`] is the stock implementation: a specialist whose domain logic
//! is a system prompt over an [`LlmClient`], with true token streaming when
//! the provider supports it.
//!
//! # Example
//!
//! ```rust
//! use agentgate::agent::{AgentCapability, AgentResponse};
//!
//! let cap = AgentCapability::new("email_search", "Search the mailbox")
//!     .with_keywords(["email", "inbox"])
//!     .with_example("do I have unread email?");
//! assert_eq!(cap.keywords, vec!["email", "inbox"]);
//!
//! let resp = AgentResponse::ok("gmail", "You have 3 unread messages.");
//! assert!(resp.success);
//! assert!(resp.error.is_none());
//! ```

use crate::agentgate::client_wrapper::{LlmClient, Message, Role};
use crate::agentgate::context::ConversationContext;
use crate::agentgate::error::GatewayError;
use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

/// A named sub-feature of an agent, used by the router to match intent.
///
/// Keywords are lowercase trigger tokens; examples are illustrative queries
/// surfaced to the router's LLM fallback. Keywords across distinct agents may
/// overlap — the classifier's scoring resolves the overlap.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCapability {
    /// Capability name, unique within the owning agent.
    pub name: String,
    /// Prose description of what the capability does.
    pub description: String,
    /// Lowercase trigger keywords.
    pub keywords: Vec<String>,
    /// Illustrative example queries.
    pub examples: Vec<String>,
}

impl AgentCapability {
    /// Create a capability with the mandatory identity fields.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        AgentCapability {
            name: name.into(),
            description: description.into(),
            keywords: Vec::new(),
            examples: Vec::new(),
        }
    }

    /// Attach trigger keywords (builder pattern). Lowercased on the way in.
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords
            .extend(keywords.into_iter().map(|k| k.as_ref().to_lowercase()));
        self
    }

    /// Attach one example query (builder pattern).
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }
}

/// Response body returned by an agent (or by the orchestrator itself).
///
/// Invariant: when `success` is `false`, `error` is non-empty and `content`
/// may carry any user-facing fallback text; otherwise `error` is absent.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Complete response text.
    pub content: String,
    /// Whether the agent handled the query.
    pub success: bool,
    /// Name of the responding agent, `"orchestrator"` for direct handling,
    /// or `"fallback"` when no agent could be chosen.
    pub agent_name: String,
    /// Free-form metadata attached by the agent.
    pub metadata: HashMap<String, String>,
    /// Failure description, present only when `success` is `false`.
    pub error: Option<String>,
}

impl AgentResponse {
    /// Successful response.
    pub fn ok(agent_name: impl Into<String>, content: impl Into<String>) -> Self {
        AgentResponse {
            content: content.into(),
            success: true,
            agent_name: agent_name.into(),
            metadata: HashMap::new(),
            error: None,
        }
    }

    /// Failed response carrying a user-facing fallback text.
    pub fn failure(
        agent_name: impl Into<String>,
        error: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        AgentResponse {
            content: content.into(),
            success: false,
            agent_name: agent_name.into(),
            metadata: HashMap::new(),
            error: Some(error.into()),
        }
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A lazy, finite sequence of response text chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// The contract every specialist implements.
///
/// `process` and `stream` receive the current conversation context for the
/// session; the orchestrator holds the per-session mutex for the duration of
/// the call, so implementations see a consistent snapshot. The default
/// `stream` is a one-shot yield of `process`'s result, and the default
/// health check reports healthy.
#[async_trait]
pub trait GatewayAgent: Send + Sync {
    /// Stable unique name. Must be a non-empty token.
    fn name(&self) -> &str;

    /// Human description of the agent's domain.
    fn description(&self) -> &str;

    /// The capabilities advertised to the router.
    fn capabilities(&self) -> &[AgentCapability];

    /// Handle a query and return the complete response.
    async fn process(
        &self,
        query: &str,
        context: &ConversationContext,
    ) -> Result<AgentResponse, GatewayError>;

    /// Handle a query as a lazy chunk stream.
    ///
    /// The default implementation buffers via
    /// [`process`](GatewayAgent::process) and yields the content once; a
    /// failed response surfaces as a single error item.
    async fn stream(
        &self,
        query: &str,
        context: &ConversationContext,
    ) -> Result<ChunkStream, GatewayError> {
        let name = self.name().to_string();
        let response = self.process(query, context).await?;
        let item = if response.success {
            Ok(response.content)
        } else {
            Err(GatewayError::AgentFailure {
                agent: name,
                message: response
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            })
        };
        Ok(Box::pin(futures_util::stream::iter(vec![item])))
    }

    /// Best-effort liveness probe.
    async fn health_check(&self) -> bool {
        true
    }
}

/// A specialist backed directly by an LLM.
///
/// Carries a system prompt describing the agent's domain and relays recent
/// session turns as chat history. When the underlying provider supports
/// streaming, `stream` yields real token deltas; otherwise it falls back to
/// the buffered path.
pub struct LlmAgent {
    name: String,
    description: String,
    capabilities: Vec<AgentCapability>,
    system_prompt: String,
    client: Arc<dyn LlmClient>,
    context_turns: usize,
}

impl LlmAgent {
    /// Create an agent with the mandatory identity information.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        LlmAgent {
            system_prompt: format!("You are {}. {}", name, description),
            name,
            description,
            capabilities: Vec::new(),
            client,
            context_turns: 5,
        }
    }

    /// Override the default system prompt (builder pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Advertise a capability (builder pattern).
    pub fn with_capability(mut self, capability: AgentCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// How many recent turns to relay as chat history (builder pattern).
    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns;
        self
    }

    fn build_messages(&self, query: &str, context: &ConversationContext) -> Vec<Message> {
        let mut messages = vec![Message::new(Role::System, &self.system_prompt)];
        let skip = context.turn_count().saturating_sub(self.context_turns);
        for turn in context.turns().skip(skip) {
            messages.push(Message::new(Role::User, &turn.query));
            messages.push(Message::new(Role::Assistant, &turn.response));
        }
        messages.push(Message::new(Role::User, query));
        messages
    }
}

#[async_trait]
impl GatewayAgent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    async fn process(
        &self,
        query: &str,
        context: &ConversationContext,
    ) -> Result<AgentResponse, GatewayError> {
        let messages = self.build_messages(query, context);
        match self.client.send_message(&messages).await {
            Ok(reply) => Ok(AgentResponse::ok(&self.name, reply.content.to_string())
                .with_metadata("model", self.client.model_name())),
            Err(e) => Ok(AgentResponse::failure(
                &self.name,
                e.to_string(),
                "I couldn't reach my model just now. Please try again.",
            )),
        }
    }

    async fn stream(
        &self,
        query: &str,
        context: &ConversationContext,
    ) -> Result<ChunkStream, GatewayError> {
        let messages = self.build_messages(query, context);
        match self.client.send_message_stream(&messages).await? {
            Some(chunks) => {
                let mapped = chunks.filter_map(|chunk| async move {
                    match chunk {
                        Ok(chunk) if chunk.content.is_empty() => None,
                        Ok(chunk) => Some(Ok(chunk.content)),
                        Err(e) => Some(Err(e)),
                    }
                });
                Ok(Box::pin(mapped))
            }
            // Provider without streaming support: one-shot fallback.
            None => {
                let reply = self.client.send_message(&messages).await?;
                Ok(Box::pin(futures_util::stream::once(async move {
                    Ok(reply.content.to_string())
                })))
            }
        }
    }

    async fn health_check(&self) -> bool {
        !self.client.model_name().is_empty()
    }
}
