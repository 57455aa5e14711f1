//! End-to-end query handling.
//!
//! The [`Orchestrator`] ties the pieces together: it resolves the session,
//! asks the [`IntentRouter`](crate::agentgate::router::IntentRouter) for a
//! decision, dispatches to the chosen path (direct LLM answer, a specialist
//! agent behind the rate limiter, or the capability-listing fallback), and
//! records the turn on success.
//!
//! # Concurrency
//!
//! Queries against different sessions proceed independently. Queries against
//! the *same* session are serialized by the per-session mutex, which is held
//! for the whole dispatch (including the full duration of a stream), so turn
//! order is always well defined.
//!
//! # Streaming and cancellation
//!
//! The streaming path relays chunks through an mpsc channel from a spawned
//! relay task. Dropping the returned stream (the client disconnected) closes
//! the channel; the relay observes that, stops polling the underlying agent
//! stream, and skips the turn append. A failure mid-stream emits one error
//! chunk and ends the stream; no turn is appended either way.

use crate::agentgate::agent::{AgentResponse, ChunkStream, GatewayAgent};
use crate::agentgate::classifier::IntentClassifier;
use crate::agentgate::client_wrapper::{LlmClient, Message, Role};
use crate::agentgate::config::{GatewayConfig, LoggingSettings};
use crate::agentgate::context::{ConversationContext, FollowUpDetector, SessionStore};
use crate::agentgate::error::GatewayError;
use crate::agentgate::rate_limiter::RateLimiter;
use crate::agentgate::registry::AgentRegistry;
use crate::agentgate::router::{IntentRouter, RoutingDecision};
use futures_util::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Agent name reported when the orchestrator answers directly.
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";
/// Agent name reported for the capability-listing fallback.
pub const FALLBACK_AGENT: &str = "fallback";

/// Default per-key budget for agents without an explicit rate limit.
const DEFAULT_RATE_LIMIT_EVENTS: usize = 60;
const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Channel depth between the relay task and the SSE writer.
const STREAM_CHANNEL_CAPACITY: usize = 32;

const DIRECT_SYSTEM_PROMPT: &str =
    "You are the front desk of a multi-agent assistant. Answer the user's message \
     briefly and helpfully in one or two sentences.";

/// Result of a buffered query: the response plus the session id it ran
/// under (echoed or freshly minted).
#[derive(Debug)]
pub struct QueryOutcome {
    pub response: AgentResponse,
    pub session_id: String,
}

/// Result of a streaming query.
pub struct StreamOutcome {
    pub chunks: ChunkStream,
    pub session_id: String,
}

/// Dispatches queries per the router's decision and owns all per-process
/// mutable state: the session store and the rate limiter.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    router: IntentRouter,
    sessions: SessionStore,
    rate_limiter: RateLimiter,
    llm: Arc<dyn LlmClient>,
    announcements: HashMap<String, String>,
    detector: Arc<FollowUpDetector>,
    logging: LoggingSettings,
}

impl Orchestrator {
    /// Build an orchestrator from configuration.
    ///
    /// The classifier is derived from the registered agents' capability
    /// keywords, ordered by configured priority (higher first) and then by
    /// registration order; disabled agents are excluded. Use
    /// [`new_with_classifier`](Orchestrator::new_with_classifier) to supply
    /// regex patterns or a hand-tuned table instead.
    pub async fn new(
        config: &GatewayConfig,
        registry: Arc<AgentRegistry>,
        llm: Arc<dyn LlmClient>,
        router_llm: Option<Arc<dyn LlmClient>>,
    ) -> Result<Self, GatewayError> {
        let classifier = Self::classifier_from_registry(config, &registry).await?;
        Self::new_with_classifier(config, registry, llm, router_llm, classifier).await
    }

    /// Build an orchestrator with an explicit classifier table.
    pub async fn new_with_classifier(
        config: &GatewayConfig,
        registry: Arc<AgentRegistry>,
        llm: Arc<dyn LlmClient>,
        router_llm: Option<Arc<dyn LlmClient>>,
        classifier: IntentClassifier,
    ) -> Result<Self, GatewayError> {
        let detector = Arc::new(FollowUpDetector::default());
        let sessions = SessionStore::new(
            Duration::from_secs(config.orchestrator.session_timeout_minutes * 60),
            config.orchestrator.max_turns,
            Arc::clone(&detector),
        );

        let mut rate_limiter =
            RateLimiter::new(DEFAULT_RATE_LIMIT_EVENTS, DEFAULT_RATE_LIMIT_WINDOW);
        let mut announcements = HashMap::new();
        for (name, settings) in &config.agents {
            if let Some(limit) = &settings.rate_limit {
                rate_limiter = rate_limiter.with_budget(
                    name.clone(),
                    limit.max_events,
                    Duration::from_secs(limit.window_seconds),
                );
            }
            if let Some(announcement) = &settings.announcement {
                announcements.insert(name.clone(), announcement.clone());
            }
        }

        let router = IntentRouter::new(
            classifier,
            Arc::clone(&registry),
            config.routing.clone(),
            router_llm,
        );

        Ok(Orchestrator {
            registry,
            router,
            sessions,
            rate_limiter,
            llm,
            announcements,
            detector,
            logging: config.logging.clone(),
        })
    }

    async fn classifier_from_registry(
        config: &GatewayConfig,
        registry: &AgentRegistry,
    ) -> Result<IntentClassifier, GatewayError> {
        let mut agents = registry.agents().await;
        // Stable sort: equal priorities keep registration order.
        agents.sort_by_key(|agent| {
            std::cmp::Reverse(config.agent_settings(agent.name()).priority)
        });

        let mut classifier = IntentClassifier::new();
        for agent in agents {
            if !config.agent_settings(agent.name()).enabled {
                continue;
            }
            let mut keywords = Vec::new();
            for capability in agent.capabilities() {
                for keyword in &capability.keywords {
                    if !keywords.contains(keyword) {
                        keywords.push(keyword.clone());
                    }
                }
            }
            classifier.add_agent(agent.name(), keywords, Vec::new())?;
        }
        Ok(classifier)
    }

    /// The session store (for inspection and sweeping).
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Remove expired sessions eagerly.
    pub async fn sweep_sessions(&self) {
        self.sessions.sweep().await;
    }

    fn log_decision(&self, query: &str, decision: &RoutingDecision) {
        if self.logging.log_routing_decisions {
            log::info!(
                "routing '{}' -> agent={} direct={} confidence={:.2} ({})",
                query,
                decision.agent_name.as_deref().unwrap_or("-"),
                decision.handle_directly,
                decision.confidence,
                decision.reasoning
            );
        }
    }

    fn log_response(&self, response: &AgentResponse) {
        if self.logging.log_agent_responses {
            log::debug!(
                "agent={} success={} content_len={} error={:?}",
                response.agent_name,
                response.success,
                response.content.len(),
                response.error
            );
        }
    }

    // ---- Buffered path ----

    /// Handle a query end to end and return the complete response.
    ///
    /// Returns `Err` only for malformed input ([`GatewayError::BadRequest`]);
    /// application-level failures (rate limiting, agent failures, fallback)
    /// are carried inside the returned [`AgentResponse`]. A turn is appended
    /// to the session only when the response is successful, so the follow-up
    /// heuristic never chases an error.
    pub async fn process(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<QueryOutcome, GatewayError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GatewayError::BadRequest("query must not be empty".into()));
        }

        let (sid, ctx) = self.sessions.get_or_create(session_id).await;
        let mut guard = ctx.lock().await;

        let decision = self.router.route(query, Some(&guard)).await;
        self.log_decision(query, &decision);

        let response = self.dispatch_buffered(query, &decision, &guard).await;
        self.log_response(&response);

        if response.success {
            guard.add_turn(query, response.content.clone(), response.agent_name.clone());
        }

        Ok(QueryOutcome {
            response,
            session_id: sid,
        })
    }

    async fn dispatch_buffered(
        &self,
        query: &str,
        decision: &RoutingDecision,
        context: &ConversationContext,
    ) -> AgentResponse {
        if decision.handle_directly {
            return self.answer_directly(query).await;
        }

        match &decision.agent_name {
            Some(name) => match self.registry.get(name).await {
                Some(agent) => self.call_agent(agent, query, context).await,
                None => self.fallback_response().await,
            },
            None => self.fallback_response().await,
        }
    }

    async fn answer_directly(&self, query: &str) -> AgentResponse {
        let messages = [
            Message::new(Role::System, DIRECT_SYSTEM_PROMPT),
            Message::new(Role::User, query),
        ];
        match self.llm.send_message(&messages).await {
            Ok(reply) => AgentResponse::ok(ORCHESTRATOR_AGENT, reply.content.to_string()),
            Err(e) => AgentResponse::failure(
                ORCHESTRATOR_AGENT,
                e.to_string(),
                "I couldn't process that right now. Please try again.",
            ),
        }
    }

    async fn call_agent(
        &self,
        agent: Arc<dyn GatewayAgent>,
        query: &str,
        context: &ConversationContext,
    ) -> AgentResponse {
        let name = agent.name().to_string();

        if !self.rate_limiter.try_acquire(&name).await {
            return self.rate_limited_response(&name);
        }

        match AssertUnwindSafe(agent.process(query, context))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => AgentResponse::failure(
                &name,
                e.to_string(),
                format!("The {} agent ran into a problem with that request.", name),
            ),
            Err(_) => {
                log::error!("agent '{}' panicked while processing a query", name);
                AgentResponse::failure(
                    &name,
                    format!("agent '{}' panicked", name),
                    format!("The {} agent ran into a problem with that request.", name),
                )
            }
        }
    }

    fn rate_limited_response(&self, agent: &str) -> AgentResponse {
        let wait = self.rate_limiter.window(agent);
        AgentResponse::failure(
            agent,
            "rate_limited",
            format!(
                "The {} agent is receiving too many requests. Please try again within the next {} seconds.",
                agent,
                wait.as_secs()
            ),
        )
    }

    async fn fallback_response(&self) -> AgentResponse {
        AgentResponse::ok(FALLBACK_AGENT, self.fallback_text().await)
    }

    async fn fallback_text(&self) -> String {
        let agents = self.registry.agents().await;
        if agents.is_empty() {
            return "I'm not sure how to help with that, and no specialists are available right now."
                .to_string();
        }
        let mut text =
            String::from("I'm not sure which assistant should take that. Here's what I can do:\n");
        for agent in agents {
            text.push_str(&format!("- {}: {}\n", agent.name(), agent.description()));
        }
        text
    }

    // ---- Direct-bypass path ----

    /// Call a named agent directly, skipping the router.
    ///
    /// Still passes through the agent's rate limiter. Runs against a
    /// throwaway context and records no turn (the direct endpoint carries no
    /// session). Returns [`GatewayError::UnknownAgent`] when the name is not
    /// registered.
    pub async fn process_direct(
        &self,
        agent_name: &str,
        query: &str,
    ) -> Result<AgentResponse, GatewayError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GatewayError::BadRequest("query must not be empty".into()));
        }
        let agent = self
            .registry
            .get(agent_name)
            .await
            .ok_or_else(|| GatewayError::UnknownAgent(agent_name.to_string()))?;

        let context = ConversationContext::new("direct", 1, Arc::clone(&self.detector));
        Ok(self.call_agent(agent, query, &context).await)
    }

    // ---- Streaming path ----

    /// Handle a query as a lazy chunk stream.
    ///
    /// The stream yields the configured routing announcement for the chosen
    /// agent first (nothing for direct handling and fallback), then the
    /// delegated chunks in emission order. Announcements are not recorded in
    /// the turn history. Dropping the stream cancels the in-flight work.
    pub async fn stream(
        self: Arc<Self>,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<StreamOutcome, GatewayError> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(GatewayError::BadRequest("query must not be empty".into()));
        }

        let (sid, ctx) = self.sessions.get_or_create(session_id).await;
        let (tx, rx) = mpsc::channel::<Result<String, GatewayError>>(STREAM_CHANNEL_CAPACITY);

        let orchestrator = Arc::clone(&self);
        tokio::spawn(async move {
            let mut guard = ctx.lock_owned().await;

            let decision = orchestrator.router.route(&query, Some(&guard)).await;
            orchestrator.log_decision(&query, &decision);

            let outcome = AssertUnwindSafe(orchestrator.relay_stream(
                &query,
                &decision,
                &mut guard,
                &tx,
            ))
            .catch_unwind()
            .await;

            if outcome.is_err() {
                let agent = decision.agent_name.unwrap_or_else(|| ORCHESTRATOR_AGENT.into());
                log::error!("agent '{}' panicked while streaming", agent);
                let _ = tx
                    .send(Err(GatewayError::AgentFailure {
                        message: format!("agent '{}' panicked", agent),
                        agent,
                    }))
                    .await;
            }
        });

        Ok(StreamOutcome {
            chunks: Box::pin(ReceiverStream::new(rx)),
            session_id: sid,
        })
    }

    /// Drive one streaming dispatch to completion, forwarding chunks to `tx`.
    ///
    /// Appends the turn only after the delegated stream finishes normally.
    async fn relay_stream(
        &self,
        query: &str,
        decision: &RoutingDecision,
        guard: &mut ConversationContext,
        tx: &mpsc::Sender<Result<String, GatewayError>>,
    ) {
        // Fallback needs no underlying stream at all.
        if !decision.handle_directly && decision.agent_name.is_none() {
            let text = self.fallback_text().await;
            if tx.send(Ok(text.clone())).await.is_ok() {
                guard.add_turn(query, text, FALLBACK_AGENT);
            }
            return;
        }

        let (agent_used, chunks) = if decision.handle_directly {
            match self.direct_stream(query).await {
                Ok(chunks) => (ORCHESTRATOR_AGENT.to_string(), chunks),
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        } else {
            // Invariant from the router: agent_name is present and registered.
            let name = decision.agent_name.clone().unwrap_or_default();
            let agent = match self.registry.get(&name).await {
                Some(agent) => agent,
                None => {
                    let text = self.fallback_text().await;
                    if tx.send(Ok(text.clone())).await.is_ok() {
                        guard.add_turn(query, text, FALLBACK_AGENT);
                    }
                    return;
                }
            };

            if !self.rate_limiter.try_acquire(&name).await {
                let _ = tx
                    .send(Err(GatewayError::RateLimited {
                        agent: name.clone(),
                        retry_after: self.rate_limiter.window(&name),
                    }))
                    .await;
                return;
            }

            // Announce the route before delegating so a downstream voice
            // pipeline can start speaking immediately. Not part of the turn.
            if let Some(announcement) = self.announcements.get(&name) {
                if !announcement.is_empty() && tx.send(Ok(announcement.clone())).await.is_err() {
                    return;
                }
            }

            match agent.stream(query, guard).await {
                Ok(chunks) => (name, chunks),
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        };

        let mut chunks = chunks;
        let mut accumulated = String::new();
        loop {
            tokio::select! {
                biased;
                _ = tx.closed() => {
                    log::debug!("client went away; cancelling stream for '{}'", agent_used);
                    return;
                }
                item = chunks.next() => match item {
                    Some(Ok(text)) => {
                        accumulated.push_str(&text);
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                    None => break,
                }
            }
        }

        guard.add_turn(query, accumulated, agent_used);
    }

    async fn direct_stream(&self, query: &str) -> Result<ChunkStream, GatewayError> {
        let messages = [
            Message::new(Role::System, DIRECT_SYSTEM_PROMPT),
            Message::new(Role::User, query),
        ];
        match self.llm.send_message_stream(&messages).await? {
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
            None => {
                let reply = self.llm.send_message(&messages).await?;
                Ok(Box::pin(futures_util::stream::once(async move {
                    Ok(reply.content.to_string())
                })))
            }
        }
    }
}
