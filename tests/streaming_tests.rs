use agentgate::agent::{AgentCapability, AgentResponse, ChunkStream, GatewayAgent};
use agentgate::client_wrapper::{LlmClient, Message, Role};
use agentgate::config::GatewayConfig;
use agentgate::context::ConversationContext;
use agentgate::error::GatewayError;
use agentgate::orchestrator::Orchestrator;
use agentgate::registry::AgentRegistry;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct MockLlm;

#[async_trait]
impl LlmClient for MockLlm {
    async fn send_message(&self, _messages: &[Message]) -> Result<Message, GatewayError> {
        Ok(Message::new(Role::Assistant, "direct reply"))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Yields a fixed chunk sequence.
struct ChunkAgent {
    name: String,
    chunks: Vec<String>,
    capabilities: Vec<AgentCapability>,
}

impl ChunkAgent {
    fn new(name: &str, chunks: &[&str], keywords: &[&str]) -> Arc<Self> {
        Arc::new(ChunkAgent {
            name: name.to_string(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            capabilities: vec![AgentCapability::new("main", "chunked replies")
                .with_keywords(keywords.iter().copied())],
        })
    }
}

#[async_trait]
impl GatewayAgent for ChunkAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "streams fixed chunks"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    async fn process(
        &self,
        _query: &str,
        _context: &ConversationContext,
    ) -> Result<AgentResponse, GatewayError> {
        Ok(AgentResponse::ok(&self.name, self.chunks.concat()))
    }

    async fn stream(
        &self,
        _query: &str,
        _context: &ConversationContext,
    ) -> Result<ChunkStream, GatewayError> {
        let items: Vec<Result<String, GatewayError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

/// Fails after yielding one chunk.
struct FailingStreamAgent {
    capabilities: Vec<AgentCapability>,
}

#[async_trait]
impl GatewayAgent for FailingStreamAgent {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "fails mid-stream"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    async fn process(
        &self,
        _query: &str,
        _context: &ConversationContext,
    ) -> Result<AgentResponse, GatewayError> {
        Ok(AgentResponse::ok("broken", "unused"))
    }

    async fn stream(
        &self,
        _query: &str,
        _context: &ConversationContext,
    ) -> Result<ChunkStream, GatewayError> {
        let items: Vec<Result<String, GatewayError>> = vec![
            Ok("partial ".to_string()),
            Err(GatewayError::AgentFailure {
                agent: "broken".to_string(),
                message: "upstream hung up".to_string(),
            }),
        ];
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

/// Yields one chunk immediately, then a second after a real delay. Records
/// whether the second chunk was ever produced.
struct SlowAgent {
    capabilities: Vec<AgentCapability>,
    second_chunk_produced: Arc<AtomicBool>,
}

#[async_trait]
impl GatewayAgent for SlowAgent {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "streams slowly"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    async fn process(
        &self,
        _query: &str,
        _context: &ConversationContext,
    ) -> Result<AgentResponse, GatewayError> {
        Ok(AgentResponse::ok("slow", "unused"))
    }

    async fn stream(
        &self,
        _query: &str,
        _context: &ConversationContext,
    ) -> Result<ChunkStream, GatewayError> {
        let flag = Arc::clone(&self.second_chunk_produced);
        let stream = futures_util::stream::unfold(0u32, move |step| {
            let flag = Arc::clone(&flag);
            async move {
                match step {
                    0 => Some((Ok("first ".to_string()), 1)),
                    1 => {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        flag.store(true, Ordering::SeqCst);
                        Some((Ok("second".to_string()), 2))
                    }
                    _ => None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

const CONFIG: &str = r#"
    [orchestrator]
    model = "mock-model"
    session_timeout_minutes = 30
    max_turns = 10

    [routing]
    code_routing_threshold = 0.2

    [agents.gmail]
    announcement = "Checking your email. "
"#;

async fn setup(agents: Vec<Arc<dyn GatewayAgent>>) -> Arc<Orchestrator> {
    let config = GatewayConfig::from_toml_str(CONFIG).unwrap();
    let registry = Arc::new(AgentRegistry::new());
    for agent in agents {
        registry.register(agent).await.unwrap();
    }
    Arc::new(
        Orchestrator::new(&config, registry, Arc::new(MockLlm), None)
            .await
            .unwrap(),
    )
}

async fn collect(mut chunks: ChunkStream) -> Vec<Result<String, GatewayError>> {
    let mut out = Vec::new();
    while let Some(item) = chunks.next().await {
        out.push(item);
    }
    out
}

#[tokio::test]
async fn test_chunk_order_with_announcement() {
    let gmail = ChunkAgent::new("gmail", &["A ", "B ", "C"], &["email"]);
    let orchestrator = setup(vec![gmail]).await;

    let outcome = orchestrator
        .clone()
        .stream("check my email", None)
        .await
        .unwrap();
    let items = collect(outcome.chunks).await;

    let texts: Vec<&str> = items.iter().map(|i| i.as_deref().unwrap()).collect();
    assert_eq!(texts, vec!["Checking your email. ", "A ", "B ", "C"]);

    // The recorded turn holds the concatenated agent output, without the
    // announcement prefix.
    let (_, ctx) = orchestrator
        .sessions()
        .get_or_create(Some(&outcome.session_id))
        .await;
    let guard = ctx.lock().await;
    assert_eq!(guard.turn_count(), 1);
    assert_eq!(guard.turns().next().unwrap().response, "A B C");
    assert_eq!(guard.last_agent(), Some("gmail"));
}

#[tokio::test]
async fn test_no_announcement_for_unconfigured_agent() {
    let ski = ChunkAgent::new("ski", &["powder"], &["ski"]);
    let orchestrator = setup(vec![ski]).await;

    let outcome = orchestrator
        .clone()
        .stream("how is the ski report", None)
        .await
        .unwrap();
    let items = collect(outcome.chunks).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_deref().unwrap(), "powder");
}

#[tokio::test]
async fn test_direct_streaming_uses_llm() {
    let orchestrator = setup(vec![]).await;

    let outcome = orchestrator.clone().stream("hello", None).await.unwrap();
    let items = collect(outcome.chunks).await;
    // MockLlm has no streaming support; the one-shot fallback yields the
    // buffered reply as a single chunk.
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_deref().unwrap(), "direct reply");

    let (_, ctx) = orchestrator
        .sessions()
        .get_or_create(Some(&outcome.session_id))
        .await;
    assert_eq!(ctx.lock().await.last_agent(), Some("orchestrator"));
}

#[tokio::test]
async fn test_mid_stream_failure_emits_error_and_skips_turn() {
    let broken: Arc<dyn GatewayAgent> = Arc::new(FailingStreamAgent {
        capabilities: vec![AgentCapability::new("main", "fails").with_keywords(["broken"])],
    });
    let orchestrator = setup(vec![broken]).await;

    let outcome = orchestrator
        .clone()
        .stream("broken stream please", None)
        .await
        .unwrap();
    let items = collect(outcome.chunks).await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "partial ");
    assert!(matches!(items[1], Err(GatewayError::AgentFailure { .. })));

    let (_, ctx) = orchestrator
        .sessions()
        .get_or_create(Some(&outcome.session_id))
        .await;
    assert_eq!(ctx.lock().await.turn_count(), 0);
}

#[tokio::test]
async fn test_rate_limited_stream_emits_error_chunk() {
    let config = format!(
        "{}\n[agents.ski.rate_limit]\nmax_events = 0\nwindow_seconds = 60\n",
        CONFIG
    );
    let config = GatewayConfig::from_toml_str(&config).unwrap();
    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(ChunkAgent::new("ski", &["powder"], &["ski"]))
        .await
        .unwrap();
    let orchestrator = Arc::new(
        Orchestrator::new(&config, registry, Arc::new(MockLlm), None)
            .await
            .unwrap(),
    );

    let outcome = orchestrator
        .clone()
        .stream("how is the ski report", None)
        .await
        .unwrap();
    let items = collect(outcome.chunks).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(GatewayError::RateLimited { .. })));
}

#[tokio::test]
async fn test_client_cancel_mid_stream() {
    let produced = Arc::new(AtomicBool::new(false));
    let slow: Arc<dyn GatewayAgent> = Arc::new(SlowAgent {
        capabilities: vec![AgentCapability::new("main", "slow").with_keywords(["slow"])],
        second_chunk_produced: Arc::clone(&produced),
    });
    let orchestrator = setup(vec![slow]).await;

    let outcome = orchestrator
        .clone()
        .stream("slow stream please", None)
        .await
        .unwrap();
    let session_id = outcome.session_id.clone();

    let mut chunks = outcome.chunks;
    let first = chunks.next().await.unwrap().unwrap();
    assert_eq!(first, "first ");

    // Simulate the client hanging up.
    drop(chunks);

    // Give the relay task time to observe the closed channel.
    tokio::time::sleep(Duration::from_millis(400)).await;

    // The agent stream was never polled past the cancellation point and no
    // turn was appended.
    assert!(!produced.load(Ordering::SeqCst));
    let (_, ctx) = orchestrator.sessions().get_or_create(Some(&session_id)).await;
    assert_eq!(ctx.lock().await.turn_count(), 0);
}
