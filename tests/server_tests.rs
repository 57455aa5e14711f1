use agentgate::agent::{AgentCapability, AgentResponse, ChunkStream, GatewayAgent};
use agentgate::client_wrapper::{LlmClient, Message, Role};
use agentgate::config::{ApiConfig, GatewayConfig};
use agentgate::context::ConversationContext;
use agentgate::error::GatewayError;
use agentgate::orchestrator::Orchestrator;
use agentgate::registry::AgentRegistry;
use agentgate::server::{build_router, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

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

struct MockAgent {
    name: String,
    healthy: bool,
    chunks: Vec<String>,
    capabilities: Vec<AgentCapability>,
}

impl MockAgent {
    fn new(name: &str, keywords: &[&str], chunks: &[&str], healthy: bool) -> Arc<Self> {
        Arc::new(MockAgent {
            name: name.to_string(),
            healthy,
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            capabilities: vec![AgentCapability::new("main", "primary capability")
                .with_keywords(keywords.iter().copied())
                .with_example("an example query")],
        })
    }
}

#[async_trait]
impl GatewayAgent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "a mock specialist"
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

    async fn health_check(&self) -> bool {
        self.healthy
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

async fn state_with(agents: Vec<Arc<dyn GatewayAgent>>) -> AppState {
    let config = GatewayConfig::from_toml_str(CONFIG).unwrap();
    let registry = Arc::new(AgentRegistry::new());
    for agent in agents {
        registry.register(agent).await.unwrap();
    }
    let orchestrator = Arc::new(
        Orchestrator::new(&config, Arc::clone(&registry), Arc::new(MockLlm), None)
            .await
            .unwrap(),
    );
    AppState {
        orchestrator,
        registry,
        api: Arc::new(ApiConfig::default()),
    }
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_agent_availability() {
    let state = state_with(vec![
        MockAgent::new("gmail", &["email"], &["hi"], true),
        MockAgent::new("ski", &["ski"], &["hi"], false),
    ])
    .await;
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["agents"]["gmail"], "available");
    assert_eq!(body["agents"]["ski"], "unavailable");
    assert!(body["version"].as_str().unwrap().contains('.'));
}

#[tokio::test]
async fn test_health_503_when_no_agent_available() {
    let state = state_with(vec![MockAgent::new("gmail", &["email"], &["hi"], false)]).await;
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_agents_listing_preserves_registration_order() {
    let state = state_with(vec![
        MockAgent::new("gmail", &["email"], &["hi"], true),
        MockAgent::new("ski", &["ski"], &["hi"], true),
    ])
    .await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/agents")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let agents = body["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0]["name"], "gmail");
    assert_eq!(agents[1]["name"], "ski");
    assert_eq!(agents[0]["capabilities"][0]["keywords"][0], "email");
}

#[tokio::test]
async fn test_query_round_trip() {
    let state = state_with(vec![MockAgent::new(
        "gmail",
        &["email"],
        &["You have mail."],
        true,
    )])
    .await;
    let app = build_router(state);

    let response = app
        .oneshot(post("/api/v1/query", json!({"query": "check my email"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["agent_used"], "gmail");
    assert_eq!(body["response"], "You have mail.");
    assert!(!body["session_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_query_echoes_session_id() {
    let state = state_with(vec![MockAgent::new("gmail", &["email"], &["hi"], true)]).await;
    let app = build_router(state.clone());

    let first = body_json(
        app.clone()
            .oneshot(post("/api/v1/query", json!({"query": "check my email"})))
            .await
            .unwrap(),
    )
    .await;
    let sid = first["session_id"].as_str().unwrap().to_string();

    let second = body_json(
        app.oneshot(post(
            "/api/v1/query",
            json!({"query": "any email again", "session_id": sid}),
        ))
        .await
        .unwrap(),
    )
    .await;
    assert_eq!(second["session_id"].as_str().unwrap(), sid);
}

#[tokio::test]
async fn test_missing_query_is_400() {
    let state = state_with(vec![]).await;
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(post("/api/v1/query", json!({"session_id": "s"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post("/api/v1/query", json!({"query": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_direct_agent_endpoint() {
    let state = state_with(vec![MockAgent::new(
        "gmail",
        &["email"],
        &["direct result"],
        true,
    )])
    .await;
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(post("/api/v1/gmail/query", json!({"query": "anything"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["agent_used"], "gmail");
    assert_eq!(body["response"], "direct result");

    let response = app
        .oneshot(post("/api/v1/phantom/query", json!({"query": "anything"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_endpoint_frames_and_terminator() {
    let state = state_with(vec![MockAgent::new(
        "gmail",
        &["email"],
        &["A ", "B ", "C"],
        true,
    )])
    .await;
    let app = build_router(state);

    let response = app
        .oneshot(post(
            "/api/v1/query/stream",
            json!({"query": "check my email"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let frames: Vec<&str> = text
        .split("\n\n")
        .filter(|f| !f.is_empty())
        .collect();
    assert_eq!(frames.len(), 5);

    let payload = |frame: &str| -> Value {
        serde_json::from_str(frame.strip_prefix("data: ").unwrap()).unwrap()
    };
    assert_eq!(payload(frames[0])["text"], "Checking your email. ");
    assert_eq!(payload(frames[1])["text"], "A ");
    assert_eq!(payload(frames[2])["text"], "B ");
    assert_eq!(payload(frames[3])["text"], "C");
    assert_eq!(frames[4], "data: [DONE]");

    // Every data frame carries the session id.
    let sid = payload(frames[0])["session_id"].as_str().unwrap().to_string();
    assert!(!sid.is_empty());
    assert_eq!(payload(frames[3])["session_id"].as_str().unwrap(), sid);
}

#[tokio::test]
async fn test_stream_error_frame_suppresses_done() {
    struct BrokenAgent {
        capabilities: Vec<AgentCapability>,
    }

    #[async_trait]
    impl GatewayAgent for BrokenAgent {
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

    let broken: Arc<dyn GatewayAgent> = Arc::new(BrokenAgent {
        capabilities: vec![AgentCapability::new("main", "fails").with_keywords(["broken"])],
    });
    let state = state_with(vec![broken]).await;
    let app = build_router(state);

    let response = app
        .oneshot(post(
            "/api/v1/query/stream",
            json!({"query": "broken stream please"}),
        ))
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(!text.contains("[DONE]"));
    let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert_eq!(frames.len(), 2);
    let last: Value =
        serde_json::from_str(frames[1].strip_prefix("data: ").unwrap()).unwrap();
    assert_eq!(last["error"], "agent_failure");
}
