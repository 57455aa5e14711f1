//! HTTP/SSE endpoint layer.
//!
//! Translates HTTP requests into orchestrator calls and streams chunks back.
//! This is the only module that constructs HTTP status codes; everything
//! below it deals in [`GatewayError`] and [`AgentResponse`] values.
//!
//! # Endpoints
//!
//! - `GET  /health` — registry health probe plus the crate version.
//! - `GET  /api/v1/agents` — agent listing with capabilities.
//! - `POST /api/v1/query` — buffered query.
//! - `POST /api/v1/query/stream` — SSE stream of response chunks.
//! - `POST /api/v1/{agent}/query` — direct bypass of the router.
//!
//! # SSE framing
//!
//! Each chunk is emitted as `data: <JSON>\n\n` where the JSON carries at
//! least `text` and `session_id`. A normally completed stream is terminated
//! by `data: [DONE]\n\n`; a failed stream ends with an error frame instead,
//! so `[DONE]` is the last frame iff no error occurred.
//! `X-Accel-Buffering: no` suppresses proxy buffering so chunks flush as
//! they are produced.

use crate::agentgate::agent::{AgentCapability, AgentResponse, ChunkStream};
use crate::agentgate::config::ApiConfig;
use crate::agentgate::error::GatewayError;
use crate::agentgate::orchestrator::{Orchestrator, QueryOutcome, ORCHESTRATOR_AGENT};
use crate::agentgate::registry::AgentRegistry;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<AgentRegistry>,
    pub api: Arc<ApiConfig>,
}

#[derive(Deserialize)]
struct QueryRequest {
    query: Option<String>,
    session_id: Option<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    agent_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl QueryResponse {
    fn from_outcome(outcome: QueryOutcome) -> Self {
        Self::from_response(outcome.response, Some(outcome.session_id))
    }

    fn from_response(response: AgentResponse, session_id: Option<String>) -> Self {
        QueryResponse {
            response: response.content,
            success: response.success,
            session_id,
            agent_used: response.agent_name,
            error: response.error,
        }
    }

    fn timeout(session_id: Option<String>) -> Self {
        QueryResponse {
            response: "The request timed out. Please try again.".to_string(),
            success: false,
            session_id: Some(session_id.unwrap_or_else(|| Uuid::new_v4().to_string())),
            agent_used: ORCHESTRATOR_AGENT.to_string(),
            error: Some("timeout".to_string()),
        }
    }
}

#[derive(Serialize)]
struct AgentInfo {
    name: String,
    description: String,
    capabilities: Vec<AgentCapability>,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message})),
    )
        .into_response()
}

fn not_found(agent: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("unknown agent: {}", agent)})),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    let report = state.registry.health_check_all().await;
    let any_available = report.values().any(|healthy| *healthy);
    let all_available = !report.is_empty() && report.values().all(|healthy| *healthy);

    let agents: HashMap<&String, &str> = report
        .iter()
        .map(|(name, healthy)| (name, if *healthy { "available" } else { "unavailable" }))
        .collect();

    let body = json!({
        "status": if all_available { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "agents": agents,
    });

    let code = if any_available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

async fn list_agents(State(state): State<AppState>) -> Response {
    let mut agents = Vec::new();
    for agent in state.registry.agents().await {
        agents.push(AgentInfo {
            name: agent.name().to_string(),
            description: agent.description().to_string(),
            capabilities: agent.capabilities().to_vec(),
        });
    }
    Json(json!({ "agents": agents })).into_response()
}

async fn query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    let query = match &req.query {
        Some(q) if !q.trim().is_empty() => q.clone(),
        _ => return bad_request("missing or empty 'query'"),
    };

    let deadline = Duration::from_secs(state.api.server.request_timeout_seconds);
    match timeout(
        deadline,
        state.orchestrator.process(&query, req.session_id.as_deref()),
    )
    .await
    {
        Ok(Ok(outcome)) => Json(QueryResponse::from_outcome(outcome)).into_response(),
        Ok(Err(GatewayError::BadRequest(message))) => bad_request(&message),
        Ok(Err(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
        Err(_) => Json(QueryResponse::timeout(req.session_id)).into_response(),
    }
}

async fn query_stream(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    let query = match &req.query {
        Some(q) if !q.trim().is_empty() => q.clone(),
        _ => return bad_request("missing or empty 'query'"),
    };

    let outcome = match state
        .orchestrator
        .clone()
        .stream(&query, req.session_id.as_deref())
        .await
    {
        Ok(outcome) => outcome,
        Err(GatewayError::BadRequest(message)) => return bad_request(&message),
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    };

    // The deadline covers the time to first chunk; once bytes are on the
    // wire the stream runs to completion or client disconnect.
    let deadline = Duration::from_secs(state.api.server.request_timeout_seconds);
    let mut chunks = outcome.chunks;
    let first = match timeout(deadline, chunks.next()).await {
        Ok(first) => first,
        // Dropping `chunks` here closes the relay channel, which cancels the
        // in-flight agent work and skips the turn append.
        Err(_) => {
            return (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({"error": GatewayError::Timeout.kind()})),
            )
                .into_response()
        }
    };

    let frames = sse_frames(first, chunks, outcome.session_id);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", HeaderValue::from_static("no"))
        .body(Body::from_stream(frames))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

enum SseState {
    Streaming(ChunkStream, String),
    Finished,
}

/// Frame a chunk stream as SSE lines.
///
/// Data frames carry `{"text", "session_id"}`; a failure yields one error
/// frame (with an `error` kind field) and ends the stream without the
/// `[DONE]` terminator.
fn sse_frames(
    first: Option<Result<String, GatewayError>>,
    rest: ChunkStream,
    session_id: String,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let combined: ChunkStream = Box::pin(stream::iter(first).chain(rest));

    stream::unfold(SseState::Streaming(combined, session_id), |state| async move {
        match state {
            SseState::Streaming(mut chunks, session_id) => match chunks.next().await {
                Some(Ok(text)) => {
                    let frame = data_frame(&json!({
                        "text": text,
                        "session_id": session_id,
                    }));
                    Some((Ok(frame), SseState::Streaming(chunks, session_id)))
                }
                Some(Err(e)) => {
                    let frame = data_frame(&json!({
                        "text": e.to_string(),
                        "session_id": session_id,
                        "error": e.kind(),
                    }));
                    Some((Ok(frame), SseState::Finished))
                }
                None => Some((
                    Ok(Bytes::from_static(b"data: [DONE]\n\n")),
                    SseState::Finished,
                )),
            },
            SseState::Finished => None,
        }
    })
}

fn data_frame(payload: &serde_json::Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", payload))
}

async fn agent_query(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    Json(req): Json<QueryRequest>,
) -> Response {
    let query = match &req.query {
        Some(q) if !q.trim().is_empty() => q.clone(),
        _ => return bad_request("missing or empty 'query'"),
    };

    let settings = state.api.agent_settings(&agent);
    if !settings.enabled {
        return not_found(&agent);
    }

    let deadline = Duration::from_secs(settings.timeout_seconds);
    match timeout(deadline, state.orchestrator.process_direct(&agent, &query)).await {
        Ok(Ok(response)) => Json(QueryResponse::from_response(response, None)).into_response(),
        Ok(Err(GatewayError::UnknownAgent(name))) => not_found(&name),
        Ok(Err(GatewayError::BadRequest(message))) => bad_request(&message),
        Ok(Err(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
        Err(_) => Json(QueryResponse {
            response: "The request timed out. Please try again.".to_string(),
            success: false,
            session_id: None,
            agent_used: agent,
            error: Some("timeout".to_string()),
        })
        .into_response(),
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(list)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Build the gateway's axum router.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.api.server.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/query", post(query))
        .route("/api/v1/query/stream", post(query_stream))
        .route("/api/v1/{agent}/query", post(agent_query))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState) -> Result<(), GatewayError> {
    let addr = format!("{}:{}", state.api.server.host, state.api.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Config(format!("cannot bind {}: {}", addr, e)))?;

    if let Ok(local) = listener.local_addr() {
        log::info!("agentgate listening on {}", local);
    }

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| GatewayError::Config(format!("server error: {}", e)))
}
