//! Run the gateway with two LLM-backed specialists.
//!
//! ```bash
//! export OPEN_AI_SECRET=sk-...
//! cargo run --example gateway_server
//!
//! curl -s localhost:8000/api/v1/query \
//!     -H 'content-type: application/json' \
//!     -d '{"query": "check my email"}' | jq
//!
//! curl -N localhost:8000/api/v1/query/stream \
//!     -H 'content-type: application/json' \
//!     -d '{"query": "how are the slopes today?"}'
//! ```

use agentgate::agent::{AgentCapability, LlmAgent};
use agentgate::clients::openai::OpenAiCompatClient;
use agentgate::config::{ApiConfig, GatewayConfig};
use agentgate::orchestrator::Orchestrator;
use agentgate::registry::AgentRegistry;
use agentgate::server::{serve, AppState};
use std::sync::Arc;

const GATEWAY_CONFIG: &str = r#"
    [orchestrator]
    model = "gpt-4o-mini"
    router_model = "gpt-4o-mini"
    session_timeout_minutes = 30
    max_turns = 10

    [routing]
    code_routing_threshold = 0.4
    llm_routing_enabled = true

    [agents.gmail]
    priority = 10
    announcement = "Checking your email. "

    [agents.gmail.rate_limit]
    max_events = 10
    window_seconds = 60

    [agents.ski]
    announcement = "Looking at the mountain. "
"#;

const API_CONFIG: &str = r#"
    [server]
    host = "127.0.0.1"
    port = 8000
    cors_origins = ["*"]
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let gateway_config = load_gateway_config()?;
    agentgate::init_logger_with_level(&gateway_config.logging.level);
    let api_config = ApiConfig::from_toml_str(API_CONFIG)?;

    let secret = std::env::var("OPEN_AI_SECRET")?;
    let model = &gateway_config.orchestrator.model;
    let llm = Arc::new(OpenAiCompatClient::new(&secret, model));
    let router_llm = Arc::new(OpenAiCompatClient::new(
        &secret,
        &gateway_config.orchestrator.router_model,
    ));

    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(Arc::new(
            LlmAgent::new(
                "gmail",
                "Reads and summarizes the user's mailbox",
                Arc::new(OpenAiCompatClient::new(&secret, model)),
            )
            .with_system_prompt(
                "You are an email assistant. Pretend to check the user's mailbox and \
                 answer concisely.",
            )
            .with_capability(
                AgentCapability::new("email_search", "Find and summarize messages")
                    .with_keywords(["email", "inbox", "mail", "unread", "message"])
                    .with_example("do I have unread email?")
                    .with_example("check my inbox"),
            ),
        ))
        .await?;
    registry
        .register(Arc::new(
            LlmAgent::new(
                "ski",
                "Reports snow and slope conditions",
                Arc::new(OpenAiCompatClient::new(&secret, model)),
            )
            .with_capability(
                AgentCapability::new("conditions", "Snow reports and lift status")
                    .with_keywords(["ski", "snow", "slopes", "powder", "lift"])
                    .with_example("how is the snow at Alta?"),
            ),
        ))
        .await?;

    let orchestrator = Arc::new(
        Orchestrator::new(
            &gateway_config,
            Arc::clone(&registry),
            llm,
            Some(router_llm),
        )
        .await?,
    );

    serve(AppState {
        orchestrator,
        registry,
        api: Arc::new(api_config),
    })
    .await?;
    Ok(())
}

/// Use `gateway.toml` from the working directory when present, the inline
/// document otherwise.
fn load_gateway_config() -> Result<GatewayConfig, agentgate::GatewayError> {
    if std::path::Path::new("gateway.toml").exists() {
        GatewayConfig::load("gateway.toml")
    } else {
        GatewayConfig::from_toml_str(GATEWAY_CONFIG)
    }
}
