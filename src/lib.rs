// src/lib.rs

// Import the top-level `agentgate` module.
pub mod agentgate;

// Re-exporting key items for easier external access.
pub use agentgate::agent::{AgentCapability, AgentResponse, ChunkStream, GatewayAgent, LlmAgent};
pub use agentgate::classifier::{IntentClassifier, IntentScore};
pub use agentgate::client_wrapper::{LlmClient, Message, MessageChunk, Role};
pub use agentgate::config::{ApiConfig, GatewayConfig};
pub use agentgate::context::{ConversationContext, ConversationTurn, FollowUpDetector, SessionStore};
pub use agentgate::error::GatewayError;
pub use agentgate::orchestrator::{Orchestrator, QueryOutcome, StreamOutcome};
pub use agentgate::rate_limiter::RateLimiter;
pub use agentgate::registry::AgentRegistry;
pub use agentgate::router::{IntentRouter, RoutingDecision};
pub use agentgate::server::{build_router, serve, AppState};

// Convenience re-export of the module paths used in doc examples.
pub use agentgate::agent;
pub use agentgate::classifier;
pub use agentgate::client_wrapper;
pub use agentgate::clients;
pub use agentgate::config;
pub use agentgate::context;
pub use agentgate::error;
pub use agentgate::orchestrator;
pub use agentgate::rate_limiter;
pub use agentgate::registry;
pub use agentgate::router;
pub use agentgate::server;

/// Initialise `env_logger` once, defaulting to `info` when `RUST_LOG` is not
/// set. Safe to call from every test.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(false)
        .try_init();
}

/// Initialise `env_logger` with an explicit level filter, typically
/// `logging.level` from [`GatewayConfig`].
pub fn init_logger_with_level(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}
