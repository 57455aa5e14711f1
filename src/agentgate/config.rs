//! Gateway configuration.
//!
//! Two TOML documents configure the system: [`GatewayConfig`] (models,
//! routing policy, per-agent settings, logging) and [`ApiConfig`] (HTTP
//! server surface). Every knob has a serde default so minimal documents
//! stay minimal; invalid values are fatal at load time.
//!
//! # Example
//!
//! ```rust
//! use agentgate::config::GatewayConfig;
//!
//! let config = GatewayConfig::from_toml_str(r#"
//!     [orchestrator]
//!     model = "gpt-4o-mini"
//!     router_model = "gpt-4o-mini"
//!     session_timeout_minutes = 30
//!     max_turns = 10
//!
//!     [routing]
//!     code_routing_threshold = 0.7
//!     llm_routing_enabled = false
//!
//!     [agents.gmail]
//!     priority = 10
//!     announcement = "Checking your email. "
//!
//!     [agents.gmail.rate_limit]
//!     max_events = 2
//!     window_seconds = 60
//! "#).unwrap();
//!
//! assert_eq!(config.orchestrator.max_turns, 10);
//! assert!(config.agents["gmail"].enabled);
//! ```

use crate::agentgate::error::GatewayError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Environment variable that overrides the API bind host.
pub const API_HOST_ENV: &str = "API_HOST";

fn default_true() -> bool {
    true
}

fn default_session_timeout_minutes() -> u64 {
    30
}

fn default_max_turns() -> usize {
    10
}

fn default_code_routing_threshold() -> f32 {
    0.7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout_seconds() -> u64 {
    180
}

fn default_agent_timeout_seconds() -> u64 {
    120
}

/// Model selection and session policy.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    /// Identifier for the direct-handling model.
    pub model: String,
    /// Identifier for the router fallback model.
    #[serde(default)]
    pub router_model: String,
    /// Session TTL in minutes. Must be positive.
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u64,
    /// Cap on stored turns per session. Must be positive.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

/// Routing policy knobs consumed by the intent router.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSettings {
    /// Minimum classifier score for code-based routing to win. In `[0, 1]`.
    #[serde(default = "default_code_routing_threshold")]
    pub code_routing_threshold: f32,
    /// Whether the LLM fallback step runs at all.
    #[serde(default)]
    pub llm_routing_enabled: bool,
    /// Whether the follow-up continuation rule runs at all.
    #[serde(default = "default_true")]
    pub follow_up_detection: bool,
    /// Agent to fall back to when no rule produced a target.
    #[serde(default)]
    pub default_agent: Option<String>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        RoutingSettings {
            code_routing_threshold: default_code_routing_threshold(),
            llm_routing_enabled: false,
            follow_up_detection: true,
            default_agent: None,
        }
    }
}

/// Per-agent rate-limit budget.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum admitted events per window.
    pub max_events: usize,
    /// Window length in seconds.
    pub window_seconds: u64,
}

/// Per-agent gateway-side settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Disabled agents are excluded from routing.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher priority agents come first in the classifier's stable order.
    #[serde(default)]
    pub priority: i32,
    /// Routing announcement spoken before the agent's stream starts.
    #[serde(default)]
    pub announcement: Option<String>,
    /// Optional sliding-window budget protecting this agent.
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentSettings {
            enabled: true,
            priority: 0,
            announcement: None,
            rate_limit: None,
        }
    }
}

/// Logging surface.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (`error` … `trace`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit one info line per routing decision.
    #[serde(default = "default_true")]
    pub log_routing_decisions: bool,
    /// Emit one debug line per agent response.
    #[serde(default)]
    pub log_agent_responses: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: default_log_level(),
            log_routing_decisions: true,
            log_agent_responses: false,
        }
    }
}

/// The orchestrator configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub routing: RoutingSettings,
    #[serde(default)]
    pub agents: HashMap<String, AgentSettings>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl GatewayConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(doc: &str) -> Result<Self, GatewayError> {
        let config: GatewayConfig = toml::from_str(doc)
            .map_err(|e| GatewayError::Config(format!("gateway config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let doc = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&doc)
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.orchestrator.model.trim().is_empty() {
            return Err(GatewayError::Config(
                "orchestrator.model must be set".to_string(),
            ));
        }
        if self.orchestrator.session_timeout_minutes == 0 {
            return Err(GatewayError::Config(
                "orchestrator.session_timeout_minutes must be positive".to_string(),
            ));
        }
        if self.orchestrator.max_turns == 0 {
            return Err(GatewayError::Config(
                "orchestrator.max_turns must be positive".to_string(),
            ));
        }
        let threshold = self.routing.code_routing_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(GatewayError::Config(format!(
                "routing.code_routing_threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        for (name, agent) in &self.agents {
            if let Some(limit) = &agent.rate_limit {
                if limit.window_seconds == 0 {
                    return Err(GatewayError::Config(format!(
                        "agents.{}.rate_limit.window_seconds must be positive",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Settings for `name`, falling back to the defaults for agents the
    /// document does not mention.
    pub fn agent_settings(&self, name: &str) -> AgentSettings {
        self.agents.get(name).cloned().unwrap_or_default()
    }
}

/// HTTP server surface settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Bind host; overridden by the `API_HOST` environment variable.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; `["*"]` allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub debug: bool,
    /// Deadline for buffered orchestrator queries, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            debug: false,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

/// Per-agent API-side settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiAgentSettings {
    /// Disabled agents 404 on the direct-bypass endpoint.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Deadline for direct queries to this agent, in seconds.
    #[serde(default = "default_agent_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for ApiAgentSettings {
    fn default() -> Self {
        ApiAgentSettings {
            enabled: true,
            timeout_seconds: default_agent_timeout_seconds(),
        }
    }
}

/// The API configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub agents: HashMap<String, ApiAgentSettings>,
}

impl ApiConfig {
    /// Parse a TOML document and apply environment overrides.
    pub fn from_toml_str(doc: &str) -> Result<Self, GatewayError> {
        let mut config: ApiConfig = toml::from_str(doc)
            .map_err(|e| GatewayError::Config(format!("api config: {}", e)))?;
        config.apply_env();
        Ok(config)
    }

    /// Load a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let doc = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&doc)
    }

    /// Apply recognized environment variables (currently `API_HOST`).
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var(API_HOST_ENV) {
            if !host.trim().is_empty() {
                self.server.host = host;
            }
        }
    }

    /// API settings for `name`, with defaults for unmentioned agents.
    pub fn agent_settings(&self, name: &str) -> ApiAgentSettings {
        self.agents.get(name).cloned().unwrap_or_default()
    }
}
