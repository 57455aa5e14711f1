//! Error types shared across the gateway.
//!
//! Every fallible operation in the crate returns [`GatewayError`]. The
//! endpoint layer is the only place where these variants are mapped onto
//! HTTP status codes; everything below it propagates the enum with `?`.

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Errors produced by the gateway core.
///
/// The variants mirror the error kinds surfaced on the wire: a
/// [`BadRequest`](GatewayError::BadRequest) becomes HTTP 400, an
/// [`UnknownAgent`](GatewayError::UnknownAgent) becomes HTTP 404, while
/// application-level failures (rate limiting, agent failures) are carried
/// inside a successful HTTP response with `success=false`. A routing
/// pipeline that finds no target is not an error at all — it degrades to a
/// fallback decision.
///
/// # Examples
///
/// ```
/// use agentgate::GatewayError;
///
/// let err = GatewayError::UnknownAgent("gmail".into());
/// assert_eq!(err.to_string(), "Unknown agent: gmail");
/// assert_eq!(err.kind(), "unknown_agent");
/// ```
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Malformed payload or missing required field.
    BadRequest(String),

    /// A direct-bypass request named an agent that is not registered.
    UnknownAgent(String),

    /// The sliding-window rate limiter denied the request. `retry_after`
    /// is the window length for the denied key, i.e. the worst-case wait.
    RateLimited { agent: String, retry_after: Duration },

    /// A specialist agent returned a failure or panicked mid-call.
    AgentFailure { agent: String, message: String },

    /// A request deadline expired before a response (or first chunk) was
    /// produced.
    Timeout,

    /// The client went away; the request was torn down silently.
    Cancelled,

    /// The upstream LLM call failed (transport, protocol, or API error).
    Llm(String),

    /// Invalid configuration detected at startup. Always fatal.
    Config(String),
}

impl GatewayError {
    /// Short machine-readable kind string used in wire responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::UnknownAgent(_) => "unknown_agent",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::AgentFailure { .. } => "agent_failure",
            GatewayError::Timeout => "timeout",
            GatewayError::Cancelled => "cancelled",
            GatewayError::Llm(_) => "llm_error",
            GatewayError::Config(_) => "config_error",
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            GatewayError::UnknownAgent(name) => write!(f, "Unknown agent: {}", name),
            GatewayError::RateLimited { agent, retry_after } => write!(
                f,
                "Rate limited: agent '{}' (retry within {}s)",
                agent,
                retry_after.as_secs()
            ),
            GatewayError::AgentFailure { agent, message } => {
                write!(f, "Agent '{}' failed: {}", agent, message)
            }
            GatewayError::Timeout => write!(f, "Request timed out"),
            GatewayError::Cancelled => write!(f, "Request cancelled by client"),
            GatewayError::Llm(msg) => write!(f, "LLM call failed: {}", msg),
            GatewayError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl Error for GatewayError {}
