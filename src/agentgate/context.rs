//! Conversation state: turns, follow-up detection, and the session store.
//!
//! A [`ConversationContext`] records the turns of one named conversation and
//! exposes the heuristics the router needs (`last_agent`, follow-up
//! detection). The [`SessionStore`] maps session ids to contexts, mints ids
//! on demand, and enforces the session TTL. Contexts live behind a
//! per-session `tokio::sync::Mutex` so that concurrent requests against the
//! same session are serialized and turn order stays well defined.
//!
//! # Example
//!
//! ```rust
//! use agentgate::context::{ConversationContext, FollowUpDetector};
//! use std::sync::Arc;
//!
//! let detector = Arc::new(FollowUpDetector::default());
//! let mut ctx = ConversationContext::new("s-1", 10, detector);
//!
//! ctx.add_turn("check my email", "You have 3 unread messages.", "gmail");
//! assert_eq!(ctx.last_agent(), Some("gmail"));
//!
//! // Short pronoun-bearing queries continue with the previous agent.
//! assert_eq!(
//!     ctx.should_continue_with_agent("what about tomorrow?"),
//!     Some("gmail".to_string()),
//! );
//! assert_eq!(ctx.should_continue_with_agent("book a flight to Denver"), None);
//! ```

use crate::agentgate::classifier::contains_whole_word;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

/// One (query, response, agent) triple recorded in a session.
///
/// Turns are immutable and append-only; the timestamp is used only for
/// ordering and display.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    /// The original user text.
    pub query: String,
    /// The final response text returned for the turn.
    pub response: String,
    /// Name of the agent that produced the response (`"orchestrator"` for
    /// direct handling, `"fallback"` for the canned capability listing).
    pub agent_used: String,
    /// UTC timestamp recorded when the turn was appended.
    pub timestamp: DateTime<Utc>,
}

lazy_static::lazy_static! {
    static ref FOLLOW_UP_PHRASES: Vec<&'static str> = vec![
        "what about", "tell me more", "also", "and", "how about", "what else",
    ];
    static ref FOLLOW_UP_PRONOUNS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for p in ["it", "they", "them", "that", "this", "those", "these"] {
            s.insert(p);
        }
        s
    };
}

/// Word-count ceiling under which a pronoun marks a query as a follow-up.
const SHORT_QUERY_TOKENS: usize = 5;

/// Lexical follow-up detector.
///
/// The phrase and pronoun tables are data, not code: operators can tune them
/// via [`FollowUpDetector::new`]. The heuristic deliberately attempts no
/// semantic analysis — the router's LLM fallback is the escape hatch for
/// genuinely ambiguous phrasings.
#[derive(Debug, Clone)]
pub struct FollowUpDetector {
    phrases: Vec<String>,
    pronouns: HashSet<String>,
}

impl Default for FollowUpDetector {
    fn default() -> Self {
        FollowUpDetector {
            phrases: FOLLOW_UP_PHRASES.iter().map(|p| p.to_string()).collect(),
            pronouns: FOLLOW_UP_PRONOUNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl FollowUpDetector {
    /// Build a detector with custom phrase and pronoun tables.
    /// Entries are lowercased on the way in.
    pub fn new(phrases: Vec<String>, pronouns: Vec<String>) -> Self {
        FollowUpDetector {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
            pronouns: pronouns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Whether `query` reads as a continuation of the previous topic.
    ///
    /// The decision depends only on the lowercased query text:
    /// 1. any follow-up phrase present as a whole-word match, or
    /// 2. at most five whitespace tokens with at least one of them in the
    ///    pronoun set.
    pub fn is_follow_up(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return false;
        }

        if self.phrases.iter().any(|p| contains_whole_word(&q, p)) {
            return true;
        }

        let tokens: Vec<&str> = q.split_whitespace().collect();
        tokens.len() <= SHORT_QUERY_TOKENS
            && tokens
                .iter()
                .any(|t| self.pronouns.contains(t.trim_matches(|c: char| !c.is_alphanumeric())))
    }
}

/// Per-session turn history and last-agent pointer.
///
/// Invariants: turns are ordered by insertion and never reordered;
/// `last_agent` always equals the `agent_used` of the most recent turn when
/// the history is non-empty; histories are capped at `max_turns` by dropping
/// the oldest entries.
pub struct ConversationContext {
    session_id: String,
    turns: VecDeque<ConversationTurn>,
    last_agent: Option<String>,
    last_activity: Instant,
    max_turns: usize,
    detector: Arc<FollowUpDetector>,
}

impl ConversationContext {
    /// Create an empty context for `session_id`, keeping at most `max_turns`
    /// turns.
    pub fn new(
        session_id: impl Into<String>,
        max_turns: usize,
        detector: Arc<FollowUpDetector>,
    ) -> Self {
        ConversationContext {
            session_id: session_id.into(),
            turns: VecDeque::new(),
            last_agent: None,
            last_activity: Instant::now(),
            max_turns: max_turns.max(1),
            detector,
        }
    }

    /// The opaque session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The recorded turns, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Number of recorded turns.
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Name of the agent used on the most recent turn, if any.
    pub fn last_agent(&self) -> Option<&str> {
        self.last_agent.as_deref()
    }

    /// Append a turn, update `last_agent` and the activity timestamp, and
    /// drop the oldest turns past the configured cap.
    pub fn add_turn(
        &mut self,
        query: impl Into<String>,
        response: impl Into<String>,
        agent_used: impl Into<String>,
    ) {
        let agent_used = agent_used.into();
        self.turns.push_back(ConversationTurn {
            query: query.into(),
            response: response.into(),
            agent_used: agent_used.clone(),
            timestamp: Utc::now(),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
        self.last_agent = Some(agent_used);
        self.touch();
    }

    /// Render the last `n` turns as a readable summary, oldest first.
    ///
    /// Used by the router's LLM prompt and by clients inspecting context.
    pub fn get_recent_context(&self, n: usize) -> String {
        let skip = self.turns.len().saturating_sub(n);
        let mut out = String::new();
        for turn in self.turns.iter().skip(skip) {
            out.push_str(&format!(
                "User: {}\nAssistant ({}): {}\n",
                turn.query, turn.agent_used, turn.response
            ));
        }
        out
    }

    /// Return `Some(last_agent)` when the query reads as a follow-up and a
    /// previous agent exists; `None` otherwise.
    ///
    /// The result depends only on the lowercased query and `last_agent`, so
    /// it is deterministic for a fixed context state.
    pub fn should_continue_with_agent(&self, query: &str) -> Option<String> {
        let last = self.last_agent.as_ref()?;
        if self.detector.is_follow_up(query) {
            Some(last.clone())
        } else {
            None
        }
    }

    /// Refresh the TTL activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Whether the context has been idle longer than `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() >= ttl
    }
}

/// Handle to a stored context: the per-session mutex.
pub type SharedContext = Arc<Mutex<ConversationContext>>;

const SHARD_COUNT: usize = 16;

/// In-memory session store: session id → [`ConversationContext`].
///
/// Sharded to keep lock contention local; each shard guards a plain map and
/// each context sits behind its own mutex (acquired only on the dispatch
/// path). Entries are created on demand and evicted by TTL — expired
/// contexts are never returned, a fresh id is minted instead. Expiry is
/// checked opportunistically on access; [`SessionStore::sweep`] removes
/// expired entries eagerly.
pub struct SessionStore {
    shards: Vec<RwLock<HashMap<String, SharedContext>>>,
    ttl: Duration,
    max_turns: usize,
    detector: Arc<FollowUpDetector>,
}

impl SessionStore {
    /// Create a store with the given session TTL and per-session turn cap.
    pub fn new(ttl: Duration, max_turns: usize, detector: Arc<FollowUpDetector>) -> Self {
        SessionStore {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            ttl,
            max_turns,
            detector,
        }
    }

    fn shard_for(&self, session_id: &str) -> &RwLock<HashMap<String, SharedContext>> {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn mint_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Look up `session_id` or create a fresh context.
    ///
    /// When an id is given and the stored context has not expired, the same
    /// context is returned (and its TTL refreshed). An expired id behaves
    /// identically to no id: a new context under a freshly minted id.
    pub async fn get_or_create(&self, session_id: Option<&str>) -> (String, SharedContext) {
        if let Some(id) = session_id {
            let existing = {
                let shard = self.shard_for(id).read().await;
                shard.get(id).cloned()
            };
            if let Some(ctx) = existing {
                let expired = {
                    let mut guard = ctx.lock().await;
                    if guard.is_expired(self.ttl) {
                        true
                    } else {
                        guard.touch();
                        false
                    }
                };
                if !expired {
                    return (id.to_string(), ctx);
                }
                let mut shard = self.shard_for(id).write().await;
                shard.remove(id);
            }
        }

        let id = Self::mint_id();
        let ctx: SharedContext = Arc::new(Mutex::new(ConversationContext::new(
            id.clone(),
            self.max_turns,
            Arc::clone(&self.detector),
        )));
        let mut shard = self.shard_for(&id).write().await;
        shard.insert(id.clone(), Arc::clone(&ctx));
        (id, ctx)
    }

    /// Remove every expired context.
    ///
    /// Contexts whose mutex is currently held belong to in-flight requests
    /// and are left alone.
    pub async fn sweep(&self) {
        for shard in &self.shards {
            let mut shard = shard.write().await;
            shard.retain(|_, ctx| match ctx.try_lock() {
                Ok(guard) => !guard.is_expired(self.ttl),
                Err(_) => true,
            });
        }
    }

    /// Number of live (possibly expired-but-unswept) sessions.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().await.len();
        }
        total
    }
}
