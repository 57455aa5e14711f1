//! Hybrid intent router.
//!
//! Produces the final [`RoutingDecision`] for a query by evaluating four
//! rules in a fixed order, short-circuiting on the first that yields a
//! decision:
//!
//! 1. **Follow-up continuation** — cheap, preserves context.
//! 2. **Direct handling** — greetings and thanks never need an agent.
//! 3. **Code-based classification** — resolves the common case without LLM
//!    latency or cost.
//! 4. **LLM fallback** — the escape hatch for genuinely ambiguous or novel
//!    phrasings.
//!
//! Each rule is a method returning `Option<RoutingDecision>`, which keeps
//! the precedence explicit and each rule testable in isolation.

use crate::agentgate::classifier::IntentClassifier;
use crate::agentgate::client_wrapper::{LlmClient, Message, Role};
use crate::agentgate::config::RoutingSettings;
use crate::agentgate::context::ConversationContext;
use crate::agentgate::registry::AgentRegistry;
use std::collections::HashSet;
use std::sync::Arc;

/// Confidence reported for follow-up continuations.
const FOLLOW_UP_CONFIDENCE: f32 = 0.9;

/// How many recent turns the LLM fallback prompt includes.
const FALLBACK_CONTEXT_TURNS: usize = 3;

lazy_static::lazy_static! {
    static ref GREETINGS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for g in [
            "hello", "hi", "hey", "good morning", "good afternoon",
            "good evening", "thanks", "thank you", "thx", "great", "ok", "okay",
        ] {
            s.insert(g);
        }
        s
    };
}

/// The tuple the router produces to tell the orchestrator where to send a
/// query.
///
/// Exactly one of the following holds: `handle_directly` is `true`,
/// `agent_name` names a registered agent, or `agent_name` is absent
/// (fallback). `confidence` reflects the router's certainty, not the
/// agent's.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Target agent, when one was chosen.
    pub agent_name: Option<String>,
    /// Router certainty in `[0, 1]`.
    pub confidence: f32,
    /// Why this decision was made.
    pub reasoning: String,
    /// Whether the orchestrator should answer the query itself.
    pub handle_directly: bool,
}

impl RoutingDecision {
    /// Route to a named agent.
    pub fn to_agent(name: impl Into<String>, confidence: f32, reasoning: impl Into<String>) -> Self {
        RoutingDecision {
            agent_name: Some(name.into()),
            confidence,
            reasoning: reasoning.into(),
            handle_directly: false,
        }
    }

    /// Let the orchestrator answer directly.
    pub fn direct(confidence: f32, reasoning: impl Into<String>) -> Self {
        RoutingDecision {
            agent_name: None,
            confidence,
            reasoning: reasoning.into(),
            handle_directly: true,
        }
    }

    /// No usable target: fall back to the capability listing.
    pub fn fallback(reasoning: impl Into<String>) -> Self {
        RoutingDecision {
            agent_name: None,
            confidence: 0.0,
            reasoning: reasoning.into(),
            handle_directly: false,
        }
    }
}

/// Combines the classifier, follow-up detection, and the optional LLM
/// fallback into a routing decision.
pub struct IntentRouter {
    classifier: IntentClassifier,
    registry: Arc<AgentRegistry>,
    settings: RoutingSettings,
    llm: Option<Arc<dyn LlmClient>>,
    greetings: HashSet<String>,
}

impl IntentRouter {
    /// Create a router over the given classifier and registry.
    ///
    /// `llm` is the router fallback model; pass `None` to disable LLM
    /// routing regardless of `settings.llm_routing_enabled`.
    pub fn new(
        classifier: IntentClassifier,
        registry: Arc<AgentRegistry>,
        settings: RoutingSettings,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        IntentRouter {
            classifier,
            registry,
            settings,
            llm,
            greetings: GREETINGS.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// Extend the greeting/thanks lexicon. Entries stay purely lexical.
    pub fn with_greetings<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.greetings
            .extend(extra.into_iter().map(|g| g.as_ref().to_lowercase()));
        self
    }

    /// Produce the routing decision for `query`.
    pub async fn route(
        &self,
        query: &str,
        context: Option<&ConversationContext>,
    ) -> RoutingDecision {
        if let Some(decision) = self.rule_follow_up(query, context).await {
            return decision;
        }
        if let Some(decision) = self.rule_direct(query) {
            return decision;
        }
        if let Some(decision) = self.rule_classifier(query) {
            return decision;
        }
        if let Some(decision) = self.rule_llm_fallback(query, context).await {
            return decision;
        }
        self.default_or_fallback("no routing rule matched")
    }

    /// Rule 1: continue with the previous agent on follow-up queries.
    async fn rule_follow_up(
        &self,
        query: &str,
        context: Option<&ConversationContext>,
    ) -> Option<RoutingDecision> {
        if !self.settings.follow_up_detection {
            return None;
        }
        let agent = context?.should_continue_with_agent(query)?;
        if !self.registry.contains(&agent).await {
            return None;
        }
        Some(RoutingDecision::to_agent(
            agent,
            FOLLOW_UP_CONFIDENCE,
            "follow-up continuation",
        ))
    }

    /// Rule 2: pure greetings and thanks are handled directly.
    ///
    /// Matches the lexicon as a whole utterance, or as a prefix followed by
    /// punctuation only ("thanks!!", "hello."). Purely lexical on purpose.
    fn rule_direct(&self, query: &str) -> Option<RoutingDecision> {
        let q = query.trim().to_lowercase();
        let is_greeting = self.greetings.iter().any(|g| {
            if q == *g {
                return true;
            }
            match q.strip_prefix(g.as_str()) {
                Some(rest) => {
                    !rest.is_empty()
                        && rest
                            .chars()
                            .all(|c| c.is_ascii_punctuation() || c.is_whitespace())
                }
                None => false,
            }
        });
        if is_greeting {
            Some(RoutingDecision::direct(1.0, "greeting/thanks"))
        } else {
            None
        }
    }

    /// Rule 3: keyword/pattern classification above the threshold.
    fn rule_classifier(&self, query: &str) -> Option<RoutingDecision> {
        let ranking = self.classifier.classify(query);
        let top = ranking.first()?;
        if top.score >= self.settings.code_routing_threshold
            && !IntentClassifier::is_ambiguous(&ranking)
        {
            Some(RoutingDecision::to_agent(
                top.agent_name.clone(),
                top.score,
                format!("matched keywords/patterns ({})", top.reasoning),
            ))
        } else {
            None
        }
    }

    /// Rule 4: ask the router model to pick a target.
    async fn rule_llm_fallback(
        &self,
        query: &str,
        context: Option<&ConversationContext>,
    ) -> Option<RoutingDecision> {
        if !self.settings.llm_routing_enabled {
            return None;
        }
        let llm = self.llm.as_ref()?;

        let prompt = self.build_fallback_prompt(query, context).await;
        let messages = [
            Message::new(
                Role::System,
                "You route user queries to specialist agents. Reply with exactly three \
                 lines: AGENT=<name|none|direct>, CONFIDENCE=<0..1>, REASONING=<text>.",
            ),
            Message::new(Role::User, prompt),
        ];

        let reply = match llm.send_message(&messages).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("router model call failed: {}", e);
                return Some(self.default_or_fallback("router model unavailable"));
            }
        };

        match parse_fallback_reply(&reply.content) {
            Some(parsed) => Some(self.validate_fallback(parsed).await),
            None => Some(self.default_or_fallback("router model reply was unparseable")),
        }
    }

    async fn build_fallback_prompt(
        &self,
        query: &str,
        context: Option<&ConversationContext>,
    ) -> String {
        let mut prompt = format!("Query: {}\n", query);

        if let Some(ctx) = context {
            let recent = ctx.get_recent_context(FALLBACK_CONTEXT_TURNS);
            if !recent.is_empty() {
                prompt.push_str("\nRecent conversation:\n");
                prompt.push_str(&recent);
            }
        }

        prompt.push_str("\nAvailable agents:\n");
        for agent in self.registry.agents().await {
            prompt.push_str(&format!("- {}: {}\n", agent.name(), agent.description()));
            for capability in agent.capabilities() {
                prompt.push_str(&format!(
                    "    {} — {}",
                    capability.name, capability.description
                ));
                if !capability.examples.is_empty() {
                    prompt.push_str(&format!(" (e.g. {})", capability.examples.join("; ")));
                }
                prompt.push('\n');
            }
        }
        prompt.push_str(
            "\nAnswer 'direct' for small talk the orchestrator should handle itself and \
             'none' when no agent fits.\n",
        );
        prompt
    }

    async fn validate_fallback(&self, parsed: FallbackReply) -> RoutingDecision {
        match parsed.agent.as_str() {
            "direct" => RoutingDecision::direct(parsed.confidence, parsed.reasoning),
            "none" => RoutingDecision::fallback(parsed.reasoning),
            name => {
                if self.registry.contains(name).await {
                    RoutingDecision::to_agent(name, parsed.confidence, parsed.reasoning)
                } else {
                    self.default_or_fallback(format!(
                        "router model chose unregistered agent '{}'",
                        name
                    ))
                }
            }
        }
    }

    fn default_or_fallback(&self, reasoning: impl Into<String>) -> RoutingDecision {
        match &self.settings.default_agent {
            Some(agent) => RoutingDecision::to_agent(
                agent.clone(),
                0.0,
                format!("{} (default agent)", reasoning.into()),
            ),
            None => RoutingDecision::fallback(reasoning),
        }
    }
}

struct FallbackReply {
    agent: String,
    confidence: f32,
    reasoning: String,
}

/// Parse `AGENT=` / `CONFIDENCE=` / `REASONING=` lines out of a router-model
/// reply. Returns `None` when no `AGENT=` line is present.
fn parse_fallback_reply(text: &str) -> Option<FallbackReply> {
    let mut agent = None;
    let mut confidence = 0.5;
    let mut reasoning = String::from("router model decision");

    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("AGENT=") {
            agent = Some(value.trim().to_lowercase());
        } else if let Some(value) = line.strip_prefix("CONFIDENCE=") {
            if let Ok(parsed) = value.trim().parse::<f32>() {
                confidence = parsed.clamp(0.0, 1.0);
            }
        } else if let Some(value) = line.strip_prefix("REASONING=") {
            let value = value.trim();
            if !value.is_empty() {
                reasoning = value.to_string();
            }
        }
    }

    agent.map(|agent| FallbackReply {
        agent,
        confidence,
        reasoning,
    })
}
