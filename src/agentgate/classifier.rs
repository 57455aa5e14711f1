//! Deterministic keyword/pattern intent classifier.
//!
//! A pure function from query text to a ranked list of candidate agents.
//! This is the fast path of the hybrid router: it resolves the common case
//! without LLM latency or cost, and surfaces an ambiguity flag so the router
//! can decide whether to escalate.
//!
//! # Scoring
//!
//! The query is lowercased once. Per agent:
//! - each distinct keyword found as a whole-word match adds `0.2`, capped at `0.6`;
//! - each distinct regex pattern that matches (case-insensitive) adds `0.3`, capped at `0.6`;
//! - the total is capped at `1.0`.
//!
//! Ranking is descending by score with ties broken by the stable order in
//! which agents were added to the classifier.
//!
//! # Example
//!
//! ```rust
//! use agentgate::classifier::IntentClassifier;
//!
//! let mut classifier = IntentClassifier::new();
//! classifier
//!     .add_agent("gmail", vec!["email".into(), "inbox".into()], vec![r"unread\s+messages".into()])
//!     .unwrap();
//! classifier
//!     .add_agent("weather", vec!["forecast".into(), "snow".into()], vec![])
//!     .unwrap();
//!
//! let ranking = classifier.classify("check my email inbox");
//! assert_eq!(ranking[0].agent_name, "gmail");
//! assert!((ranking[0].score - 0.4).abs() < f32::EPSILON);
//! ```

use crate::agentgate::error::GatewayError;
use regex::{Regex, RegexBuilder};

const KEYWORD_WEIGHT: f32 = 0.2;
const PATTERN_WEIGHT: f32 = 0.3;
const CONTRIBUTION_CAP: f32 = 0.6;
const AMBIGUITY_MARGIN: f32 = 0.1;

/// One scored candidate in a classification ranking.
#[derive(Debug, Clone)]
pub struct IntentScore {
    /// Candidate agent name.
    pub agent_name: String,
    /// Combined keyword + pattern score in `[0, 1]`.
    pub score: f32,
    /// Which keywords and how many patterns matched.
    pub reasoning: String,
}

struct AgentMatcher {
    name: String,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

/// Ranked keyword/pattern classifier over the configured agents.
///
/// Construction-time regex failures are fatal configuration errors; the
/// classifier itself is pure, deterministic, and never suspends.
#[derive(Default)]
pub struct IntentClassifier {
    matchers: Vec<AgentMatcher>,
}

impl IntentClassifier {
    /// Create an empty classifier.
    pub fn new() -> Self {
        IntentClassifier { matchers: Vec::new() }
    }

    /// Add an agent's keyword and pattern tables.
    ///
    /// The insertion order is significant: it is the stable tie-break order
    /// of [`classify`](IntentClassifier::classify). Patterns compile
    /// case-insensitively; a pattern that fails to compile is a fatal
    /// [`GatewayError::Config`].
    pub fn add_agent(
        &mut self,
        name: impl Into<String>,
        keywords: Vec<String>,
        patterns: Vec<String>,
    ) -> Result<(), GatewayError> {
        let name = name.into();
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in &patterns {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    GatewayError::Config(format!(
                        "invalid routing pattern '{}' for agent '{}': {}",
                        pattern, name, e
                    ))
                })?;
            compiled.push(regex);
        }
        self.matchers.push(AgentMatcher {
            name,
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            patterns: compiled,
        });
        Ok(())
    }

    /// Number of configured agents.
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Whether no agents are configured.
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Rank the configured agents against `query`.
    ///
    /// Agents that match nothing are omitted, so a query with no keyword or
    /// pattern hits anywhere (or an empty query) yields an empty ranking.
    pub fn classify(&self, query: &str) -> Vec<IntentScore> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }

        let mut ranking: Vec<IntentScore> = Vec::new();
        for matcher in &self.matchers {
            let hits: Vec<&str> = matcher
                .keywords
                .iter()
                .filter(|k| contains_whole_word(&q, k))
                .map(|k| k.as_str())
                .collect();
            let keyword_score =
                (hits.len() as f32 * KEYWORD_WEIGHT).min(CONTRIBUTION_CAP);

            let pattern_hits = matcher.patterns.iter().filter(|p| p.is_match(&q)).count();
            let pattern_score =
                (pattern_hits as f32 * PATTERN_WEIGHT).min(CONTRIBUTION_CAP);

            let score = (keyword_score + pattern_score).min(1.0);
            if score > 0.0 {
                ranking.push(IntentScore {
                    agent_name: matcher.name.clone(),
                    score,
                    reasoning: format!(
                        "keywords: [{}]; patterns matched: {}",
                        hits.join(", "),
                        pattern_hits
                    ),
                });
            }
        }

        // Stable sort keeps insertion order across equal scores.
        ranking.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranking
    }

    /// Whether a ranking is too close to call: best and second-best within
    /// 0.1 of each other and both positive.
    pub fn is_ambiguous(ranking: &[IntentScore]) -> bool {
        match (ranking.first(), ranking.get(1)) {
            (Some(best), Some(second)) => {
                best.score > 0.0
                    && second.score > 0.0
                    && (best.score - second.score) < AMBIGUITY_MARGIN
            }
            _ => false,
        }
    }
}

/// Whole-word containment check on lowercased text.
///
/// `needle` may span several words ("what about"); the match only requires
/// that its boundaries do not fall inside alphanumeric runs, so "sand" does
/// not contain "and" while "fish and chips" does.
pub(crate) fn contains_whole_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    for (idx, _) in haystack.match_indices(needle) {
        let before_ok = idx == 0
            || !haystack[..idx]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let end = idx + needle.len();
        let after_ok = end == haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        let mut c = IntentClassifier::new();
        c.add_agent(
            "gmail",
            vec!["email".into(), "inbox".into(), "mail".into(), "unread".into()],
            vec![r"check\s+my\s+(e-?mail|inbox)".into()],
        )
        .unwrap();
        c.add_agent(
            "ski",
            vec!["ski".into(), "snow".into(), "slopes".into()],
            vec![],
        )
        .unwrap();
        c
    }

    #[test]
    fn test_keyword_scoring_and_cap() {
        let c = classifier();
        // "email" + "inbox" keywords (0.4) + one pattern (0.3).
        let ranking = c.classify("check my email inbox");
        assert_eq!(ranking[0].agent_name, "gmail");
        assert!((ranking[0].score - 0.7).abs() < 1e-6);

        // Four keywords would be 0.8 raw but the contribution is capped at 0.6.
        let ranking = c.classify("unread mail in my email inbox");
        assert!((ranking[0].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_whole_word_matching() {
        let c = classifier();
        // "skiing" must not count as a whole-word hit for "ski".
        assert!(c.classify("I love skiing holidays").is_empty());
        assert_eq!(c.classify("how is the ski report")[0].agent_name, "ski");
    }

    #[test]
    fn test_empty_and_unmatched_queries() {
        let c = classifier();
        assert!(c.classify("").is_empty());
        assert!(c.classify("   ").is_empty());
        assert!(c.classify("completely unrelated request").is_empty());
    }

    #[test]
    fn test_ambiguity_flag() {
        let c = classifier();
        let ranking = c.classify("email and snow");
        assert_eq!(ranking.len(), 2);
        assert!(IntentClassifier::is_ambiguous(&ranking));

        let clear = c.classify("check my email inbox");
        assert!(!IntentClassifier::is_ambiguous(&clear));
    }

    #[test]
    fn test_stable_tie_order() {
        let c = classifier();
        let ranking = c.classify("email and snow");
        // Equal scores: gmail was inserted first and must stay first.
        assert_eq!(ranking[0].agent_name, "gmail");
        assert_eq!(ranking[1].agent_name, "ski");
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let first = c.classify("check my email inbox and the snow");
        let second = c.classify("check my email inbox and the snow");
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.agent_name, b.agent_name);
            assert_eq!(a.score, b.score);
        }
        // Scores are in range and descending.
        for pair in first.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for entry in &first {
            assert!((0.0..=1.0).contains(&entry.score));
        }
    }

    #[test]
    fn test_invalid_pattern_is_fatal() {
        let mut c = IntentClassifier::new();
        let err = c.add_agent("broken", vec![], vec!["(unclosed".into()]);
        assert!(matches!(err, Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_contains_whole_word() {
        assert!(contains_whole_word("fish and chips", "and"));
        assert!(!contains_whole_word("sandwich", "and"));
        assert!(contains_whole_word("what about tomorrow", "what about"));
        assert!(!contains_whole_word("whatabout tomorrow", "what about"));
        assert!(contains_whole_word("and then", "and"));
        assert!(contains_whole_word("so, and.", "and"));
    }
}
