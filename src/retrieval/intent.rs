//! Intent classification: cheap deterministic rules first,
//! optional LLM fallback when they're inconclusive.

use crate::collaborators::LlmCollaborator;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Intent {
    ConceptLookup,
    SemanticSearch,
    TickerQuery,
    CommunitySummary,
    EvidenceForClaim,
    CrossGraph,
    General,
}

impl Intent {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "concept_lookup" => Intent::ConceptLookup,
            "semantic_search" => Intent::SemanticSearch,
            "ticker_query" => Intent::TickerQuery,
            "community_summary" => Intent::CommunitySummary,
            "evidence_for_claim" => Intent::EvidenceForClaim,
            "cross_graph" => Intent::CrossGraph,
            "general" => Intent::General,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::ConceptLookup => "concept_lookup",
            Intent::SemanticSearch => "semantic_search",
            Intent::TickerQuery => "ticker_query",
            Intent::CommunitySummary => "community_summary",
            Intent::EvidenceForClaim => "evidence_for_claim",
            Intent::CrossGraph => "cross_graph",
            Intent::General => "general",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
    pub reasoning: String,
}

fn ticker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{1,5}: ").unwrap())
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").unwrap())
}

/// Classifies `message`: cheap rules first (ticker prefix, known concept
/// names, URLs), falling back to the LLM collaborator only when none of
/// them fire.
pub async fn classify_intent(
    message: &str,
    known_concept_names: &[String],
    llm: &dyn LlmCollaborator,
) -> IntentClassification {
    if ticker_re().is_match(message) {
        return IntentClassification {
            intent: Intent::TickerQuery,
            confidence: 0.95,
            reasoning: "matched ticker-prefix pattern".to_string(),
        };
    }
    if url_re().is_match(message) {
        return IntentClassification {
            intent: Intent::EvidenceForClaim,
            confidence: 0.7,
            reasoning: "message contains a URL".to_string(),
        };
    }
    let lowered = message.to_lowercase();
    if known_concept_names.iter().any(|name| lowered.contains(&name.to_lowercase())) {
        return IntentClassification {
            intent: Intent::ConceptLookup,
            confidence: 0.85,
            reasoning: "message mentions a known concept name".to_string(),
        };
    }
    if lowered.contains("summary") || lowered.contains("summarize") {
        return IntentClassification {
            intent: Intent::CommunitySummary,
            confidence: 0.6,
            reasoning: "message asks for a summary".to_string(),
        };
    }

    match llm.classify_intent(message).await.and_then(|s| Intent::parse(&s)) {
        Some(intent) => IntentClassification {
            intent,
            confidence: 0.5,
            reasoning: "llm fallback".to_string(),
        },
        None => IntentClassification {
            intent: Intent::SemanticSearch,
            confidence: 0.3,
            reasoning: "no rule matched, defaulting to semantic search".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullLlmCollaborator;

    #[tokio::test]
    async fn ticker_prefix_is_recognized() {
        let c = classify_intent("AAPL: what's the latest 10-K say", &[], &NullLlmCollaborator).await;
        assert_eq!(c.intent, Intent::TickerQuery);
    }

    #[tokio::test]
    async fn known_concept_name_triggers_concept_lookup() {
        let names = vec!["Acme Corp".to_string()];
        let c = classify_intent("tell me about Acme Corp", &names, &NullLlmCollaborator).await;
        assert_eq!(c.intent, Intent::ConceptLookup);
    }

    #[tokio::test]
    async fn unmatched_message_defaults_to_semantic_search() {
        let c = classify_intent("what is the meaning of life", &[], &NullLlmCollaborator).await;
        assert_eq!(c.intent, Intent::SemanticSearch);
    }
}
