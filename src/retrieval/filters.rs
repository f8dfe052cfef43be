//! Retrieval-time filters.

use crate::scope::IncludeProposed;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EvidenceStrictness {
    Low,
    Medium,
    High,
}

impl EvidenceStrictness {
    /// Minimum claim confidence admitted at this strictness level.
    pub fn confidence_threshold(&self) -> f64 {
        match self {
            EvidenceStrictness::Low => 0.0,
            EvidenceStrictness::Medium => 0.55,
            EvidenceStrictness::High => 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DetailLevel {
    Summary,
    Full,
}

impl DetailLevel {
    pub fn limits(&self) -> DetailLimits {
        match self {
            DetailLevel::Summary => DetailLimits {
                focus_entities: 5,
                claims: 5,
                claim_text_chars: 200,
                sources: 3,
                edges: 10,
            },
            DetailLevel::Full => DetailLimits {
                focus_entities: usize::MAX,
                claims: usize::MAX,
                claim_text_chars: usize::MAX,
                sources: usize::MAX,
                edges: usize::MAX,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetailLimits {
    pub focus_entities: usize,
    pub claims: usize,
    pub claim_text_chars: usize,
    pub sources: usize,
    pub edges: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalFilters {
    pub evidence_strictness: EvidenceStrictness,
    pub recency_days: Option<u32>,
    pub include_proposed_edges: IncludeProposed,
    pub detail_level: DetailLevel,
    pub max_concepts: usize,
}

impl Default for RetrievalFilters {
    fn default() -> Self {
        Self {
            evidence_strictness: EvidenceStrictness::Medium,
            recency_days: None,
            include_proposed_edges: IncludeProposed::Exclude,
            detail_level: DetailLevel::Summary,
            max_concepts: 20,
        }
    }
}

/// True if a claim with the given confidence, staleness, and publication
/// age passes `filters`.
pub fn claim_passes(
    filters: &RetrievalFilters,
    confidence: f64,
    is_stale: bool,
    published_at: Option<chrono::DateTime<chrono::Utc>>,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    if is_stale {
        return false;
    }
    if confidence < filters.evidence_strictness.confidence_threshold() {
        return false;
    }
    if let (Some(days), Some(published)) = (filters.recency_days, published_at) {
        let age = now.signed_duration_since(published);
        if age.num_days() > days as i64 {
            return false;
        }
    }
    true
}
