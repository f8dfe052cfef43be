//! The visibility predicate: one WHERE-fragment builder every
//! read in `entities` goes through, so the graph/branch/merge/status
//! clauses never drift out of sync between call sites.

use crate::ids::{BranchId, GraphId};

const AUTO_PROPOSED_THRESHOLD: f64 = 0.6;

/// How a relationship read should treat `PROPOSED` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeProposed {
    /// Only `ACCEPTED` relationships.
    Exclude,
    /// `ACCEPTED`, plus `PROPOSED` ones at or above the confidence threshold.
    Auto,
    /// Every status.
    Include,
}

/// Builds the `WHERE` fragment + bound parameters for a given
/// `(graph_id, branch_id)` scope. Fragments are ANDed with whatever
/// entity-specific predicate the caller already has.
pub struct VisibilityFilter {
    graph_id: GraphId,
    branch_id: BranchId,
}

impl VisibilityFilter {
    pub fn new(graph_id: GraphId, branch_id: BranchId) -> Self {
        Self {
            graph_id,
            branch_id,
        }
    }

    /// Graph match, branch containment, and live (non-merged) filter, for
    /// tables with a `graph_id`, `on_branches_json`, and `is_merged` column
    /// (Concepts).
    pub fn concepts_clause(&self, alias: &str) -> (String, Vec<String>) {
        let clause = format!(
            "{alias}.graph_id = ? \
             AND EXISTS (SELECT 1 FROM json_each({alias}.on_branches_json) je WHERE je.value = ?) \
             AND coalesce({alias}.is_merged, 0) = 0"
        );
        (
            clause,
            vec![self.graph_id.as_str().to_string(), self.branch_id.as_str().to_string()],
        )
    }

    /// Clauses 1-2 only, for branch-scoped tables without an `is_merged`
    /// column (Artifacts accessed via links, Relationships before the
    /// status clause below, etc).
    pub fn scoped_clause(&self, alias: &str) -> (String, Vec<String>) {
        let clause = format!(
            "{alias}.graph_id = ? \
             AND EXISTS (SELECT 1 FROM json_each({alias}.on_branches_json) je WHERE je.value = ?)"
        );
        (
            clause,
            vec![self.graph_id.as_str().to_string(), self.branch_id.as_str().to_string()],
        )
    }

    /// Graph match, branch containment, and status gating, for Relationships.
    pub fn relationships_clause(
        &self,
        alias: &str,
        include_proposed: IncludeProposed,
    ) -> (String, Vec<String>) {
        let (mut clause, mut params) = self.scoped_clause(alias);
        match include_proposed {
            IncludeProposed::Include => {}
            IncludeProposed::Exclude => {
                clause.push_str(&format!(" AND coalesce({alias}.status, 'ACCEPTED') = 'ACCEPTED'"));
            }
            IncludeProposed::Auto => {
                clause.push_str(&format!(
                    " AND (coalesce({alias}.status, 'ACCEPTED') = 'ACCEPTED' \
                       OR (coalesce({alias}.status, 'ACCEPTED') = 'PROPOSED' AND {alias}.confidence >= ?))"
                ));
                params.push(AUTO_PROPOSED_THRESHOLD.to_string());
            }
        }
        (clause, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concepts_clause_includes_graph_branch_and_merge_checks() {
        let filter = VisibilityFilter::new(GraphId::from_string("G1"), BranchId::from_string("main"));
        let (clause, params) = filter.concepts_clause("c");
        assert!(clause.contains("c.graph_id = ?"));
        assert!(clause.contains("json_each(c.on_branches_json)"));
        assert!(clause.contains("c.is_merged"));
        assert_eq!(params, vec!["G1".to_string(), "main".to_string()]);
    }

    #[test]
    fn relationships_clause_auto_mode_adds_confidence_threshold() {
        let filter = VisibilityFilter::new(GraphId::from_string("G1"), BranchId::from_string("main"));
        let (clause, params) = filter.relationships_clause("r", IncludeProposed::Auto);
        assert!(clause.contains("r.confidence >= ?"));
        assert_eq!(params.last().unwrap(), "0.6");
    }

    #[test]
    fn relationships_clause_exclude_mode_pins_accepted_only() {
        let filter = VisibilityFilter::new(GraphId::from_string("G1"), BranchId::from_string("main"));
        let (clause, _params) = filter.relationships_clause("r", IncludeProposed::Exclude);
        assert!(clause.contains("= 'ACCEPTED'"));
        assert!(!clause.contains("PROPOSED"));
    }
}
