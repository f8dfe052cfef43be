//! Retrieval trace: every step appends a `RetrievalTraceStep`
//! for observability; long traces are truncated in summary mode.

use serde::{Deserialize, Serialize};

const SUMMARY_TRACE_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTraceStep {
    pub step: String,
    pub params: serde_json::Value,
    pub counts: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
    steps: Vec<RetrievalTraceStep>,
}

impl Trace {
    pub fn push(&mut self, step: impl Into<String>, params: serde_json::Value, counts: serde_json::Value) {
        self.steps.push(RetrievalTraceStep {
            step: step.into(),
            params,
            counts,
        });
    }

    /// Finalizes the trace: in summary mode, truncates anything past
    /// `SUMMARY_TRACE_LIMIT` steps with a terminal summary step.
    pub fn finish(mut self, summary_mode: bool) -> Vec<RetrievalTraceStep> {
        if summary_mode && self.steps.len() > SUMMARY_TRACE_LIMIT {
            let omitted = self.steps.len() - SUMMARY_TRACE_LIMIT;
            self.steps.truncate(SUMMARY_TRACE_LIMIT);
            self.steps.push(RetrievalTraceStep {
                step: "trace_truncated".to_string(),
                params: serde_json::json!({}),
                counts: serde_json::json!({"omitted_steps": omitted}),
            });
        }
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_trace_is_truncated_in_summary_mode() {
        let mut trace = Trace::default();
        for i in 0..15 {
            trace.push(format!("step{i}"), serde_json::json!({}), serde_json::json!({}));
        }
        let finished = trace.finish(true);
        assert_eq!(finished.len(), SUMMARY_TRACE_LIMIT + 1);
        assert_eq!(finished.last().unwrap().step, "trace_truncated");
    }

    #[test]
    fn full_mode_never_truncates() {
        let mut trace = Trace::default();
        for i in 0..15 {
            trace.push(format!("step{i}"), serde_json::json!({}), serde_json::json!({}));
        }
        let finished = trace.finish(false);
        assert_eq!(finished.len(), 15);
    }
}
