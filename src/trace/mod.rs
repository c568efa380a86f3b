use crate::policy::PolicyViolation;
use crate::run::PlannedStep;
use crate::shared::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One structured occurrence in a run's append-only audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub timestamp_ms: i64,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Builds span events for one run. Span ids are `{run_id}-{counter}`; the
/// counter is seeded from wall-clock millis so ids from a resumed run sort
/// after ids from before the pause.
#[derive(Debug)]
pub struct TraceRecorder {
    run_id: String,
    counter: AtomicU64,
}

impl TraceRecorder {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            counter: AtomicU64::new(now_millis().max(0) as u64),
        }
    }

    fn next_span_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", self.run_id)
    }

    pub fn event(&self, name: impl Into<String>, attributes: BTreeMap<String, Value>) -> TraceEvent {
        TraceEvent {
            timestamp_ms: now_millis(),
            span_id: self.next_span_id(),
            parent_span_id: None,
            name: name.into(),
            attributes,
            duration_ms: None,
        }
    }

    pub fn step_event(&self, step: &PlannedStep, index: usize) -> TraceEvent {
        self.event(
            "agent.step",
            BTreeMap::from([
                ("stepId".to_string(), json!(step.id)),
                ("title".to_string(), json!(step.title)),
                ("kind".to_string(), json!(step.kind.to_string())),
                ("index".to_string(), json!(index)),
            ]),
        )
    }

    pub fn tool_event(&self, tool_id: &str, parent: &TraceEvent, duration_ms: u64) -> TraceEvent {
        let mut event = self.event(
            "agent.tool_call",
            BTreeMap::from([("toolId".to_string(), json!(tool_id))]),
        );
        event.parent_span_id = Some(parent.span_id.clone());
        event.duration_ms = Some(duration_ms);
        event
    }

    pub fn violation_event(&self, violation: &PolicyViolation) -> TraceEvent {
        self.event(
            "agent.policy_violation",
            BTreeMap::from([
                ("kind".to_string(), json!(violation.kind)),
                ("action".to_string(), json!(violation.action)),
                ("details".to_string(), json!(violation.details)),
                ("escalation".to_string(), json!(violation.escalation)),
            ]),
        )
    }

    pub fn hitl_event(&self, hitl_id: &str, question: &str) -> TraceEvent {
        self.event(
            "agent.hitl_request",
            BTreeMap::from([
                ("hitlId".to_string(), json!(hitl_id)),
                ("question".to_string(), json!(question)),
            ]),
        )
    }

    pub fn tick_event(
        &self,
        index: usize,
        progress_pct: u8,
        spent_usd: f64,
        spent_tokens: u64,
    ) -> TraceEvent {
        self.event(
            "agent.tick",
            BTreeMap::from([
                ("index".to_string(), json!(index)),
                ("progressPct".to_string(), json!(progress_pct)),
                ("spentUsd".to_string(), json!(spent_usd)),
                ("spentTokens".to_string(), json!(spent_tokens)),
            ]),
        )
    }

    pub fn error_event(&self, message: &str) -> TraceEvent {
        self.event(
            "agent.error",
            BTreeMap::from([("message".to_string(), json!(message))]),
        )
    }

    pub fn lifecycle_event(&self, name: impl Into<String>, detail: &str) -> TraceEvent {
        self.event(
            name,
            BTreeMap::from([("detail".to_string(), json!(detail))]),
        )
    }
}
