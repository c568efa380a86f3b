use crate::run::{HitlStatus, RunConfig, RunState, RunStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetrics {
    pub steps_total: usize,
    pub steps_executed: usize,
    pub tool_calls: u64,
    pub hitl_requests: usize,
    pub spent_usd: f64,
    pub spent_tokens: u64,
    pub confidence_pct: u8,
}

/// Final summary written once at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub run_id: String,
    pub status: RunStatus,
    pub summary: String,
    pub metrics: ReportMetrics,
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

pub fn build_report(config: &RunConfig, state: &RunState, artifacts: &[String]) -> Report {
    let steps_total = state.planned_steps.len();
    let steps_executed = state.current_step_index.min(steps_total);
    let tool_calls: u64 = state.tool_calls.values().sum();
    let resolved_hitl = state
        .hitl_requests
        .iter()
        .filter(|request| request.status != HitlStatus::Pending)
        .count();

    let summary = match state.status {
        RunStatus::Completed => format!(
            "completed {steps_executed}/{steps_total} steps toward `{}`",
            config.goal
        ),
        RunStatus::Failed => format!(
            "stopped after {steps_executed}/{steps_total} steps toward `{}`{}",
            config.goal,
            state
                .last_message
                .as_deref()
                .map(|message| format!(": {message}"))
                .unwrap_or_default()
        ),
        other => format!(
            "run is {other} at step {steps_executed}/{steps_total} toward `{}`",
            config.goal
        ),
    };

    let mut learnings = Vec::new();
    if config.budget_usd > 0.0 {
        learnings.push(format!(
            "used {:.0}% of the ${:.2} budget",
            (state.spent_usd / config.budget_usd * 100.0).min(999.0),
            config.budget_usd
        ));
    }
    if !state.hitl_requests.is_empty() {
        learnings.push(format!(
            "{} human approval(s) requested, {resolved_hitl} resolved",
            state.hitl_requests.len()
        ));
    }
    if tool_calls > 0 {
        learnings.push(format!(
            "{tool_calls} tool call(s) across {} tool(s)",
            state.tool_calls.len()
        ));
    }

    Report {
        run_id: state.id.clone(),
        status: state.status,
        summary,
        metrics: ReportMetrics {
            steps_total,
            steps_executed,
            tool_calls,
            hitl_requests: state.hitl_requests.len(),
            spent_usd: state.spent_usd,
            spent_tokens: state.spent_tokens,
            confidence_pct: state.confidence_pct,
        },
        learnings,
        artifacts: artifacts.to_vec(),
    }
}
