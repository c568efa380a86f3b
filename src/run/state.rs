use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Starting,
    Running,
    WaitingHitl,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Starting, RunStatus::Running)
                | (RunStatus::Starting, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Paused)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::WaitingHitl)
                | (RunStatus::WaitingHitl, RunStatus::Running)
                | (RunStatus::WaitingHitl, RunStatus::Failed)
                | (RunStatus::Paused, RunStatus::Running)
                | (RunStatus::Paused, RunStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Starting => write!(f, "starting"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::WaitingHitl => write!(f, "waiting_hitl"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thought,
    Tool,
    Message,
    Check,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Thought => write!(f, "thought"),
            StepKind::Tool => write!(f, "tool"),
            StepKind::Message => write!(f, "message"),
            StepKind::Check => write!(f, "check"),
        }
    }
}

/// One unit of planned work. Assigned once at run start, read-only after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub id: String,
    pub title: String,
    pub kind: StepKind,
    #[serde(default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub est_tokens: u64,
    #[serde(default)]
    pub est_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequest {
    pub id: String,
    pub created_at: i64,
    pub question: String,
    #[serde(default)]
    pub payload: Option<Value>,
    pub status: HitlStatus,
    #[serde(default)]
    pub resolved_at: Option<i64>,
    #[serde(default)]
    pub resolution_comment: Option<String>,
}

/// Mutable per-run state. The scheduler is the single writer, always through
/// `RunStore::update_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub id: String,
    pub status: RunStatus,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub progress_pct: u8,
    #[serde(default)]
    pub confidence_pct: u8,
    #[serde(default)]
    pub spent_usd: f64,
    #[serde(default)]
    pub spent_tokens: u64,
    #[serde(default)]
    pub tool_calls: BTreeMap<String, u64>,
    #[serde(default)]
    pub current_step_index: usize,
    #[serde(default)]
    pub planned_steps: Vec<PlannedStep>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub hitl_requests: Vec<HitlRequest>,
}

impl RunState {
    pub fn initial(id: impl Into<String>, now: i64) -> Self {
        Self {
            id: id.into(),
            status: RunStatus::Starting,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            progress_pct: 0,
            confidence_pct: 0,
            spent_usd: 0.0,
            spent_tokens: 0,
            tool_calls: BTreeMap::new(),
            current_step_index: 0,
            planned_steps: Vec::new(),
            last_message: None,
            hitl_requests: Vec::new(),
        }
    }

    pub fn pending_hitl(&self) -> Option<&HitlRequest> {
        self.hitl_requests
            .iter()
            .rev()
            .find(|request| request.status == HitlStatus::Pending)
    }
}

/// Partial update merged into `RunState` by the store. `None` fields leave the
/// current value untouched; `updated_at` is always refreshed by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatePatch {
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub progress_pct: Option<u8>,
    #[serde(default)]
    pub confidence_pct: Option<u8>,
    #[serde(default)]
    pub spent_usd: Option<f64>,
    #[serde(default)]
    pub spent_tokens: Option<u64>,
    #[serde(default)]
    pub tool_calls: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    pub current_step_index: Option<usize>,
    #[serde(default)]
    pub planned_steps: Option<Vec<PlannedStep>>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub hitl_requests: Option<Vec<HitlRequest>>,
}

impl RunStatePatch {
    pub fn apply(&self, state: &mut RunState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(started_at) = self.started_at {
            state.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            state.completed_at = Some(completed_at);
        }
        if let Some(progress_pct) = self.progress_pct {
            state.progress_pct = progress_pct;
        }
        if let Some(confidence_pct) = self.confidence_pct {
            state.confidence_pct = confidence_pct;
        }
        if let Some(spent_usd) = self.spent_usd {
            state.spent_usd = spent_usd;
        }
        if let Some(spent_tokens) = self.spent_tokens {
            state.spent_tokens = spent_tokens;
        }
        if let Some(tool_calls) = &self.tool_calls {
            state.tool_calls = tool_calls.clone();
        }
        if let Some(current_step_index) = self.current_step_index {
            state.current_step_index = current_step_index;
        }
        if let Some(planned_steps) = &self.planned_steps {
            state.planned_steps = planned_steps.clone();
        }
        if let Some(last_message) = &self.last_message {
            state.last_message = Some(last_message.clone());
        }
        if let Some(hitl_requests) = &self.hitl_requests {
            state.hitl_requests = hitl_requests.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
