use crate::policy::PolicyConfigError;
use crate::run::{HitlStatus, RunStatus};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("run `{run_id}` cannot transition from `{from}` to `{to}`")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },
    #[error("hitl request `{hitl_id}` not found on run `{run_id}`")]
    UnknownHitlId { run_id: String, hitl_id: String },
    #[error("hitl request `{hitl_id}` is not pending (status {status:?})")]
    HitlNotPending {
        hitl_id: String,
        status: HitlStatus,
    },
    #[error("run id allocation failed: {0}")]
    RunIdAllocation(String),
    #[error("policy: {0}")]
    Policy(#[from] PolicyConfigError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}
