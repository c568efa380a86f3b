pub mod config;
pub mod state;

pub use config::{ContactPolicy, CredentialRef, HitlFallback, RunConfig};
pub use state::{
    HitlRequest, HitlStatus, PlannedStep, RunState, RunStatePatch, RunStatus, StepKind,
};
