pub mod enforcer;
pub mod pii;

pub use enforcer::{PolicyEnforcer, PolicyViolation, ViolationKind};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PiiHandling {
    #[default]
    Mask,
    Deny,
    Allow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    #[default]
    Pause,
    Stop,
}

impl std::fmt::Display for Escalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Escalation::Pause => write!(f, "pause"),
            Escalation::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("maxConcurrentTools must be at least 1, got {0}")]
    MaxConcurrentTools(u32),
    #[error("rateLimitPerMin must be at least 1, got {0}")]
    RateLimitPerMin(u32),
}

/// Guardrail configuration for one run. Immutable once the run is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: u32,
    #[serde(default = "default_rate_limit_per_min")]
    pub rate_limit_per_min: u32,
    #[serde(default)]
    pub forbidden_actions: BTreeSet<String>,
    /// Granted data-access scopes; `*` grants everything.
    #[serde(default = "default_data_access_scopes")]
    pub data_access_scopes: BTreeSet<String>,
    #[serde(default)]
    pub pii_handling: PiiHandling,
    #[serde(default)]
    pub escalation_on_violation: Escalation,
}

fn default_max_concurrent_tools() -> u32 {
    2
}

fn default_rate_limit_per_min() -> u32 {
    30
}

fn default_data_access_scopes() -> BTreeSet<String> {
    BTreeSet::from([WILDCARD_SCOPE.to_string()])
}

pub const WILDCARD_SCOPE: &str = "*";

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_concurrent_tools: default_max_concurrent_tools(),
            rate_limit_per_min: default_rate_limit_per_min(),
            forbidden_actions: BTreeSet::new(),
            data_access_scopes: default_data_access_scopes(),
            pii_handling: PiiHandling::default(),
            escalation_on_violation: Escalation::default(),
        }
    }
}

impl Policy {
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if self.max_concurrent_tools < 1 {
            return Err(PolicyConfigError::MaxConcurrentTools(
                self.max_concurrent_tools,
            ));
        }
        if self.rate_limit_per_min < 1 {
            return Err(PolicyConfigError::RateLimitPerMin(self.rate_limit_per_min));
        }
        Ok(())
    }

    pub fn grants_scope(&self, scope: &str) -> bool {
        self.data_access_scopes.contains(WILDCARD_SCOPE) || self.data_access_scopes.contains(scope)
    }
}
