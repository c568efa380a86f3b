use crate::policy::Policy;
use crate::run::state::PlannedStep;
use serde::{Deserialize, Serialize};

/// Reference to an externally stored credential. The core only ever sees and
/// persists the id and label; secret values live in the external secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRef {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContactPolicy {
    Never,
    #[default]
    HitlOnly,
    Always,
}

/// What to do when a HITL request outlives `hitl_timeout_sec`. The core
/// persists the choice; enforcement belongs to the approval surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HitlFallback {
    Approve,
    Reject,
    #[default]
    Wait,
}

/// Immutable description of one agent run. Written once at creation and only
/// ever read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub system_prompt: String,
    pub model: String,
    #[serde(default)]
    pub model_allow_list: Vec<String>,
    #[serde(default)]
    pub tool_allow_list: Vec<String>,
    #[serde(default)]
    pub credentials: Vec<CredentialRef>,
    #[serde(default)]
    pub budget_usd: f64,
    /// 0 = unlimited.
    #[serde(default)]
    pub token_budget: u64,
    /// 0 = unlimited.
    #[serde(default)]
    pub time_limit_sec: u64,
    #[serde(default)]
    pub contact_policy: ContactPolicy,
    #[serde(default)]
    pub hitl_timeout_sec: u64,
    #[serde(default)]
    pub hitl_fallback: HitlFallback,
    #[serde(default)]
    pub preset_id: Option<String>,
    /// Explicit plan supplied by the caller; wins over presets and generation.
    #[serde(default)]
    pub steps: Option<Vec<PlannedStep>>,
    /// Seed for the simulated step executor so runs replay deterministically.
    #[serde(default)]
    pub seed: Option<u64>,
    pub policy: Policy,
}

impl RunConfig {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            system_prompt: String::new(),
            model: model.into(),
            model_allow_list: Vec::new(),
            tool_allow_list: Vec::new(),
            credentials: Vec::new(),
            budget_usd: 0.0,
            token_budget: 0,
            time_limit_sec: 0,
            contact_policy: ContactPolicy::default(),
            hitl_timeout_sec: 0,
            hitl_fallback: HitlFallback::default(),
            preset_id: None,
            steps: None,
            seed: None,
            policy: Policy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let mut config = RunConfig::new("run-1", "summarize inbox", "gpt-4o-mini");
        config.budget_usd = 2.5;
        config.credentials.push(CredentialRef {
            id: "cred-1".to_string(),
            label: "mail token".to_string(),
        });
        let encoded = serde_json::to_string(&config).expect("encode");
        let decoded: RunConfig = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, config);
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let raw = r#"{"id":"run-1","goal":"g","model":"gpt-4o","policy":{}}"#;
        let config: RunConfig = serde_json::from_str(raw).expect("decode");
        assert_eq!(config.contact_policy, ContactPolicy::HitlOnly);
        assert_eq!(config.hitl_fallback, HitlFallback::Wait);
        assert_eq!(config.token_budget, 0);
        assert!(config.steps.is_none());
    }
}
