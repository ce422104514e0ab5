use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `Orchestration.RetryPolicy.*` from the configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    #[serde(with = "crate::time")]
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub use_jitter: bool,
    #[serde(with = "crate::time")]
    pub max_delay: Duration,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: env_or("ORCHESTRATION_RETRY_MAX_ATTEMPTS", 3),
            initial_delay: Duration::from_millis(env_or(
                "ORCHESTRATION_RETRY_INITIAL_DELAY_MS",
                200,
            )),
            backoff_factor: env_or("ORCHESTRATION_RETRY_BACKOFF_FACTOR", 2.0),
            use_jitter: env_or("ORCHESTRATION_RETRY_USE_JITTER", true),
            max_delay: Duration::from_secs(env_or("ORCHESTRATION_RETRY_MAX_DELAY_SECS", 60)),
        }
    }
}

/// `Orchestration.*` from the configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub max_parallel_actions: usize,
    #[serde(with = "crate::time")]
    pub default_action_timeout: Duration,
    #[serde(with = "crate::time")]
    pub default_workflow_timeout: Duration,
    pub retry: RetryPolicyConfig,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_parallel_actions: env_or("ORCHESTRATION_MAX_PARALLEL_ACTIONS", 10),
            default_action_timeout: Duration::from_secs(env_or(
                "ORCHESTRATION_DEFAULT_ACTION_TIMEOUT_SECS",
                5 * 60,
            )),
            default_workflow_timeout: Duration::from_secs(env_or(
                "ORCHESTRATION_DEFAULT_WORKFLOW_TIMEOUT_SECS",
                60 * 60,
            )),
            retry: RetryPolicyConfig::default(),
        }
    }
}

/// `WorkflowCatalog.*` from the configuration table.
///
/// `allow_draft_execution` is parsed but intentionally never consulted by
/// the conductor — the source never defined an enforcement point for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub auto_register_actions_on_startup: bool,
    pub validate_action_schemas_on_startup: bool,
    pub allow_draft_execution: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            auto_register_actions_on_startup: env_or(
                "WORKFLOW_CATALOG_AUTO_REGISTER_ACTIONS_ON_STARTUP",
                false,
            ),
            validate_action_schemas_on_startup: env_or(
                "WORKFLOW_CATALOG_VALIDATE_ACTION_SCHEMAS_ON_STARTUP",
                false,
            ),
            allow_draft_execution: env_or("WORKFLOW_CATALOG_ALLOW_DRAFT_EXECUTION", false),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
