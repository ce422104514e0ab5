//! The workflow definition and execution-telemetry data model (§3).

use chrono::{DateTime, Utc};
use common::JsonValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A parsed workflow definition. Immutable once accepted — the conductor
/// never mutates a `Workflow` it is executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "startNode")]
    pub start_node: String,
    pub nodes: Vec<Node>,
}

impl Workflow {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "actionType")]
    pub action_type: String,
    #[serde(default)]
    pub parameters: HashMap<String, JsonValue>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(rename = "routePolicy", default)]
    pub route_policy: RoutePolicy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RoutePolicy {
    #[default]
    Parallel,
    FirstMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "targetNode")]
    pub target_node: String,
    #[serde(default)]
    pub when: EdgeWhen,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeWhen {
    #[default]
    Success,
    Failure,
    Always,
}

/// Status of a `WorkflowExecution` (§3 lifecycle).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses never transition further (§3, §4.7).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub workflow_request_id: String,
    pub status: ExecutionStatus,
    pub trigger_payload: JsonValue,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub correlation_id: Uuid,
    pub context_snapshot: Option<JsonValue>,
}

/// Per-node outcome of a handler invocation (§4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionStatus {
    Succeeded,
    Failed,
    RetriableFailure,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: Uuid,
    pub workflow_execution_id: Uuid,
    pub node_id: String,
    pub action_type: String,
    pub status: ActionStatus,
    pub attempt: u32,
    pub parameters: JsonValue,
    pub outputs: JsonValue,
    pub error: Option<ActionError>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ActionExecution {
    /// `retryCount` is derived, not stored, per §3's invariant `attempt − 1`.
    pub fn retry_count(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionError {
    pub message: String,
    pub detail: Option<JsonValue>,
}

/// Registration metadata for a connector-provided action (§6 admin surface).
/// Stored by the registry separately from the callable handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub connector_id: String,
    pub action_type: String,
    pub display_name: String,
    pub description: String,
    pub parameter_schema: Option<JsonValue>,
    pub output_schema: Option<JsonValue>,
    pub requires_auth: bool,
    pub is_enabled: bool,
}
