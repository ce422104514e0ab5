//! Execution context (C5, §3): the thread-safe per-run store of
//! completed-node outputs, generalized from the teacher stack's
//! `ConcurrentExecutionContext` (an `Arc<RwLock<HashMap<..>>>` wrapper
//! around a plain `ExecutionContext`) to the `trigger`/`vars`/`steps` shape
//! the template engine renders against.

use common::JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owned exclusively by the conductor for one execution (§3 Ownership);
/// handlers and the template engine only ever see a cloned snapshot.
#[derive(Clone)]
pub struct ExecutionContext {
    trigger: JsonValue,
    vars: JsonValue,
    steps: Arc<RwLock<HashMap<String, JsonValue>>>,
}

impl ExecutionContext {
    pub fn new(trigger: JsonValue, vars: JsonValue) -> Self {
        Self {
            trigger,
            vars,
            steps: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish a completed node's outputs under `steps.<node_id>.outputs`
    /// (§4.7 ready-set algorithm, step 1).
    pub async fn publish_outputs(&self, node_id: &str, outputs: JsonValue) {
        let mut steps = self.steps.write().await;
        steps.insert(node_id.to_string(), outputs);
    }

    /// A deep-cloned snapshot suitable for handing to the template engine
    /// or an edge condition evaluator — concurrent sibling completions
    /// cannot mutate it mid-render (§9 Design Notes).
    pub async fn snapshot(&self) -> JsonValue {
        let steps = self.steps.read().await;
        let steps_obj: serde_json::Map<String, JsonValue> = steps
            .iter()
            .map(|(node_id, outputs)| {
                (
                    node_id.clone(),
                    serde_json::json!({ "outputs": outputs.clone() }),
                )
            })
            .collect();

        serde_json::json!({
            "trigger": self.trigger.clone(),
            "vars": self.vars.clone(),
            "steps": JsonValue::Object(steps_obj),
        })
    }

    /// The `contextSnapshot` persisted onto the terminal `WorkflowExecution`
    /// row (§3, §4.7 State machine).
    pub async fn final_snapshot(&self) -> JsonValue {
        self.snapshot().await
    }
}
