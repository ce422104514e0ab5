//! Telemetry persistence (C6, §4.6): the repository seam the conductor
//! writes execution and action records through, plus an in-memory binding
//! used as the test fixture in place of a live Postgres instance (§8
//! ambient test tooling). `telemetry-postgres` provides the production
//! `sqlx`-backed binding behind the same trait.

use crate::error::PersistenceError;
use crate::model::{ActionExecution, ExecutionStatus, WorkflowExecution};
use async_trait::async_trait;
use common::JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of an idempotent create (§4.8): tells the caller whether this
/// call won the race to create the row, or whether a prior call (possibly
/// a concurrent one) already owns this `(workflowId, requestId)`.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created,
    AlreadyExists(WorkflowExecution),
}

#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    /// Inserts the execution unless `(workflowId, requestId)` already has
    /// one, atomically with respect to concurrent callers (§8 "concurrent
    /// submits with the same key produce exactly one execution record").
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
    ) -> Result<CreateOutcome, PersistenceError>;

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        end_time: Option<chrono::DateTime<chrono::Utc>>,
        context_snapshot: Option<JsonValue>,
    ) -> Result<(), PersistenceError>;

    async fn append_action(&self, action: ActionExecution) -> Result<(), PersistenceError>;

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, PersistenceError>;

    async fn list_actions(&self, execution_id: Uuid) -> Result<Vec<ActionExecution>, PersistenceError>;

    /// Supports submit-time idempotency on `(workflowId, requestId)` (§4.8).
    async fn find_by_request_id(
        &self,
        workflow_id: &str,
        request_id: &str,
    ) -> Result<Option<WorkflowExecution>, PersistenceError>;
}

#[derive(Default)]
struct Store {
    executions: HashMap<Uuid, WorkflowExecution>,
    actions: HashMap<Uuid, Vec<ActionExecution>>,
    request_ids: HashMap<(String, String), Uuid>,
}

/// `HashMap` + `RwLock` fixture, mirroring the teacher's in-memory
/// `audit-service` test double used in place of its `PgPool` binding.
#[derive(Clone, Default)]
pub struct InMemoryTelemetryRepository {
    store: Arc<RwLock<Store>>,
}

impl InMemoryTelemetryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryRepository for InMemoryTelemetryRepository {
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
    ) -> Result<CreateOutcome, PersistenceError> {
        let mut store = self.store.write().await;
        let key = (execution.workflow_id.clone(), execution.workflow_request_id.clone());
        if let Some(existing_id) = store.request_ids.get(&key) {
            let existing = store
                .executions
                .get(existing_id)
                .cloned()
                .expect("request_ids only points at rows present in executions");
            return Ok(CreateOutcome::AlreadyExists(existing));
        }
        store.request_ids.insert(key, execution.id);
        store.executions.insert(execution.id, execution);
        Ok(CreateOutcome::Created)
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        end_time: Option<chrono::DateTime<chrono::Utc>>,
        context_snapshot: Option<JsonValue>,
    ) -> Result<(), PersistenceError> {
        let mut store = self.store.write().await;
        let execution = store
            .executions
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;

        if execution.status.is_terminal() {
            return Err(PersistenceError::NonMonotonicTransition {
                from: execution.status,
                to: status,
            });
        }

        execution.status = status;
        execution.end_time = end_time;
        if context_snapshot.is_some() {
            execution.context_snapshot = context_snapshot;
        }
        Ok(())
    }

    async fn append_action(&self, action: ActionExecution) -> Result<(), PersistenceError> {
        let mut store = self.store.write().await;
        store
            .actions
            .entry(action.workflow_execution_id)
            .or_default()
            .push(action);
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, PersistenceError> {
        let store = self.store.read().await;
        store
            .executions
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::NotFound(id))
    }

    async fn list_actions(&self, execution_id: Uuid) -> Result<Vec<ActionExecution>, PersistenceError> {
        let store = self.store.read().await;
        Ok(store.actions.get(&execution_id).cloned().unwrap_or_default())
    }

    async fn find_by_request_id(
        &self,
        workflow_id: &str,
        request_id: &str,
    ) -> Result<Option<WorkflowExecution>, PersistenceError> {
        let store = self.store.read().await;
        let key = (workflow_id.to_string(), request_id.to_string());
        Ok(store
            .request_ids
            .get(&key)
            .and_then(|id| store.executions.get(id).cloned()))
    }
}
