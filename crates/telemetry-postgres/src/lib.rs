//! Postgres binding for [`workflow_engine::TelemetryRepository`] (C6,
//! §4.6, §6), grounded on the teacher's `audit-service::storage::AuditStorage`
//! — a thin `sqlx::PgPool` wrapper that binds struct fields positionally and
//! maps driver errors to a local error type rather than leaking `sqlx::Error`.
//!
//! Tables follow §6's persistent state layout: `workflow_executions` keyed
//! uniquely on `(workflow_id, workflow_request_id)` for submit-time
//! idempotency, `action_executions` indexed on `(workflow_execution_id,
//! node_id)` with one row per node per execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use workflow_engine::{
    ActionError, ActionExecution, ActionStatus, CreateOutcome, ExecutionStatus, PersistenceError,
    TelemetryRepository, WorkflowExecution,
};

pub struct PostgresTelemetryRepository {
    pool: PgPool,
}

impl PostgresTelemetryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the schema this binding expects. Call once at startup — the
    /// core conductor never runs migrations itself (§1 Out of scope).
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_executions (
    id UUID PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    workflow_version INT NOT NULL,
    workflow_request_id TEXT NOT NULL,
    status TEXT NOT NULL,
    trigger_payload JSONB NOT NULL,
    start_time TIMESTAMPTZ NOT NULL,
    end_time TIMESTAMPTZ,
    correlation_id UUID NOT NULL,
    context_snapshot JSONB,
    UNIQUE (workflow_id, workflow_request_id)
);

CREATE TABLE IF NOT EXISTS action_executions (
    id UUID PRIMARY KEY,
    workflow_execution_id UUID NOT NULL REFERENCES workflow_executions(id),
    node_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    status TEXT NOT NULL,
    attempt INT NOT NULL,
    parameters JSONB NOT NULL,
    outputs JSONB NOT NULL,
    error JSONB,
    start_time TIMESTAMPTZ NOT NULL,
    end_time TIMESTAMPTZ,
    UNIQUE (workflow_execution_id, node_id)
);
"#;

#[async_trait]
impl TelemetryRepository for PostgresTelemetryRepository {
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
    ) -> Result<CreateOutcome, PersistenceError> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO workflow_executions (
                id, workflow_id, workflow_version, workflow_request_id, status,
                trigger_payload, start_time, end_time, correlation_id, context_snapshot
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (workflow_id, workflow_request_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.workflow_version as i32)
        .bind(&execution.workflow_request_id)
        .bind(status_to_text(execution.status))
        .bind(&execution.trigger_payload)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(execution.correlation_id)
        .bind(&execution.context_snapshot)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        if inserted.is_some() {
            return Ok(CreateOutcome::Created);
        }

        // Lost the unique-constraint race: another caller's insert won.
        // `workflow_id`/`workflow_request_id` are unique together, so this
        // lookup is guaranteed to find the row that beat us.
        let existing = self
            .find_by_request_id(&execution.workflow_id, &execution.workflow_request_id)
            .await?
            .expect("ON CONFLICT DO NOTHING implies a pre-existing row for this key");
        Ok(CreateOutcome::AlreadyExists(existing))
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        end_time: Option<DateTime<Utc>>,
        context_snapshot: Option<serde_json::Value>,
    ) -> Result<(), PersistenceError> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM workflow_executions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;

        let Some(current) = current else {
            return Err(PersistenceError::NotFound(id));
        };
        let current_status = text_to_status(&current);
        if current_status.is_terminal() {
            return Err(PersistenceError::NonMonotonicTransition {
                from: current_status,
                to: status,
            });
        }

        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2,
                end_time = COALESCE($3, end_time),
                context_snapshot = COALESCE($4, context_snapshot)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status_to_text(status))
        .bind(end_time)
        .bind(&context_snapshot)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn append_action(&self, action: ActionExecution) -> Result<(), PersistenceError> {
        let error_json = action
            .error
            .as_ref()
            .map(|e| serde_json::json!({"message": e.message, "detail": e.detail}));

        sqlx::query(
            r#"
            INSERT INTO action_executions (
                id, workflow_execution_id, node_id, action_type, status, attempt,
                parameters, outputs, error, start_time, end_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (workflow_execution_id, node_id) DO UPDATE SET
                status = EXCLUDED.status,
                attempt = EXCLUDED.attempt,
                parameters = EXCLUDED.parameters,
                outputs = EXCLUDED.outputs,
                error = EXCLUDED.error,
                end_time = EXCLUDED.end_time
            "#,
        )
        .bind(action.id)
        .bind(action.workflow_execution_id)
        .bind(&action.node_id)
        .bind(&action.action_type)
        .bind(action_status_to_text(action.status))
        .bind(action.attempt as i32)
        .bind(&action.parameters)
        .bind(&action.outputs)
        .bind(&error_json)
        .bind(action.start_time)
        .bind(action.end_time)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, PersistenceError> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            "SELECT * FROM workflow_executions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        row.map(Into::into).ok_or(PersistenceError::NotFound(id))
    }

    async fn list_actions(&self, execution_id: Uuid) -> Result<Vec<ActionExecution>, PersistenceError> {
        let rows = sqlx::query_as::<_, ActionRow>(
            "SELECT * FROM action_executions WHERE workflow_execution_id = $1 ORDER BY start_time",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_by_request_id(
        &self,
        workflow_id: &str,
        request_id: &str,
    ) -> Result<Option<WorkflowExecution>, PersistenceError> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            "SELECT * FROM workflow_executions WHERE workflow_id = $1 AND workflow_request_id = $2",
        )
        .bind(workflow_id)
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(row.map(Into::into))
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: String,
    workflow_version: i32,
    workflow_request_id: String,
    status: String,
    trigger_payload: serde_json::Value,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    correlation_id: Uuid,
    context_snapshot: Option<serde_json::Value>,
}

impl From<ExecutionRow> for WorkflowExecution {
    fn from(row: ExecutionRow) -> Self {
        WorkflowExecution {
            id: row.id,
            workflow_id: row.workflow_id,
            workflow_version: row.workflow_version as u32,
            workflow_request_id: row.workflow_request_id,
            status: text_to_status(&row.status),
            trigger_payload: row.trigger_payload,
            start_time: row.start_time,
            end_time: row.end_time,
            correlation_id: row.correlation_id,
            context_snapshot: row.context_snapshot,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: Uuid,
    workflow_execution_id: Uuid,
    node_id: String,
    action_type: String,
    status: String,
    attempt: i32,
    parameters: serde_json::Value,
    outputs: serde_json::Value,
    error: Option<serde_json::Value>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl From<ActionRow> for ActionExecution {
    fn from(row: ActionRow) -> Self {
        ActionExecution {
            id: row.id,
            workflow_execution_id: row.workflow_execution_id,
            node_id: row.node_id,
            action_type: row.action_type,
            status: text_to_action_status(&row.status),
            attempt: row.attempt as u32,
            parameters: row.parameters,
            outputs: row.outputs,
            error: row.error.map(|v| ActionError {
                message: v
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
                detail: v.get("detail").cloned(),
            }),
            start_time: row.start_time,
            end_time: row.end_time,
        }
    }
}

fn status_to_text(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "Pending",
        ExecutionStatus::Running => "Running",
        ExecutionStatus::Succeeded => "Succeeded",
        ExecutionStatus::Failed => "Failed",
        ExecutionStatus::Cancelled => "Cancelled",
    }
}

fn text_to_status(text: &str) -> ExecutionStatus {
    match text {
        "Pending" => ExecutionStatus::Pending,
        "Running" => ExecutionStatus::Running,
        "Succeeded" => ExecutionStatus::Succeeded,
        "Failed" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Cancelled,
    }
}

fn action_status_to_text(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Succeeded => "Succeeded",
        ActionStatus::Failed => "Failed",
        ActionStatus::RetriableFailure => "RetriableFailure",
        ActionStatus::Skipped => "Skipped",
    }
}

fn text_to_action_status(text: &str) -> ActionStatus {
    match text {
        "Succeeded" => ActionStatus::Succeeded,
        "RetriableFailure" => ActionStatus::RetriableFailure,
        "Skipped" => ActionStatus::Skipped,
        _ => ActionStatus::Failed,
    }
}

fn map_err(error: sqlx::Error) -> PersistenceError {
    PersistenceError::Unavailable(error.to_string())
}
