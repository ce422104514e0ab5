//! Public surface (C9, §4.8): submit-request handling, status lookup, and
//! registry administration, kept free of any HTTP/CLI concern — those are
//! out of scope (§1) and live one layer up from this crate.

use crate::conductor::Conductor;
use crate::error::ConductorError;
use crate::model::{ActionDescriptor, Workflow, WorkflowExecution};
use crate::registry::{ActionHandler, ActionRegistry};
use crate::repository::{CreateOutcome, TelemetryRepository};
use crate::validator::{ValidatorOptions, WorkflowValidator};
use chrono::Utc;
use common::JsonValue;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubmitResponse {
    pub execution_id: Uuid,
    pub status: crate::model::ExecutionStatus,
    pub status_url: String,
}

pub struct WorkflowService {
    registry: ActionRegistry,
    repository: Arc<dyn TelemetryRepository>,
    conductor: Arc<Conductor>,
    validator: WorkflowValidator,
}

impl WorkflowService {
    pub fn new(
        registry: ActionRegistry,
        repository: Arc<dyn TelemetryRepository>,
        conductor: Arc<Conductor>,
    ) -> Self {
        Self {
            registry,
            repository,
            conductor,
            validator: WorkflowValidator::new(ValidatorOptions::default()),
        }
    }

    /// Validates the definition, persists the `Pending` execution row, and
    /// hands the run to the conductor without awaiting it (§4.8). Replays
    /// of `(workflowId, requestId)` return the existing execution id rather
    /// than starting a second run.
    pub async fn submit_execution(
        &self,
        workflow: Workflow,
        workflow_version: u32,
        trigger: JsonValue,
        vars: JsonValue,
        request_id: String,
    ) -> Result<SubmitResponse, ConductorError> {
        // A cheap pre-check short-circuits the common "definitely a fresh
        // submission" path without paying for validation; the race between
        // two concurrent submits of the *same* key is still closed below,
        // since `create_execution` itself is the atomic decision point.
        if let Some(existing) = self
            .repository
            .find_by_request_id(&workflow.id, &request_id)
            .await?
        {
            return Ok(SubmitResponse {
                execution_id: existing.id,
                status: existing.status,
                status_url: status_url(existing.id),
            });
        }

        self.validator.validate(&workflow)?;

        let execution_id = Uuid::new_v4();
        let execution = WorkflowExecution {
            id: execution_id,
            workflow_id: workflow.id.clone(),
            workflow_version,
            workflow_request_id: request_id,
            status: crate::model::ExecutionStatus::Pending,
            trigger_payload: trigger.clone(),
            start_time: Utc::now(),
            end_time: None,
            correlation_id: Uuid::new_v4(),
            context_snapshot: None,
        };
        match self.repository.create_execution(execution).await? {
            CreateOutcome::Created => {}
            CreateOutcome::AlreadyExists(existing) => {
                return Ok(SubmitResponse {
                    execution_id: existing.id,
                    status: existing.status,
                    status_url: status_url(existing.id),
                });
            }
        }

        let conductor = self.conductor.clone();
        let workflow = Arc::new(workflow);
        tokio::spawn(async move {
            if let Err(error) = conductor.run(workflow, execution_id, trigger, vars).await {
                tracing::error!(%execution_id, %error, "workflow execution ended in error");
            }
        });

        Ok(SubmitResponse {
            execution_id,
            status: crate::model::ExecutionStatus::Running,
            status_url: status_url(execution_id),
        })
    }

    pub async fn get_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<(WorkflowExecution, Vec<crate::model::ActionExecution>), ConductorError> {
        let execution = self.repository.get_execution(execution_id).await?;
        let actions = self.repository.list_actions(execution_id).await?;
        Ok((execution, actions))
    }

    pub async fn register_action(
        &self,
        descriptor: ActionDescriptor,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), ConductorError> {
        self.registry.register(descriptor, handler).await?;
        Ok(())
    }

    pub async fn list_actions(&self) -> Vec<ActionDescriptor> {
        self.registry.list().await
    }
}

fn status_url(execution_id: Uuid) -> String {
    format!("/api/v1/executions/{execution_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::echo_handler;
    use crate::model::{ExecutionStatus, Node};
    use crate::param_validator::PermissiveValidator;
    use crate::repository::InMemoryTelemetryRepository;
    use crate::template::TemplateEngine;

    fn workflow() -> Workflow {
        Workflow {
            id: "wf-name".to_string(),
            display_name: "Human Name".to_string(),
            start_node: "n1".to_string(),
            nodes: vec![Node {
                id: "n1".to_string(),
                action_type: "core.echo".to_string(),
                parameters: Default::default(),
                edges: vec![],
                route_policy: Default::default(),
            }],
        }
    }

    async fn service() -> WorkflowService {
        let registry = ActionRegistry::new();
        registry
            .register(
                ActionDescriptor {
                    connector_id: "core".to_string(),
                    action_type: "core.echo".to_string(),
                    display_name: "Echo".to_string(),
                    description: String::new(),
                    parameter_schema: None,
                    output_schema: None,
                    requires_auth: false,
                    is_enabled: true,
                },
                echo_handler(),
            )
            .await
            .unwrap();
        let repository: Arc<dyn TelemetryRepository> = Arc::new(InMemoryTelemetryRepository::new());
        let conductor = Arc::new(Conductor::new(
            registry.clone(),
            repository.clone(),
            Arc::new(TemplateEngine::default()),
            Arc::new(PermissiveValidator),
            common::config::OrchestrationConfig::default(),
        ));
        WorkflowService::new(registry, repository, conductor)
    }

    #[tokio::test]
    async fn submit_returns_a_pending_to_running_execution() {
        let service = service().await;
        let response = service
            .submit_execution(
                workflow(),
                1,
                serde_json::json!({}),
                serde_json::json!({}),
                "req-1".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, ExecutionStatus::Running);
        assert_eq!(response.status_url, format!("/api/v1/executions/{}", response.execution_id));
    }

    #[tokio::test]
    async fn duplicate_request_id_returns_the_same_execution_id() {
        let service = service().await;
        let first = service
            .submit_execution(
                workflow(),
                1,
                serde_json::json!({}),
                serde_json::json!({}),
                "req-dup".to_string(),
            )
            .await
            .unwrap();
        let second = service
            .submit_execution(
                workflow(),
                1,
                serde_json::json!({}),
                serde_json::json!({}),
                "req-dup".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(first.execution_id, second.execution_id);
    }

    #[tokio::test]
    async fn concurrent_duplicate_submits_produce_exactly_one_execution() {
        let service = Arc::new(service().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .submit_execution(
                        workflow(),
                        1,
                        serde_json::json!({}),
                        serde_json::json!({}),
                        "req-concurrent".to_string(),
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().execution_id);
        }
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn submit_rejects_a_cyclic_definition_synchronously() {
        let service = service().await;
        let mut wf = workflow();
        wf.nodes.push(Node {
            id: "n2".to_string(),
            action_type: "core.echo".to_string(),
            parameters: Default::default(),
            edges: vec![crate::model::Edge {
                target_node: "n1".to_string(),
                when: Default::default(),
                condition: None,
            }],
            route_policy: Default::default(),
        });
        wf.nodes[0].edges.push(crate::model::Edge {
            target_node: "n2".to_string(),
            when: Default::default(),
            condition: None,
        });

        let result = service
            .submit_execution(
                wf,
                1,
                serde_json::json!({}),
                serde_json::json!({}),
                "req-cycle".to_string(),
            )
            .await;
        assert!(matches!(result, Err(ConductorError::Graph(_))));
    }

    #[tokio::test]
    async fn list_actions_reflects_registrations() {
        let service = service().await;
        let actions = service.list_actions().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "core.echo");
    }
}
