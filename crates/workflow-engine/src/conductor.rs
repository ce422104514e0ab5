//! Conductor / scheduler (C8, §4.7): drives one workflow execution from
//! `Pending` to a terminal status — ready-set evaluation over the graph,
//! bounded-parallel dispatch, per-node retry, and telemetry commits.
//!
//! The scheduler loop itself is single-logical-threaded per execution (§5):
//! one task owns the ready-set bookkeeping and consumes a serialized stream
//! of node-completion events, so context publication never needs its own
//! lock despite handlers running concurrently on a bounded worker pool
//! sized with a [`Semaphore`].

use crate::context::ExecutionContext;
use crate::error::ConductorError;
use crate::model::{
    ActionError, ActionExecution, ActionStatus, EdgeWhen, ExecutionStatus, Node, RoutePolicy,
    Workflow, WorkflowExecution,
};
use crate::param_validator::ParameterValidator;
use crate::registry::{ActionContext, ActionRegistry};
use crate::repository::TelemetryRepository;
use crate::retry::RetryPolicy;
use crate::template::TemplateEngine;
use chrono::Utc;
use common::config::OrchestrationConfig;
use common::JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Conductor {
    registry: ActionRegistry,
    repository: Arc<dyn TelemetryRepository>,
    template_engine: Arc<TemplateEngine>,
    parameter_validator: Arc<dyn ParameterValidator>,
    config: OrchestrationConfig,
}

struct NodeOutcome {
    node_id: String,
    status: ActionStatus,
    outputs: JsonValue,
}

impl Conductor {
    pub fn new(
        registry: ActionRegistry,
        repository: Arc<dyn TelemetryRepository>,
        template_engine: Arc<TemplateEngine>,
        parameter_validator: Arc<dyn ParameterValidator>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            registry,
            repository,
            template_engine,
            parameter_validator,
            config,
        }
    }

    /// Runs `workflow` to completion, persisting the `Running` transition
    /// before the first dispatch and the terminal transition as the last
    /// write (§4.7 State machine). Returns the final execution record.
    pub async fn run(
        &self,
        workflow: Arc<Workflow>,
        execution_id: Uuid,
        trigger: JsonValue,
        vars: JsonValue,
    ) -> Result<WorkflowExecution, ConductorError> {
        self.repository
            .update_execution_status(execution_id, ExecutionStatus::Running, None, None)
            .await?;

        let cancellation = CancellationToken::new();
        let workflow_timeout = self.config.default_workflow_timeout;
        let deadline_token = cancellation.clone();
        let context = ExecutionContext::new(trigger, vars);

        let outcome = tokio::select! {
            result = self.drive(&workflow, execution_id, &context, cancellation.clone()) => result,
            _ = tokio::time::sleep(workflow_timeout) => {
                deadline_token.cancel();
                Err(ConductorError::WorkflowTimeout)
            }
        };

        // Grab the snapshot from `context` directly rather than `outcome` —
        // on a timeout the `drive` future is dropped before it can return
        // one, but the context itself lives in this scope regardless.
        let context_snapshot = Some(context.final_snapshot().await);
        let final_status = match &outcome {
            Ok(status) => *status,
            Err(ConductorError::WorkflowTimeout) => ExecutionStatus::Cancelled,
            Err(_) => ExecutionStatus::Failed,
        };
        tracing::info!(%execution_id, ?final_status, "workflow execution reached a terminal status");

        self.repository
            .update_execution_status(
                execution_id,
                final_status,
                Some(Utc::now()),
                context_snapshot,
            )
            .await?;

        self.repository.get_execution(execution_id).await.map_err(Into::into)
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
        context: &ExecutionContext,
        cancellation: CancellationToken,
    ) -> Result<ExecutionStatus, ConductorError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_actions.max(1)));
        let predecessors = predecessor_counts(workflow);

        let mut in_degree_remaining: HashMap<String, usize> = predecessors
            .iter()
            .map(|(id, preds)| (id.clone(), preds.len()))
            .collect();
        let mut activated: HashMap<String, bool> =
            workflow.nodes.iter().map(|n| (n.id.clone(), false)).collect();
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut final_statuses: HashMap<String, ActionStatus> = HashMap::new();

        let (tx, mut rx) = mpsc::unbounded_channel::<NodeOutcome>();
        let mut in_flight = 0usize;
        let mut pending = workflow.nodes.len();

        // `startNode` is always activated, independent of any edge that
        // happens to target it from an unreachable island — the orphan
        // pre-pass below can cascade a skip onto any node, and without this
        // marked first a non-`Always` edge into `startNode` from a skipped
        // orphan would skip the entire workflow before it ever dispatches.
        activated.insert(workflow.start_node.clone(), true);

        // A node other than `startNode` with zero predecessors can only occur
        // in a graph the validator accepted under permissive (non-strict)
        // reachability — it will never be activated by any predecessor
        // event, so without this pass it would stall the scheduler forever.
        let orphans: Vec<String> = workflow
            .nodes
            .iter()
            .filter(|n| n.id != workflow.start_node)
            .filter(|n| in_degree_remaining.get(&n.id).copied().unwrap_or(0) == 0)
            .map(|n| n.id.clone())
            .collect();
        for orphan in orphans {
            if dispatched.contains(&orphan) {
                continue;
            }
            self.skip_and_cascade(
                &orphan,
                workflow,
                &mut in_degree_remaining,
                &mut activated,
                &mut dispatched,
                &mut final_statuses,
                &mut pending,
                execution_id,
                context,
                &semaphore,
                cancellation.clone(),
                &tx,
                &mut in_flight,
            )
            .await?;
        }

        self.dispatch_if_ready(
            &workflow.start_node,
            workflow,
            &in_degree_remaining,
            &activated,
            &mut dispatched,
            execution_id,
            context,
            &semaphore,
            cancellation.clone(),
            &tx,
            &mut in_flight,
        )
        .await;

        while pending > 0 {
            let Some(outcome) = rx.recv().await else {
                break;
            };
            in_flight = in_flight.saturating_sub(1);
            pending -= 1;
            final_statuses.insert(outcome.node_id.clone(), outcome.status);

            self.resolve_successors(
                &outcome.node_id,
                outcome.status,
                outcome.outputs,
                workflow,
                &mut in_degree_remaining,
                &mut activated,
                &mut dispatched,
                &mut final_statuses,
                &mut pending,
                execution_id,
                context,
                &semaphore,
                cancellation.clone(),
                &tx,
                &mut in_flight,
            )
            .await?;
        }

        let status = if cancellation.is_cancelled() {
            ExecutionStatus::Cancelled
        } else if final_statuses.values().any(|s| *s == ActionStatus::Failed) {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };
        Ok(status)
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_successors(
        &self,
        predecessor_id: &str,
        status: ActionStatus,
        outputs: JsonValue,
        workflow: &Workflow,
        in_degree_remaining: &mut HashMap<String, usize>,
        activated: &mut HashMap<String, bool>,
        dispatched: &mut HashSet<String>,
        final_statuses: &mut HashMap<String, ActionStatus>,
        pending: &mut usize,
        execution_id: Uuid,
        context: &ExecutionContext,
        semaphore: &Arc<Semaphore>,
        cancellation: CancellationToken,
        tx: &mpsc::UnboundedSender<NodeOutcome>,
        in_flight: &mut usize,
    ) -> Result<(), ConductorError> {
        context.publish_outputs(predecessor_id, outputs).await;
        let snapshot = context.snapshot().await;

        let Some(node) = workflow.node(predecessor_id) else {
            return Ok(());
        };

        let mut fires = Vec::with_capacity(node.edges.len());
        for edge in &node.edges {
            let when_ok = when_matches(edge.when, status);
            let condition_ok = match &edge.condition {
                Some(expr) => self.template_engine.evaluate_condition(expr, &snapshot)?,
                None => true,
            };
            fires.push(when_ok && condition_ok);
        }

        if node.route_policy == RoutePolicy::FirstMatch {
            let first = fires.iter().position(|&f| f);
            for (i, fire) in fires.iter_mut().enumerate() {
                *fire = Some(i) == first;
            }
        }

        for (edge, fire) in node.edges.iter().zip(fires.into_iter()) {
            let target = edge.target_node.clone();
            if fire {
                activated.insert(target.clone(), true);
            }
            if let Some(remaining) = in_degree_remaining.get_mut(&target) {
                *remaining = remaining.saturating_sub(1);
            }

            let resolved = in_degree_remaining.get(&target).copied().unwrap_or(0) == 0;
            if !resolved || dispatched.contains(&target) {
                continue;
            }

            if activated.get(&target).copied().unwrap_or(false) {
                dispatched.insert(target.clone());
                self.spawn_node(
                    target,
                    workflow,
                    execution_id,
                    context,
                    semaphore,
                    cancellation.clone(),
                    tx,
                );
                *in_flight += 1;
            } else {
                self.skip_and_cascade(
                    &target,
                    workflow,
                    in_degree_remaining,
                    activated,
                    dispatched,
                    final_statuses,
                    pending,
                    execution_id,
                    context,
                    semaphore,
                    cancellation.clone(),
                    tx,
                    in_flight,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Marks `target` `Skipped` with empty outputs and recurses on its own
    /// outgoing edges as though it had just completed (§4.7 step 4) — used
    /// both for successors resolved-but-never-activated and for nodes that
    /// can structurally never receive an activating predecessor event.
    #[allow(clippy::too_many_arguments)]
    async fn skip_and_cascade(
        &self,
        target: &str,
        workflow: &Workflow,
        in_degree_remaining: &mut HashMap<String, usize>,
        activated: &mut HashMap<String, bool>,
        dispatched: &mut HashSet<String>,
        final_statuses: &mut HashMap<String, ActionStatus>,
        pending: &mut usize,
        execution_id: Uuid,
        context: &ExecutionContext,
        semaphore: &Arc<Semaphore>,
        cancellation: CancellationToken,
        tx: &mpsc::UnboundedSender<NodeOutcome>,
        in_flight: &mut usize,
    ) -> Result<(), ConductorError> {
        dispatched.insert(target.to_string());
        self.repository
            .append_action(ActionExecution {
                id: Uuid::new_v4(),
                workflow_execution_id: execution_id,
                node_id: target.to_string(),
                action_type: workflow
                    .node(target)
                    .map(|n| n.action_type.clone())
                    .unwrap_or_default(),
                status: ActionStatus::Skipped,
                attempt: 1,
                parameters: JsonValue::Object(Default::default()),
                outputs: JsonValue::Object(Default::default()),
                error: None,
                start_time: Utc::now(),
                end_time: Some(Utc::now()),
            })
            .await?;
        final_statuses.insert(target.to_string(), ActionStatus::Skipped);
        *pending -= 1;
        Box::pin(self.resolve_successors(
            target,
            ActionStatus::Skipped,
            JsonValue::Object(Default::default()),
            workflow,
            in_degree_remaining,
            activated,
            dispatched,
            final_statuses,
            pending,
            execution_id,
            context,
            semaphore,
            cancellation,
            tx,
            in_flight,
        ))
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_if_ready(
        &self,
        node_id: &str,
        workflow: &Workflow,
        in_degree_remaining: &HashMap<String, usize>,
        activated: &HashMap<String, bool>,
        dispatched: &mut HashSet<String>,
        execution_id: Uuid,
        context: &ExecutionContext,
        semaphore: &Arc<Semaphore>,
        cancellation: CancellationToken,
        tx: &mpsc::UnboundedSender<NodeOutcome>,
        in_flight: &mut usize,
    ) {
        let resolved = in_degree_remaining.get(node_id).copied().unwrap_or(0) == 0;
        let active = activated.get(node_id).copied().unwrap_or(false);
        if resolved && active && dispatched.insert(node_id.to_string()) {
            self.spawn_node(
                node_id.to_string(),
                workflow,
                execution_id,
                context,
                semaphore,
                cancellation,
                tx,
            );
            *in_flight += 1;
        }
    }

    fn spawn_node(
        &self,
        node_id: String,
        workflow: &Workflow,
        execution_id: Uuid,
        context: &ExecutionContext,
        semaphore: &Arc<Semaphore>,
        cancellation: CancellationToken,
        tx: &mpsc::UnboundedSender<NodeOutcome>,
    ) {
        let Some(node) = workflow.node(&node_id).cloned() else {
            return;
        };
        let registry = self.registry.clone();
        let repository = self.repository.clone();
        let template_engine = self.template_engine.clone();
        let parameter_validator = self.parameter_validator.clone();
        let retry_policy = RetryPolicy::new(self.config.retry.clone());
        let action_timeout = self.config.default_action_timeout;
        let semaphore = semaphore.clone();
        let context = context.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let snapshot = context.snapshot().await;
            let (status, outputs) = execute_node(
                &node,
                execution_id,
                &registry,
                repository.as_ref(),
                &template_engine,
                parameter_validator.as_ref(),
                &retry_policy,
                snapshot,
                action_timeout,
                cancellation,
            )
            .await;
            let _ = tx.send(NodeOutcome {
                node_id: node.id.clone(),
                status,
                outputs,
            });
        });
    }
}

fn when_matches(when: EdgeWhen, status: ActionStatus) -> bool {
    match when {
        EdgeWhen::Always => true,
        EdgeWhen::Success => status == ActionStatus::Succeeded,
        EdgeWhen::Failure => status == ActionStatus::Failed,
    }
}

fn predecessor_counts(workflow: &Workflow) -> HashMap<String, Vec<String>> {
    let mut predecessors: HashMap<String, Vec<String>> =
        workflow.nodes.iter().map(|n| (n.id.clone(), Vec::new())).collect();
    for node in &workflow.nodes {
        for edge in &node.edges {
            predecessors
                .entry(edge.target_node.clone())
                .or_default()
                .push(node.id.clone());
        }
    }
    predecessors
}

/// The per-node execution loop from §4.7: render, validate, dispatch,
/// retry on `RetriableFailure`, persist exactly one final row per node.
#[allow(clippy::too_many_arguments)]
async fn execute_node(
    node: &Node,
    execution_id: Uuid,
    registry: &ActionRegistry,
    repository: &dyn TelemetryRepository,
    template_engine: &TemplateEngine,
    parameter_validator: &dyn ParameterValidator,
    retry_policy: &RetryPolicy,
    context_snapshot: JsonValue,
    action_timeout: std::time::Duration,
    cancellation: CancellationToken,
) -> (ActionStatus, JsonValue) {
    let params_json = JsonValue::Object(
        node.parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );

    let mut attempt = 1u32;
    loop {
        if cancellation.is_cancelled() {
            return finalize(
                repository,
                execution_id,
                node,
                attempt,
                ActionStatus::RetriableFailure,
                JsonValue::Object(Default::default()),
                JsonValue::Object(Default::default()),
                Some("cancelled".to_string()),
                Utc::now(),
            )
            .await;
        }

        let rendered = match template_engine.render(&params_json, &context_snapshot) {
            Ok(v) => v,
            Err(e) => {
                return finalize(
                    repository,
                    execution_id,
                    node,
                    attempt,
                    ActionStatus::Failed,
                    JsonValue::Object(Default::default()),
                    JsonValue::Object(Default::default()),
                    Some(e.to_string()),
                    Utc::now(),
                )
                .await;
            }
        };

        let descriptor = registry.descriptor(&node.action_type).await;
        if let Err(e) = parameter_validator
            .validate(descriptor.as_ref().and_then(|d| d.parameter_schema.as_ref()), &rendered)
            .await
        {
            return finalize(
                repository,
                execution_id,
                node,
                attempt,
                ActionStatus::Failed,
                rendered,
                JsonValue::Object(Default::default()),
                Some(e.to_string()),
                Utc::now(),
            )
            .await;
        }

        let handler = match registry.handler(&node.action_type).await {
            Ok(h) => h,
            Err(e) => {
                return finalize(
                    repository,
                    execution_id,
                    node,
                    attempt,
                    ActionStatus::Failed,
                    rendered,
                    JsonValue::Object(Default::default()),
                    Some(e.to_string()),
                    Utc::now(),
                )
                .await;
            }
        };

        tracing::debug!(execution_id = %execution_id, node_id = %node.id, attempt, "dispatching action");
        let start = Utc::now();
        let ctx = ActionContext {
            workflow_execution_id: execution_id,
            node_id: node.id.clone(),
            parameters: rendered.clone(),
            cancellation: cancellation.clone(),
        };
        let outcome = match tokio::time::timeout(action_timeout, handler.execute(ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => crate::registry::HandlerOutcome::retriable("action timed out"),
        };

        if retry_policy.should_retry(attempt, outcome.status) {
            let delay = retry_policy.next_delay(attempt);
            tracing::warn!(execution_id = %execution_id, node_id = %node.id, attempt, ?delay, "retrying after retriable failure");
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        let final_status = if outcome.status == ActionStatus::RetriableFailure {
            ActionStatus::Failed
        } else {
            outcome.status
        };
        return finalize(
            repository,
            execution_id,
            node,
            attempt,
            final_status,
            rendered,
            outcome.outputs,
            outcome.error_message,
            start,
        )
        .await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn finalize(
    repository: &dyn TelemetryRepository,
    execution_id: Uuid,
    node: &Node,
    attempt: u32,
    status: ActionStatus,
    parameters: JsonValue,
    outputs: JsonValue,
    error_message: Option<String>,
    start_time: chrono::DateTime<Utc>,
) -> (ActionStatus, JsonValue) {
    let error = error_message.map(|message| ActionError { message, detail: None });
    let _ = repository
        .append_action(ActionExecution {
            id: Uuid::new_v4(),
            workflow_execution_id: execution_id,
            node_id: node.id.clone(),
            action_type: node.action_type.clone(),
            status,
            attempt,
            parameters,
            outputs: outputs.clone(),
            error,
            start_time,
            end_time: Some(Utc::now()),
        })
        .await;
    (status, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{delay_handler, echo_handler};
    use crate::model::{Edge, RoutePolicy};
    use crate::param_validator::PermissiveValidator;
    use crate::registry::{ActionHandler, HandlerOutcome};
    use crate::repository::InMemoryTelemetryRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn node(id: &str, action_type: &str, params: serde_json::Value, edges: Vec<Edge>) -> Node {
        Node {
            id: id.to_string(),
            action_type: action_type.to_string(),
            parameters: params
                .as_object()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            edges,
            route_policy: RoutePolicy::Parallel,
        }
    }

    fn edge(target: &str, when: EdgeWhen, condition: Option<&str>) -> Edge {
        Edge {
            target_node: target.to_string(),
            when,
            condition: condition.map(str::to_string),
        }
    }

    async fn registry_with_defaults() -> ActionRegistry {
        let registry = ActionRegistry::new();
        registry
            .register(descriptor("core.echo"), echo_handler())
            .await
            .unwrap();
        registry
            .register(descriptor("core.delay"), delay_handler())
            .await
            .unwrap();
        registry
    }

    fn descriptor(action_type: &str) -> crate::model::ActionDescriptor {
        crate::model::ActionDescriptor {
            connector_id: "core".to_string(),
            action_type: action_type.to_string(),
            display_name: action_type.to_string(),
            description: String::new(),
            parameter_schema: None,
            output_schema: None,
            requires_auth: false,
            is_enabled: true,
        }
    }

    fn conductor(registry: ActionRegistry, repository: Arc<dyn TelemetryRepository>) -> Conductor {
        Conductor::new(
            registry,
            repository,
            Arc::new(TemplateEngine::default()),
            Arc::new(PermissiveValidator),
            OrchestrationConfig {
                max_parallel_actions: 10,
                default_action_timeout: std::time::Duration::from_secs(5),
                default_workflow_timeout: std::time::Duration::from_secs(10),
                retry: common::config::RetryPolicyConfig {
                    max_attempts: 3,
                    initial_delay: std::time::Duration::from_millis(5),
                    backoff_factor: 2.0,
                    use_jitter: false,
                    max_delay: std::time::Duration::from_millis(50),
                },
            },
        )
    }

    #[tokio::test]
    async fn runs_a_linear_chain_to_success() {
        let workflow = Arc::new(Workflow {
            id: "wf".to_string(),
            display_name: "wf".to_string(),
            start_node: "a".to_string(),
            nodes: vec![
                node(
                    "a",
                    "core.echo",
                    serde_json::json!({"message": "hi", "echo": "hi"}),
                    vec![edge("b", EdgeWhen::Success, None)],
                ),
                node(
                    "b",
                    "core.echo",
                    serde_json::json!({"echo": "{{ steps.a.outputs.echo }}!"}),
                    vec![],
                ),
            ],
        });

        let repository: Arc<dyn TelemetryRepository> = Arc::new(InMemoryTelemetryRepository::new());
        let registry = registry_with_defaults().await;
        let conductor = conductor(registry, repository.clone());

        let execution_id = Uuid::new_v4();
        repository
            .create_execution(WorkflowExecution {
                id: execution_id,
                workflow_id: "wf".to_string(),
                workflow_version: 1,
                workflow_request_id: "req-1".to_string(),
                status: ExecutionStatus::Pending,
                trigger_payload: serde_json::json!({}),
                start_time: Utc::now(),
                end_time: None,
                correlation_id: Uuid::new_v4(),
                context_snapshot: None,
            })
            .await
            .unwrap();

        let record = conductor
            .run(workflow, execution_id, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Succeeded);
        let snapshot = record.context_snapshot.unwrap();
        assert_eq!(snapshot["steps"]["a"]["outputs"]["echo"], "hi");
        assert_eq!(snapshot["steps"]["b"]["outputs"]["echo"], "hi!");
    }

    #[tokio::test]
    async fn conditional_edges_skip_the_non_firing_branch() {
        let workflow = Arc::new(Workflow {
            id: "wf".to_string(),
            display_name: "wf".to_string(),
            start_node: "a".to_string(),
            nodes: vec![
                node(
                    "a",
                    "core.echo",
                    serde_json::json!({"echo": "ok"}),
                    vec![
                        edge("b", EdgeWhen::Success, None),
                        edge("d", EdgeWhen::Failure, None),
                    ],
                ),
                node("b", "core.echo", serde_json::json!({}), vec![edge("c", EdgeWhen::Success, None)]),
                node("c", "core.echo", serde_json::json!({}), vec![]),
                node("d", "core.echo", serde_json::json!({}), vec![edge("e", EdgeWhen::Success, None)]),
                node("e", "core.echo", serde_json::json!({}), vec![]),
            ],
        });

        let repository: Arc<dyn TelemetryRepository> = Arc::new(InMemoryTelemetryRepository::new());
        let registry = registry_with_defaults().await;
        let conductor = conductor(registry, repository.clone());
        let execution_id = Uuid::new_v4();
        repository
            .create_execution(WorkflowExecution {
                id: execution_id,
                workflow_id: "wf".to_string(),
                workflow_version: 1,
                workflow_request_id: "req-2".to_string(),
                status: ExecutionStatus::Pending,
                trigger_payload: serde_json::json!({}),
                start_time: Utc::now(),
                end_time: None,
                correlation_id: Uuid::new_v4(),
                context_snapshot: None,
            })
            .await
            .unwrap();

        let record = conductor
            .run(workflow, execution_id, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);

        let actions = repository.list_actions(execution_id).await.unwrap();
        let status_of = |id: &str| {
            actions
                .iter()
                .find(|a| a.node_id == id)
                .map(|a| a.status)
                .unwrap()
        };
        assert_eq!(status_of("b"), ActionStatus::Succeeded);
        assert_eq!(status_of("c"), ActionStatus::Succeeded);
        assert_eq!(status_of("d"), ActionStatus::Skipped);
        assert_eq!(status_of("e"), ActionStatus::Skipped);
    }

    #[tokio::test]
    async fn fan_out_then_fan_in_waits_for_both_branches() {
        let workflow = Arc::new(Workflow {
            id: "wf".to_string(),
            display_name: "wf".to_string(),
            start_node: "start".to_string(),
            nodes: vec![
                node(
                    "start",
                    "core.echo",
                    serde_json::json!({}),
                    vec![edge("a", EdgeWhen::Success, None), edge("b", EdgeWhen::Success, None)],
                ),
                node("a", "core.echo", serde_json::json!({"echo": "a"}), vec![edge("join", EdgeWhen::Success, None)]),
                node("b", "core.echo", serde_json::json!({"echo": "b"}), vec![edge("join", EdgeWhen::Success, None)]),
                node(
                    "join",
                    "core.echo",
                    serde_json::json!({"combined": "{{ steps.a.outputs.echo }}{{ steps.b.outputs.echo }}"}),
                    vec![],
                ),
            ],
        });

        let repository: Arc<dyn TelemetryRepository> = Arc::new(InMemoryTelemetryRepository::new());
        let registry = registry_with_defaults().await;
        let conductor = conductor(registry, repository.clone());
        let execution_id = Uuid::new_v4();
        repository
            .create_execution(WorkflowExecution {
                id: execution_id,
                workflow_id: "wf".to_string(),
                workflow_version: 1,
                workflow_request_id: "req-3".to_string(),
                status: ExecutionStatus::Pending,
                trigger_payload: serde_json::json!({}),
                start_time: Utc::now(),
                end_time: None,
                correlation_id: Uuid::new_v4(),
                context_snapshot: None,
            })
            .await
            .unwrap();

        let record = conductor
            .run(workflow, execution_id, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.context_snapshot.unwrap()["steps"]["join"]["outputs"]["combined"], "ab");
    }

    #[tokio::test]
    async fn start_node_still_runs_when_an_unreachable_island_gates_into_it() {
        // `island` is unreachable from `start` (only a warning under the
        // default non-strict validator) and its only edge into `start`
        // fires on Success — but `island` itself is never dispatched, so it
        // resolves as Skipped. `start` must still run.
        let workflow = Arc::new(Workflow {
            id: "wf".to_string(),
            display_name: "wf".to_string(),
            start_node: "start".to_string(),
            nodes: vec![
                node("start", "core.echo", serde_json::json!({"echo": "ran"}), vec![]),
                node(
                    "island",
                    "core.echo",
                    serde_json::json!({}),
                    vec![edge("start", EdgeWhen::Success, None)],
                ),
            ],
        });

        let repository: Arc<dyn TelemetryRepository> = Arc::new(InMemoryTelemetryRepository::new());
        let registry = registry_with_defaults().await;
        let conductor = conductor(registry, repository.clone());
        let execution_id = Uuid::new_v4();
        repository
            .create_execution(WorkflowExecution {
                id: execution_id,
                workflow_id: "wf".to_string(),
                workflow_version: 1,
                workflow_request_id: "req-island".to_string(),
                status: ExecutionStatus::Pending,
                trigger_payload: serde_json::json!({}),
                start_time: Utc::now(),
                end_time: None,
                correlation_id: Uuid::new_v4(),
                context_snapshot: None,
            })
            .await
            .unwrap();

        let record = conductor
            .run(workflow, execution_id, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(
            record.context_snapshot.unwrap()["steps"]["start"]["outputs"]["echo"],
            "ran"
        );
        let actions = repository.list_actions(execution_id).await.unwrap();
        let island = actions.iter().find(|a| a.node_id == "island").unwrap();
        assert_eq!(island.status, ActionStatus::Skipped);
    }

    struct TrackConcurrencyHandler {
        current: Arc<AtomicU32>,
        peak: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ActionHandler for TrackConcurrencyHandler {
        async fn execute(&self, ctx: ActionContext) -> HandlerOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            HandlerOutcome::succeeded(ctx.parameters)
        }
    }

    #[tokio::test]
    async fn concurrent_dispatch_never_exceeds_max_parallel_actions() {
        let current = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let nodes: Vec<Node> = (0..6)
            .map(|i| node(&format!("n{i}"), "test.track", serde_json::json!({}), vec![]))
            .collect();
        let workflow = Arc::new(Workflow {
            id: "wf".to_string(),
            display_name: "wf".to_string(),
            start_node: "n0".to_string(),
            nodes: {
                let mut nodes = nodes;
                // fan every other node out from n0 so they all become ready
                // at once and compete for the same semaphore.
                nodes[0].edges = (1..6)
                    .map(|i| edge(&format!("n{i}"), EdgeWhen::Always, None))
                    .collect();
                nodes
            },
        });

        let repository: Arc<dyn TelemetryRepository> = Arc::new(InMemoryTelemetryRepository::new());
        let registry = ActionRegistry::new();
        registry
            .register(
                descriptor("test.track"),
                Arc::new(TrackConcurrencyHandler {
                    current: current.clone(),
                    peak: peak.clone(),
                }),
            )
            .await
            .unwrap();

        let mut conductor = conductor(registry, repository.clone());
        conductor.config.max_parallel_actions = 2;
        let execution_id = Uuid::new_v4();
        repository
            .create_execution(WorkflowExecution {
                id: execution_id,
                workflow_id: "wf".to_string(),
                workflow_version: 1,
                workflow_request_id: "req-bound".to_string(),
                status: ExecutionStatus::Pending,
                trigger_payload: serde_json::json!({}),
                start_time: Utc::now(),
                end_time: None,
                correlation_id: Uuid::new_v4(),
                context_snapshot: None,
            })
            .await
            .unwrap();

        let record = conductor
            .run(workflow, execution_id, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn workflow_timeout_cancels_a_slow_in_flight_action() {
        let workflow = Arc::new(Workflow {
            id: "wf".to_string(),
            display_name: "wf".to_string(),
            start_node: "slow".to_string(),
            nodes: vec![node(
                "slow",
                "core.delay",
                serde_json::json!({"milliseconds": 60_000}),
                vec![],
            )],
        });

        let repository: Arc<dyn TelemetryRepository> = Arc::new(InMemoryTelemetryRepository::new());
        let registry = registry_with_defaults().await;
        let mut conductor = conductor(registry, repository.clone());
        conductor.config.default_workflow_timeout = std::time::Duration::from_millis(20);
        let execution_id = Uuid::new_v4();
        repository
            .create_execution(WorkflowExecution {
                id: execution_id,
                workflow_id: "wf".to_string(),
                workflow_version: 1,
                workflow_request_id: "req-timeout".to_string(),
                status: ExecutionStatus::Pending,
                trigger_payload: serde_json::json!({}),
                start_time: Utc::now(),
                end_time: None,
                correlation_id: Uuid::new_v4(),
                context_snapshot: None,
            })
            .await
            .unwrap();

        let record = conductor
            .run(workflow, execution_id, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }

    struct FlakyHandler {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl ActionHandler for FlakyHandler {
        async fn execute(&self, ctx: ActionContext) -> HandlerOutcome {
            if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                HandlerOutcome::retriable("transient")
            } else {
                HandlerOutcome::succeeded(ctx.parameters)
            }
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_max_attempts() {
        let workflow = Arc::new(Workflow {
            id: "wf".to_string(),
            display_name: "wf".to_string(),
            start_node: "flaky".to_string(),
            nodes: vec![node("flaky", "test.flaky", serde_json::json!({}), vec![])],
        });

        let repository: Arc<dyn TelemetryRepository> = Arc::new(InMemoryTelemetryRepository::new());
        let registry = ActionRegistry::new();
        registry
            .register(
                descriptor("test.flaky"),
                Arc::new(FlakyHandler {
                    failures_left: AtomicU32::new(2),
                }),
            )
            .await
            .unwrap();
        let conductor = conductor(registry, repository.clone());
        let execution_id = Uuid::new_v4();
        repository
            .create_execution(WorkflowExecution {
                id: execution_id,
                workflow_id: "wf".to_string(),
                workflow_version: 1,
                workflow_request_id: "req-4".to_string(),
                status: ExecutionStatus::Pending,
                trigger_payload: serde_json::json!({}),
                start_time: Utc::now(),
                end_time: None,
                correlation_id: Uuid::new_v4(),
                context_snapshot: None,
            })
            .await
            .unwrap();

        let record = conductor
            .run(workflow, execution_id, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);

        let actions = repository.list_actions(execution_id).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].attempt, 3);
        assert_eq!(actions[0].status, ActionStatus::Succeeded);
    }
}
