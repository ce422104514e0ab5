//! Action registry (C3, §4.2, §4.8) and the action handler contract
//! connectors implement. The registry is an explicit value constructed at
//! boot and injected into the conductor — never a hidden singleton (§9
//! Design Notes) — and is read-mostly after startup, protected by a
//! read-preferring lock per §5.

use crate::error::RegistryError;
use crate::model::{ActionDescriptor, ActionStatus};
use async_trait::async_trait;
use common::JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a handler needs to execute one node, carrying a value-copy
/// of the rendered parameters rather than a shared mutable context view
/// (§5 Ordering guarantees).
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub workflow_execution_id: Uuid,
    pub node_id: String,
    pub parameters: JsonValue,
    pub cancellation: CancellationToken,
}

/// `Result = { status, outputs, errorMessage? }` from §4.2.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub status: ActionStatus,
    pub outputs: JsonValue,
    pub error_message: Option<String>,
}

impl HandlerOutcome {
    pub fn succeeded(outputs: JsonValue) -> Self {
        Self {
            status: ActionStatus::Succeeded,
            outputs,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            outputs: JsonValue::Object(Default::default()),
            error_message: Some(message.into()),
        }
    }

    pub fn retriable(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::RetriableFailure,
            outputs: JsonValue::Object(Default::default()),
            error_message: Some(message.into()),
        }
    }
}

/// The contract every connector implements, keyed by a unique `type`
/// string (§4.2). Handlers must be idempotent or safely retriable — the
/// engine assumes at-least-once invocation on `RetriableFailure`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: ActionContext) -> HandlerOutcome;
}

#[derive(Clone)]
struct RegisteredAction {
    descriptor: ActionDescriptor,
    handler: Arc<dyn ActionHandler>,
}

#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: Arc<RwLock<HashMap<String, RegisteredAction>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        descriptor: ActionDescriptor,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), RegistryError> {
        let mut actions = self.actions.write().await;
        if actions.contains_key(&descriptor.action_type) {
            return Err(RegistryError::AlreadyRegistered(descriptor.action_type));
        }
        actions.insert(
            descriptor.action_type.clone(),
            RegisteredAction { descriptor, handler },
        );
        Ok(())
    }

    pub async fn handler(&self, action_type: &str) -> Result<Arc<dyn ActionHandler>, RegistryError> {
        let actions = self.actions.read().await;
        actions
            .get(action_type)
            .map(|registered| registered.handler.clone())
            .ok_or_else(|| RegistryError::UnknownAction(action_type.to_string()))
    }

    pub async fn descriptor(&self, action_type: &str) -> Option<ActionDescriptor> {
        let actions = self.actions.read().await;
        actions.get(action_type).map(|r| r.descriptor.clone())
    }

    pub async fn list(&self) -> Vec<ActionDescriptor> {
        let actions = self.actions.read().await;
        actions.values().map(|r| r.descriptor.clone()).collect()
    }
}
