//! Crate-wide error taxonomy (C11), composed the same way the platform's
//! `common::error::PlatformError` aggregates its subsystem errors via
//! `#[from]`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("workflow has no nodes")]
    EmptyGraph,
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),
    #[error("start node not found: {0}")]
    MissingStartNode(String),
    #[error("node {node} edge #{edge_index} targets unknown node {target}")]
    UnknownEdgeTarget {
        node: String,
        edge_index: usize,
        target: String,
    },
    #[error("cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("unreachable nodes: {0:?}")]
    Unreachable(Vec<String>),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template syntax error at {position}: {message}")]
    Syntax { position: String, message: String },
    #[error("strict template reference to missing path: {0}")]
    Reference(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no handler registered for action type: {0}")]
    UnknownAction(String),
    #[error("action type already registered: {0}")]
    AlreadyRegistered(String),
}

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("parameter validation failed at {field_path}: {reason}")]
    Invalid { field_path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("execution not found: {0}")]
    NotFound(Uuid),
    #[error("status transition rejected: {from:?} -> {to:?} is not monotonic")]
    NonMonotonicTransition {
        from: crate::model::ExecutionStatus,
        to: crate::model::ExecutionStatus,
    },
    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("workflow execution timed out")]
    WorkflowTimeout,
}
