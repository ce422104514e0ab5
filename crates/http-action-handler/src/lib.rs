//! Reference out-of-process action handler (§4.2, §6): dispatches a node's
//! rendered parameters as a JSON POST to a resolvable per-action-type URL,
//! grounded on the teacher's `ai-service::client::AIClient` — a thin
//! `reqwest::Client` wrapper that maps transport and status-code failures
//! into a typed outcome instead of propagating `reqwest::Error` upward.
//!
//! One instance is registered per `actionType`; the concrete transport
//! (HTTP here) is explicitly an implementation choice (§6) — an in-process
//! variant lives in `workflow_engine::handlers` for tests.

use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use workflow_engine::{ActionContext, ActionHandler, HandlerOutcome};

pub struct HttpActionHandler {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpActionHandler {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl ActionHandler for HttpActionHandler {
    async fn execute(&self, ctx: ActionContext) -> HandlerOutcome {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ctx.parameters)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.json::<JsonValue>().await {
                        Ok(body) => HandlerOutcome::succeeded(body),
                        Err(e) => {
                            HandlerOutcome::failed(format!("invalid JSON response body: {e}"))
                        }
                    }
                } else if is_retriable_status(status) {
                    HandlerOutcome::retriable(format!("handler responded with http {status}"))
                } else {
                    let body = response.text().await.unwrap_or_default();
                    HandlerOutcome::failed(format!("handler responded with http {status}: {body}"))
                }
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                tracing::warn!(node_id = %ctx.node_id, error = %e, "action http call failed transiently");
                HandlerOutcome::retriable(e.to_string())
            }
            Err(e) => HandlerOutcome::failed(e.to_string()),
        }
    }
}

/// Default retriable classification (§4.2): network timeout, 429, 5xx, and
/// connection-reset (surfaced upstream as a connect/timeout error) retry;
/// everything else is a fatal `Failed`.
fn is_retriable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
