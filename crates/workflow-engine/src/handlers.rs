//! Bundled reference actions and a closure-based handler adapter, so
//! tests and small deployments don't need a real connector crate to
//! exercise the conductor end to end (§9 Design Notes).

use crate::registry::{ActionContext, ActionHandler, HandlerOutcome};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::sleep;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Adapts a plain async closure into an [`ActionHandler`], the same shape
/// the teacher's scheduler used for ad-hoc job callbacks before dispatching
/// to a named registry.
pub struct FnActionHandler<F>
where
    F: Fn(ActionContext) -> BoxFuture<'static, HandlerOutcome> + Send + Sync,
{
    func: F,
}

impl<F> FnActionHandler<F>
where
    F: Fn(ActionContext) -> BoxFuture<'static, HandlerOutcome> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ActionHandler for FnActionHandler<F>
where
    F: Fn(ActionContext) -> BoxFuture<'static, HandlerOutcome> + Send + Sync,
{
    async fn execute(&self, ctx: ActionContext) -> HandlerOutcome {
        (self.func)(ctx).await
    }
}

/// `core.echo`: returns its rendered parameters verbatim as outputs.
/// Useful as a no-op placeholder node and in tests.
pub struct EchoHandler;

#[async_trait]
impl ActionHandler for EchoHandler {
    async fn execute(&self, ctx: ActionContext) -> HandlerOutcome {
        HandlerOutcome::succeeded(ctx.parameters)
    }
}

/// `core.delay`: sleeps for `parameters.milliseconds` (default 0) and
/// echoes its parameters back, for exercising timeouts and cancellation.
pub struct DelayHandler;

#[async_trait]
impl ActionHandler for DelayHandler {
    async fn execute(&self, ctx: ActionContext) -> HandlerOutcome {
        let millis = ctx
            .parameters
            .get("milliseconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        tokio::select! {
            _ = sleep(std::time::Duration::from_millis(millis)) => {
                HandlerOutcome::succeeded(ctx.parameters)
            }
            _ = ctx.cancellation.cancelled() => {
                HandlerOutcome::failed("cancelled during delay")
            }
        }
    }
}

pub fn echo_handler() -> Arc<dyn ActionHandler> {
    Arc::new(EchoHandler)
}

pub fn delay_handler() -> Arc<dyn ActionHandler> {
    Arc::new(DelayHandler)
}
