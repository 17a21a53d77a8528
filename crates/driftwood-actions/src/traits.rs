//! Action trait definition
//!
//! An action is one step of a pipeline. Its forward step receives the
//! shared context and a [`Next`] handle for the remainder of the chain,
//! so an action can do work before delegating, after delegating, or both.

use crate::context::ActionContext;
use crate::error::{ActionError, Result};
use crate::warden::Next;
use async_trait::async_trait;

/// Core trait for pipeline actions
///
/// # Example
///
/// ```ignore
/// use driftwood_actions::{Action, ActionContext, Next, Progress, Result};
/// use async_trait::async_trait;
///
/// struct Greet;
///
/// #[async_trait]
/// impl Action for Greet {
///     async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
///         ctx.ui().report(Progress::new("greet", 0, "Hello"));
///         next.call(ctx).await
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    /// Human-readable description of the action
    fn description(&self) -> &str {
        ""
    }

    /// Forward step.
    ///
    /// Must either return a fault or let a fault from `next` propagate;
    /// a downstream fault is never turned into success.
    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()>;

    /// Compensating step, run by the warden during unwinding if this
    /// action's forward step started before the faulting one.
    ///
    /// The default does nothing.
    async fn recover(&self, ctx: &mut ActionContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// An action that only delegates
#[derive(Debug, Clone, Default)]
pub struct NoopAction;

#[async_trait]
impl Action for NoopAction {
    fn description(&self) -> &str {
        "Passes control to the next action"
    }

    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
        next.call(ctx).await
    }
}

/// An action that always fails without delegating
#[derive(Debug, Clone)]
pub struct FailingAction {
    error_message: String,
}

impl FailingAction {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
        }
    }
}

#[async_trait]
impl Action for FailingAction {
    fn description(&self) -> &str {
        "An action that always fails"
    }

    async fn call(&self, _ctx: &mut ActionContext, _next: Next<'_>) -> Result<()> {
        Err(ActionError::ExecutionFailed(self.error_message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CollectingReporter, Progress};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_noop_action() {
        let mut ctx = ActionContext::new();

        let result = NoopAction.call(&mut ctx, Next::terminal()).await;
        assert!(result.is_ok());
        assert!(NoopAction.recover(&mut ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_action() {
        let action = FailingAction::new("Something went wrong");
        let mut ctx = ActionContext::new();

        let err = action.call(&mut ctx, Next::terminal()).await.unwrap_err();
        assert!(err.to_string().contains("Something went wrong"));
    }

    #[tokio::test]
    async fn test_action_reports_through_ui() {
        struct Announce;

        #[async_trait]
        impl Action for Announce {
            async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
                ctx.ui().report(Progress::starting("announce"));
                next.call(ctx).await?;
                ctx.ui().report(Progress::completed("announce"));
                Ok(())
            }
        }

        let reporter = Arc::new(CollectingReporter::new());
        let mut ctx = ActionContext::new().with_ui(reporter.clone());

        Announce.call(&mut ctx, Next::terminal()).await.unwrap();

        let updates = reporter.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].percentage, 0);
        assert_eq!(updates[1].percentage, 100);
    }

    #[test]
    fn test_action_trait_defaults() {
        assert_eq!(NoopAction.description(), "Passes control to the next action");
        assert_eq!(FailingAction::new("x").description(), "An action that always fails");
    }
}
