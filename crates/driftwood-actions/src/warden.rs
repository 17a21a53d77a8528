//! Warden: runs a compiled chain and unwinds it on failure
//!
//! ```text
//! Idle ──call──▶ Running ──ok──▶ Succeeded
//!                   │
//!                 fault
//!                   ▼
//!               Unwinding ──▶ Failed
//! ```
//!
//! Forward steps run head to tail, each one delegating to the rest of the
//! chain through [`Next`]. Every action is marked started right before its
//! forward step. When a fault reaches the top, the warden records it in the
//! context and runs the compensating step of every started action except
//! the one the fault came from, newest first, once each. Faults from
//! compensating steps are logged and recorded but never replace the
//! original.

use crate::builder::Chain;
use crate::context::ActionContext;
use crate::error::{ActionError, Result};
use futures::future::BoxFuture;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Lifecycle of a warden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WardenState {
    Idle,
    Running,
    Succeeded,
    Unwinding,
    Failed,
}

impl WardenState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for WardenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Unwinding => "unwinding",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-run bookkeeping, indexes into the chain
#[derive(Debug, Default)]
pub(crate) struct RunState {
    started: Vec<usize>,
    /// Action whose own forward step produced the fault
    origin: Option<usize>,
}

/// Handle to the remainder of the chain, given to each forward step
pub struct Next<'a> {
    rest: Option<Rest<'a>>,
}

struct Rest<'a> {
    chain: &'a Chain,
    run: &'a mut RunState,
    index: usize,
}

impl<'a> Next<'a> {
    /// A handle with nothing after it
    pub fn terminal() -> Self {
        Self { rest: None }
    }

    pub fn is_terminal(&self) -> bool {
        self.rest.is_none()
    }

    /// Run the rest of the chain
    pub async fn call(self, ctx: &mut ActionContext) -> Result<()> {
        match self.rest {
            Some(rest) => run_from(rest.chain, rest.run, rest.index, ctx).await,
            None => Ok(()),
        }
    }
}

fn run_from<'a>(
    chain: &'a Chain,
    run: &'a mut RunState,
    index: usize,
    ctx: &'a mut ActionContext,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let link = chain.link(index);
        run.started.push(index);
        debug!(action = %link.tag, position = index, "starting action");

        let next = match link.next {
            Some(next_index) => Next {
                rest: Some(Rest {
                    chain,
                    run: &mut *run,
                    index: next_index,
                }),
            },
            None => Next::terminal(),
        };
        let result = link.action.call(ctx, next).await;

        match (&result, run.origin) {
            (Err(_), None) => run.origin = Some(index),
            (Ok(()), Some(origin)) => {
                warn!(
                    action = %link.tag,
                    faulted = %chain.link(origin).tag,
                    "action returned success after a downstream fault"
                );
                run.origin = None;
            }
            _ => {}
        }
        result
    })
}

/// Run the compensating steps of `started` newest first, skipping
/// `origin`. Returns the indexes unwound, in unwind order.
pub(crate) async fn compensate(
    chain: &Chain,
    started: &[usize],
    origin: Option<usize>,
    ctx: &mut ActionContext,
) -> Vec<usize> {
    let mut unwound = Vec::with_capacity(started.len());
    for &index in started.iter().rev() {
        if Some(index) == origin {
            continue;
        }
        let link = chain.link(index);
        debug!(action = %link.tag, "recovering action");
        if let Err(secondary) = link.action.recover(ctx).await {
            error!(action = %link.tag, error = %secondary, "compensating step failed");
            ctx.record_recovery_fault(link.tag.as_str(), secondary);
        }
        unwound.push(index);
    }
    unwound
}

/// Executes one compiled chain against one context
pub struct Warden<'c> {
    chain: &'c Chain,
    state: WardenState,
    run: RunState,
    unwound: Vec<usize>,
}

impl<'c> Warden<'c> {
    pub fn new(chain: &'c Chain) -> Self {
        Self {
            chain,
            state: WardenState::Idle,
            run: RunState::default(),
            unwound: Vec::new(),
        }
    }

    pub fn state(&self) -> WardenState {
        self.state
    }

    /// Run the chain. On failure, returns the original fault after the
    /// unwind has finished.
    pub async fn call(&mut self, ctx: &mut ActionContext) -> Result<()> {
        if self.state != WardenState::Idle {
            return Err(ActionError::WardenReused(self.state.to_string()));
        }
        self.state = WardenState::Running;

        let Some(head) = self.chain.head() else {
            self.state = WardenState::Succeeded;
            return Ok(());
        };

        match run_from(self.chain, &mut self.run, head, ctx).await {
            Ok(()) => {
                info!(actions = self.run.started.len(), "action chain completed");
                self.state = WardenState::Succeeded;
                Ok(())
            }
            Err(fault) => {
                self.state = WardenState::Unwinding;
                warn!(
                    error = %fault,
                    faulted = ?self.faulted(),
                    started = self.run.started.len(),
                    "action chain failed, unwinding"
                );
                ctx.record_failure(fault.clone());
                self.unwind(ctx).await;
                self.state = WardenState::Failed;
                Err(fault)
            }
        }
    }

    async fn unwind(&mut self, ctx: &mut ActionContext) {
        self.unwound = compensate(self.chain, &self.run.started, self.run.origin, ctx).await;
    }

    /// Chain indexes of started actions, in start order
    pub(crate) fn started_indexes(&self) -> &[usize] {
        &self.run.started
    }

    /// Tags of actions whose forward step started, in start order
    pub fn started(&self) -> Vec<&str> {
        self.tags_at(&self.run.started)
    }

    /// Tags of actions unwound, in unwind order
    pub fn unwound(&self) -> Vec<&str> {
        self.tags_at(&self.unwound)
    }

    /// Tag of the action the fault came from
    pub fn faulted(&self) -> Option<&str> {
        self.run
            .origin
            .map(|index| self.chain.link(index).tag.as_str())
    }

    fn tags_at(&self, indexes: &[usize]) -> Vec<&str> {
        indexes
            .iter()
            .map(|&index| self.chain.link(index).tag.as_str())
            .collect()
    }
}

impl fmt::Debug for Warden<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warden")
            .field("chain", self.chain)
            .field("state", &self.state)
            .field("started", &self.started())
            .field("unwound", &self.unwound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ActionDescriptor, Builder};
    use crate::traits::{Action, FailingAction, NoopAction};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone)]
    struct Step {
        name: &'static str,
        log: Log,
        fail_call: bool,
        fail_recover: bool,
        swallow: bool,
        fail_after: bool,
    }

    impl Step {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: log.clone(),
                fail_call: false,
                fail_recover: false,
                swallow: false,
                fail_after: false,
            }
        }

        /// Ignores any fault from the rest of the chain
        fn swallowing(mut self) -> Self {
            self.swallow = true;
            self
        }

        /// Faults after the rest of the chain returned
        fn failing_after(mut self) -> Self {
            self.fail_after = true;
            self
        }

        fn failing(mut self) -> Self {
            self.fail_call = true;
            self
        }

        fn failing_recover(mut self) -> Self {
            self.fail_recover = true;
            self
        }
    }

    #[async_trait]
    impl Action for Step {
        async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
            self.log.lock().unwrap().push(format!("call:{}", self.name));
            if self.fail_call {
                return Err(ActionError::ExecutionFailed(self.name.to_string()));
            }
            let result = next.call(ctx).await;
            if self.swallow {
                return Ok(());
            }
            result?;
            if self.fail_after {
                return Err(ActionError::ExecutionFailed(format!("after {}", self.name)));
            }
            Ok(())
        }

        async fn recover(&self, _ctx: &mut ActionContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("recover:{}", self.name));
            if self.fail_recover {
                return Err(ActionError::ExecutionFailed(format!("recover {}", self.name)));
            }
            Ok(())
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn chain_of(steps: Vec<Step>) -> Chain {
        let mut builder = Builder::new();
        for step in steps {
            builder.use_action(ActionDescriptor::from_action(step.name, step));
        }
        builder.compile().unwrap()
    }

    #[tokio::test]
    async fn test_success_runs_no_recovery() {
        let log = Log::default();
        let chain = chain_of(vec![
            Step::new("a", &log),
            Step::new("b", &log),
            Step::new("c", &log),
        ]);
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        warden.call(&mut ctx).await.unwrap();

        assert_eq!(warden.state(), WardenState::Succeeded);
        assert_eq!(entries(&log), vec!["call:a", "call:b", "call:c"]);
        assert!(warden.unwound().is_empty());
        assert!(ctx.failure().is_none());
    }

    #[tokio::test]
    async fn test_failure_unwinds_prior_actions_in_reverse() {
        let log = Log::default();
        let chain = chain_of(vec![
            Step::new("a", &log),
            Step::new("b", &log),
            Step::new("c", &log).failing(),
            Step::new("d", &log),
        ]);
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        let err = warden.call(&mut ctx).await.unwrap_err();

        assert_eq!(err.to_string(), "action execution failed: c");
        assert_eq!(warden.state(), WardenState::Failed);
        assert_eq!(
            entries(&log),
            vec!["call:a", "call:b", "call:c", "recover:b", "recover:a"]
        );
        assert_eq!(warden.started(), vec!["a", "b", "c"]);
        assert_eq!(warden.unwound(), vec!["b", "a"]);
        assert_eq!(warden.faulted(), Some("c"));
        assert_eq!(ctx.failure().map(|e| e.to_string()), Some(err.to_string()));
    }

    #[tokio::test]
    async fn test_first_action_failing_unwinds_nothing() {
        let log = Log::default();
        let chain = chain_of(vec![Step::new("a", &log).failing(), Step::new("b", &log)]);
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        assert!(warden.call(&mut ctx).await.is_err());
        assert_eq!(entries(&log), vec!["call:a"]);
        assert!(warden.unwound().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_fault_does_not_replace_original() {
        let log = Log::default();
        let chain = chain_of(vec![
            Step::new("a", &log),
            Step::new("b", &log).failing_recover(),
            Step::new("c", &log).failing(),
        ]);
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        let err = warden.call(&mut ctx).await.unwrap_err();

        assert_eq!(err.to_string(), "action execution failed: c");
        assert_eq!(
            entries(&log),
            vec!["call:a", "call:b", "call:c", "recover:b", "recover:a"]
        );
        assert_eq!(ctx.recovery_faults().len(), 1);
        assert_eq!(ctx.recovery_faults()[0].action, "b");
        assert_eq!(
            ctx.failure().map(|e| e.to_string()),
            Some("action execution failed: c".to_string())
        );
    }

    #[tokio::test]
    async fn test_actions_without_recover_count_as_unwound() {
        let mut builder = Builder::new();
        builder
            .use_action(ActionDescriptor::from_action("noop", NoopAction))
            .use_action(ActionDescriptor::from_action("fail", FailingAction::new("x")));
        let chain = builder.compile().unwrap();
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        assert!(warden.call(&mut ctx).await.is_err());
        assert_eq!(warden.unwound(), vec!["noop"]);
    }

    #[tokio::test]
    async fn test_warden_is_single_use() {
        let log = Log::default();
        let chain = chain_of(vec![Step::new("a", &log)]);
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        warden.call(&mut ctx).await.unwrap();
        let err = warden.call(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ActionError::WardenReused(ref s) if s == "succeeded"));
        assert_eq!(entries(&log), vec!["call:a"]);
    }

    #[tokio::test]
    async fn test_empty_chain_succeeds() {
        let chain = Builder::new().compile().unwrap();
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        warden.call(&mut ctx).await.unwrap();
        assert!(warden.state().is_terminal());
    }

    #[tokio::test]
    async fn test_terminal_next() {
        let next = Next::terminal();
        assert!(next.is_terminal());
        assert!(next.call(&mut ActionContext::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_swallowed_fault_counts_as_success() {
        let log = Log::default();
        let chain = chain_of(vec![
            Step::new("a", &log),
            Step::new("b", &log).swallowing(),
            Step::new("c", &log).failing(),
        ]);
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        warden.call(&mut ctx).await.unwrap();

        assert_eq!(warden.state(), WardenState::Succeeded);
        assert_eq!(entries(&log), vec!["call:a", "call:b", "call:c"]);
        assert_eq!(warden.faulted(), None);
        assert!(ctx.failure().is_none());
    }

    #[tokio::test]
    async fn test_fault_after_swallow_gets_its_own_origin() {
        let log = Log::default();
        let chain = chain_of(vec![
            Step::new("a", &log).failing_after(),
            Step::new("b", &log).swallowing(),
            Step::new("c", &log).failing(),
        ]);
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        let err = warden.call(&mut ctx).await.unwrap_err();

        assert_eq!(err.to_string(), "action execution failed: after a");
        assert_eq!(warden.faulted(), Some("a"));
        assert_eq!(warden.unwound(), vec!["c", "b"]);
        assert_eq!(
            entries(&log),
            vec!["call:a", "call:b", "call:c", "recover:c", "recover:b"]
        );
    }

    #[tokio::test]
    async fn test_compiled_chains_behave_identically() {
        let log = Log::default();
        let mut builder = Builder::new();
        for step in [
            Step::new("a", &log),
            Step::new("b", &log).failing_recover(),
            Step::new("c", &log).failing(),
            Step::new("d", &log),
        ] {
            builder.use_action(ActionDescriptor::from_action(step.name, step));
        }

        let mut runs = Vec::new();
        for _ in 0..2 {
            let chain = builder.compile().unwrap();
            let mut ctx = ActionContext::new();
            let result = Warden::new(&chain).call(&mut ctx).await;
            runs.push((
                std::mem::take(&mut *log.lock().unwrap()),
                result.map_err(|e| e.to_string()),
                ctx.recovery_faults().len(),
            ));
        }

        assert_eq!(runs[0], runs[1]);
        assert_eq!(
            runs[0].0,
            vec!["call:a", "call:b", "call:c", "recover:b", "recover:a"]
        );
    }

    #[tokio::test]
    async fn test_nested_actions_recovered_after_later_fault() {
        let log = Log::default();
        let mut inner = Builder::new();
        for step in [Step::new("inner_a", &log), Step::new("inner_b", &log)] {
            inner.use_action(ActionDescriptor::from_action(step.name, step));
        }

        let mut outer = Builder::new();
        outer
            .use_action(ActionDescriptor::from_action("outer_a", Step::new("outer_a", &log)))
            .use_action(inner.into_descriptor("nested"))
            .use_action(ActionDescriptor::from_action(
                "outer_b",
                Step::new("outer_b", &log).failing(),
            ));
        let chain = outer.compile().unwrap();
        let mut ctx = ActionContext::new();
        let mut warden = Warden::new(&chain);

        warden.call(&mut ctx).await.unwrap_err();

        assert_eq!(
            entries(&log),
            vec![
                "call:outer_a",
                "call:inner_a",
                "call:inner_b",
                "call:outer_b",
                "recover:inner_b",
                "recover:inner_a",
                "recover:outer_a",
            ]
        );
        assert_eq!(warden.unwound(), vec!["nested", "outer_a"]);
    }
}
