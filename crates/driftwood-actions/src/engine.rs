//! Action registry and pipeline runner
//!
//! The [`ActionEngine`] owns the factories for every known action tag and
//! the hooks extensions have registered. Running an operation applies the
//! hooks for its [`HookPoint`] to the caller's builder, compiles it once
//! and hands the chain to a fresh [`Warden`].

use crate::builder::{ActionDescriptor, ActionFactory, ActionTag, Builder};
use crate::context::ActionContext;
use crate::error::{ActionError, Result};
use crate::hooks::{Hook, HookPoint, HookRegistry};
use crate::progress::Progress;
use crate::traits::Action;
use crate::warden::Warden;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The action registry
///
/// # Example
///
/// ```ignore
/// use driftwood_actions::{ActionEngine, Builder, HookPoint};
///
/// let engine = driftwood_actions::actions::create_engine_with_actions();
/// let mut builder = Builder::new();
/// builder.use_action(engine.descriptor("package_setup_folders", Value::Null)?);
/// builder.use_action(engine.descriptor("package", Value::Null)?);
///
/// engine.run(&HookPoint::MACHINE_ACTION_PACKAGE, builder, &mut ctx).await?;
/// ```
#[derive(Default)]
pub struct ActionEngine {
    /// Registered factories by tag
    factories: HashMap<String, (ActionTag, ActionFactory)>,

    hooks: HookRegistry,
}

impl ActionEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `tag`, replacing any previous one
    pub fn register<F>(&mut self, tag: impl Into<ActionTag>, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Action>> + Send + Sync + 'static,
    {
        let tag = tag.into();
        if self.factories.contains_key(tag.as_str()) {
            warn!(action = %tag, "replacing registered action");
        }
        self.factories
            .insert(tag.as_str().to_string(), (tag, Arc::new(factory)));
    }

    /// Register an action that needs no parameters
    pub fn register_action<A>(&mut self, tag: impl Into<ActionTag>, action: A)
    where
        A: Action + Clone + 'static,
    {
        self.register(tag, move |_| Ok(Box::new(action.clone())));
    }

    /// Check if an action is registered
    pub fn has_action(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// All registered tags, sorted
    pub fn action_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn action_count(&self) -> usize {
        self.factories.len()
    }

    /// Build a descriptor for a registered action
    pub fn descriptor(&self, tag: &str, params: Value) -> Result<ActionDescriptor> {
        let (tag, factory) = self
            .factories
            .get(tag)
            .ok_or_else(|| ActionError::ActionNotFound(tag.to_string()))?;
        Ok(ActionDescriptor::from_factory(
            tag.clone(),
            params,
            factory.clone(),
        ))
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn register_hook(&mut self, point: HookPoint, extension: impl Into<String>, hook: Hook) {
        self.hooks.register(point, extension, hook);
    }

    /// Run one operation.
    ///
    /// Hooks registered on `point` are applied to `builder` first. A hook
    /// or compile fault is returned before any action starts.
    pub async fn run(
        &self,
        point: &HookPoint,
        mut builder: Builder,
        ctx: &mut ActionContext,
    ) -> Result<()> {
        self.hooks.apply(point, &mut builder)?;
        let chain = builder.compile()?;

        debug!(point = %point, actions = ?chain.tags(), "running action chain");
        ctx.ui().report(Progress::starting(point.as_str()));

        let start = Instant::now();
        let result = Warden::new(&chain).call(ctx).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(()) => {
                info!(point = %point, elapsed_ms = elapsed.as_millis() as u64, "operation completed");
                ctx.ui().report(Progress::completed(point.as_str()));
            }
            Err(e) => {
                warn!(point = %point, error = %e, elapsed_ms = elapsed.as_millis() as u64, "operation failed");
                ctx.ui()
                    .report(Progress::new(point.as_str(), 0, format!("Failed: {}", e)));
            }
        }

        result
    }
}

impl std::fmt::Debug for ActionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEngine")
            .field("actions", &self.action_tags())
            .field("hooks", &self.hooks)
            .finish()
    }
}
