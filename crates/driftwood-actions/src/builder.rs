//! Sequence builder
//!
//! A [`Builder`] is an ordered list of [`ActionDescriptor`]s. Callers and
//! extensions mutate it by referencing actions through their stable
//! [`ActionTag`], then [`Builder::compile`] turns it into an immutable
//! [`Chain`] of action instances for one run.

use crate::context::ActionContext;
use crate::error::{ActionError, Result};
use crate::traits::Action;
use crate::warden::{compensate, Next, Warden};
use async_trait::async_trait;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Stable identity of an action kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionTag(Cow<'static, str>);

impl ActionTag {
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    pub fn new(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ActionTag {
    fn from(tag: &'static str) -> Self {
        Self::from_static(tag)
    }
}

impl From<String> for ActionTag {
    fn from(tag: String) -> Self {
        Self::new(tag)
    }
}

impl PartialEq<str> for ActionTag {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

/// Builds an action instance from its construction parameters
pub type ActionFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Action>> + Send + Sync>;

/// Identity tag plus construction parameters for one action
#[derive(Clone)]
pub struct ActionDescriptor {
    tag: ActionTag,
    params: Value,
    factory: ActionFactory,
}

impl ActionDescriptor {
    pub fn new<F>(tag: impl Into<ActionTag>, params: Value, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Box<dyn Action>> + Send + Sync + 'static,
    {
        Self::from_factory(tag, params, Arc::new(factory))
    }

    pub fn from_factory(tag: impl Into<ActionTag>, params: Value, factory: ActionFactory) -> Self {
        Self {
            tag: tag.into(),
            params,
            factory,
        }
    }

    /// Descriptor that hands out clones of a prototype action
    pub fn from_action<A>(tag: impl Into<ActionTag>, action: A) -> Self
    where
        A: Action + Clone + 'static,
    {
        Self::new(tag, Value::Null, move |_| Ok(Box::new(action.clone())))
    }

    pub fn tag(&self) -> &ActionTag {
        &self.tag
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Instantiate the action
    pub fn build(&self) -> Result<Box<dyn Action>> {
        (self.factory)(&self.params)
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("tag", &self.tag)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Ordered, mutable list of action descriptors
///
/// All reference lookups use first-match semantics on the tag and fail
/// with [`ActionError::ReferenceNotFound`] when the tag is absent.
///
/// ```
/// use driftwood_actions::{ActionDescriptor, Builder, NoopAction};
///
/// let mut builder = Builder::new();
/// builder.use_action(ActionDescriptor::from_action("export", NoopAction));
/// builder
///     .insert_before("export", ActionDescriptor::from_action("halt", NoopAction))
///     .unwrap();
///
/// assert_eq!(builder.tags(), vec!["halt", "export"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    stack: Vec<ActionDescriptor>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action
    pub fn use_action(&mut self, descriptor: ActionDescriptor) -> &mut Self {
        debug!(action = %descriptor.tag, "appending action");
        self.stack.push(descriptor);
        self
    }

    /// Put an action at the front
    pub fn prepend(&mut self, descriptor: ActionDescriptor) -> &mut Self {
        debug!(action = %descriptor.tag, "prepending action");
        self.stack.insert(0, descriptor);
        self
    }

    /// Insert at a position; `index == len` appends
    pub fn insert(&mut self, index: usize, descriptor: ActionDescriptor) -> Result<()> {
        if index > self.stack.len() {
            return Err(ActionError::IndexOutOfBounds {
                index,
                len: self.stack.len(),
            });
        }
        debug!(action = %descriptor.tag, index, "inserting action");
        self.stack.insert(index, descriptor);
        Ok(())
    }

    pub fn insert_before(&mut self, reference: &str, descriptor: ActionDescriptor) -> Result<()> {
        let index = self.position(reference)?;
        debug!(action = %descriptor.tag, reference, "inserting action before reference");
        self.stack.insert(index, descriptor);
        Ok(())
    }

    pub fn insert_after(&mut self, reference: &str, descriptor: ActionDescriptor) -> Result<()> {
        let index = self.position(reference)?;
        debug!(action = %descriptor.tag, reference, "inserting action after reference");
        self.stack.insert(index + 1, descriptor);
        Ok(())
    }

    /// Swap the first `reference` for `descriptor`, keeping its position
    pub fn replace(&mut self, reference: &str, descriptor: ActionDescriptor) -> Result<()> {
        let index = self.position(reference)?;
        debug!(action = %descriptor.tag, reference, "replacing action");
        self.stack[index] = descriptor;
        Ok(())
    }

    /// Remove the first occurrence of `reference`
    pub fn delete(&mut self, reference: &str) -> Result<ActionDescriptor> {
        let index = self.position(reference)?;
        debug!(reference, index, "deleting action");
        Ok(self.stack.remove(index))
    }

    /// Append all of `other`'s actions after ours
    pub fn merge(&mut self, other: Builder) -> &mut Self {
        debug!(count = other.stack.len(), "merging builder");
        self.stack.extend(other.stack);
        self
    }

    pub fn index_of(&self, reference: &str) -> Option<usize> {
        self.stack.iter().position(|d| d.tag == *reference)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.index_of(reference).is_some()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn tags(&self) -> Vec<&str> {
        self.stack.iter().map(|d| d.tag.as_str()).collect()
    }

    pub fn descriptors(&self) -> &[ActionDescriptor] {
        &self.stack
    }

    /// Instantiate every descriptor in order and link each to its
    /// successor. Does not touch the builder.
    pub fn compile(&self) -> Result<Chain> {
        let len = self.stack.len();
        let links = self
            .stack
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                Ok(ChainLink {
                    tag: descriptor.tag.clone(),
                    action: descriptor.build()?,
                    next: (index + 1 < len).then_some(index + 1),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(actions = len, "compiled action chain");
        Ok(Chain { links })
    }

    /// Wrap this builder as a single action.
    ///
    /// The nested sequence runs under its own warden; the outer chain
    /// continues only if it succeeds.
    pub fn into_descriptor(self, tag: impl Into<ActionTag>) -> ActionDescriptor {
        let inner = self;
        ActionDescriptor::new(tag, Value::Null, move |_| {
            Ok(Box::new(NestedChain {
                inner: inner.clone(),
                completed: Mutex::new(None),
            }))
        })
    }

    fn position(&self, reference: &str) -> Result<usize> {
        self.index_of(reference)
            .ok_or_else(|| ActionError::ReferenceNotFound(reference.to_string()))
    }
}

pub(crate) struct ChainLink {
    pub(crate) tag: ActionTag,
    pub(crate) action: Box<dyn Action>,
    /// `None` marks the end of the chain
    pub(crate) next: Option<usize>,
}

/// Compiled, immutable sequence of action instances
pub struct Chain {
    links: Vec<ChainLink>,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn tags(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.tag.as_str()).collect()
    }

    pub(crate) fn head(&self) -> Option<usize> {
        (!self.links.is_empty()).then_some(0)
    }

    pub(crate) fn link(&self, index: usize) -> &ChainLink {
        &self.links[index]
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("actions", &self.tags()).finish()
    }
}

struct NestedChain {
    inner: Builder,
    /// Inner chain and the actions it started, kept once it succeeds
    completed: Mutex<Option<(Chain, Vec<usize>)>>,
}

impl NestedChain {
    fn completed(&self) -> MutexGuard<'_, Option<(Chain, Vec<usize>)>> {
        self.completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Action for NestedChain {
    fn description(&self) -> &str {
        "Runs a nested action sequence"
    }

    async fn call(&self, ctx: &mut ActionContext, next: Next<'_>) -> Result<()> {
        let chain = self.inner.compile()?;
        let mut warden = Warden::new(&chain);
        warden.call(ctx).await?;
        let started = warden.started_indexes().to_vec();

        *self.completed() = Some((chain, started));
        next.call(ctx).await
    }

    /// Unwind the inner actions of a nested run that succeeded before a
    /// later outer action faulted.
    async fn recover(&self, ctx: &mut ActionContext) -> Result<()> {
        let completed = self.completed().take();
        if let Some((chain, started)) = completed {
            debug!(actions = started.len(), "recovering nested action sequence");
            compensate(&chain, &started, None, ctx).await;
        }
        Ok(())
    }
}
