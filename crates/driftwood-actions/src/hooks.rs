//! Extension hook surface
//!
//! Extensions never talk to each other. Each one records the builder
//! mutations it wants in a [`Hook`] and registers it against a
//! [`HookPoint`] (one per operation kind). Before a builder for that
//! operation is compiled, every registered hook is replayed in
//! registration order.

use crate::builder::{ActionDescriptor, ActionTag, Builder};
use crate::error::Result;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Stable name of an operation kind extensions can hook into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HookPoint(Cow<'static, str>);

impl HookPoint {
    pub const MACHINE_ACTION_PACKAGE: HookPoint = HookPoint::from_static("machine_action_package");
    pub const MACHINE_ACTION_IMPORT: HookPoint = HookPoint::from_static("machine_action_import");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
enum HookOp {
    Before(ActionTag, ActionDescriptor),
    After(ActionTag, ActionDescriptor),
    Replace(ActionTag, ActionDescriptor),
    Delete(ActionTag),
    Prepend(ActionDescriptor),
    Append(ActionDescriptor),
}

/// Recorded builder mutations from one extension
#[derive(Debug, Clone, Default)]
pub struct Hook {
    ops: Vec<HookOp>,
}

impl Hook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before(&mut self, reference: impl Into<ActionTag>, descriptor: ActionDescriptor) -> &mut Self {
        self.ops.push(HookOp::Before(reference.into(), descriptor));
        self
    }

    pub fn after(&mut self, reference: impl Into<ActionTag>, descriptor: ActionDescriptor) -> &mut Self {
        self.ops.push(HookOp::After(reference.into(), descriptor));
        self
    }

    pub fn replace(&mut self, reference: impl Into<ActionTag>, descriptor: ActionDescriptor) -> &mut Self {
        self.ops.push(HookOp::Replace(reference.into(), descriptor));
        self
    }

    pub fn delete(&mut self, reference: impl Into<ActionTag>) -> &mut Self {
        self.ops.push(HookOp::Delete(reference.into()));
        self
    }

    pub fn prepend(&mut self, descriptor: ActionDescriptor) -> &mut Self {
        self.ops.push(HookOp::Prepend(descriptor));
        self
    }

    pub fn append(&mut self, descriptor: ActionDescriptor) -> &mut Self {
        self.ops.push(HookOp::Append(descriptor));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Replay the recorded mutations against `builder`, in record order
    pub fn apply(&self, builder: &mut Builder) -> Result<()> {
        for op in &self.ops {
            match op {
                HookOp::Before(reference, d) => builder.insert_before(reference.as_str(), d.clone())?,
                HookOp::After(reference, d) => builder.insert_after(reference.as_str(), d.clone())?,
                HookOp::Replace(reference, d) => builder.replace(reference.as_str(), d.clone())?,
                HookOp::Delete(reference) => {
                    builder.delete(reference.as_str())?;
                }
                HookOp::Prepend(d) => {
                    builder.prepend(d.clone());
                }
                HookOp::Append(d) => {
                    builder.use_action(d.clone());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct RegisteredHook {
    extension: String,
    hook: Hook,
}

/// Hooks by point, in registration order
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    points: HashMap<HookPoint, Vec<RegisteredHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, point: HookPoint, extension: impl Into<String>, hook: Hook) {
        let extension = extension.into();
        debug!(point = %point, extension = %extension, ops = hook.len(), "registering hook");
        self.points
            .entry(point)
            .or_default()
            .push(RegisteredHook { extension, hook });
    }

    /// Extensions with hooks on `point`, in registration order
    pub fn extensions(&self, point: &HookPoint) -> Vec<&str> {
        self.points
            .get(point)
            .map(|hooks| hooks.iter().map(|h| h.extension.as_str()).collect())
            .unwrap_or_default()
    }

    /// Apply every hook registered on `point` to `builder`.
    ///
    /// Stops at the first hook that fails; the builder keeps the
    /// mutations applied so far.
    pub fn apply(&self, point: &HookPoint, builder: &mut Builder) -> Result<()> {
        let Some(hooks) = self.points.get(point) else {
            return Ok(());
        };
        for registered in hooks {
            debug!(point = %point, extension = %registered.extension, "applying hook");
            if let Err(err) = registered.hook.apply(builder) {
                warn!(
                    point = %point,
                    extension = %registered.extension,
                    error = %err,
                    "hook failed to apply"
                );
                return Err(err);
            }
        }
        Ok(())
    }
}
