//! Shared state threaded through one pipeline run
//!
//! The context has a small set of framework-owned handles with typed
//! accessors (output sink, target machine, provider driver, recorded
//! failure) and an open map for keys owned by individual actions. Open
//! keys are namespaced: `package.output`, `import.config_path`, ...

use crate::driver::Driver;
use crate::error::{ActionError, Result};
use crate::progress::{NoopReporter, ProgressReporter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handle for the machine a pipeline operates on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// Machine name from the environment definition
    pub name: String,

    /// Backend identifier, set once the backend knows the machine
    #[serde(default)]
    pub id: Option<String>,

    /// Provider the machine is bound to (e.g. "hyperv")
    pub provider_name: String,

    /// Per-machine state directory
    pub data_dir: PathBuf,

    /// Unpacked box the machine is created from
    #[serde(default)]
    pub box_dir: Option<PathBuf>,
}

impl Machine {
    pub fn new(
        name: impl Into<String>,
        provider_name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            id: None,
            provider_name: provider_name.into(),
            data_dir: data_dir.into(),
            box_dir: None,
        }
    }

    pub fn with_box_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.box_dir = Some(dir.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// A fault raised by a compensating step during unwinding
#[derive(Debug, Clone)]
pub struct RecoveryFault {
    /// Tag of the action whose compensating step failed
    pub action: String,
    pub error: ActionError,
}

/// Context provided to actions during execution
pub struct ActionContext {
    ui: Arc<dyn ProgressReporter>,
    machine: Option<Machine>,
    provider: Option<Arc<dyn Driver>>,

    /// Terminal failure of the run; written once
    failure: Option<ActionError>,

    recovery_faults: Vec<RecoveryFault>,

    data: HashMap<String, Value>,
}

impl Default for ActionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionContext {
    /// Create an empty context with a no-op output sink
    pub fn new() -> Self {
        Self {
            ui: Arc::new(NoopReporter),
            machine: None,
            provider: None,
            failure: None,
            recovery_faults: Vec::new(),
            data: HashMap::new(),
        }
    }

    /// Set the output sink
    pub fn with_ui(mut self, ui: Arc<dyn ProgressReporter>) -> Self {
        self.ui = ui;
        self
    }

    /// Set the target machine
    pub fn with_machine(mut self, machine: Machine) -> Self {
        self.machine = Some(machine);
        self
    }

    /// Set the provider driver
    pub fn with_provider(mut self, provider: Arc<dyn Driver>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set a namespaced value, builder style
    pub fn with_value(mut self, key: &str, value: impl Serialize) -> Result<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    /// Get the output sink
    pub fn ui(&self) -> &Arc<dyn ProgressReporter> {
        &self.ui
    }

    pub fn machine(&self) -> Option<&Machine> {
        self.machine.as_ref()
    }

    pub fn machine_mut(&mut self) -> Option<&mut Machine> {
        self.machine.as_mut()
    }

    /// The machine, or a `MissingContext` fault
    pub fn require_machine(&self) -> Result<&Machine> {
        self.machine
            .as_ref()
            .ok_or(ActionError::MissingContext("machine"))
    }

    pub fn provider(&self) -> Option<&Arc<dyn Driver>> {
        self.provider.as_ref()
    }

    /// The provider driver, or a `MissingContext` fault
    pub fn require_provider(&self) -> Result<&Arc<dyn Driver>> {
        self.provider
            .as_ref()
            .ok_or(ActionError::MissingContext("provider"))
    }

    /// The fault that ended the run, if any
    pub fn failure(&self) -> Option<&ActionError> {
        self.failure.as_ref()
    }

    /// Record the run's terminal failure.
    ///
    /// Only the first call has an effect; returns whether this call
    /// recorded the value.
    pub fn record_failure(&mut self, error: ActionError) -> bool {
        if self.failure.is_some() {
            return false;
        }
        self.failure = Some(error);
        true
    }

    pub fn recovery_faults(&self) -> &[RecoveryFault] {
        &self.recovery_faults
    }

    pub(crate) fn record_recovery_fault(&mut self, action: impl Into<String>, error: ActionError) {
        self.recovery_faults.push(RecoveryFault {
            action: action.into(),
            error,
        });
    }

    /// Read a namespaced value as `T`.
    ///
    /// Returns `Ok(None)` when the key is unset and a serialization
    /// fault when the stored value has the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.data.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Raw access to a namespaced value
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Store a namespaced value
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        validate_key(key)?;
        self.data.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// All keys under `namespace`, sorted
    pub fn keys_in(&self, namespace: &str) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .data
            .keys()
            .filter(|key| {
                key.split_once('.')
                    .is_some_and(|(ns, _)| ns == namespace)
            })
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        keys
    }
}

fn validate_key(key: &str) -> Result<()> {
    match key.split_once('.') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(ActionError::InvalidContextKey(key.to_string())),
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("machine", &self.machine.as_ref().map(|m| &m.name))
            .field(
                "provider",
                &self.provider.as_ref().map(|p| p.provider_name().to_string()),
            )
            .field("failure", &self.failure)
            .field("recovery_faults", &self.recovery_faults.len())
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}
