//! Typed construction parameters for the built-in actions
//!
//! Descriptors carry their parameters as JSON. Each built-in action
//! deserializes them into one of these structs; a `null` value means
//! "all defaults".

use crate::error::{ActionError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Default archive name when the caller gives none
pub const DEFAULT_PACKAGE_OUTPUT: &str = "package.box";

/// Deserialize action parameters, treating `null` as the default value
pub fn from_params<T>(params: &Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| ActionError::InvalidParameters(e.to_string()))
}

/// Machine sizing passed to the backend on import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportOptions {
    /// Name for the machine on the backend
    pub vmname: Option<String>,

    /// Startup memory in MB
    pub memory: Option<u64>,

    /// Dynamic memory ceiling in MB
    pub maxmemory: Option<u64>,

    pub cpus: Option<u32>,

    /// Create a differencing disk instead of copying the image
    pub linked_clone: bool,
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vmname(mut self, name: impl Into<String>) -> Self {
        self.vmname = Some(name.into());
        self
    }

    pub fn with_memory(mut self, mb: u64) -> Self {
        self.memory = Some(mb);
        self
    }

    pub fn with_maxmemory(mut self, mb: u64) -> Self {
        self.maxmemory = Some(mb);
        self
    }

    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn with_linked_clone(mut self, linked: bool) -> Self {
        self.linked_clone = linked;
        self
    }

    /// Reject sizing the backend would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.cpus == Some(0) {
            return Err(ActionError::InvalidParameters(
                "cpus must be at least 1".to_string(),
            ));
        }
        if let (Some(memory), Some(max)) = (self.memory, self.maxmemory) {
            if max < memory {
                return Err(ActionError::InvalidParameters(format!(
                    "maxmemory ({max} MB) is below memory ({memory} MB)"
                )));
            }
        }
        Ok(())
    }
}

/// Defaults for the package folder setup action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageDefaults {
    /// Archive path used when `package.output` is unset
    pub output: PathBuf,

    /// Parent for scratch directories; the machine's `tmp` dir otherwise
    pub temp_dir: Option<PathBuf>,
}

impl Default for PackageDefaults {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_PACKAGE_OUTPUT),
            temp_dir: None,
        }
    }
}

impl PackageDefaults {
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }
}
