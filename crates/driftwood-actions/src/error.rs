//! Error types for the action pipeline
//!
//! Every fault raised by an action, the sequence builder or the warden is
//! an [`ActionError`]. Faults are grouped into [`FaultKind`]s so that
//! compensating steps can decide whether cleanup is appropriate.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Classification of an [`ActionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// A pre-flight check failed before anything was mutated
    Validation,
    /// A required artifact is missing from a supplied resource tree
    Structural,
    /// A collaborator returned data in a shape we cannot use
    Integrity,
    /// A filesystem entry already occupies the destination
    Collision,
    /// A builder or registry lookup failed
    Reference,
    /// An action or backend failed while doing its work
    Execution,
    /// Raw I/O or serialization failure
    Io,
}

/// Error type for action execution
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// No action registered under this tag
    #[error("action not found: {0}")]
    ActionNotFound(String),

    /// Builder mutation referenced a tag that is not in the sequence
    #[error("reference not found in action sequence: {0}")]
    ReferenceNotFound(String),

    /// Positional insert past the end of the sequence
    #[error("index {index} out of bounds for sequence of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A warden was asked to run a second time
    #[error("warden has already run (state: {0})")]
    WardenReused(String),

    /// A reserved context handle was required but not set
    #[error("missing context value: {0}")]
    MissingContext(&'static str),

    /// Extension keys must look like `namespace.name`
    #[error("invalid context key '{0}' (expected 'namespace.name')")]
    InvalidContextKey(String),

    /// Invalid action construction parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The package output path is already a directory
    #[error("package output is a directory: {}", .0.display())]
    PackageOutputDirectory(PathBuf),

    /// The package output path already exists
    #[error("package output already exists: {}", .0.display())]
    PackageOutputExists(PathBuf),

    /// Packaging needs an existing source directory
    #[error("package requires an existing directory to package")]
    PackageRequiresDirectory,

    /// A file listed for inclusion does not exist
    #[error("package include file not found: {}", .0.display())]
    PackageIncludeMissing(PathBuf),

    /// Copying include files ran into an existing symlink
    #[error("package include contains a symlink that already exists at {}", .0.display())]
    PackageIncludeSymlink(PathBuf),

    /// The box has no machine definition file
    #[error("box for machine '{machine}' has no machine definition file in {}", .dir.display())]
    MachineConfigNotFound { machine: String, dir: PathBuf },

    /// The box has no disk image
    #[error("box for machine '{machine}' has no disk image in {}", .dir.display())]
    DiskImageNotFound { machine: String, dir: PathBuf },

    /// The backend returned an identifier we cannot interpret
    #[error("backend returned an unusable machine identifier: {0}")]
    InvalidIdentifier(String),

    /// The backend driver failed
    #[error("driver error: {0}")]
    Driver(String),

    /// Action execution failed
    #[error("action execution failed: {0}")]
    ExecutionFailed(String),

    /// I/O error during action execution
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),
}

impl ActionError {
    /// The fault kind this error belongs to
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::PackageOutputDirectory(_)
            | Self::PackageOutputExists(_)
            | Self::PackageRequiresDirectory
            | Self::PackageIncludeMissing(_)
            | Self::InvalidParameters(_)
            | Self::InvalidContextKey(_)
            | Self::MissingContext(_) => FaultKind::Validation,
            Self::MachineConfigNotFound { .. } | Self::DiskImageNotFound { .. } => {
                FaultKind::Structural
            }
            Self::InvalidIdentifier(_) => FaultKind::Integrity,
            Self::PackageIncludeSymlink(_) => FaultKind::Collision,
            Self::ActionNotFound(_)
            | Self::ReferenceNotFound(_)
            | Self::IndexOutOfBounds { .. }
            | Self::WardenReused(_) => FaultKind::Reference,
            Self::Driver(_) | Self::ExecutionFailed(_) => FaultKind::Execution,
            Self::Io(_) | Self::Serialization(_) => FaultKind::Io,
        }
    }

    /// True for faults known to precede any side effect of the packaging
    /// action. Only these two skip the partial-output cleanup.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::PackageOutputExists(_) | Self::PackageOutputDirectory(_)
        )
    }

    /// Name of the target resource for structural faults
    pub fn machine_name(&self) -> Option<&str> {
        match self {
            Self::MachineConfigNotFound { machine, .. }
            | Self::DiskImageNotFound { machine, .. } => Some(machine),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

/// Result type for action operations
pub type Result<T> = std::result::Result<T, ActionError>;
