//! User-facing output for pipeline runs
//!
//! Actions report what they are doing through a [`ProgressReporter`]
//! held by the context. The reporter is the run's output sink; hosts
//! decide whether updates go to a terminal, a UI or the log.

use serde::{Deserialize, Serialize};

/// Progress update from an action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    /// Action tag
    pub action: String,

    /// Current progress percentage (0-100)
    pub percentage: u8,

    /// Human-readable status message
    pub message: String,

    /// Current phase of multi-phase actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Current phase number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_number: Option<u32>,

    /// Total number of phases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_phases: Option<u32>,
}

impl Progress {
    /// Create a new progress update
    pub fn new(action: impl Into<String>, percentage: u8, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            percentage: percentage.min(100),
            message: message.into(),
            phase: None,
            phase_number: None,
            total_phases: None,
        }
    }

    /// Create a "starting" progress update
    pub fn starting(action: impl Into<String>) -> Self {
        Self::new(action, 0, "Starting...")
    }

    /// Create a "completed" progress update
    pub fn completed(action: impl Into<String>) -> Self {
        Self::new(action, 100, "Completed")
    }

    /// Add phase information
    pub fn with_phase(
        mut self,
        phase: impl Into<String>,
        phase_number: u32,
        total_phases: u32,
    ) -> Self {
        self.phase = Some(phase.into());
        self.phase_number = Some(phase_number);
        self.total_phases = Some(total_phases);
        self
    }

    /// Check if this is a completed progress update
    pub fn is_complete(&self) -> bool {
        self.percentage >= 100
    }
}

/// Trait for types that can send progress updates
pub trait ProgressReporter: Send + Sync {
    /// Report progress
    fn report(&self, progress: Progress);
}

/// A no-op progress reporter
#[derive(Debug, Default, Clone)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _progress: Progress) {}
}

/// Forwards every update to `tracing` at info level
#[derive(Debug, Default, Clone)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, progress: Progress) {
        tracing::info!(
            action = %progress.action,
            percentage = progress.percentage,
            phase = ?progress.phase,
            "{}",
            progress.message
        );
    }
}

/// A progress reporter that collects all updates
#[derive(Debug, Default)]
pub struct CollectingReporter {
    updates: std::sync::Mutex<Vec<Progress>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<Progress> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<Progress> {
        self.lock().last().cloned()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|p| p.message.clone()).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Progress>> {
        // Poisoned lock still holds every update pushed before the panic.
        self.updates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, progress: Progress) {
        self.lock().push(progress);
    }
}
