//! Runtime types.

use chrono::{DateTime, Utc};
use llamatray_core::{FetchError, FetchErrorKind};
use serde::Serialize;

/// Placeholder display line when nothing is loaded.
pub const IDLE_DISPLAY_LINE: &str = "OLLAMA (0MB)";

/// Classification of the current load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// No models running.
    Idle,
    /// At least one running model has memory on the accelerator.
    Gpu,
    /// Models are running, none on the accelerator.
    Cpu,
}

impl ExecutionMode {
    /// Style cue for the indicator icon.
    pub fn presentation_cue(&self) -> &'static str {
        match self {
            ExecutionMode::Idle => "inactive",
            ExecutionMode::Gpu => "gpu-active",
            ExecutionMode::Cpu => "cpu-active",
        }
    }

    /// Label used in the tooltip.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionMode::Idle => "Inactive",
            ExecutionMode::Gpu => "GPU",
            ExecutionMode::Cpu => "CPU",
        }
    }
}

/// One model in the view model's lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub name: String,
    pub size_mb: f64,
    pub vram_mb: f64,
    pub is_running: bool,
}

/// Fully derived snapshot of one successful refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    pub running_count: usize,
    pub total_count: usize,
    pub total_ram_mb: f64,
    pub total_vram_mb: f64,
    /// Configured GPU memory; 0 means unset.
    pub gpu_capacity_mb: u32,
    /// May exceed 100 when the configured capacity is too small.
    pub gpu_utilization_percent: u32,
    pub execution_mode: ExecutionMode,
    /// `None` when tray text is switched off.
    pub display_line: Option<String>,
    /// Running models in the order the daemon reported them.
    pub running: Vec<ModelStatus>,
    /// Catalog plus running-only models, sorted by name.
    pub per_model_status: Vec<ModelStatus>,
}

/// Published in place of a view model when a cycle fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorState {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl From<&FetchError> for ErrorState {
    fn from(err: &FetchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RefreshState {
    Ready(ViewModel),
    Failed(ErrorState),
}

/// What the scheduler hands to its sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    /// Monotonic publish counter, starting at 1.
    pub cycle: u64,
    pub published_at: DateTime<Utc>,
    pub state: RefreshState,
}

impl StatusUpdate {
    pub fn view(&self) -> Option<&ViewModel> {
        match &self.state {
            RefreshState::Ready(view) => Some(view),
            RefreshState::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorState> {
        match &self.state {
            RefreshState::Ready(_) => None,
            RefreshState::Failed(err) => Some(err),
        }
    }
}
