//! Plain-text presentation of published updates: panel label, tooltip and
//! menu sections.

use llamatray_core::metrics::format_human_readable;
use serde::Serialize;

use crate::types::{ExecutionMode, ModelStatus, RefreshState, StatusUpdate, ViewModel};

pub const RUNNING_MARK: &str = "●";
pub const STOPPED_MARK: &str = "○";

/// Everything a panel indicator shows for one update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelText {
    /// Icon style cue, e.g. `gpu-active`.
    pub cue: &'static str,
    /// GPU percentage label, e.g. `44%`.
    pub percent: String,
    /// Text beside the icon; absent when tray text is off.
    pub label: Option<String>,
    /// Total RAM figure, or `Error` after a failed cycle.
    pub ram: String,
    pub tooltip: String,
    pub running: Vec<String>,
    pub catalog: Vec<String>,
    pub gpu_status: String,
}

impl PanelText {
    /// Render as a block of lines for a terminal.
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut head = format!("[{}] {} RAM: {}", self.cue, self.percent, self.ram);
        if let Some(label) = &self.label {
            head.push_str("  ");
            head.push_str(label);
        }
        lines.push(head);
        lines.push("Running Models".into());
        lines.extend(self.running.iter().map(|l| format!("  {}", l)));
        lines.push("All Local Models".into());
        lines.extend(self.catalog.iter().map(|l| format!("  {}", l)));
        lines.push(self.gpu_status.clone());
        lines
    }
}

/// Render an update. A failed cycle shows empty lists and `Error` in place
/// of the RAM figure; `gpu_capacity_mb` fills the GPU line in that case.
pub fn render(update: &StatusUpdate, gpu_capacity_mb: u32) -> PanelText {
    match &update.state {
        RefreshState::Ready(view) => render_view(view),
        RefreshState::Failed(_) => PanelText {
            cue: ExecutionMode::Idle.presentation_cue(),
            percent: "0%".into(),
            label: None,
            ram: "Error".into(),
            tooltip: tooltip(0, 0, ExecutionMode::Idle, 0.0, gpu_capacity_mb, 0),
            running: vec![NO_RUNNING.into()],
            catalog: vec![NO_CATALOG.into()],
            gpu_status: gpu_status(0.0, gpu_capacity_mb, 0),
        },
    }
}

const NO_RUNNING: &str = "No models running";
const NO_CATALOG: &str = "No local models found";

pub fn render_view(view: &ViewModel) -> PanelText {
    let running: Vec<String> = view.running.iter().map(running_line).collect();
    let catalog: Vec<String> = view.per_model_status.iter().map(catalog_line).collect();

    PanelText {
        cue: view.execution_mode.presentation_cue(),
        percent: format!("{}%", view.gpu_utilization_percent),
        label: view.display_line.clone(),
        ram: format!("{} MB", view.total_vram_mb.round() as u64),
        tooltip: tooltip(
            view.running_count,
            view.total_count,
            view.execution_mode,
            view.total_vram_mb,
            view.gpu_capacity_mb,
            view.gpu_utilization_percent,
        ),
        running: or_placeholder(running, NO_RUNNING),
        catalog: or_placeholder(catalog, NO_CATALOG),
        gpu_status: gpu_status(
            view.total_vram_mb,
            view.gpu_capacity_mb,
            view.gpu_utilization_percent,
        ),
    }
}

fn or_placeholder(lines: Vec<String>, empty: &str) -> Vec<String> {
    if lines.is_empty() {
        vec![empty.to_string()]
    } else {
        lines
    }
}

fn running_line(model: &ModelStatus) -> String {
    format!(
        "{} (Size: {}, VRAM: {})",
        model.name,
        format_human_readable(model.size_mb),
        format_human_readable(model.vram_mb)
    )
}

fn catalog_line(model: &ModelStatus) -> String {
    let mark = if model.is_running {
        RUNNING_MARK
    } else {
        STOPPED_MARK
    };
    format!("{} {} ({})", mark, model.name, format_human_readable(model.size_mb))
}

fn tooltip(
    running: usize,
    total: usize,
    mode: ExecutionMode,
    vram_mb: f64,
    capacity_mb: u32,
    percent: u32,
) -> String {
    format!(
        "Ollama - {} running, {} total\nMode: {}\nGPU: {} / {} MB ({}%)",
        running,
        total,
        mode.label(),
        vram_mb.round() as u64,
        capacity_mb,
        percent
    )
}

fn gpu_status(vram_mb: f64, capacity_mb: u32, percent: u32) -> String {
    if vram_mb <= 0.0 {
        format!("GPU RAM: {} MB", capacity_mb)
    } else {
        format!(
            "GPU RAM: {} / {} MB ({}%)",
            vram_mb.round() as u64,
            capacity_mb,
            percent
        )
    }
}
