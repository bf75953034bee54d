//! Status aggregation: merges running and catalog sets into a [`ViewModel`].

use std::collections::HashMap;

use llamatray_core::metrics::sum_field;
use llamatray_core::{DisplaySettings, ModelRecord, SizeField};

use crate::types::{ExecutionMode, ModelStatus, ViewModel, IDLE_DISPLAY_LINE};

/// Names shown in the display line before collapsing into `+N`.
const DISPLAY_NAME_LIMIT: usize = 2;

/// Derive the view model for one cycle. Pure: equal inputs give equal output.
pub fn aggregate(
    running: &[ModelRecord],
    catalog: &[ModelRecord],
    settings: &DisplaySettings,
) -> ViewModel {
    let total_vram_mb = sum_field(running, SizeField::Vram);
    let total_ram_mb = sum_field(running, SizeField::Size);
    let execution_mode = execution_mode(running);
    let per_model_status = merge_models(running, catalog);

    ViewModel {
        running_count: running.len(),
        total_count: per_model_status.len(),
        total_ram_mb,
        total_vram_mb,
        gpu_capacity_mb: settings.gpu_capacity_mb,
        gpu_utilization_percent: gpu_utilization(total_vram_mb, settings.gpu_capacity_mb),
        execution_mode,
        display_line: settings
            .show_tray_text
            .then(|| display_line(running, total_vram_mb, total_ram_mb, settings)),
        running: running.iter().map(|m| status_of(m, true)).collect(),
        per_model_status,
    }
}

/// Rounded percentage of `capacity_mb` in use. Not clamped at 100.
pub fn gpu_utilization(vram_mb: f64, capacity_mb: u32) -> u32 {
    if capacity_mb == 0 {
        return 0;
    }
    (vram_mb / f64::from(capacity_mb) * 100.0).round() as u32
}

pub fn execution_mode(running: &[ModelRecord]) -> ExecutionMode {
    if running.is_empty() {
        ExecutionMode::Idle
    } else if running.iter().any(|m| m.vram_mb() > 0.0) {
        ExecutionMode::Gpu
    } else {
        ExecutionMode::Cpu
    }
}

fn status_of(record: &ModelRecord, is_running: bool) -> ModelStatus {
    ModelStatus {
        name: record.name.clone(),
        size_mb: record.size_mb(),
        vram_mb: record.vram_mb(),
        is_running,
    }
}

/// Catalog entries flagged against the running set, then running models the
/// catalog doesn't know about. Each group sorted by name, case-insensitively.
fn merge_models(running: &[ModelRecord], catalog: &[ModelRecord]) -> Vec<ModelStatus> {
    let live: HashMap<&str, &ModelRecord> =
        running.iter().map(|m| (m.name.as_str(), m)).collect();

    let mut listed: Vec<ModelStatus> = catalog
        .iter()
        .map(|m| match live.get(m.name.as_str()) {
            Some(loaded) => ModelStatus {
                vram_mb: loaded.vram_mb(),
                ..status_of(m, true)
            },
            None => status_of(m, false),
        })
        .collect();
    sort_by_name(&mut listed);

    let mut orphans: Vec<ModelStatus> = Vec::new();
    for record in running {
        let known = catalog.iter().any(|c| c.name == record.name)
            || orphans.iter().any(|o| o.name == record.name);
        if !known {
            orphans.push(status_of(record, true));
        }
    }
    sort_by_name(&mut orphans);

    listed.extend(orphans);
    listed
}

fn sort_by_name(models: &mut [ModelStatus]) {
    models.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn display_line(
    running: &[ModelRecord],
    total_vram_mb: f64,
    total_ram_mb: f64,
    settings: &DisplaySettings,
) -> String {
    if running.is_empty() {
        return IDLE_DISPLAY_LINE.to_string();
    }

    let mut models = running
        .iter()
        .take(DISPLAY_NAME_LIMIT)
        .map(ModelRecord::base_name)
        .collect::<Vec<_>>()
        .join(", ");
    if running.len() > DISPLAY_NAME_LIMIT {
        models.push_str(&format!("+{}", running.len() - DISPLAY_NAME_LIMIT));
    }

    let mut usage = Vec::new();
    if settings.show_gpu_usage {
        usage.push(format!("GPU:{}MB", total_vram_mb.round() as u64));
    }
    if settings.show_cpu_usage {
        usage.push(format!("CPU:{}MB", total_ram_mb.round() as u64));
    }

    if usage.is_empty() {
        models
    } else {
        format!("{} ({})", models, usage.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: f64 = 1024.0 * 1024.0;

    fn settings(gpu_capacity_mb: u32) -> DisplaySettings {
        DisplaySettings {
            gpu_capacity_mb,
            ..DisplaySettings::default()
        }
    }

    fn llama_scenario() -> (Vec<ModelRecord>, Vec<ModelRecord>) {
        let running = vec![ModelRecord::new("llama3:8b").with_size(4.9e9).with_vram(3.8e9)];
        let catalog = vec![
            ModelRecord::new("llama3:8b").with_size(4.9e9),
            ModelRecord::new("phi3").with_size(2.1e9),
        ];
        (running, catalog)
    }

    #[test]
    fn test_gpu_scenario() {
        let (running, catalog) = llama_scenario();
        let view = aggregate(&running, &catalog, &settings(8192));

        assert_eq!(view.execution_mode, ExecutionMode::Gpu);
        assert!((view.total_vram_mb - 3623.0).abs() < 1.5);
        assert_eq!(view.gpu_utilization_percent, 44);
        assert_eq!(view.running_count, 1);
        assert_eq!(view.total_count, 2);

        let names: Vec<_> = view.per_model_status.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["llama3:8b", "phi3"]);
        assert!(view.per_model_status[0].is_running);
        assert!(!view.per_model_status[1].is_running);
        assert!(view.per_model_status[0].vram_mb > 0.0);
    }

    #[test]
    fn test_idle_scenario() {
        let view = aggregate(&[], &[], &settings(8192));
        assert_eq!(view.display_line.as_deref(), Some(IDLE_DISPLAY_LINE));
        assert_eq!(view.execution_mode, ExecutionMode::Idle);
        assert_eq!(view.gpu_utilization_percent, 0);
        assert!(view.per_model_status.is_empty());
        assert_eq!(view.total_ram_mb, 0.0);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let (running, catalog) = llama_scenario();
        let a = aggregate(&running, &catalog, &settings(8192));
        let b = aggregate(&running, &catalog, &settings(8192));
        assert_eq!(a, b);
        assert_eq!(a.total_vram_mb.to_bits(), b.total_vram_mb.to_bits());
    }

    #[test]
    fn test_cpu_mode() {
        let running = vec![ModelRecord::new("tinyllama").with_size(600.0 * MB).with_vram(0.0)];
        let view = aggregate(&running, &running, &settings(8192));
        assert_eq!(view.execution_mode, ExecutionMode::Cpu);
        assert_eq!(view.gpu_utilization_percent, 0);
    }

    #[test]
    fn test_utilization_not_clamped() {
        let running = vec![ModelRecord::new("big").with_size(9000.0 * MB).with_vram(6000.0 * MB)];
        let view = aggregate(&running, &[], &settings(4000));
        assert_eq!(view.gpu_utilization_percent, 150);
    }

    #[test]
    fn test_no_capacity_means_zero_percent() {
        let (running, catalog) = llama_scenario();
        let view = aggregate(&running, &catalog, &settings(0));
        assert_eq!(view.gpu_utilization_percent, 0);
        assert_eq!(view.execution_mode, ExecutionMode::Gpu);
    }

    #[test]
    fn test_display_line_two_models() {
        let running = vec![
            ModelRecord::new("llama3:8b").with_size(100.0 * MB).with_vram(60.0 * MB),
            ModelRecord::new("phi3:mini").with_size(50.0 * MB).with_vram(40.0 * MB),
        ];
        let view = aggregate(&running, &[], &settings(0));
        assert_eq!(
            view.display_line.as_deref(),
            Some("llama3, phi3 (GPU:100MB CPU:150MB)")
        );
    }

    #[test]
    fn test_display_line_overflow() {
        let running: Vec<_> = ["a:1", "b:2", "c:3", "d:4"]
            .iter()
            .map(|n| ModelRecord::new(*n).with_size(MB))
            .collect();
        let view = aggregate(&running, &[], &settings(0));
        assert_eq!(view.display_line.as_deref(), Some("a, b+2 (GPU:0MB CPU:4MB)"));
    }

    #[test]
    fn test_display_toggles() {
        let (running, catalog) = llama_scenario();

        let gpu_only = DisplaySettings {
            show_cpu_usage: false,
            ..settings(0)
        };
        assert_eq!(
            aggregate(&running, &catalog, &gpu_only).display_line.as_deref(),
            Some("llama3 (GPU:3624MB)")
        );

        let neither = DisplaySettings {
            show_gpu_usage: false,
            show_cpu_usage: false,
            ..settings(0)
        };
        assert_eq!(
            aggregate(&running, &catalog, &neither).display_line.as_deref(),
            Some("llama3")
        );

        let hidden = DisplaySettings {
            show_tray_text: false,
            ..settings(0)
        };
        assert_eq!(aggregate(&running, &catalog, &hidden).display_line, None);
    }

    #[test]
    fn test_running_model_missing_from_catalog_is_kept() {
        let running = vec![
            ModelRecord::new("ephemeral:latest").with_size(10.0 * MB),
            ModelRecord::new("Alpha").with_size(10.0 * MB),
        ];
        let catalog = vec![ModelRecord::new("zeta"), ModelRecord::new("Alpha")];
        let view = aggregate(&running, &catalog, &settings(0));

        let listed: Vec<_> = view
            .per_model_status
            .iter()
            .map(|m| (m.name.as_str(), m.is_running))
            .collect();
        assert_eq!(
            listed,
            vec![("Alpha", true), ("zeta", false), ("ephemeral:latest", true)]
        );
        assert_eq!(view.total_count, 3);
    }

    #[test]
    fn test_sort_is_case_insensitive() {
        let catalog = vec![
            ModelRecord::new("mistral"),
            ModelRecord::new("Gemma"),
            ModelRecord::new("codellama"),
        ];
        let view = aggregate(&[], &catalog, &settings(0));
        let names: Vec<_> = view.per_model_status.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["codellama", "Gemma", "mistral"]);
    }

    #[test]
    fn test_running_list_keeps_daemon_order() {
        let running = vec![ModelRecord::new("zeta"), ModelRecord::new("alpha")];
        let view = aggregate(&running, &[], &settings(0));
        let names: Vec<_> = view.running.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(view.running.iter().all(|m| m.is_running));
    }
}
