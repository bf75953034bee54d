//! Watch mode: run the scheduler, print every update, accept settings edits
//! and manual refreshes on stdin.

use std::sync::Arc;

use llamatray_client::StatusClient;
use llamatray_core::ConfigStore;
use llamatray_runtime::render::render;
use llamatray_runtime::{RefreshScheduler, StatusUpdate};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const INTERACTIVE_HELP: &str = "r = refresh, url <url>, gpu <mb>, interval <secs>, \
text|gpu-usage|cpu-usage on|off, q = quit";

/// A line typed while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Refresh,
    Url(String),
    GpuRam(u32),
    Interval(u64),
    ShowTrayText(bool),
    ShowGpuUsage(bool),
    ShowCpuUsage(bool),
    Help,
    Quit,
}

pub fn parse_input(line: &str) -> Result<Input, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Err("empty input".into());
    };
    let arg = parts.next();

    let input = match (word, arg) {
        ("r" | "refresh", None) => Input::Refresh,
        ("q" | "quit", None) => Input::Quit,
        ("h" | "help" | "?", None) => Input::Help,
        ("url", Some(url)) => Input::Url(url.to_string()),
        ("gpu", Some(mb)) => Input::GpuRam(mb.parse().map_err(|_| format!("not a number: {}", mb))?),
        ("interval", Some(secs)) => {
            Input::Interval(secs.parse().map_err(|_| format!("not a number: {}", secs))?)
        }
        ("text", Some(flag)) => Input::ShowTrayText(parse_flag(flag)?),
        ("gpu-usage", Some(flag)) => Input::ShowGpuUsage(parse_flag(flag)?),
        ("cpu-usage", Some(flag)) => Input::ShowCpuUsage(parse_flag(flag)?),
        _ => return Err(format!("unrecognized: {}", line.trim())),
    };

    if parts.next().is_some() {
        return Err(format!("too many arguments: {}", line.trim()));
    }
    Ok(input)
}

fn parse_flag(flag: &str) -> Result<bool, String> {
    match flag {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(format!("expected on/off, got {}", flag)),
    }
}

pub async fn run(store: Arc<ConfigStore>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = RefreshScheduler::start(
        store.clone(),
        Arc::new(StatusClient::new()),
        move |update: StatusUpdate| {
            let _ = tx.send(update);
        },
    );
    eprintln!("{}", INTERACTIVE_HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(update) => print_update(&update, store.display().gpu_capacity_mb),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_input(&line) {
                    Ok(Input::Quit) => break,
                    Ok(input) => apply_input(input, &store, &scheduler),
                    Err(e) => eprintln!("{} ({})", e, INTERACTIVE_HELP),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

/// Settings edits go through the store; the scheduler picks them up.
fn apply_input(input: Input, store: &ConfigStore, scheduler: &RefreshScheduler) {
    let result = match input {
        Input::Refresh => {
            if !scheduler.trigger_immediate() {
                eprintln!("Refresh already in progress");
            }
            return;
        }
        Input::Help => {
            eprintln!("{}", INTERACTIVE_HELP);
            return;
        }
        Input::Quit => return,
        Input::Url(url) => store.set_base_url(&url),
        Input::GpuRam(mb) => store.set_gpu_ram(mb),
        Input::Interval(secs) => store.set_polling_interval(secs),
        Input::ShowTrayText(on) => store.set_show_tray_text(on),
        Input::ShowGpuUsage(on) => store.set_show_gpu_usage(on),
        Input::ShowCpuUsage(on) => store.set_show_cpu_usage(on),
    };
    if let Err(e) = result {
        warn!("Setting rejected: {}", e);
    }
}

pub fn print_update(update: &StatusUpdate, gpu_capacity_mb: u32) {
    let text = render(update, gpu_capacity_mb);
    println!("--- {} ---", update.published_at.format("%H:%M:%S"));
    if let Some(err) = update.error() {
        println!("Error ({}): {}", err.kind, err.message);
    }
    for line in text.to_lines() {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_input("r"), Ok(Input::Refresh));
        assert_eq!(parse_input("  quit "), Ok(Input::Quit));
        assert_eq!(
            parse_input("url http://gpu-box:11434"),
            Ok(Input::Url("http://gpu-box:11434".into()))
        );
        assert_eq!(parse_input("gpu 8192"), Ok(Input::GpuRam(8192)));
        assert_eq!(parse_input("interval 30"), Ok(Input::Interval(30)));
        assert_eq!(parse_input("text off"), Ok(Input::ShowTrayText(false)));
        assert_eq!(parse_input("cpu-usage on"), Ok(Input::ShowCpuUsage(true)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_input("").is_err());
        assert!(parse_input("gpu lots").is_err());
        assert!(parse_input("text maybe").is_err());
        assert!(parse_input("url").is_err());
        assert!(parse_input("r now").is_err());
    }

    #[tokio::test]
    async fn test_settings_edits_reach_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::load(&dir.path().join("config.json")));
        let source = Arc::new(llamatray_client::MockStatusSource::new(Default::default()));
        let scheduler = RefreshScheduler::start(store.clone(), source, |_: StatusUpdate| {});

        apply_input(Input::GpuRam(4096), &store, &scheduler);
        apply_input(Input::Url("nope".into()), &store, &scheduler);
        apply_input(Input::ShowGpuUsage(false), &store, &scheduler);

        let config = store.snapshot();
        assert_eq!(config.gpu_ram_mb, 4096);
        assert_eq!(config.base_url, "http://localhost:11434");
        assert!(!config.show_gpu_usage);

        // Persisted for the next run.
        let reloaded = ConfigStore::load(&dir.path().join("config.json"));
        assert_eq!(reloaded.snapshot(), config);

        scheduler.shutdown().await;
    }
}
