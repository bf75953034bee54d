//! llamatray: terminal status indicator for a local Ollama daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use llamatray_client::{StatusClient, StatusSource};
use llamatray_core::ConfigStore;
use llamatray_runtime::{aggregate, ErrorState, RefreshState, StatusUpdate};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod watch;

const CONFIG_ENV: &str = "LLAMATRAY_CONFIG";

fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let config_home = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")));
    match config_home {
        Some(dir) => dir.join("llamatray").join("config.json"),
        None => PathBuf::from("llamatray.json"),
    }
}

fn print_help() {
    println!("llamatray: status indicator for a local Ollama daemon");
    println!();
    println!("Usage: llamatray [command]");
    println!();
    println!("Commands:");
    println!("  (none) | watch           Poll and print status until Ctrl-C");
    println!("  status [--json]          Fetch once and print status");
    println!("  set-url <url>            Set the Ollama API URL");
    println!("  set-gpu-ram <mb>         Set total GPU RAM in MB (0 disables)");
    println!("  set-interval <secs>      Set the polling interval");
    println!("  config                   Print the effective configuration");
    println!("  help                     Show this help message");
    println!();
    println!("Config file: ${} or {}", CONFIG_ENV, resolve_config_path().display());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the rendered status.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("watch");

    if matches!(command, "--help" | "-h" | "help") {
        print_help();
        return Ok(());
    }

    let config_path = resolve_config_path();
    let store = Arc::new(ConfigStore::from_env(&config_path));
    info!("Config: {}", config_path.display());

    match command {
        "watch" => watch::run(store).await,
        "status" => {
            let json = args.get(2).is_some_and(|a| a == "--json");
            let ok = status_once(&store, json).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        "set-url" => {
            let url = required_arg(&args, "set-url <url>");
            store.set_base_url(url)?;
            println!("URL: {}", store.snapshot().base_url);
            Ok(())
        }
        "set-gpu-ram" => {
            let mb: u32 = required_arg(&args, "set-gpu-ram <mb>").trim().parse()?;
            store.set_gpu_ram(mb)?;
            println!("GPU RAM: {} MB", mb);
            Ok(())
        }
        "set-interval" => {
            let secs: u64 = required_arg(&args, "set-interval <secs>").trim().parse()?;
            store.set_polling_interval(secs)?;
            println!("Polling interval: {}s", secs);
            Ok(())
        }
        "config" => {
            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}. Use 'llamatray help' for usage.", other);
            std::process::exit(1);
        }
    }
}

fn required_arg<'a>(args: &'a [String], usage: &str) -> &'a str {
    match args.get(2) {
        Some(arg) => arg,
        None => {
            eprintln!("Usage: llamatray {}", usage);
            std::process::exit(1);
        }
    }
}

/// One fetch-aggregate-render pass. Returns whether the fetch succeeded.
async fn status_once(store: &ConfigStore, json: bool) -> anyhow::Result<bool> {
    let config = store.snapshot();
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let state = match StatusClient::new().fetch_status(&config.base_url, timeout).await {
        Ok(payload) => RefreshState::Ready(aggregate(
            &payload.running,
            &payload.catalog,
            &config.display(),
        )),
        Err(e) => RefreshState::Failed(ErrorState::from(&e)),
    };
    let update = StatusUpdate {
        cycle: 1,
        published_at: Utc::now(),
        state,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&update)?);
    } else {
        watch::print_update(&update, config.gpu_ram_mb);
    }
    Ok(update.view().is_some())
}
