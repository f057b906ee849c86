//! slotplane - Entry Point
//!
//! Blue-green slot deployment control plane. Serves the tool endpoint and
//! runs the grace cleanup worker.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use chrono::Utc;
use secrecy::ExposeSecret;
use tracing::{error, info};

use slotplane::app::bootstrap::bootstrap_team;
use slotplane::app::options::AppOptions;
use slotplane::app::run::run;
use slotplane::filesys::file::File;
use slotplane::logs::{init_logging, LogOptions};
use slotplane::storage::layout::StorageLayout;
use slotplane::storage::settings::Settings;
use slotplane::utils::version_info;

const DEFAULT_CONFIG: &str = "/etc/slotplane/settings.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let config_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let settings = match Settings::load(&File::new(config_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            std::process::exit(1);
        }
    };
    let layout = StorageLayout::new(settings.storage_dir.clone());

    // Initialize logging; the guard flushes file logs on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_to_file.then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Create a team and print its owner token once
    if let Some(team_name) = cli_args.get("bootstrap-team") {
        if let Err(e) = layout.setup().await {
            error!("Failed to prepare storage: {e}");
            std::process::exit(1);
        }
        match bootstrap_team(layout.access_file(), team_name, Utc::now()).await {
            Ok((team, credential, token)) => {
                println!("team:       {} ({})", team.name, team.id);
                println!("credential: {}", credential.id);
                println!("token:      {}", token.expose_secret());
                println!("Store this token now; it cannot be shown again.");
            }
            Err(e) => {
                error!("Failed to bootstrap team: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Run the server
    let options = AppOptions::from_settings(settings);
    info!(
        "Running slotplane {} on {}:{}",
        version_info().version,
        options.server.host,
        options.server.port
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run slotplane: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
