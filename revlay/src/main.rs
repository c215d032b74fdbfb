//! Revlay - Entry Point
//!
//! Deploys releases into a local root, supervises the service and runs the
//! blue-green traffic proxy.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use colored::Colorize;
use tracing::{error, info};

use revlay::deploy::orchestrator::{Deployer, LocalDeployer};
use revlay::errors::RevlayError;
use revlay::logs::{init_logging, LogLevel, LogOptions};
use revlay::proxy::manager::ProxyManager;
use revlay::storage::releases::generate_release_name;
use revlay::storage::settings::{Config, CONFIG_FILE_NAME};
use revlay::utils::version_info;

const USAGE: &str = "usage: revlay <deploy [name] [--source=<dir>] | rollback <name> | releases | current | prune | start | stop | proxy> [--root=<dir>] [--config=<file>] [--log-level=<level>]";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();
    let mut positional: Vec<String> = Vec::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=').filter(|_| arg.starts_with("--")) {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        } else {
            positional.push(arg.clone());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return;
    }

    let code = match run(&cli_args, &positional).await {
        Ok(()) => 0,
        Err(e) => report(&e),
    };
    std::process::exit(code);
}

/// Print the failure and pick the exit code
fn report(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RevlayError>() {
        Some(revlay_err) if revlay_err.is_critical() => {
            error!("{:#}", err);
            eprintln!("{}", format!("{:#}", err).red().bold());
            eprintln!(
                "{}",
                "Manual intervention required: the service state is unknown.".red()
            );
            2
        }
        Some(RevlayError::RolledBack { .. }) => {
            error!("{:#}", err);
            eprintln!("{}", format!("{:#}", err).yellow());
            1
        }
        _ => {
            error!("{:#}", err);
            eprintln!("{} {:#}", "error:".red(), err);
            1
        }
    }
}

async fn run(cli_args: &HashMap<String, String>, positional: &[String]) -> anyhow::Result<()> {
    let Some(command) = positional.first() else {
        bail!(USAGE);
    };

    let root = match cli_args.get("root") {
        Some(root) => PathBuf::from(root),
        None => env::current_dir().context("cannot determine working directory")?,
    };
    let config_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));

    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    // Initialize logging
    let log_level = match cli_args.get("log-level") {
        Some(level) => level.parse::<LogLevel>().map_err(anyhow::Error::msg)?,
        None => config.log_level.clone(),
    };
    let log_options = LogOptions {
        log_level,
        log_dir: Some(root.join("logs")),
        ..Default::default()
    };
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let proxy_port = config.service.proxy_port;
    let fallback_port = config.service.port;
    let deployer = LocalDeployer::new(config, &root);

    match command.as_str() {
        "deploy" => {
            let release = positional
                .get(1)
                .cloned()
                .unwrap_or_else(generate_release_name);
            let source = cli_args.get("source").map(PathBuf::from);
            deployer
                .deploy(&release, source.as_deref())
                .await
                .with_context(|| format!("deploy of '{}' failed", release))?;
            println!("{} {}", "Deployed".green().bold(), release);
        }
        "rollback" => {
            let Some(release) = positional.get(1) else {
                bail!("usage: revlay rollback <name>");
            };
            deployer.rollback(release).await?;
            println!("{} {}", "Rolled back to".green().bold(), release);
        }
        "releases" => {
            let releases = deployer.list_release_info().await?;
            if releases.is_empty() {
                println!("No releases in {}", root.display());
            }
            for release in releases {
                if release.current {
                    println!("{} {}", "*".green().bold(), release.name.green());
                } else {
                    println!("  {}", release.name);
                }
            }
        }
        "current" => match deployer.current_release().await? {
            Some(release) => println!("{}", release),
            None => println!("{}", "No current release".yellow()),
        },
        "prune" => {
            let removed = deployer.prune().await?;
            println!("Pruned {} release(s)", removed.len());
        }
        "start" => match deployer.start_service().await {
            Ok(record) => println!("{} (pid {})", "Service started".green(), record.pid),
            Err(RevlayError::AlreadyRunning { pid }) => {
                println!("{} (pid {})", "Service already running".yellow(), pid)
            }
            Err(e) => return Err(e.into()),
        },
        "stop" => {
            deployer.stop_service().await?;
            println!("{}", "Service stopped".green());
        }
        "proxy" => run_proxy(&root, proxy_port, fallback_port, &deployer).await?,
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}

async fn run_proxy(
    root: &Path,
    proxy_port: u16,
    fallback_port: u16,
    deployer: &LocalDeployer,
) -> anyhow::Result<()> {
    if proxy_port == 0 {
        bail!("service.proxy_port is not configured");
    }

    let listen_addr = format!("0.0.0.0:{}", proxy_port);
    let state_file = deployer.layout().active_port_file().path().to_path_buf();
    let manager = ProxyManager::start(&listen_addr, state_file, fallback_port)
        .await
        .with_context(|| format!("failed to start proxy for {}", root.display()))?;

    info!("Running proxy on {}", listen_addr);
    manager.run(await_shutdown_signal()).await?;
    Ok(())
}

async fn await_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        _ => {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl+C received, shutting down...");
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
