use std::path::Path;

use clap::Parser;
use tracing::info;

use sentimesh::cli::{Cli, Command};
use sentimesh::config::Config;
use sentimesh::coordinator;
use sentimesh::error::{Error, Result};
use sentimesh::record::{AgentKind, ProductCategory};
use sentimesh::service;
use sentimesh::state::StateManager;
use sentimesh::supervisor;

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let config_path = cli.config.clone();
    let code = match run(cli.command, config, config_path.as_deref()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(command: Command, config: Config, config_path: Option<&str>) -> Result<i32> {
    match command {
        Command::Up { .. } => {
            let state_mgr = StateManager::new(StateManager::default_dir(Path::new(".")));
            supervisor::up(&config, config_path, &state_mgr).await
        }

        Command::Serve { service, port, .. } => {
            serve(&config, &service, port).await?;
            Ok(0)
        }

        Command::HealthCheck => supervisor::health_check(&config),

        Command::Stop => {
            let state_mgr = StateManager::new(StateManager::default_dir(Path::new(".")));
            supervisor::stop(&state_mgr).await
        }

        Command::Analyze {
            review,
            category,
            rounds,
            threshold,
            file,
        } => {
            let text = match (review, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)?,
                (None, None) => {
                    eprintln!("error: provide a REVIEW argument or --file");
                    return Ok(1);
                }
            };

            let mut config = config;
            if let Some(category) = category {
                config.product_category = ProductCategory::parse(&category);
            }
            if let Some(rounds) = rounds {
                config.max_discussion_rounds = rounds;
            }
            if let Some(threshold) = threshold {
                config.disagreement_threshold = threshold.clamp(0.0, 1.0);
            }

            info!("[sentimesh:cli] running one-shot analysis...");
            let report = coordinator::analyze_once(&config, text.trim()).await?;
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|e| Error::Workflow(format!("failed to render report: {e}")))?;
            println!("{rendered}");
            Ok(0)
        }
    }
}

async fn serve(config: &Config, name: &str, port_override: Option<u16>) -> Result<()> {
    if name == "coordinator" {
        let port = port_override.unwrap_or(config.ports.coordinator);
        return coordinator::serve_coordinator(config, port).await;
    }

    let kind = AgentKind::parse(name)
        .filter(AgentKind::is_department)
        .ok_or_else(|| {
            Error::ConfigValidation(format!(
                "unknown service: {name} (expected a department agent or coordinator)"
            ))
        })?;
    let port = match port_override.or_else(|| config.ports.for_agent(kind)) {
        Some(port) => port,
        None => {
            return Err(Error::ConfigValidation(format!(
                "no port configured for {name}"
            )));
        }
    };
    service::serve_agent(config, kind, port).await
}
