use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// sentimesh: multi-agent review sentiment orchestration
#[derive(Parser, Debug)]
#[command(name = "sentimesh", version, about)]
pub struct Cli {
    /// Path to config file (default: .sentimesh/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start all agent services and the coordinator, one child process per port
    Up {
        /// Use the parallel A2A coordinator (HTTP fan-out to agent services)
        #[arg(long)]
        a2a: bool,
    },

    /// Run a single service in the foreground
    Serve {
        /// Service to run: quality, experience, user_experience, business,
        /// technical, or coordinator
        service: String,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,

        /// Coordinator only: fan out to agent services over A2A
        #[arg(long)]
        a2a: bool,
    },

    /// Probe every service's /health endpoint; exit 0 iff all healthy
    #[command(name = "health-check")]
    HealthCheck,

    /// Terminate services started by `up`
    Stop,

    /// Run one in-process analysis and print the report JSON
    Analyze {
        /// Review text to analyze
        review: Option<String>,

        /// Product category (default: electronics)
        #[arg(long)]
        category: Option<String>,

        /// Maximum discussion rounds
        #[arg(long)]
        rounds: Option<u32>,

        /// Disagreement threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,

        /// Read the review text from a file instead
        #[arg(long, conflicts_with = "review")]
        file: Option<PathBuf>,
    },
}

impl Cli {
    /// Whether the parallel A2A coordinator was requested.
    pub fn a2a_requested(&self) -> bool {
        matches!(
            self.command,
            Command::Up { a2a: true } | Command::Serve { a2a: true, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_up() {
        let cli = Cli::parse_from(["sentimesh", "up"]);
        assert!(matches!(cli.command, Command::Up { a2a: false }));
        assert!(!cli.a2a_requested());
    }

    #[test]
    fn test_parse_up_a2a() {
        let cli = Cli::parse_from(["sentimesh", "up", "--a2a"]);
        assert!(matches!(cli.command, Command::Up { a2a: true }));
        assert!(cli.a2a_requested());
    }

    #[test]
    fn test_parse_serve_with_port() {
        let cli = Cli::parse_from(["sentimesh", "serve", "quality", "--port", "9101"]);
        match cli.command {
            Command::Serve {
                service,
                port,
                a2a,
            } => {
                assert_eq!(service, "quality");
                assert_eq!(port, Some(9101));
                assert!(!a2a);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_health_check() {
        let cli = Cli::parse_from(["sentimesh", "health-check"]);
        assert!(matches!(cli.command, Command::HealthCheck));
    }

    #[test]
    fn test_parse_stop() {
        let cli = Cli::parse_from(["sentimesh", "stop"]);
        assert!(matches!(cli.command, Command::Stop));
    }

    #[test]
    fn test_parse_analyze_inline_review() {
        let cli = Cli::parse_from([
            "sentimesh",
            "analyze",
            "Great phone",
            "--category",
            "electronics",
            "--rounds",
            "3",
        ]);
        match cli.command {
            Command::Analyze {
                review,
                category,
                rounds,
                ..
            } => {
                assert_eq!(review.as_deref(), Some("Great phone"));
                assert_eq!(category.as_deref(), Some("electronics"));
                assert_eq!(rounds, Some(3));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_analyze_review_conflicts_with_file() {
        let result =
            Cli::try_parse_from(["sentimesh", "analyze", "text", "--file", "review.txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["sentimesh", "--config", "/tmp/c.toml", "up"]);
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.toml"));
    }
}
