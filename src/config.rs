use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::record::{AgentKind, ProductCategory};
use crate::workflow::WorkflowKind;

const DEFAULT_CONFIG_FILE: &str = ".sentimesh/config.toml";

/// How the coordinator reaches the department analyzers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationMode {
    /// Coordinator owns every analyzer; departments run sequentially.
    InProcess,
    /// One JSON-RPC call per department agent service, issued concurrently.
    A2a,
}

impl CoordinationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinationMode::InProcess => "in_process",
            CoordinationMode::A2a => "a2a",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub model_name: Option<String>,
    pub api_key_env: Option<String>,
    pub product_category: Option<String>,
    pub agent_types: Option<Vec<String>>,
    pub max_tokens_per_agent: Option<u32>,
    pub max_tokens_master: Option<u32>,
    pub max_tokens_advisor: Option<u32>,
    pub max_discussion_rounds: Option<u32>,
    pub disagreement_threshold: Option<f64>,
    pub enable_consensus_debate: Option<bool>,
    pub workflow: Option<String>,
    pub coordinator_mode: Option<String>,
    pub agent_timeout: Option<u64>,
    pub cards_dir: Option<String>,
    pub prompts_dir: Option<String>,
    pub host: Option<String>,
    #[serde(default)]
    pub ports: PortsFile,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PortsFile {
    pub quality: Option<u16>,
    pub experience: Option<u16>,
    pub user_experience: Option<u16>,
    pub business: Option<u16>,
    pub technical: Option<u16>,
    pub coordinator: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ports {
    pub quality: u16,
    pub experience: u16,
    pub user_experience: u16,
    pub business: u16,
    pub technical: u16,
    pub coordinator: u16,
}

impl Ports {
    pub fn for_agent(&self, kind: AgentKind) -> Option<u16> {
        match kind {
            AgentKind::Quality => Some(self.quality),
            AgentKind::Experience => Some(self.experience),
            AgentKind::UserExperience => Some(self.user_experience),
            AgentKind::Business => Some(self.business),
            AgentKind::Technical => Some(self.technical),
            AgentKind::MasterAnalyst | AgentKind::BusinessAdvisor => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model_name: String,
    pub api_key_env: String,
    pub product_category: ProductCategory,
    pub agent_types: Vec<AgentKind>,
    pub max_tokens_per_agent: u32,
    pub max_tokens_master: u32,
    pub max_tokens_advisor: u32,
    pub max_discussion_rounds: u32,
    pub disagreement_threshold: f64,
    pub enable_consensus_debate: bool,
    pub workflow_kind: WorkflowKind,
    pub coordinator_mode: CoordinationMode,
    /// Per-agent RPC deadline in seconds.
    pub agent_timeout: u64,
    pub cards_dir: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    pub host: String,
    pub ports: Ports,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_from(cli, Path::new("."))
    }

    pub fn load_from(cli: &Cli, project_dir: &Path) -> Result<Self> {
        let file_config = match config_source(cli, project_dir)? {
            Some(path) => parse_config(&std::fs::read_to_string(&path)?)?,
            None => ConfigFile::default(),
        };
        merge(file_config, cli)
    }

    /// RPC endpoint of a department agent service.
    pub fn agent_endpoint(&self, kind: AgentKind) -> Option<String> {
        self.ports
            .for_agent(kind)
            .map(|port| format!("http://{}:{port}/rpc", self.host))
    }

    /// Card file path for a service tag (agent kinds plus "coordinator").
    pub fn card_path(&self, service: &str) -> PathBuf {
        self.cards_dir.join(format!("{service}.json"))
    }
}

/// Which config file to read, if any. An explicit `--config` path must
/// exist; the default location is optional.
fn config_source(cli: &Cli, project_dir: &Path) -> Result<Option<PathBuf>> {
    if let Some(explicit) = &cli.config {
        let path = PathBuf::from(explicit);
        if !path.exists() {
            return Err(Error::ConfigNotFound(path));
        }
        return Ok(Some(path));
    }
    let default = project_dir.join(DEFAULT_CONFIG_FILE);
    Ok(default.exists().then_some(default))
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    Ok(config)
}

/// Port resolution: env var beats config file beats built-in default.
/// The env names are the deployment surface and stay stable.
fn resolve_port(env_var: &str, file_value: Option<u16>, default: u16) -> u16 {
    std::env::var(env_var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .or(file_value)
        .unwrap_or(default)
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Result<Config> {
    let agent_types = match file.agent_types {
        Some(raw) => {
            let mut kinds = Vec::with_capacity(raw.len());
            for tag in &raw {
                let kind = AgentKind::parse(tag).ok_or_else(|| {
                    Error::ConfigValidation(format!("unknown agent type: {tag}"))
                })?;
                kinds.push(kind);
            }
            kinds
        }
        None => AgentKind::DEPARTMENTS.to_vec(),
    };

    let workflow_kind = match file.workflow.as_deref().unwrap_or("consensus") {
        "consensus" => WorkflowKind::Consensus,
        "linear" => WorkflowKind::Linear,
        other => {
            return Err(Error::ConfigValidation(format!(
                "unknown workflow: {other} (expected: consensus, linear)"
            )));
        }
    };

    let coordinator_mode = match file.coordinator_mode.as_deref().unwrap_or("in_process") {
        "in_process" => CoordinationMode::InProcess,
        "a2a" => CoordinationMode::A2a,
        other => {
            return Err(Error::ConfigValidation(format!(
                "unknown coordinator_mode: {other} (expected: in_process, a2a)"
            )));
        }
    };
    // The CLI flag always wins over the file.
    let coordinator_mode = if cli.a2a_requested() {
        CoordinationMode::A2a
    } else {
        coordinator_mode
    };

    let config = Config {
        model_name: file
            .model_name
            .unwrap_or_else(|| "gpt-4o-mini".to_string()),
        api_key_env: file
            .api_key_env
            .unwrap_or_else(|| "OPENAI_API_KEY".to_string()),
        product_category: ProductCategory::parse(
            file.product_category.as_deref().unwrap_or("electronics"),
        ),
        agent_types,
        max_tokens_per_agent: file.max_tokens_per_agent.unwrap_or(150),
        max_tokens_master: file.max_tokens_master.unwrap_or(500),
        max_tokens_advisor: file.max_tokens_advisor.unwrap_or(600),
        max_discussion_rounds: file.max_discussion_rounds.unwrap_or(2),
        disagreement_threshold: file.disagreement_threshold.unwrap_or(0.6),
        enable_consensus_debate: file.enable_consensus_debate.unwrap_or(true),
        workflow_kind,
        coordinator_mode,
        agent_timeout: file.agent_timeout.unwrap_or(30),
        cards_dir: PathBuf::from(file.cards_dir.unwrap_or_else(|| "cards".to_string())),
        prompts_dir: file.prompts_dir.map(PathBuf::from),
        host: file.host.unwrap_or_else(|| "127.0.0.1".to_string()),
        ports: Ports {
            quality: resolve_port("QUALITY_AGENT_PORT", file.ports.quality, 8001),
            experience: resolve_port("EXPERIENCE_AGENT_PORT", file.ports.experience, 8002),
            user_experience: resolve_port(
                "USER_EXPERIENCE_AGENT_PORT",
                file.ports.user_experience,
                8003,
            ),
            business: resolve_port("BUSINESS_AGENT_PORT", file.ports.business, 8004),
            technical: resolve_port("TECHNICAL_AGENT_PORT", file.ports.technical, 8005),
            coordinator: resolve_port("COORDINATOR_AGENT_PORT", file.ports.coordinator, 8000),
        },
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.agent_types.is_empty() {
        return Err(Error::ConfigValidation(
            "agent_types must not be empty".to_string(),
        ));
    }
    for kind in &config.agent_types {
        if !kind.is_department() {
            return Err(Error::ConfigValidation(format!(
                "agent type {kind} is not a department specialization"
            )));
        }
    }
    if !(0.0..=1.0).contains(&config.disagreement_threshold) {
        return Err(Error::ConfigValidation(format!(
            "disagreement_threshold must be in [0, 1], got {}",
            config.disagreement_threshold
        )));
    }
    if config.agent_timeout == 0 {
        return Err(Error::ConfigValidation(
            "agent_timeout must be > 0".to_string(),
        ));
    }
    Ok(())
}
