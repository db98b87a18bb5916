use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("analyzer error: {0}")]
    Analyzer(String),

    #[error("agent client error: {0}")]
    Client(String),

    #[error("workflow error: {0}")]
    Workflow(String),

    #[error("scrape error: {0}")]
    Scrape(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("state error: {0}")]
    State(String),

    #[error("supervisor error: {0}")]
    Supervisor(String),
}

pub type Result<T> = std::result::Result<T, Error>;
