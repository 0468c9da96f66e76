use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Calendar fetch failed: {0}")]
    Fetch(String),
    #[error("Calendar feed is invalid: {0}")]
    InvalidFeed(String),
    #[error("Task note error: {0}")]
    TaskNote(String),
}
