use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("No browser connected: {0}")]
    NoBrowser(String),

    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    #[error("Page security policy blocked execution: {0}")]
    PolicyBlocked(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Relay server unreachable: {0}")]
    ServerUnreachable(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
