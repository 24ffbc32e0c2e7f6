use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("anonymization failed: {0}")]
    Anonymization(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
