use thiserror::Error;

#[derive(Debug, Error)]
pub enum RingbackError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RingbackError {
    /// Short error code string for logs.
    pub fn code(&self) -> &'static str {
        match self {
            RingbackError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RingbackError>;
