use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Missing API key or unusable client settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failed, timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response or a reply with no usable choice
    #[error("API error: {0}")]
    Api(String),

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
}
