use thiserror::Error;

/// Errors raised outside the numeric core: configuration, session I/O and
/// the sample hand-off. The filters and the fall detector never fail.
#[derive(Error, Debug)]
pub enum ImuError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sample channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ImuError>;

/// Reject non-finite or non-positive values for a named parameter
pub(crate) fn ensure_positive(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ImuError::InvalidParameter(format!(
            "{name} must be > 0 (got {value})"
        )))
    }
}
