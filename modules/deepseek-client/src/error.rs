#[derive(Debug, thiserror::Error)]
pub enum DeepSeekError {
    #[error("DeepSeek API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("DeepSeek request timed out")]
    Timeout,

    #[error("Malformed DeepSeek response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl DeepSeekError {
    /// HTTP-like status for the caller's retry/skip decision, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeepSeekError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transient failures are worth a bounded in-call retry; everything
    /// else propagates immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            DeepSeekError::Timeout => true,
            DeepSeekError::Api { status, .. } => *status == 429 || *status >= 500,
            DeepSeekError::Request(e) => e.is_timeout() || e.is_connect(),
            DeepSeekError::Malformed(_) => false,
        }
    }
}
