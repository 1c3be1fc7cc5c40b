use thiserror::Error;

/// Errors produced while parsing or rendering wire data.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("commit object is missing the {0} header line")]
    MissingHeader(&'static str),

    #[error("commit header line has no tokens")]
    EmptyHeader,

    #[error("commit object is missing the blank line before the message")]
    MissingBlankLine,

    #[error("commit header is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid channel identifier")]
    InvalidChannelId,

    #[error("malformed SSH wire public key")]
    InvalidSshKey,
}
