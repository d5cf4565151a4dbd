/// Canonical error type used across all modules.
///
/// Tool-level failures (an unknown tool name, a failed command, a poll on an
/// id that was never issued) are deliberately NOT variants here: they degrade
/// to descriptive result text that flows back through the normal result-block
/// channel, so the model always receives something readable.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Malformed function-call block: {0}")]
    MalformedBlock(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// True when the error invalidates the whole session (config/transport),
    /// as opposed to a single block or turn.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Config(_) => true,
            ClientError::Transport(_)
            | ClientError::Upstream { .. }
            | ClientError::MalformedBlock(_)
            | ClientError::Internal(_) => false,
        }
    }
}
