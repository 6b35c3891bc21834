use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The audio payload was not valid base64.
    #[error("Invalid base64 audio payload: {0}")]
    AudioPayload(#[from] base64::DecodeError),

    /// A positional weight vector did not carry every channel.
    #[error("Expected {expected} blendshape weights, got {got}")]
    WeightCount { expected: usize, got: usize },

    /// A protocol message could not be parsed.
    #[error("Malformed protocol message: {0}")]
    Protocol(#[from] serde_json::Error),
}
