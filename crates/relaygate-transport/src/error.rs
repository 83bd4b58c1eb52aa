use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("not connected")]
    Disconnected,

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<TransportError> for relaygate_core::GatewayError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { .. } => relaygate_core::GatewayError::StreamTransport(e.to_string()),
            _ => relaygate_core::GatewayError::Connection(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
