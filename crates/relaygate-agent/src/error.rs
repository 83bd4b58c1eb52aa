use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vendor API error: {message}")]
    Api {
        message: String,
        code: Option<String>,
        kind: Option<String>,
    },

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<AdapterError> for relaygate_core::GatewayError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Api { message, code, kind } => relaygate_core::GatewayError::Vendor {
                message,
                code,
                kind,
            },
            AdapterError::Cancelled => relaygate_core::GatewayError::StreamTransport("cancelled".into()),
            other => relaygate_core::GatewayError::Vendor {
                message: other.to_string(),
                code: None,
                kind: None,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
