use thiserror::Error;

/// Error taxonomy shared across the gateway's crates.
///
/// Each variant maps to one of the source system's error categories and
/// carries a short, stable `.code()` used on the `chat.error.<instanceKey>`
/// subject and in logs.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: missing or invalid field '{field}'")]
    Validation { field: String },

    #[error("Vendor error: {message} (code={code:?}, type={kind:?})")]
    Vendor {
        message: String,
        code: Option<String>,
        kind: Option<String>,
    },

    #[error("Stream transport error: {0}")]
    StreamTransport(String),

    #[error("Workflow timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Image upload failed: {0}")]
    Upload(String),

    #[error("Accounting error: {0}")]
    Accounting(String),

    #[error("Instance busy: a request for '{instance_key}' is already in flight")]
    Busy { instance_key: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// Short error code used on the wire and in structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::Validation { .. } => "VALIDATION_ERROR",
            GatewayError::Vendor { .. } => "VENDOR_ERROR",
            GatewayError::StreamTransport(_) => "STREAM_TRANSPORT_ERROR",
            GatewayError::Timeout { .. } => "TIMEOUT_ERROR",
            GatewayError::Connection(_) => "CONNECTION_ERROR",
            GatewayError::Upload(_) => "UPLOAD_ERROR",
            GatewayError::Accounting(_) => "ACCOUNTING_ERROR",
            GatewayError::Busy { .. } => "BUSY",
            GatewayError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            GatewayError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// The raw, human-facing error message for the wire error envelope.
    ///
    /// For `Vendor` this is the vendor's own message verbatim, not the
    /// `Display` rendering (which also embeds `code`/`kind` debug output).
    pub fn wire_message(&self) -> String {
        match self {
            GatewayError::Vendor { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// spec's `errorType`, carried only by `Vendor` (threaded from the
    /// vendor's own error payload `kind`).
    pub fn wire_error_type(&self) -> Option<String> {
        match self {
            GatewayError::Vendor { kind, .. } => kind.clone(),
            _ => None,
        }
    }

    /// spec's `errorCode`: the vendor's own error code when one was
    /// reported, falling back to `.code()`'s gateway-level category.
    pub fn wire_error_code(&self) -> String {
        match self {
            GatewayError::Vendor { code: Some(code), .. } => code.clone(),
            _ => self.code().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
