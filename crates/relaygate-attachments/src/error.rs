use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("object store fetch failed for nats-obj://{bucket}/{key}: {source}")]
    ObjectStoreFetch {
        bucket: String,
        key: String,
        source: String,
    },

    #[error("malformed data URL")]
    MalformedDataUrl,
}

impl From<AttachmentError> for relaygate_core::GatewayError {
    fn from(e: AttachmentError) -> Self {
        relaygate_core::GatewayError::Validation {
            field: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AttachmentError>;
