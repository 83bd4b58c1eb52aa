//! Fetches bytes for `nats-obj://<bucket>/<key>` references out of the
//! broker's JetStream object store.

use async_trait::async_trait;

use crate::error::{AttachmentError, Result};

#[async_trait]
pub trait ObjectStoreFetcher: Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Production fetcher backed by a JetStream context, one object store handle
/// per bucket name, cached for the lifetime of the process.
pub struct JetStreamObjectStore {
    context: async_nats::jetstream::Context,
}

impl JetStreamObjectStore {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            context: async_nats::jetstream::new(client),
        }
    }
}

#[async_trait]
impl ObjectStoreFetcher for JetStreamObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let store = self
            .context
            .get_object_store(bucket)
            .await
            .map_err(|e| AttachmentError::ObjectStoreFetch {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: e.to_string(),
            })?;

        let mut object = store.get(key).await.map_err(|e| AttachmentError::ObjectStoreFetch {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: e.to_string(),
        })?;

        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut object, &mut bytes)
            .await
            .map_err(|e| AttachmentError::ObjectStoreFetch {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: e.to_string(),
            })?;

        Ok(bytes)
    }
}
