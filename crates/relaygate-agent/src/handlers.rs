//! [`relaygate_transport::SubscriptionHandler`] implementations wiring the
//! two wire subjects to the workflow engine and the instance registry.

use std::sync::Arc;

use async_trait::async_trait;
use relaygate_core::model::{InstanceKey, RequestEnvelope};
use relaygate_transport::{SubscriptionHandler, Transport};
use tracing::warn;

use crate::registry::InstanceRegistry;
use crate::workflow::{run_workflow, ProviderSet};

pub struct ChatProcessHandler {
    registry: Arc<InstanceRegistry>,
    transport: Arc<Transport>,
    providers: Arc<ProviderSet>,
    timeout_secs: u64,
}

impl ChatProcessHandler {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        transport: Arc<Transport>,
        providers: Arc<ProviderSet>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            transport,
            providers,
            timeout_secs,
        }
    }
}

#[async_trait]
impl SubscriptionHandler for ChatProcessHandler {
    async fn handle(
        &self,
        _subject: &str,
        payload: serde_json::Value,
    ) -> std::result::Result<Option<serde_json::Value>, String> {
        let envelope: RequestEnvelope = serde_json::from_value(payload).map_err(|e| e.to_string())?;

        let registry = self.registry.clone();
        let transport = self.transport.clone();
        let providers = self.providers.clone();
        let timeout_secs = self.timeout_secs;

        // Requests run as independent cooperative tasks; the subscription
        // loop must not block waiting for one request to finish streaming.
        tokio::spawn(async move {
            run_workflow(envelope, registry, transport, providers, timeout_secs).await;
        });

        Ok(None)
    }
}

pub struct ChatStopHandler {
    registry: Arc<InstanceRegistry>,
}

impl ChatStopHandler {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SubscriptionHandler for ChatStopHandler {
    async fn handle(
        &self,
        subject: &str,
        _payload: serde_json::Value,
    ) -> std::result::Result<Option<serde_json::Value>, String> {
        let Some((workspace_id, thread_id)) = parse_stop_subject(subject) else {
            warn!(subject, "malformed stop subject, ignoring");
            return Ok(None);
        };
        let key = InstanceKey::new(&workspace_id, &thread_id);
        self.registry.stop(&key);
        Ok(None)
    }
}

fn parse_stop_subject(subject: &str) -> Option<(String, String)> {
    let rest = subject.strip_prefix("ai.interaction.chat.stop.")?;
    let (workspace_id, thread_id) = rest.split_once('.')?;
    if workspace_id.is_empty() || thread_id.is_empty() {
        return None;
    }
    Some((workspace_id.to_string(), thread_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_workspace_and_thread_from_stop_subject() {
        let (ws, th) = parse_stop_subject("ai.interaction.chat.stop.ws1.thread1").unwrap();
        assert_eq!(ws, "ws1");
        assert_eq!(th, "thread1");
    }

    #[test]
    fn rejects_malformed_stop_subject() {
        assert!(parse_stop_subject("ai.interaction.chat.stop.ws1").is_none());
        assert!(parse_stop_subject("something.else").is_none());
    }
}
