use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use relaygate_core::model::{RequestState, StreamContent, StreamEventEnvelope, StreamStatus};
use relaygate_transport::Transport;

use crate::error::Result;

/// Common interface for the two vendor adapters. A `Provider` owns exactly
/// one in-flight request at a time (see [`crate::registry::InstanceRegistry`]);
/// it mutates `state` in place as the workflow progresses and publishes
/// stream events directly through `transport`, rather than returning a value
/// the caller re-publishes — streaming is the adapter's job end to end.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drive one full request: call the vendor, stream events out, and fill
    /// in `state.usage` / `state.image_usage` / `state.response_id` /
    /// `state.ai_vendor_request_id` before returning. `should_stop` is
    /// polled between stream events; once it flips the adapter emits
    /// `END_STREAM` and returns `Ok(())` without raising an error.
    async fn stream(
        &self,
        state: &mut RequestState,
        transport: &Transport,
        should_stop: &AtomicBool,
    ) -> Result<()>;
}

/// Publishes one stream event on
/// `ai.interaction.chat.receiveMessage.<workspaceId>.<threadId>`.
pub async fn publish_stream_event(transport: &Transport, state: &RequestState, content: StreamContent) {
    let subject = format!(
        "ai.interaction.chat.receiveMessage.{}.{}",
        state.workspace_id, state.thread_id
    );
    let envelope = StreamEventEnvelope {
        content,
        ai_chat_thread_id: state.thread_id.clone(),
    };
    let payload = match serde_json::to_value(&envelope) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode stream event envelope");
            return;
        }
    };
    transport.publish(subject, &payload).await;
}

pub fn start_stream_content(provider_name: &str) -> StreamContent {
    StreamContent::new(StreamStatus::StartStream, provider_name)
}

pub fn end_stream_content(provider_name: &str) -> StreamContent {
    StreamContent::new(StreamStatus::EndStream, provider_name)
}
