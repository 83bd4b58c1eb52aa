//! The Workflow Engine: validate → stream → account → cleanup.
//!
//! Cleanup is guaranteed by [`InstanceGuard`]'s `Drop` impl rather than a
//! `try/finally` block — the guard is held for the whole function and
//! released on every return path, including the early-return error cases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relaygate_core::model::{
    ErrorEnvelope, ProviderName, RequestEnvelope, RequestState, StreamContent, StreamStatus,
};
use relaygate_core::GatewayError;
use relaygate_transport::Transport;
use tracing::{info, warn};

use crate::provider::Provider;
use crate::registry::InstanceRegistry;

/// The two vendor adapters, resolved by [`ProviderName`].
pub struct ProviderSet {
    pub openai: Arc<dyn Provider>,
    pub anthropic: Arc<dyn Provider>,
}

impl ProviderSet {
    pub fn get(&self, name: ProviderName) -> Arc<dyn Provider> {
        match name {
            ProviderName::OpenAI => self.openai.clone(),
            ProviderName::Anthropic => self.anthropic.clone(),
        }
    }
}

/// Runs one `ai.interaction.chat.process` request end to end. Never panics
/// on a vendor or validation failure — every failure path publishes a
/// structured error event and returns, so the caller (the subscription
/// handler) only needs to log.
pub async fn run_workflow(
    envelope: RequestEnvelope,
    registry: Arc<InstanceRegistry>,
    transport: Arc<Transport>,
    providers: Arc<ProviderSet>,
    timeout_secs: u64,
) {
    if let Err(e) = validate(&envelope) {
        publish_error(&transport, &envelope.workspace_id, &envelope.ai_chat_thread_id, &e).await;
        return;
    }

    let mut state = RequestState::from_envelope(envelope);
    let instance_key = state.instance_key();

    let guard = match registry.register(instance_key.clone()) {
        Ok(g) => g,
        Err(e) => {
            publish_error(&transport, &state.workspace_id, &state.thread_id, &e).await;
            return;
        }
    };

    state.ai_request_received_at = Some(Utc::now());
    state.stream_active = true;

    let should_stop = Arc::new(AtomicBool::new(false));
    let watcher_token = guard.cancellation_token();
    let watcher_flag = should_stop.clone();
    let watcher = tokio::spawn(async move {
        watcher_token.cancelled().await;
        watcher_flag.store(true, Ordering::Relaxed);
    });

    let provider = providers.get(state.provider);
    let outcome = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        provider.stream(&mut state, &transport, &should_stop),
    )
    .await;
    watcher.abort();

    state.stream_active = false;
    state.ai_request_finished_at = Some(Utc::now());

    match outcome {
        Ok(Ok(())) => {
            info!(instance_key = %instance_key, provider = state.provider.as_str(), "request completed");
        }
        Ok(Err(adapter_err)) => {
            let err: GatewayError = adapter_err.into();
            state.error = Some(err.to_string());
            state.error_code = Some(err.code().to_string());
            publish_error(&transport, &state.workspace_id, &state.thread_id, &err).await;
        }
        Err(_elapsed) => {
            let err = GatewayError::Timeout { secs: timeout_secs };
            state.error = Some(err.to_string());
            state.error_code = Some(err.code().to_string());
            publish_error(&transport, &state.workspace_id, &state.thread_id, &err).await;
            let mut content = StreamContent::new(StreamStatus::Error, state.provider.as_str());
            content.message = Some(err.to_string());
            content.code = Some(err.code().to_string());
            crate::provider::publish_stream_event(&transport, &state, content).await;
            // The timeout aborts the in-flight `provider.stream()` future
            // directly, so the adapter never reaches its own END_STREAM —
            // publish the compensating one here.
            crate::provider::publish_stream_event(
                &transport,
                &state,
                crate::provider::end_stream_content(state.provider.as_str()),
            )
            .await;
        }
    }

    relaygate_usage::report_usage(&state);

    // `guard` drops here, releasing the instance key unconditionally.
    drop(guard);
}

fn validate(envelope: &RequestEnvelope) -> Result<(), GatewayError> {
    if envelope.workspace_id.is_empty() {
        return Err(GatewayError::Validation {
            field: "workspaceId".to_string(),
        });
    }
    if envelope.ai_chat_thread_id.is_empty() {
        return Err(GatewayError::Validation {
            field: "aiChatThreadId".to_string(),
        });
    }
    if envelope.messages.is_empty() {
        return Err(GatewayError::Validation {
            field: "messages".to_string(),
        });
    }
    if envelope.ai_model_meta_info.model_version.is_empty() {
        return Err(GatewayError::Validation {
            field: "modelVersion".to_string(),
        });
    }
    Ok(())
}

async fn publish_error(transport: &Transport, workspace_id: &str, thread_id: &str, err: &GatewayError) {
    warn!(workspace_id, thread_id, error = %err, "request failed");
    let envelope = build_error_envelope(workspace_id, thread_id, err);
    let subject = format!("ai.interaction.chat.error.{workspace_id}:{thread_id}");
    let payload = match serde_json::to_value(&envelope) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to encode error envelope");
            return;
        }
    };
    transport.publish(subject, &payload).await;
}

fn build_error_envelope(workspace_id: &str, thread_id: &str, err: &GatewayError) -> ErrorEnvelope {
    ErrorEnvelope {
        error: err.wire_message(),
        instance_key: format!("{workspace_id}:{thread_id}"),
        error_code: Some(err.wire_error_code()),
        error_type: err.wire_error_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaygate_core::config::NatsConfig;
    use relaygate_core::model::{
        AiModelMetaInfo, InstanceKey, Message, MessageContent, Pricing, RawUsage, TextPricing,
        TierPrice,
    };
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::time::Instant;

    fn test_transport() -> Arc<Transport> {
        Transport::new(NatsConfig {
            servers: "nats://localhost:4222".to_string(),
            nkey_seed: None,
            user_id: None,
            token: None,
            user: None,
            password: None,
            tls_ca_cert: None,
            connect_timeout_ms: 100,
            request_timeout_ms: 100,
            reconnect_time_wait_ms: 100,
            max_reconnect_attempts: 0,
        })
    }

    fn test_pricing() -> Pricing {
        let mut tiers = HashMap::new();
        tiers.insert(
            "default".to_string(),
            TierPrice {
                prompt: Decimal::new(3, 0),
                completion: Decimal::new(15, 0),
            },
        );
        Pricing {
            resale_margin: Decimal::new(15, 1), // 1.5
            text: TextPricing {
                price_per: Decimal::from(1_000_000u64),
                tiers,
            },
            image: HashMap::new(),
        }
    }

    fn test_envelope(workspace_id: &str, thread_id: &str, provider: ProviderName) -> RequestEnvelope {
        RequestEnvelope {
            workspace_id: workspace_id.to_string(),
            ai_chat_thread_id: thread_id.to_string(),
            ai_model_meta_info: AiModelMetaInfo {
                provider,
                model_version: "test-model".to_string(),
                supports_system_prompt: None,
                max_completion_size: None,
                default_temperature: None,
                pricing: test_pricing(),
            },
            messages: vec![Message {
                role: "user".to_string(),
                content: MessageContent::Text("hi".to_string()),
            }],
            event_meta: None,
            enable_image_generation: None,
            image_size: None,
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl Provider for AlwaysOk {
        fn name(&self) -> &'static str {
            "always-ok"
        }

        async fn stream(
            &self,
            state: &mut RequestState,
            transport: &Transport,
            _should_stop: &AtomicBool,
        ) -> crate::error::Result<()> {
            crate::provider::publish_stream_event(
                transport,
                state,
                crate::provider::start_stream_content(self.name()),
            )
            .await;
            let raw = RawUsage {
                prompt_tokens: 1_000,
                completion_tokens: 500,
                ..Default::default()
            };
            state.usage = Some(relaygate_usage::price_text_usage(
                &state.ai_model_meta_info.pricing,
                &raw,
            ));
            crate::provider::publish_stream_event(
                transport,
                state,
                crate::provider::end_stream_content(self.name()),
            )
            .await;
            Ok(())
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl Provider for AlwaysFail {
        fn name(&self) -> &'static str {
            "always-fail"
        }

        async fn stream(
            &self,
            state: &mut RequestState,
            transport: &Transport,
            _should_stop: &AtomicBool,
        ) -> crate::error::Result<()> {
            crate::provider::publish_stream_event(
                transport,
                state,
                crate::provider::start_stream_content(self.name()),
            )
            .await;
            let err = crate::error::AdapterError::Api {
                message: "quota".to_string(),
                code: Some("insufficient_quota".to_string()),
                kind: Some("billing_error".to_string()),
            };
            crate::provider::publish_stream_event(transport, state, error_content_for_test(&err)).await;
            crate::provider::publish_stream_event(
                transport,
                state,
                crate::provider::end_stream_content(self.name()),
            )
            .await;
            Err(err)
        }
    }

    fn error_content_for_test(err: &crate::error::AdapterError) -> StreamContent {
        let mut content = StreamContent::new(StreamStatus::Error, "always-fail");
        content.message = Some(err.to_string());
        content
    }

    struct Hangs {
        sleep_ms: u64,
    }

    #[async_trait]
    impl Provider for Hangs {
        fn name(&self) -> &'static str {
            "hangs"
        }

        async fn stream(
            &self,
            state: &mut RequestState,
            transport: &Transport,
            _should_stop: &AtomicBool,
        ) -> crate::error::Result<()> {
            crate::provider::publish_stream_event(
                transport,
                state,
                crate::provider::start_stream_content(self.name()),
            )
            .await;
            tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
            Ok(())
        }
    }

    fn providers_with(provider: Arc<dyn Provider>) -> Arc<ProviderSet> {
        Arc::new(ProviderSet {
            openai: provider.clone(),
            anthropic: provider,
        })
    }

    #[test]
    fn validate_rejects_missing_required_fields() {
        let mut envelope = test_envelope("ws1", "th1", ProviderName::OpenAI);
        envelope.workspace_id.clear();
        assert!(matches!(
            validate(&envelope),
            Err(GatewayError::Validation { field }) if field == "workspaceId"
        ));

        let mut envelope = test_envelope("ws1", "th1", ProviderName::OpenAI);
        envelope.ai_chat_thread_id.clear();
        assert!(matches!(
            validate(&envelope),
            Err(GatewayError::Validation { field }) if field == "aiChatThreadId"
        ));

        let mut envelope = test_envelope("ws1", "th1", ProviderName::OpenAI);
        envelope.messages.clear();
        assert!(matches!(
            validate(&envelope),
            Err(GatewayError::Validation { field }) if field == "messages"
        ));

        let mut envelope = test_envelope("ws1", "th1", ProviderName::OpenAI);
        envelope.ai_model_meta_info.model_version.clear();
        assert!(matches!(
            validate(&envelope),
            Err(GatewayError::Validation { field }) if field == "modelVersion"
        ));

        assert!(validate(&test_envelope("ws1", "th1", ProviderName::OpenAI)).is_ok());
    }

    #[test]
    fn error_envelope_carries_raw_vendor_message_and_type() {
        // S4: vendor failure with message "quota", code "insufficient_quota",
        // type "billing_error" must surface on the chat.error subject verbatim,
        // not wrapped in GatewayError's Display rendering.
        let err = GatewayError::Vendor {
            message: "quota".to_string(),
            code: Some("insufficient_quota".to_string()),
            kind: Some("billing_error".to_string()),
        };
        let envelope = build_error_envelope("ws1", "th1", &err);
        assert_eq!(envelope.error, "quota");
        assert_eq!(envelope.error_code.as_deref(), Some("insufficient_quota"));
        assert_eq!(envelope.error_type.as_deref(), Some("billing_error"));
        assert_eq!(envelope.instance_key, "ws1:th1");
    }

    #[tokio::test]
    async fn happy_path_prices_usage_and_releases_instance() {
        // S1 + S6: a request that streams to completion prices usage and
        // frees the instance key for the next request on the same thread.
        let registry = Arc::new(InstanceRegistry::new());
        let transport = test_transport();
        let providers = providers_with(Arc::new(AlwaysOk));
        let envelope = test_envelope("ws1", "th1", ProviderName::OpenAI);
        let key = InstanceKey::new("ws1", "th1");

        run_workflow(envelope, registry.clone(), transport, providers, 30).await;

        assert!(!registry.is_active(&key));
    }

    #[tokio::test]
    async fn vendor_failure_releases_instance() {
        let registry = Arc::new(InstanceRegistry::new());
        let transport = test_transport();
        let providers = providers_with(Arc::new(AlwaysFail));
        let envelope = test_envelope("ws1", "th2", ProviderName::Anthropic);
        let key = InstanceKey::new("ws1", "th2");

        run_workflow(envelope, registry.clone(), transport, providers, 30).await;

        assert!(!registry.is_active(&key));
    }

    #[tokio::test]
    async fn timeout_releases_instance() {
        let registry = Arc::new(InstanceRegistry::new());
        let transport = test_transport();
        let providers = providers_with(Arc::new(Hangs { sleep_ms: 60_000 }));
        let envelope = test_envelope("ws1", "th3", ProviderName::OpenAI);
        let key = InstanceKey::new("ws1", "th3");

        // timeout_secs=0 elapses immediately, well before Hangs ever returns.
        run_workflow(envelope, registry.clone(), transport, providers, 0).await;

        assert!(!registry.is_active(&key));
    }

    #[tokio::test]
    async fn duplicate_request_for_same_thread_is_rejected_not_queued() {
        let registry = Arc::new(InstanceRegistry::new());
        let transport = test_transport();
        let providers = providers_with(Arc::new(Hangs { sleep_ms: 500 }));
        let envelope = test_envelope("ws1", "th4", ProviderName::OpenAI);
        let key = InstanceKey::new("ws1", "th4");

        let first = tokio::spawn(run_workflow(
            envelope,
            registry.clone(),
            transport.clone(),
            providers,
            30,
        ));
        // Give the first request a chance to register before the duplicate arrives.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_active(&key));

        let second_providers = providers_with(Arc::new(AlwaysOk));
        let second_envelope = test_envelope("ws1", "th4", ProviderName::OpenAI);
        let started = Instant::now();
        run_workflow(second_envelope, registry.clone(), transport, second_providers, 30).await;
        // A duplicate is rejected immediately with Busy, not queued behind
        // the first request's 500ms stream.
        assert!(started.elapsed() < Duration::from_millis(400));

        first.await.unwrap();
        assert!(!registry.is_active(&key));
    }
}
