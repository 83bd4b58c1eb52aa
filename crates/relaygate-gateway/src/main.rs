use std::sync::Arc;

use relaygate_agent::{
    ChatProcessHandler, ChatStopHandler, InstanceRegistry, ProviderSet,
};
use relaygate_attachments::JetStreamObjectStore;
use relaygate_core::config::GatewayConfig;
use relaygate_transport::{SubscriptionSpec, Transport};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaygate_gateway=info,relaygate_agent=info".into()),
        )
        .init();

    let config = GatewayConfig::load()?;

    let transport = Transport::new(config.nats.clone());

    let registry = Arc::new(InstanceRegistry::new());
    let stop_handler = Arc::new(ChatStopHandler::new(registry.clone()));

    // A connection is required before we can hand the object store a real
    // NATS client, so the provider set is built after the first connect.
    transport.connect().await?;
    let client = transport
        .client()
        .await
        .ok_or_else(|| anyhow::anyhow!("transport reports connected but has no client"))?;
    let fetcher = Arc::new(JetStreamObjectStore::new(client));

    let openai = Arc::new(relaygate_agent::OpenAiProvider::new(
        config.providers.openai_api_key.clone().unwrap_or_default(),
        config.image.api_host.clone(),
        fetcher.clone(),
    ));
    let anthropic = Arc::new(relaygate_agent::AnthropicProvider::new(
        config.providers.anthropic_api_key.clone().unwrap_or_default(),
        fetcher,
    ));
    let providers = Arc::new(ProviderSet { openai, anthropic });

    let chat_handler = Arc::new(ChatProcessHandler::new(
        registry.clone(),
        transport.clone(),
        providers,
        config.llm_timeout_seconds,
    ));

    let specs = vec![
        SubscriptionSpec::subscribe("ai.interaction.chat.process", chat_handler)
            .with_queue_group("llm-workers"),
        SubscriptionSpec::subscribe("ai.interaction.chat.stop.*.*", stop_handler),
    ];
    transport.declare_subscriptions(specs).await;
    // Re-run reconciliation now that the subscriptions are declared — the
    // initial connect() above reconciled against an empty desired set.
    transport.reconcile_now().await?;

    info!("relaygate gateway started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    registry.shutdown();
    transport.disconnect().await;
    info!("shutdown complete");

    Ok(())
}
