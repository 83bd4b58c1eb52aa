use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dashmap::DashMap;
use futures_util::StreamExt;
use relaygate_core::config::NatsConfig;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, TransportError};
use crate::jwt::sign_self_issued_jwt;
use crate::subscription::{PayloadEncoding, SubscriptionKind, SubscriptionSpec};

/// Default JWT validity when self-issuing (spec default: 1 hour).
const JWT_EXPIRY_HOURS: i64 = 1;
/// Jitter fraction applied to the initial-connect backoff (±10%), matching
/// the channel manager's reconnect style this Transport's backoff is grounded on.
const JITTER_FRACTION: f64 = 0.10;
/// Floor for the backoff delay, in case `reconnect_time_wait_ms` is configured
/// below a second.
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_MAX_SECS: u64 = 60;

enum ConnEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// Owns the connection to the NATS broker, the declared subscription set, and
/// the desired-vs-installed reconciliation that keeps subscriptions alive
/// across reconnects.
pub struct Transport {
    config: NatsConfig,
    client: RwLock<Option<async_nats::Client>>,
    connected: AtomicBool,
    desired: RwLock<Vec<SubscriptionSpec>>,
    installed: DashMap<String, JoinHandle<()>>,
}

impl Transport {
    pub fn new(config: NatsConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            client: RwLock::new(None),
            connected: AtomicBool::new(false),
            desired: RwLock::new(Vec::new()),
            installed: DashMap::new(),
        })
    }

    /// Declare the full set of subscriptions this process wants installed.
    /// Call before [`Transport::connect`]; reconciliation re-reads this set
    /// on every successful connect, including reconnects.
    pub async fn declare_subscriptions(&self, specs: Vec<SubscriptionSpec>) {
        *self.desired.write().await = specs;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect, retrying with exponential backoff + jitter forever when
    /// `max_reconnect_attempts == -1` (the spec default), or up to that many
    /// attempts otherwise. Never returns an error on a transient failure —
    /// only on an unrecoverable misconfiguration (e.g. a malformed NKey seed).
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConnEvent>();

        let servers = self.config.servers.clone();

        let mut delay_secs = (self.config.reconnect_time_wait_ms / 1000).max(BACKOFF_BASE_SECS);
        let mut attempt: i64 = 0;
        let client = loop {
            attempt += 1;
            let options = self.build_connect_options(tx.clone())?;
            let connect_fut = async_nats::connect_with_options(servers.as_str(), options);
            let timeout = Duration::from_millis(self.config.connect_timeout_ms);
            match tokio::time::timeout(timeout, connect_fut).await {
                Ok(Ok(client)) => break client,
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "NATS connect failed");
                }
                Err(_) => {
                    warn!(attempt, timeout_ms = self.config.connect_timeout_ms, "NATS connect timed out");
                }
            }

            if self.config.max_reconnect_attempts >= 0 && attempt >= self.config.max_reconnect_attempts {
                return Err(TransportError::Connect(format!(
                    "giving up after {attempt} attempts"
                )));
            }

            let jitter = jitter_secs(delay_secs);
            let wait = Duration::from_secs(delay_secs + jitter);
            warn!(retry_after_secs = wait.as_secs(), "scheduling reconnect");
            tokio::time::sleep(wait).await;
            delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
        };

        *self.client.write().await = Some(client);
        self.connected.store(true, Ordering::SeqCst);
        info!("connected to NATS");
        self.reconcile().await?;

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ConnEvent::Connected => {
                        this.connected.store(true, Ordering::SeqCst);
                        info!("NATS reconnected, reconciling subscriptions");
                        if let Err(e) = this.reconcile().await {
                            warn!(error = %e, "failed to reconcile subscriptions after reconnect");
                        }
                    }
                    ConnEvent::Disconnected => {
                        this.connected.store(false, Ordering::SeqCst);
                        warn!("NATS disconnected");
                    }
                    ConnEvent::Error(msg) => {
                        warn!(error = %msg, "NATS connection error");
                    }
                }
            }
        });

        Ok(())
    }

    fn build_connect_options(
        &self,
        tx: mpsc::UnboundedSender<ConnEvent>,
    ) -> Result<async_nats::ConnectOptions> {
        let mut options = async_nats::ConnectOptions::new();

        // Auth precedence: nkeySeed+userId -> token verbatim -> user+password -> anonymous.
        if let (Some(seed_str), Some(user_id)) = (&self.config.nkey_seed, &self.config.user_id) {
            let seed = decode_nkey_seed(seed_str)?;
            let jwt = sign_self_issued_jwt(&seed, user_id, JWT_EXPIRY_HOURS)
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            options = options.token(jwt);
        } else if let Some(token) = &self.config.token {
            options = options.token(token.clone());
        } else if let (Some(user), Some(password)) = (&self.config.user, &self.config.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }

        if let Some(ca_path) = &self.config.tls_ca_cert {
            options = options
                .require_tls(true)
                .add_root_certificates(std::path::PathBuf::from(ca_path));
        }

        let tx_events = tx.clone();
        options = options.event_callback(move |event| {
            let tx = tx_events.clone();
            async move {
                let mapped = match event {
                    async_nats::Event::Connected => Some(ConnEvent::Connected),
                    async_nats::Event::Disconnected => Some(ConnEvent::Disconnected),
                    other => Some(ConnEvent::Error(format!("{other:?}"))),
                };
                if let Some(e) = mapped {
                    let _ = tx.send(e);
                }
            }
        });

        Ok(options)
    }

    /// Re-run subscription reconciliation on demand, e.g. right after
    /// declaring a new desired set outside of a (re)connect event.
    pub async fn reconcile_now(&self) -> Result<()> {
        self.reconcile().await
    }

    /// Diff desired vs installed subscriptions and install whatever is
    /// missing. Called on every successful connect (initial and reconnect).
    async fn reconcile(&self) -> Result<()> {
        let client = {
            let guard = self.client.read().await;
            guard.clone().ok_or(TransportError::Disconnected)?
        };
        let desired = self.desired.read().await.clone();
        for spec in desired {
            if self.installed.contains_key(&spec.subject) {
                continue;
            }
            self.install(&client, spec).await?;
        }
        Ok(())
    }

    async fn install(&self, client: &async_nats::Client, spec: SubscriptionSpec) -> Result<()> {
        let subscriber = match &spec.queue_group {
            Some(q) => client
                .queue_subscribe(spec.subject.clone(), q.clone())
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?,
            None => client
                .subscribe(spec.subject.clone())
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?,
        };

        let reply_client = client.clone();
        let subject_for_log = spec.subject.clone();
        let handle = tokio::spawn(run_subscription(subscriber, spec, reply_client));
        self.installed.insert(subject_for_log, handle);
        Ok(())
    }

    /// Fire-and-forget publish. Logged and dropped (never buffered) when
    /// disconnected, matching the source's failure mode.
    pub async fn publish(&self, subject: impl Into<String>, payload: &serde_json::Value) {
        let subject = subject.into();
        if !self.is_connected() {
            warn!(%subject, "publish while disconnected, message dropped");
            return;
        }
        let client = {
            let guard = self.client.read().await;
            guard.clone()
        };
        let Some(client) = client else {
            warn!(%subject, "publish while disconnected, message dropped");
            return;
        };
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!(%subject, error = %e, "failed to encode publish payload");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), bytes.into()).await {
            warn!(%subject, error = %e, "publish failed, message dropped");
        }
    }

    /// A clone of the underlying NATS client, for callers (e.g. the object
    /// store fetcher) that need direct access beyond publish/subscribe.
    pub async fn client(&self) -> Option<async_nats::Client> {
        self.client.read().await.clone()
    }

    /// Request/reply with the configured request timeout.
    pub async fn request(
        &self,
        subject: impl Into<String>,
        payload: &serde_json::Value,
        timeout_ms: u64,
    ) -> Result<serde_json::Value> {
        let subject = subject.into();
        let client = {
            let guard = self.client.read().await;
            guard.clone().ok_or(TransportError::Disconnected)?
        };
        let bytes = serde_json::to_vec(payload)?;
        let fut = client.request(subject, bytes.into());
        let reply = tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
            .await
            .map_err(|_| TransportError::Timeout { ms: timeout_ms })?
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        let value: serde_json::Value = serde_json::from_slice(&reply.payload)?;
        Ok(value)
    }

    /// Cancel all installed subscription tasks and close the connection.
    pub async fn disconnect(&self) {
        for entry in self.installed.iter() {
            entry.value().abort();
        }
        self.installed.clear();
        if let Some(client) = self.client.write().await.take() {
            let _ = client.flush().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Subjects matching `pattern` among currently installed subscriptions
    /// (single-`*` wildcard only, see [`crate::wildcard::wildcard_match`]).
    pub fn find_subjects(&self, pattern: &str) -> Vec<String> {
        self.installed
            .iter()
            .map(|e| e.key().clone())
            .filter(|s| crate::wildcard::wildcard_match(s, pattern))
            .collect()
    }
}

async fn run_subscription(
    mut subscriber: async_nats::Subscriber,
    spec: SubscriptionSpec,
    reply_client: async_nats::Client,
) {
    while let Some(msg) = subscriber.next().await {
        let payload = decode_payload(&msg.payload, spec.payload_encoding);
        let outcome = spec.handler.handle(&msg.subject, payload).await;

        match (spec.kind, outcome) {
            (SubscriptionKind::Reply, Ok(value)) => {
                if let Some(reply_subject) = msg.reply.clone() {
                    let body = value.unwrap_or(serde_json::Value::Null);
                    send_reply(&reply_client, reply_subject, &body).await;
                }
            }
            (SubscriptionKind::Reply, Err(e)) => {
                if let Some(reply_subject) = msg.reply.clone() {
                    let body = serde_json::json!({ "error": e });
                    send_reply(&reply_client, reply_subject, &body).await;
                }
            }
            (SubscriptionKind::Subscribe, Ok(_)) => {}
            (SubscriptionKind::Subscribe, Err(e)) => {
                warn!(subject = %msg.subject, error = %e, "subscription handler error");
            }
        }
    }
}

async fn send_reply(client: &async_nats::Client, reply_subject: async_nats::Subject, body: &serde_json::Value) {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            if let Err(e) = client.publish(reply_subject, bytes.into()).await {
                warn!(error = %e, "failed to send reply");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode reply payload"),
    }
}

fn decode_payload(payload: &[u8], encoding: PayloadEncoding) -> serde_json::Value {
    match encoding {
        PayloadEncoding::Json => {
            serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null)
        }
        PayloadEncoding::Buffer => serde_json::Value::String(BASE64.encode(payload)),
    }
}

/// Decode a configured NKey seed into the raw 32-byte Ed25519 seed the signer
/// needs. Accepts either a raw base64url-encoded 32-byte seed or a raw
/// 32-byte value passed through some other out-of-band encoding — the
/// human-facing `SU...` NATS NKey text encoding is NOT supported here (no
/// `nkeys` dependency; see DESIGN.md).
fn decode_nkey_seed(raw: &str) -> Result<[u8; 32]> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(raw)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(raw))
        .map_err(|_| TransportError::Jwt("NATS_NKEY_SEED is not valid base64".into()))?;
    if decoded.len() != 32 {
        return Err(TransportError::Jwt(format!(
            "NATS_NKEY_SEED must decode to 32 bytes, got {}",
            decoded.len()
        )));
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&decoded);
    Ok(seed)
}

fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}
