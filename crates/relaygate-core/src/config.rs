use figment::{providers::Env, Figment};
use serde::{Deserialize, Serialize};

/// Default per-request workflow timeout (circuit breaker), in seconds.
pub const DEFAULT_LLM_TIMEOUT_SECONDS: u64 = 1200;
/// Default NATS connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
/// Default NATS request/reply timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3_000;
/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_TIME_WAIT_MS: u64 = 2_000;

/// Top-level config, loaded from `RELAYGATE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub nats: NatsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default = "default_llm_timeout_seconds")]
    pub llm_timeout_seconds: u64,
    #[serde(default)]
    pub image: ImageSidecarConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// Comma-separated broker URLs.
    #[serde(default = "default_nats_servers")]
    pub servers: String,
    /// NKey seed used to sign a self-issued JWT. Takes precedence over `token`.
    pub nkey_seed: Option<String>,
    /// `sub` claim paired with `nkey_seed`.
    pub user_id: Option<String>,
    /// Bearer token used verbatim when no NKey seed is configured.
    pub token: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Path to a CA certificate enabling TLS when present.
    pub tls_ca_cert: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_reconnect_time_wait_ms")]
    pub reconnect_time_wait_ms: u64,
    /// `-1` means unbounded retry, matching the source default.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSidecarConfig {
    /// Host (scheme + authority) of the internal image store API.
    #[serde(default = "default_image_api_host")]
    pub api_host: String,
}

impl Default for ImageSidecarConfig {
    fn default() -> Self {
        Self {
            api_host: default_image_api_host(),
        }
    }
}

fn default_nats_servers() -> String {
    "nats://localhost:4222".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
fn default_reconnect_time_wait_ms() -> u64 {
    DEFAULT_RECONNECT_TIME_WAIT_MS
}
fn default_max_reconnect_attempts() -> i64 {
    -1
}
fn default_llm_timeout_seconds() -> u64 {
    DEFAULT_LLM_TIMEOUT_SECONDS
}
fn default_image_api_host() -> String {
    "http://localhost:8000".to_string()
}

impl GatewayConfig {
    /// Load config from `RELAYGATE_*` environment variables.
    ///
    /// `RELAYGATE_NATS_NKEY_SEED` (or `RELAYGATE_NATS_TOKEN` /
    /// `RELAYGATE_NATS_USER`+`RELAYGATE_NATS_PASSWORD`) is required unless the
    /// broker allows anonymous connections.
    pub fn load() -> crate::error::Result<Self> {
        Figment::new()
            .merge(Env::prefixed("RELAYGATE_").split("_"))
            .extract()
            .map_err(|e| crate::error::GatewayError::Config(e.to_string()))
    }
}
