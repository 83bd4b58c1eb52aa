use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Uniquely identifies a live [`Provider`](crate::model) instance: `"<workspaceId>:<threadId>"`.
///
/// At most one instance may exist per key at a time (enforced by the registry,
/// not by this type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey(String);

impl InstanceKey {
    pub fn new(workspace_id: &str, thread_id: &str) -> Self {
        Self(format!("{workspace_id}:{thread_id}"))
    }

    /// Parse the canonical `"<workspaceId>:<threadId>"` form.
    pub fn parse(raw: &str) -> Option<Self> {
        let (ws, th) = raw.split_once(':')?;
        if ws.is_empty() || th.is_empty() {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two supported upstream model vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderName {
    OpenAI,
    Anthropic,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::OpenAI => "OpenAI",
            ProviderName::Anthropic => "Anthropic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OpenAI" => Some(ProviderName::OpenAI),
            "Anthropic" => Some(ProviderName::Anthropic),
            _ => None,
        }
    }
}

/// A single chat message. `content` is either a plain string or an ordered
/// sequence of content blocks (images, files, text segments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// Unified input content-block shape (OpenAI-Responses-style), also the
/// normalization target for the Anthropic adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    InputText {
        text: String,
    },
    InputImage {
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    File {
        file: FileRef,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub mime_type: String,
}

/// Pricing metadata attached to a request, as carried in `aiModelMetaInfo.pricing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    #[serde(default = "crate::pricing::default_resale_margin")]
    pub resale_margin: rust_decimal::Decimal,
    pub text: TextPricing,
    /// `image[size][quality] -> price per image`.
    #[serde(default)]
    pub image: std::collections::HashMap<String, std::collections::HashMap<String, rust_decimal::Decimal>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPricing {
    #[serde(default = "crate::pricing::default_price_per")]
    pub price_per: rust_decimal::Decimal,
    pub tiers: std::collections::HashMap<String, TierPrice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPrice {
    #[serde(default)]
    pub prompt: rust_decimal::Decimal,
    #[serde(default)]
    pub completion: rust_decimal::Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiModelMetaInfo {
    pub provider: ProviderName,
    pub model_version: String,
    #[serde(default)]
    pub supports_system_prompt: Option<bool>,
    #[serde(default)]
    pub max_completion_size: Option<u32>,
    #[serde(default)]
    pub default_temperature: Option<f64>,
    pub pricing: Pricing,
}

/// Wire shape of the `ai.interaction.chat.process` request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub workspace_id: String,
    pub ai_chat_thread_id: String,
    pub ai_model_meta_info: AiModelMetaInfo,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub event_meta: Option<serde_json::Value>,
    #[serde(default)]
    pub enable_image_generation: Option<bool>,
    #[serde(default)]
    pub image_size: Option<String>,
}

/// Token usage for one bucket (prompt or completion), priced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBucket {
    pub usage_tokens: u64,
    #[serde(default)]
    pub audio_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    pub purchased_for: rust_decimal::Decimal,
    pub sold_to_client_for: rust_decimal::Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub prompt: TokenBucket,
    pub completion: TokenBucket,
    pub total: TokenBucket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUsageReport {
    pub size: String,
    pub quality: String,
    pub count: u32,
    pub price_per_image: rust_decimal::Decimal,
    pub price_per_image_resale: rust_decimal::Decimal,
    pub purchased_for: rust_decimal::Decimal,
    pub sold_to_client_for: rust_decimal::Decimal,
}

/// Raw token counts collected from a vendor response, prior to pricing.
#[derive(Debug, Clone, Default)]
pub struct RawUsage {
    pub prompt_tokens: u64,
    pub prompt_audio_tokens: u64,
    pub prompt_cached_tokens: u64,
    pub completion_tokens: u64,
    pub completion_audio_tokens: u64,
    pub completion_reasoning_tokens: u64,
}

/// The per-request state threaded through the Workflow Engine. A plain typed
/// record (not a dynamic dict) — fields are mutated in place as the workflow
/// progresses through validate → stream → account → cleanup.
#[derive(Debug, Clone)]
pub struct RequestState {
    pub workspace_id: String,
    pub thread_id: String,
    pub provider: ProviderName,
    pub model_version: String,
    pub messages: Vec<Message>,
    pub ai_model_meta_info: AiModelMetaInfo,

    pub temperature: Option<f64>,
    pub max_completion_size: Option<u32>,
    pub enable_image_generation: bool,
    pub image_size: Option<String>,
    pub event_meta: Option<serde_json::Value>,

    pub stream_active: bool,
    pub usage: Option<UsageTotals>,
    pub image_usage: Option<ImageUsageReport>,
    pub response_id: Option<String>,
    pub ai_vendor_request_id: Option<String>,
    pub ai_request_received_at: Option<DateTime<Utc>>,
    pub ai_request_finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub error_type: Option<String>,
}

impl RequestState {
    pub fn from_envelope(env: RequestEnvelope) -> Self {
        let provider = env.ai_model_meta_info.provider;
        let model_version = env.ai_model_meta_info.model_version.clone();
        let max_completion_size = env.ai_model_meta_info.max_completion_size;
        Self {
            workspace_id: env.workspace_id,
            thread_id: env.ai_chat_thread_id,
            provider,
            model_version,
            messages: env.messages,
            ai_model_meta_info: env.ai_model_meta_info,
            temperature: None,
            max_completion_size,
            enable_image_generation: env.enable_image_generation.unwrap_or(false),
            image_size: env.image_size,
            event_meta: env.event_meta,
            stream_active: false,
            usage: None,
            image_usage: None,
            response_id: None,
            ai_vendor_request_id: None,
            ai_request_received_at: None,
            ai_request_finished_at: None,
            error: None,
            error_code: None,
            error_type: None,
        }
    }

    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(&self.workspace_id, &self.thread_id)
    }
}

/// `status` values for the unified stream-event publish envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    StartStream,
    Streaming,
    EndStream,
    Error,
    ImagePartial,
    ImageComplete,
}

/// The `content` object nested inside a stream-event publish envelope.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamContent {
    pub status: Option<StreamStatus>,
    pub ai_provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl StreamContent {
    pub fn new(status: StreamStatus, ai_provider: &str) -> Self {
        Self {
            status: Some(status),
            ai_provider: ai_provider.to_string(),
            ..Default::default()
        }
    }
}

/// Publish envelope on `ai.interaction.chat.receiveMessage.<workspaceId>.<threadId>`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventEnvelope {
    pub content: StreamContent,
    pub ai_chat_thread_id: String,
}

/// Publish envelope on `ai.interaction.chat.error.<instanceKey>`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error: String,
    pub instance_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}
