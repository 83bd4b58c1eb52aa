//! Anthropic adapter — uses the vendor's streaming messages API.
//!
//! The code-block-formatting suffix is a prompt-engineering hack carried
//! over unchanged: appended to the LAST user message only, never to every
//! user message, and `system` always travels as a separate top-level field,
//! never folded into `messages`. Anthropic does not report audio or
//! reasoning tokens; both are hardcoded to 0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use relaygate_attachments::{convert_attachments_for_provider, resolve_image_urls, ConvertTarget, ObjectStoreFetcher};
use relaygate_core::model::{MessageContent, RawUsage, RequestState, StreamContent, StreamStatus};
use relaygate_transport::Transport;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::provider::{end_stream_content, publish_stream_event, start_stream_content, Provider};
use crate::sse::{parse_sse_line, SseParsed};

const PROVIDER_NAME: &str = "Anthropic";
const CODE_BLOCK_HACK_SUFFIX: &str =
    "\n\nWhen your answer includes code, always wrap it in a properly fenced Markdown code block with the correct language tag.";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    fetcher: Arc<dyn ObjectStoreFetcher>,
}

impl AnthropicProvider {
    pub fn new(api_key: String, fetcher: Arc<dyn ObjectStoreFetcher>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            fetcher,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn stream(
        &self,
        state: &mut RequestState,
        transport: &Transport,
        should_stop: &AtomicBool,
    ) -> Result<()> {
        let body = self.build_request_body(state).await;

        publish_stream_event(transport, state, start_stream_content(PROVIDER_NAME)).await;

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            let err = AdapterError::Api {
                message: text,
                code: Some(status.to_string()),
                kind: Some("http_error".to_string()),
            };
            publish_stream_event(transport, state, error_content(&err)).await;
            publish_stream_event(transport, state, end_stream_content(PROVIDER_NAME)).await;
            return Err(err);
        }

        self.process_stream(resp, state, transport, should_stop).await
    }
}

impl AnthropicProvider {
    async fn build_request_body(&self, state: &RequestState) -> serde_json::Value {
        let system: String = state
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .filter_map(|m| match &m.content {
                MessageContent::Text(t) => Some(t.clone()),
                MessageContent::Blocks(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let last_user_index = state
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == "user")
            .map(|(i, _)| i)
            .last();

        let mut messages = Vec::new();
        for (i, message) in state.messages.iter().enumerate() {
            if message.role == "system" {
                continue;
            }

            let is_last_user = Some(i) == last_user_index;
            let content_json = match &message.content {
                MessageContent::Text(text) => {
                    let text = if is_last_user {
                        format!("{text}{CODE_BLOCK_HACK_SUFFIX}")
                    } else {
                        text.clone()
                    };
                    serde_json::json!([{ "type": "text", "text": text }])
                }
                MessageContent::Blocks(blocks) => {
                    let resolved = resolve_image_urls(blocks.clone(), self.fetcher.as_ref()).await;
                    let mut converted = convert_attachments_for_provider(resolved, ConvertTarget::Anthropic);
                    if is_last_user {
                        if let serde_json::Value::Array(arr) = &mut converted {
                            arr.push(serde_json::json!({
                                "type": "text",
                                "text": CODE_BLOCK_HACK_SUFFIX.trim_start(),
                            }));
                        }
                    }
                    converted
                }
            };

            messages.push(serde_json::json!({
                "role": message.role,
                "content": content_json,
            }));
        }

        let mut body = serde_json::json!({
            "model": state.model_version,
            "messages": messages,
            "max_tokens": state.max_completion_size.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system);
        }
        if let Some(temperature) = state.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        body
    }

    async fn process_stream(
        &self,
        resp: reqwest::Response,
        state: &mut RequestState,
        transport: &Transport,
        should_stop: &AtomicBool,
    ) -> Result<()> {
        let mut byte_stream = resp.bytes_stream();
        let mut line_buf = String::new();
        let mut current_event = String::new();

        let mut input_tokens: u64 = 0;
        let mut output_tokens: u64 = 0;

        'outer: while let Some(chunk) = byte_stream.next().await {
            if should_stop.load(Ordering::Relaxed) {
                break;
            }

            let chunk = chunk?;
            let text = match std::str::from_utf8(&chunk) {
                Ok(t) => t,
                Err(_) => continue,
            };

            line_buf.push_str(text);
            let lines: Vec<&str> = line_buf.split('\n').collect();
            let (complete, remainder) = lines.split_at(lines.len() - 1);
            let remainder = remainder.first().unwrap_or(&"").to_string();

            for line in complete {
                if should_stop.load(Ordering::Relaxed) {
                    break 'outer;
                }
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match parse_sse_line(line) {
                    Some(SseParsed::Event(ev)) => current_event = ev,
                    Some(SseParsed::Data(data)) => match current_event.as_str() {
                        "message_start" => {
                            if let Ok(msg) = serde_json::from_str::<MessageStart>(&data) {
                                input_tokens = msg.message.usage.input_tokens;
                                state.ai_vendor_request_id = Some(msg.message.id);
                            }
                        }
                        "content_block_delta" => {
                            if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(&data) {
                                if delta.delta.delta_type == "text_delta" {
                                    if let Some(text) = delta.delta.text {
                                        let mut content = StreamContent::new(StreamStatus::Streaming, PROVIDER_NAME);
                                        content.text = Some(text);
                                        publish_stream_event(transport, state, content).await;
                                    }
                                }
                            }
                        }
                        "message_delta" => {
                            if let Ok(delta) = serde_json::from_str::<MessageDelta>(&data) {
                                output_tokens = delta.usage.output_tokens;
                            }
                        }
                        "error" => {
                            debug!(data, "anthropic stream error event");
                            let err = AdapterError::Api {
                                message: data.clone(),
                                code: None,
                                kind: Some("stream_error".to_string()),
                            };
                            publish_stream_event(transport, state, error_content(&err)).await;
                            publish_stream_event(transport, state, end_stream_content(PROVIDER_NAME)).await;
                            return Err(err);
                        }
                        _ => {}
                    },
                    None => {}
                }
            }

            line_buf = remainder;
        }

        let raw = RawUsage {
            prompt_tokens: input_tokens,
            prompt_audio_tokens: 0,
            prompt_cached_tokens: 0,
            completion_tokens: output_tokens,
            completion_audio_tokens: 0,
            completion_reasoning_tokens: 0,
        };
        state.usage = Some(relaygate_usage::price_text_usage(
            &state.ai_model_meta_info.pricing,
            &raw,
        ));

        publish_stream_event(transport, state, end_stream_content(PROVIDER_NAME)).await;
        Ok(())
    }
}

fn error_content(err: &AdapterError) -> StreamContent {
    let mut content = StreamContent::new(StreamStatus::Error, PROVIDER_NAME);
    content.message = Some(err.to_string());
    if let AdapterError::Api { code, kind, .. } = err {
        content.code = code.clone();
        content.error_type = kind.clone();
    }
    content
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Debug, Deserialize)]
struct MessageStartInner {
    id: String,
    usage: InputUsage,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Debug, Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    usage: OutputUsage,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_content_block_delta() {
        let raw = r#"{"delta":{"type":"text_delta","text":"hi"}}"#;
        let parsed: ContentBlockDelta = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.delta.delta_type, "text_delta");
        assert_eq!(parsed.delta.text.as_deref(), Some("hi"));
    }

    #[test]
    fn deserializes_message_start_usage() {
        let raw = r#"{"message":{"id":"msg_1","usage":{"input_tokens":42}}}"#;
        let parsed: MessageStart = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.id, "msg_1");
        assert_eq!(parsed.message.usage.input_tokens, 42);
    }
}
