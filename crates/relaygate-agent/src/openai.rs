//! OpenAI adapter — uses the Responses API (not chat.completions), per the
//! streaming event contract in `ai.interaction.chat.process`'s spec.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use relaygate_attachments::{convert_attachments_for_provider, resolve_image_urls, ConvertTarget, ObjectStoreFetcher};
use relaygate_core::model::{MessageContent, RawUsage, RequestState, StreamContent, StreamStatus};
use relaygate_transport::Transport;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};
use crate::image_sidecar::upload_image;
use crate::provider::{end_stream_content, publish_stream_event, start_stream_content, Provider};
use crate::sse::{parse_sse_line, SseParsed};

const PROVIDER_NAME: &str = "OpenAI";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    image_api_host: String,
    fetcher: Arc<dyn ObjectStoreFetcher>,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        image_api_host: String,
        fetcher: Arc<dyn ObjectStoreFetcher>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com".to_string(),
            image_api_host,
            fetcher,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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
            .post(format!("{}/v1/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI Responses API error");
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

impl OpenAiProvider {
    async fn build_request_body(&self, state: &RequestState) -> serde_json::Value {
        let supports_system_prompt = state
            .ai_model_meta_info
            .supports_system_prompt
            .unwrap_or(false);

        let mut instructions: Option<String> = None;
        let mut input = Vec::with_capacity(state.messages.len());

        for message in &state.messages {
            if message.role == "system" && supports_system_prompt {
                if let MessageContent::Text(text) = &message.content {
                    instructions = Some(text.clone());
                    continue;
                }
            }

            let content_json = match &message.content {
                MessageContent::Text(text) => serde_json::Value::String(text.clone()),
                MessageContent::Blocks(blocks) => {
                    let resolved = resolve_image_urls(blocks.clone(), self.fetcher.as_ref()).await;
                    convert_attachments_for_provider(resolved, ConvertTarget::OpenAi)
                }
            };

            input.push(serde_json::json!({
                "role": message.role,
                "content": content_json,
            }));
        }

        let mut body = serde_json::json!({
            "model": state.model_version,
            "input": input,
            "stream": true,
        });
        if let Some(instructions) = instructions {
            body["instructions"] = serde_json::Value::String(instructions);
        }
        if let Some(temperature) = state.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_output_tokens) = state.max_completion_size {
            body["max_output_tokens"] = serde_json::json!(max_output_tokens);
        }
        if state.enable_image_generation {
            body["tools"] = serde_json::json!([{
                "type": "image_generation",
                "quality": "high",
                "partial_images": 3,
            }]);
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
        let mut partial_index: u32 = 0;
        let mut image_count: u32 = 0;

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
                let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                    continue;
                };
                if data.trim() == "[DONE]" {
                    break 'outer;
                }

                let event: ResponseEvent = match serde_json::from_str(&data) {
                    Ok(e) => e,
                    Err(e) => {
                        debug!(error = %e, "unparseable OpenAI stream event, skipping");
                        continue;
                    }
                };

                match event.event_type.as_str() {
                    "response.output_text.delta" => {
                        if let Some(delta) = event.delta {
                            let mut content = StreamContent::new(StreamStatus::Streaming, PROVIDER_NAME);
                            content.text = Some(delta);
                            publish_stream_event(transport, state, content).await;
                        }
                    }
                    "response.image_generation_call.partial_image" => {
                        if let Some(b64) = event.partial_image_b64 {
                            if let Some(upload) =
                                upload_image(&self.client, &self.image_api_host, &state.workspace_id, &b64).await
                            {
                                let mut content = StreamContent::new(StreamStatus::ImagePartial, PROVIDER_NAME);
                                content.image_url = Some(upload.url);
                                content.file_id = Some(upload.file_id);
                                content.partial_index = Some(event.partial_image_index.unwrap_or(partial_index));
                                publish_stream_event(transport, state, content).await;
                            }
                            partial_index += 1;
                        }
                    }
                    "response.completed" => {
                        if let Some(response) = event.response {
                            state.response_id = Some(response.id.clone());
                            state.ai_vendor_request_id = Some(response.id.clone());

                            for item in &response.output {
                                if item.item_type == "image_generation_call" {
                                    if let Some(b64) = &item.result {
                                        if let Some(upload) = upload_image(
                                            &self.client,
                                            &self.image_api_host,
                                            &state.workspace_id,
                                            b64,
                                        )
                                        .await
                                        {
                                            image_count += 1;
                                            let mut content =
                                                StreamContent::new(StreamStatus::ImageComplete, PROVIDER_NAME);
                                            content.image_url = Some(upload.url);
                                            content.file_id = Some(upload.file_id);
                                            content.response_id = Some(response.id.clone());
                                            content.revised_prompt = item.revised_prompt.clone();
                                            publish_stream_event(transport, state, content).await;
                                        }
                                    }
                                }
                            }

                            if let Some(usage) = response.usage {
                                let raw = RawUsage {
                                    prompt_tokens: usage.input_tokens,
                                    prompt_cached_tokens: usage
                                        .input_tokens_details
                                        .as_ref()
                                        .map(|d| d.cached_tokens)
                                        .unwrap_or(0),
                                    prompt_audio_tokens: 0,
                                    completion_tokens: usage.output_tokens,
                                    completion_reasoning_tokens: usage
                                        .output_tokens_details
                                        .as_ref()
                                        .map(|d| d.reasoning_tokens)
                                        .unwrap_or(0),
                                    completion_audio_tokens: 0,
                                };
                                state.usage = Some(relaygate_usage::price_text_usage(
                                    &state.ai_model_meta_info.pricing,
                                    &raw,
                                ));
                            }
                            if image_count > 0 {
                                state.image_usage = Some(relaygate_usage::price_image_usage(
                                    &state.ai_model_meta_info.pricing,
                                    state.image_size.as_deref(),
                                    Some("high"),
                                    image_count,
                                ));
                            }
                        }
                    }
                    "response.failed" => {
                        let (message, code, kind) = event
                            .response
                            .as_ref()
                            .and_then(|r| r.error.clone())
                            .map(|e| (e.message, e.code, e.error_type))
                            .unwrap_or_else(|| ("unknown OpenAI failure".to_string(), None, None));
                        let err = AdapterError::Api {
                            message: message.clone(),
                            code: code.clone(),
                            kind: kind.clone(),
                        };
                        publish_stream_event(transport, state, error_content(&err)).await;
                        publish_stream_event(transport, state, end_stream_content(PROVIDER_NAME)).await;
                        return Err(err);
                    }
                    _ => {}
                }
            }

            line_buf = remainder;
        }

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
struct ResponseEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    partial_image_b64: Option<String>,
    #[serde(default)]
    partial_image_index: Option<u32>,
    #[serde(default)]
    response: Option<ResponsePayload>,
}

#[derive(Debug, Deserialize)]
struct ResponsePayload {
    id: String,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
    #[serde(default)]
    error: Option<ResponseError>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<InputTokensDetails>,
    #[serde(default)]
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct InputTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OutputTokensDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseError {
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_output_text_delta() {
        let raw = r#"{"type":"response.output_text.delta","delta":"hi"}"#;
        let event: ResponseEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, "response.output_text.delta");
        assert_eq!(event.delta.as_deref(), Some("hi"));
    }

    #[test]
    fn deserializes_completed_response_with_usage() {
        let raw = r#"{"type":"response.completed","response":{"id":"resp_1","output":[],"usage":{"input_tokens":10,"output_tokens":5}}}"#;
        let event: ResponseEvent = serde_json::from_str(raw).unwrap();
        let response = event.response.unwrap();
        assert_eq!(response.id, "resp_1");
        assert_eq!(response.usage.unwrap().input_tokens, 10);
    }
}
