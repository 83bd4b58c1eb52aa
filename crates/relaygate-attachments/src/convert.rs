//! `convertAttachmentsForProvider`: reshape already-resolved content blocks
//! into the wire shape each vendor SDK expects.
//!
//! Pure aside from logging. An empty resulting list collapses to the empty
//! string, matching every vendor's treatment of "no content" messages.

use relaygate_core::model::ContentBlock;
use serde_json::{json, Value};
use tracing::warn;

use crate::data_url::parse_data_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertTarget {
    OpenAi,
    Anthropic,
}

/// Converts a message's content blocks into the JSON shape `target` expects.
/// Unknown block shapes can only arise if a caller hands in blocks that
/// didn't come through [`relaygate_core::model::ContentBlock`]'s own
/// deserialization (which already rejects unrecognized `type` tags at the
/// wire boundary) — this function still matches exhaustively and logs rather
/// than panicking, in case a future block variant is added here before its
/// vendor-side conversion is.
pub fn convert_attachments_for_provider(content: Vec<ContentBlock>, target: ConvertTarget) -> Value {
    if content.is_empty() {
        return Value::String(String::new());
    }

    let blocks: Vec<Value> = content
        .into_iter()
        .filter_map(|block| convert_block(block, target))
        .collect();

    if blocks.is_empty() {
        Value::String(String::new())
    } else {
        Value::Array(blocks)
    }
}

fn convert_block(block: ContentBlock, target: ConvertTarget) -> Option<Value> {
    match target {
        ConvertTarget::OpenAi => convert_block_openai(block),
        ConvertTarget::Anthropic => convert_block_anthropic(block),
    }
}

fn convert_block_openai(block: ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::InputText { text } => Some(json!({ "type": "input_text", "text": text })),
        ContentBlock::InputImage { image_url, detail } => {
            let mut value = json!({ "type": "input_image", "image_url": image_url });
            if let Some(detail) = detail {
                value["detail"] = Value::String(detail);
            }
            Some(value)
        }
        ContentBlock::File { file } => Some(json!({
            "type": "file",
            "file": { "url": file.url, "mime_type": file.mime_type },
        })),
    }
}

fn convert_block_anthropic(block: ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::InputText { text } => Some(json!({ "type": "text", "text": text })),
        ContentBlock::InputImage { image_url, .. } => {
            if let Some((media_type, payload)) = parse_data_url(&image_url) {
                Some(json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": media_type, "data": payload },
                }))
            } else {
                Some(json!({
                    "type": "image",
                    "source": { "type": "url", "url": image_url },
                }))
            }
        }
        ContentBlock::File { file } => {
            if let Some((media_type, payload)) = parse_data_url(&file.url) {
                Some(json!({
                    "type": "document",
                    "source": { "type": "base64", "media_type": media_type, "data": payload },
                }))
            } else {
                warn!(url = %file.url, "dropping file attachment with no data: URL for Anthropic");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::model::FileRef;

    #[test]
    fn empty_content_collapses_to_empty_string() {
        assert_eq!(
            convert_attachments_for_provider(vec![], ConvertTarget::OpenAi),
            Value::String(String::new())
        );
    }

    #[test]
    fn openai_passes_through_known_blocks() {
        let content = vec![ContentBlock::InputText { text: "hi".into() }];
        let converted = convert_attachments_for_provider(content, ConvertTarget::OpenAi);
        assert_eq!(converted[0]["type"], "input_text");
    }

    #[test]
    fn anthropic_converts_data_url_image_to_base64_source() {
        let content = vec![ContentBlock::InputImage {
            image_url: "data:image/png;base64,QUJD".into(),
            detail: None,
        }];
        let converted = convert_attachments_for_provider(content, ConvertTarget::Anthropic);
        assert_eq!(converted[0]["type"], "image");
        assert_eq!(converted[0]["source"]["type"], "base64");
        assert_eq!(converted[0]["source"]["media_type"], "image/png");
    }

    #[test]
    fn anthropic_drops_file_without_data_url() {
        let content = vec![ContentBlock::File {
            file: FileRef {
                url: "https://example.com/doc.pdf".into(),
                mime_type: "application/pdf".into(),
            },
        }];
        let converted = convert_attachments_for_provider(content, ConvertTarget::Anthropic);
        assert_eq!(converted, Value::String(String::new()));
    }
}
