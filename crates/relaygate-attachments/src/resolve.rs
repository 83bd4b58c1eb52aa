//! `resolveImageUrls`: rewrite indirect image references into `data:` URLs
//! before a vendor ever sees them.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use relaygate_core::model::ContentBlock;
use tracing::warn;

use crate::data_url::build_data_url;
use crate::mime;
use crate::objectstore::ObjectStoreFetcher;

/// Resolve every `input_image` block in `content` in place. `data:` URLs are
/// left untouched; `nats-obj://<bucket>/<key>` URLs are fetched and rewritten
/// to `data:` URLs; anything else is left as-is and logged, since it will
/// likely fail once it reaches a vendor.
pub async fn resolve_image_urls(
    content: Vec<ContentBlock>,
    fetcher: &dyn ObjectStoreFetcher,
) -> Vec<ContentBlock> {
    let mut resolved = Vec::with_capacity(content.len());
    for block in content {
        resolved.push(resolve_block(block, fetcher).await);
    }
    resolved
}

async fn resolve_block(block: ContentBlock, fetcher: &dyn ObjectStoreFetcher) -> ContentBlock {
    let ContentBlock::InputImage { image_url, detail } = block else {
        return block;
    };

    if image_url.starts_with("data:") {
        return ContentBlock::InputImage { image_url, detail };
    }

    let Some((bucket, key)) = parse_nats_obj_url(&image_url) else {
        warn!(url = %image_url, "image URL is neither data: nor nats-obj:, leaving unchanged");
        return ContentBlock::InputImage { image_url, detail };
    };

    match fetcher.fetch(&bucket, &key).await {
        Ok(bytes) => {
            let mime_type = mime::sniff(&bytes);
            let encoded = BASE64.encode(&bytes);
            ContentBlock::InputImage {
                image_url: build_data_url(mime_type, &encoded),
                detail,
            }
        }
        Err(e) => {
            warn!(url = %image_url, error = %e, "failed to fetch object-store attachment, leaving unchanged");
            ContentBlock::InputImage { image_url, detail }
        }
    }
}

fn parse_nats_obj_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("nats-obj://")?;
    rest.split_once('/').map(|(b, k)| (b.to_string(), k.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaygate_core::model::ContentBlock;

    struct FakeFetcher(Vec<u8>);

    #[async_trait]
    impl ObjectStoreFetcher for FakeFetcher {
        async fn fetch(&self, _bucket: &str, _key: &str) -> crate::error::Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn leaves_data_urls_unchanged() {
        let fetcher = FakeFetcher(vec![]);
        let blocks = vec![ContentBlock::InputImage {
            image_url: "data:image/png;base64,QUJD".to_string(),
            detail: None,
        }];
        let resolved = resolve_image_urls(blocks, &fetcher).await;
        match &resolved[0] {
            ContentBlock::InputImage { image_url, .. } => {
                assert_eq!(image_url, "data:image/png;base64,QUJD");
            }
            _ => panic!("expected InputImage"),
        }
    }

    #[tokio::test]
    async fn rewrites_nats_obj_url_to_data_url() {
        let png_bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x00, 0x01];
        let fetcher = FakeFetcher(png_bytes);
        let blocks = vec![ContentBlock::InputImage {
            image_url: "nats-obj://attachments/abc123".to_string(),
            detail: None,
        }];
        let resolved = resolve_image_urls(blocks, &fetcher).await;
        match &resolved[0] {
            ContentBlock::InputImage { image_url, .. } => {
                assert!(image_url.starts_with("data:image/png;base64,"));
            }
            _ => panic!("expected InputImage"),
        }
    }

    #[tokio::test]
    async fn leaves_unrecognized_urls_unchanged() {
        let fetcher = FakeFetcher(vec![]);
        let blocks = vec![ContentBlock::InputImage {
            image_url: "https://example.com/a.png".to_string(),
            detail: None,
        }];
        let resolved = resolve_image_urls(blocks, &fetcher).await;
        match &resolved[0] {
            ContentBlock::InputImage { image_url, .. } => {
                assert_eq!(image_url, "https://example.com/a.png");
            }
            _ => panic!("expected InputImage"),
        }
    }
}
