//! Uploads generated image bytes to the image store sidecar and returns the
//! URL a stream event can reference. Used by the OpenAI adapter for both
//! partial and final images.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct UploadResult {
    pub file_id: String,
    pub url: String,
    #[serde(default)]
    pub is_duplicate: Option<bool>,
}

/// Decodes `base64_png` and POSTs it as `multipart/form-data` to
/// `http://<api_host>/api/images/internal/<workspace_id>`. Returns `None` on
/// any non-200 response or network error — the caller logs and skips the
/// event rather than failing the whole request over a sidecar hiccup.
pub async fn upload_image(
    client: &reqwest::Client,
    api_host: &str,
    workspace_id: &str,
    base64_png: &str,
) -> Option<UploadResult> {
    let bytes = match BASE64.decode(base64_png) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to decode generated image base64, skipping upload");
            return None;
        }
    };

    let part = match Part::bytes(bytes).mime_str("image/png") {
        Ok(p) => p.file_name("image.png"),
        Err(e) => {
            warn!(error = %e, "failed to build multipart part for image upload");
            return None;
        }
    };
    let form = Form::new()
        .part("file", part)
        .text("useContentHash", "true");

    let url = format!("{api_host}/api/images/internal/{workspace_id}");
    let resp = match client.post(&url).multipart(form).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, %url, "image upload request failed, skipping event");
            return None;
        }
    };

    if !resp.status().is_success() {
        warn!(status = %resp.status(), %url, "image upload returned non-200, skipping event");
        return None;
    }

    match resp.json::<UploadResult>().await {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(error = %e, "failed to parse image upload response, skipping event");
            None
        }
    }
}
