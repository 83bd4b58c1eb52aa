//! Prices raw vendor token/image counts into billable totals.
//!
//! All arithmetic uses [`rust_decimal::Decimal`], never binary floats, so
//! repeated rounding across many requests can't drift. Accounting failures
//! must never abort the request they're billing for — every function here
//! falls back to a documented default rather than returning an error.

use relaygate_core::model::{
    AiModelMetaInfo, ImageUsageReport, Pricing, RawUsage, RequestState, TierPrice, TokenBucket,
    UsageTotals,
};
use relaygate_core::pricing::{default_price_per_image, DEFAULT_IMAGE_QUALITY};
use rust_decimal::Decimal;
use tracing::info;

/// Prices `raw` against `pricing.text.tiers["default"]`. The original never
/// keys tiers by model version — every model within one `Pricing` shares the
/// same `"default"` tier.
pub fn price_text_usage(pricing: &Pricing, raw: &RawUsage) -> UsageTotals {
    let resale_margin = pricing.resale_margin;
    let price_per = pricing.text.price_per;
    let tier = lookup_tier(pricing);

    let prompt_purchased_for = safe_div(tier.prompt, price_per) * Decimal::from(raw.prompt_tokens);
    let prompt_sold_to_client_for = prompt_purchased_for * resale_margin;
    let completion_purchased_for =
        safe_div(tier.completion, price_per) * Decimal::from(raw.completion_tokens);
    let completion_sold_to_client_for = completion_purchased_for * resale_margin;

    let prompt = TokenBucket {
        usage_tokens: raw.prompt_tokens,
        audio_tokens: raw.prompt_audio_tokens,
        cached_tokens: raw.prompt_cached_tokens,
        reasoning_tokens: 0,
        purchased_for: prompt_purchased_for,
        sold_to_client_for: prompt_sold_to_client_for,
    };
    let completion = TokenBucket {
        usage_tokens: raw.completion_tokens,
        audio_tokens: raw.completion_audio_tokens,
        cached_tokens: 0,
        reasoning_tokens: raw.completion_reasoning_tokens,
        purchased_for: completion_purchased_for,
        sold_to_client_for: completion_sold_to_client_for,
    };
    let total = TokenBucket {
        usage_tokens: prompt.usage_tokens + completion.usage_tokens,
        audio_tokens: prompt.audio_tokens + completion.audio_tokens,
        cached_tokens: prompt.cached_tokens + completion.cached_tokens,
        reasoning_tokens: prompt.reasoning_tokens + completion.reasoning_tokens,
        purchased_for: prompt.purchased_for + completion.purchased_for,
        sold_to_client_for: prompt.sold_to_client_for + completion.sold_to_client_for,
    };

    UsageTotals {
        prompt,
        completion,
        total,
    }
}

fn lookup_tier(pricing: &Pricing) -> TierPrice {
    pricing
        .text
        .tiers
        .get("default")
        .cloned()
        .unwrap_or(TierPrice {
            prompt: Decimal::ZERO,
            completion: Decimal::ZERO,
        })
}

fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Prices `count` generated images of `size`/`quality` against `pricing.image`.
/// Falls back to the `"high"` quality tier, then to a flat $0.04/image when
/// the size itself has no entry at all.
pub fn price_image_usage(
    pricing: &Pricing,
    size: Option<&str>,
    quality: Option<&str>,
    count: u32,
) -> ImageUsageReport {
    let resale_margin = pricing.resale_margin;
    let size = size.unwrap_or("1024x1024").to_string();
    let quality = quality.unwrap_or(DEFAULT_IMAGE_QUALITY).to_string();

    let price_per_image = pricing
        .image
        .get(&size)
        .and_then(|by_quality| {
            by_quality
                .get(&quality)
                .or_else(|| by_quality.get(DEFAULT_IMAGE_QUALITY))
        })
        .copied()
        .unwrap_or_else(default_price_per_image);

    let purchased_for = price_per_image * Decimal::from(count);
    let sold_to_client_for = purchased_for * resale_margin;

    ImageUsageReport {
        size,
        quality,
        count,
        price_per_image,
        price_per_image_resale: price_per_image * resale_margin,
        purchased_for,
        sold_to_client_for,
    }
}

/// Emits one structured accounting record per finished request. Transport is
/// a log sink for now; a dedicated usage subject is future work, not a gap
/// in this implementation.
pub fn report_usage(state: &RequestState) {
    if let Some(usage) = &state.usage {
        info!(
            workspace_id = %state.workspace_id,
            thread_id = %state.thread_id,
            provider = state.provider.as_str(),
            model_version = %state.model_version,
            prompt_tokens = usage.prompt.usage_tokens,
            prompt_purchased_for = %usage.prompt.purchased_for,
            prompt_sold_to_client_for = %usage.prompt.sold_to_client_for,
            completion_tokens = usage.completion.usage_tokens,
            completion_purchased_for = %usage.completion.purchased_for,
            completion_sold_to_client_for = %usage.completion.sold_to_client_for,
            total_purchased_for = %usage.total.purchased_for,
            total_sold_to_client_for = %usage.total.sold_to_client_for,
            "text usage accounted"
        );
    }
    if let Some(image_usage) = &state.image_usage {
        info!(
            workspace_id = %state.workspace_id,
            thread_id = %state.thread_id,
            provider = state.provider.as_str(),
            size = %image_usage.size,
            quality = %image_usage.quality,
            count = image_usage.count,
            purchased_for = %image_usage.purchased_for,
            sold_to_client_for = %image_usage.sold_to_client_for,
            "image usage accounted"
        );
    }
}

/// Derives the raw-usage pricing inputs from `aiModelMetaInfo`, useful when a
/// caller only has the envelope's metadata (not yet a finished [`RequestState`]).
pub fn pricing_from_meta(meta: &AiModelMetaInfo) -> &Pricing {
    &meta.pricing
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_core::model::TextPricing;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

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
            resale_margin: Decimal::new(12, 1), // 1.2
            text: TextPricing {
                price_per: Decimal::from(1_000_000u64),
                tiers,
            },
            image: HashMap::new(),
        }
    }

    #[test]
    fn text_pricing_applies_resale_margin() {
        let pricing = test_pricing();
        let raw = RawUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 1_000_000,
            ..Default::default()
        };
        let usage = price_text_usage(&pricing, &raw);
        assert_eq!(usage.prompt.purchased_for, Decimal::new(3, 0));
        assert_eq!(usage.prompt.sold_to_client_for, Decimal::new(36, 1));
        assert_eq!(usage.completion.purchased_for, Decimal::new(15, 0));
        assert_eq!(usage.total.purchased_for, Decimal::new(18, 0));
    }

    #[test]
    fn image_pricing_falls_back_to_default_when_size_unknown() {
        let pricing = test_pricing();
        let report = price_image_usage(&pricing, Some("512x512"), Some("high"), 2);
        assert_eq!(report.price_per_image, default_price_per_image());
        assert_eq!(report.purchased_for, default_price_per_image() * Decimal::from(2));
    }

    #[test]
    fn image_pricing_falls_back_to_high_quality_when_missing() {
        let mut pricing = test_pricing();
        let mut by_quality = HashMap::new();
        by_quality.insert("high".to_string(), Decimal::new(8, 2));
        pricing.image.insert("1024x1024".to_string(), by_quality);

        let report = price_image_usage(&pricing, Some("1024x1024"), Some("low"), 1);
        assert_eq!(report.price_per_image, Decimal::new(8, 2));
    }
}
