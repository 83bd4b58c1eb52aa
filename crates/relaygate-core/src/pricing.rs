use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

/// Default resale margin multiplier when `pricing.resaleMargin` is absent.
pub fn default_resale_margin() -> Decimal {
    Decimal::from_f64(1.0).unwrap_or(Decimal::ONE)
}

/// Default `pricePer` divisor when `pricing.text.pricePer` is absent.
pub fn default_price_per() -> Decimal {
    Decimal::from_u64(1_000_000).unwrap_or(Decimal::ONE)
}

/// Default per-image price when a size/quality entry is absent.
pub fn default_price_per_image() -> Decimal {
    Decimal::from_f64(0.04).unwrap_or(Decimal::ZERO)
}

/// Quality tier used when the request doesn't specify one, or the
/// configured size has no entry for the requested quality.
pub const DEFAULT_IMAGE_QUALITY: &str = "high";
