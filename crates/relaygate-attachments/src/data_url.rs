//! `data:` URL parsing shared by [`crate::resolve`] and [`crate::convert`].

use once_cell::sync::Lazy;
use regex::Regex;

static DATA_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:([^;]+);base64,(.+)$").expect("static regex"));

/// Splits a `data:<mime>;base64,<payload>` URL into `(mime, base64-payload)`.
/// `(?s)` makes `.` match newlines, mirroring Python's `re.DOTALL`.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let caps = DATA_URL.captures(url)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

pub fn is_data_url(url: &str) -> bool {
    url.starts_with("data:")
}

pub fn build_data_url(mime: &str, base64_payload: &str) -> String {
    format!("data:{mime};base64,{base64_payload}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_data_url() {
        let (mime, payload) = parse_data_url("data:image/png;base64,QUJD").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(payload, "QUJD");
    }

    #[test]
    fn rejects_non_data_url() {
        assert!(parse_data_url("https://example.com/a.png").is_none());
    }

    #[test]
    fn tolerates_embedded_newlines_in_payload() {
        let (_, payload) = parse_data_url("data:image/png;base64,QUJ\nD").unwrap();
        assert_eq!(payload, "QUJ\nD");
    }
}
