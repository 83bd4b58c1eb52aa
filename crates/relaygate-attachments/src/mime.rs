//! MIME sniffing from the first few bytes of a fetched attachment. No vendor
//! SDK is involved here; the NATS object store returns a bag of bytes, not a
//! content-type header.

pub fn sniff(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_known_magic_bytes() {
        assert_eq!(sniff(&[0x89, 0x50, 0x4E, 0x47, 0x0D]), "image/png");
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
        assert_eq!(sniff(b"GIF89a"), "image/gif");
        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&[0, 0, 0, 0]);
        webp.extend_from_slice(b"WEBP");
        assert_eq!(sniff(&webp), "image/webp");
    }

    #[test]
    fn defaults_to_png_for_unknown_bytes() {
        assert_eq!(sniff(&[0x00, 0x01, 0x02]), "image/png");
        assert_eq!(sniff(&[]), "image/png");
    }
}
