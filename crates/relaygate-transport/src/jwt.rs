//! Self-issued JWT signing for NATS NKey-seed authentication.
//!
//! Mirrors the RS256 service-account JWT flow used for Vertex AI auth in the
//! agent crate this gateway was built from, but Ed25519 instead of RSA — same
//! signing crate (`ring`), different key type.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;

use crate::error::TransportError;

#[derive(Serialize)]
struct Header<'a> {
    typ: &'a str,
    alg: &'a str,
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    iss: &'a str,
    iat: i64,
    exp: i64,
}

/// Sign a self-issued JWT for `user_id`, using `seed` (a raw 32-byte Ed25519
/// seed) as the signing key. The issuer (`iss`) is the base64url-encoded
/// public key derived from that seed.
///
/// Default validity is `expiry_hours` hours (spec default: 1).
pub fn sign_self_issued_jwt(
    seed: &[u8],
    user_id: &str,
    expiry_hours: i64,
) -> Result<String, TransportError> {
    let key_pair = Ed25519KeyPair::from_seed_unchecked(seed)
        .map_err(|_| TransportError::Jwt("invalid NKey seed: not a 32-byte Ed25519 seed".into()))?;

    let issuer = URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref());

    let now = chrono::Utc::now().timestamp();
    let exp = now + expiry_hours * 3600;

    let header = Header {
        typ: "JWT",
        alg: "EdDSA",
    };
    let claims = Claims {
        sub: user_id,
        iss: &issuer,
        iat: now,
        exp,
    };

    let header_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_string(&header).map_err(|e| TransportError::Jwt(e.to_string()))?,
    );
    let claims_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_string(&claims).map_err(|e| TransportError::Jwt(e.to_string()))?,
    );

    let message = format!("{header_b64}.{claims_b64}");
    let signature = key_pair.sign(message.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(signature.as_ref());

    Ok(format!("{message}.{sig_b64}"))
}

/// Decode and verify a token produced by [`sign_self_issued_jwt`]. Used only
/// by tests to check the round-trip property (`spec.md` §8 invariant 3) —
/// the gateway itself never verifies its own tokens, the broker does.
#[cfg(test)]
pub(crate) fn verify_self_issued_jwt(token: &str) -> Result<(HeaderOwned, String), String> {
    use ring::signature::UnparsedPublicKey;

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("malformed token".into());
    }
    let header_json = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|e| e.to_string())?;
    let header: HeaderOwned =
        serde_json::from_slice(&header_json).map_err(|e| e.to_string())?;
    let claims_json = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| e.to_string())?;
    let claims: ClaimsOwned =
        serde_json::from_slice(&claims_json).map_err(|e| e.to_string())?;
    let sig = URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|e| e.to_string())?;
    let pubkey_bytes = URL_SAFE_NO_PAD
        .decode(&claims.iss)
        .map_err(|e| e.to_string())?;

    let message = format!("{}.{}", parts[0], parts[1]);
    let pubkey = UnparsedPublicKey::new(&ring::signature::ED25519, pubkey_bytes);
    pubkey
        .verify(message.as_bytes(), &sig)
        .map_err(|_| "signature verification failed".to_string())?;

    Ok((header, claims.sub))
}

#[cfg(test)]
#[derive(serde::Deserialize)]
pub(crate) struct HeaderOwned {
    typ: String,
    alg: String,
}

#[cfg(test)]
#[derive(serde::Deserialize)]
struct ClaimsOwned {
    sub: String,
    iss: String,
    #[allow(dead_code)]
    iat: i64,
    #[allow(dead_code)]
    exp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn round_trip_header_and_sub() {
        let token = sign_self_issued_jwt(&test_seed(), "svc:llm-service", 1).unwrap();
        let (header, sub) = verify_self_issued_jwt(&token).unwrap();
        assert_eq!(header.typ, "JWT");
        assert_eq!(header.alg, "EdDSA");
        assert_eq!(sub, "svc:llm-service");
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let token = sign_self_issued_jwt(&test_seed(), "svc:llm-service", 1).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let bad_sig = if parts[2].starts_with('A') { "B" } else { "A" };
        let tampered = format!("{}.{}.{}{}", parts[0], parts[1], bad_sig, &parts[2][1..]);
        assert!(verify_self_issued_jwt(&tampered).is_err());
    }
}
