use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const SIGNATURE_HEADER: &str = "X-Renderiq-Signature";
pub const EVENT_HEADER: &str = "X-Renderiq-Event";
pub const TIMESTAMP_HEADER: &str = "X-Renderiq-Timestamp";

pub const RENDER_COMPLETED: &str = "render.completed";
pub const RENDER_FAILED: &str = "render.failed";

type HmacSha256 = Hmac<Sha256>;

/// Lower-case hex HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign_payload(payload: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a delivery's signature header against the raw request body.
///
/// Comparison is constant-time. Any mismatch, including a signature of the
/// wrong length, yields `false`.
pub fn verify_signature(payload: &str, signature: &str, secret: &str) -> bool {
    let expected = sign_payload(payload, secret);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rfc4231_test_case_2() {
        let signature = sign_payload("what do ya want for nothing?", "Jefe");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signing_is_deterministic() {
        let payload = r#"{"event":"render.completed","data":{"renderId":"r1"}}"#;
        assert_eq!(sign_payload(payload, "s3cret"), sign_payload(payload, "s3cret"));
        assert_ne!(sign_payload(payload, "s3cret"), sign_payload(payload, "other"));
    }

    #[test]
    fn verifies_valid_signature() {
        let payload = r#"{"event":"render.completed"}"#;
        let signature = sign_payload(payload, "s3cret");
        assert!(verify_signature(payload, &signature, "s3cret"));
    }

    #[test]
    fn rejects_tampered_payload() {
        let payload = r#"{"event":"render.completed","credits":1}"#;
        let signature = sign_payload(payload, "s3cret");
        let tampered = r#"{"event":"render.completed","credits":9}"#;
        assert!(!verify_signature(tampered, &signature, "s3cret"));
    }

    #[test]
    fn rejects_wrong_secret_and_malformed_signature() {
        let payload = "{}";
        let signature = sign_payload(payload, "s3cret");
        assert!(!verify_signature(payload, &signature, "guess"));
        assert!(!verify_signature(payload, "", "s3cret"));
        assert!(!verify_signature(payload, &signature[..10], "s3cret"));
        assert!(!verify_signature(payload, &signature.to_uppercase(), "s3cret"));
    }
}
