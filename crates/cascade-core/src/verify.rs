//! Signature verification for inbound webhooks.
//!
//! Exactly one trust scheme is active per deployment, selected once at
//! startup. The verifier itself is a pure function of the scheme, the raw
//! request bytes, and the request headers.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use tracing::trace;

type HmacSha256 = Hmac<Sha256>;

/// Default timestamp tolerance for the timestamped scheme, in seconds.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Header carrying the timestamped signature.
pub const TIMESTAMPED_SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Header carrying the generic signature.
pub const GENERIC_SIGNATURE_HEADER: &str = "X-Signature";

/// Case-insensitive header map.
///
/// Names are normalized to lowercase ASCII on insert, so lookups succeed
/// regardless of the casing the client sent.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any previous value for the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.inner
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header by name, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// The trust scheme active for a deployment.
///
/// Decided once at startup from configuration precedence; never re-derived
/// per request and never selected by inspecting payload content.
#[derive(Debug, Clone)]
pub enum SignatureScheme {
    /// Timestamped HMAC over `"{t}.{body}"` with replay protection.
    Timestamped { secret: String, tolerance_secs: u64 },
    /// Plain HMAC over the raw body, hex-encoded.
    Generic { secret: String },
    /// No verification. An explicit operational escape hatch, not a default.
    Disabled,
}

impl SignatureScheme {
    /// Resolve the scheme from configured secrets.
    ///
    /// The timestamped scheme wins when both secrets are set; empty strings
    /// count as unset.
    #[must_use]
    pub fn from_secrets(
        endpoint_secret: Option<&str>,
        signing_secret: Option<&str>,
        tolerance_secs: u64,
    ) -> Self {
        if let Some(secret) = endpoint_secret.filter(|s| !s.is_empty()) {
            return Self::Timestamped {
                secret: secret.to_string(),
                tolerance_secs,
            };
        }
        if let Some(secret) = signing_secret.filter(|s| !s.is_empty()) {
            return Self::Generic {
                secret: secret.to_string(),
            };
        }
        Self::Disabled
    }
}

/// The outcome of one verification.
///
/// The reason is populated for acceptance as well as rejection so that the
/// decision can be audit-logged either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub accepted: bool,
    pub reason: String,
}

impl VerificationResult {
    fn accept(reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// Verifies inbound webhook payloads against the configured scheme.
#[derive(Debug, Clone)]
pub struct Verifier {
    scheme: SignatureScheme,
}

impl Verifier {
    /// Create a verifier for the given scheme.
    #[must_use]
    pub fn new(scheme: SignatureScheme) -> Self {
        Self { scheme }
    }

    /// The scheme this verifier was built with.
    #[must_use]
    pub fn scheme(&self) -> &SignatureScheme {
        &self.scheme
    }

    /// Verify a raw payload against the request headers.
    #[must_use]
    pub fn verify(&self, raw_body: &[u8], headers: &Headers) -> VerificationResult {
        self.verify_at(unix_now(), raw_body, headers)
    }

    /// Verify with an explicit clock, for tolerance checks in tests.
    #[must_use]
    pub fn verify_at(&self, now: u64, raw_body: &[u8], headers: &Headers) -> VerificationResult {
        let result = match &self.scheme {
            SignatureScheme::Timestamped {
                secret,
                tolerance_secs,
            } => verify_timestamped(now, raw_body, headers, secret, *tolerance_secs),
            SignatureScheme::Generic { secret } => verify_generic(raw_body, headers, secret),
            SignatureScheme::Disabled => {
                VerificationResult::accept("signature check skipped (no secret configured)")
            }
        };
        trace!(accepted = result.accepted, reason = %result.reason, "Verified payload");
        result
    }
}

fn verify_timestamped(
    now: u64,
    raw_body: &[u8],
    headers: &Headers,
    secret: &str,
    tolerance_secs: u64,
) -> VerificationResult {
    let Some(header) = headers.get(TIMESTAMPED_SIGNATURE_HEADER) else {
        return VerificationResult::reject("missing Stripe-Signature header");
    };

    // Parse header: t=timestamp, v1=signature[, v1=alt]...
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for item in header.split(',') {
        if let Some((key, value)) = item.split_once('=') {
            match key.trim() {
                "t" => timestamp = timestamp.or(Some(value.trim())),
                "v1" => signatures.push(value.trim()),
                _ => {}
            }
        }
    }

    let Some(timestamp) = timestamp else {
        return VerificationResult::reject("invalid Stripe-Signature header");
    };
    if signatures.is_empty() {
        return VerificationResult::reject("invalid Stripe-Signature header");
    }

    let Ok(body) = std::str::from_utf8(raw_body) else {
        return VerificationResult::reject("invalid payload encoding");
    };

    let signed_payload = format!("{timestamp}.{body}");
    let computed = hex_hmac(secret, signed_payload.as_bytes());

    // Constant-time compare against any provided v1 signature.
    if !signatures
        .iter()
        .any(|supplied| constant_time_eq(&computed, supplied))
    {
        return VerificationResult::reject("signature mismatch");
    }

    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return VerificationResult::reject("invalid timestamp");
    };
    if (now as i64 - sent_at).unsigned_abs() > tolerance_secs {
        return VerificationResult::reject("timestamp outside tolerance");
    }

    VerificationResult::accept("stripe signature valid")
}

fn verify_generic(raw_body: &[u8], headers: &Headers, secret: &str) -> VerificationResult {
    let Some(supplied) = headers.get(GENERIC_SIGNATURE_HEADER) else {
        return VerificationResult::reject("missing X-Signature header");
    };

    let expected = hex_hmac(secret, raw_body);
    if constant_time_eq(&expected, supplied) {
        VerificationResult::accept("signature valid")
    } else {
        VerificationResult::reject("signature invalid")
    }
}

/// HMAC-SHA256 of `data` under `secret`, as lowercase hex.
fn hex_hmac(secret: &str, data: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison for secret-derived values.
///
/// Both inputs are padded to a common length so the content comparison never
/// short-circuits on the first mismatched byte; the length check itself is
/// also constant-time.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let max_len = std::cmp::max(a.len(), b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn generic_verifier() -> Verifier {
        Verifier::new(SignatureScheme::Generic {
            secret: SECRET.to_string(),
        })
    }

    fn timestamped_verifier(tolerance_secs: u64) -> Verifier {
        Verifier::new(SignatureScheme::Timestamped {
            secret: SECRET.to_string(),
            tolerance_secs,
        })
    }

    fn stripe_header(t: u64, body: &[u8]) -> String {
        let signed = format!("{t}.{}", std::str::from_utf8(body).unwrap());
        format!("t={t},v1={}", hex_hmac(SECRET, signed.as_bytes()))
    }

    #[test]
    fn test_scheme_precedence() {
        assert!(matches!(
            SignatureScheme::from_secrets(Some("a"), Some("b"), 300),
            SignatureScheme::Timestamped { .. }
        ));
        assert!(matches!(
            SignatureScheme::from_secrets(None, Some("b"), 300),
            SignatureScheme::Generic { .. }
        ));
        assert!(matches!(
            SignatureScheme::from_secrets(Some(""), Some(""), 300),
            SignatureScheme::Disabled
        ));
        assert!(matches!(
            SignatureScheme::from_secrets(None, None, 300),
            SignatureScheme::Disabled
        ));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let headers: Headers = [("X-Signature", "abc")].into_iter().collect();
        assert_eq!(headers.get("x-signature"), Some("abc"));
        assert_eq!(headers.get("X-SIGNATURE"), Some("abc"));
        assert_eq!(headers.get("X-Other"), None);
    }

    #[test]
    fn test_generic_accepts_valid_signature() {
        let body = br#"{"amount":4200}"#;
        let headers: Headers = [(GENERIC_SIGNATURE_HEADER, hex_hmac(SECRET, body))]
            .into_iter()
            .collect();

        let result = generic_verifier().verify(body, &headers);
        assert!(result.accepted);
        assert_eq!(result.reason, "signature valid");
    }

    #[test]
    fn test_generic_rejects_flipped_payload_bit() {
        let body = br#"{"amount":4200}"#;
        let headers: Headers = [(GENERIC_SIGNATURE_HEADER, hex_hmac(SECRET, body))]
            .into_iter()
            .collect();

        let mut tampered = body.to_vec();
        tampered[3] ^= 0x01;
        let result = generic_verifier().verify(&tampered, &headers);
        assert!(!result.accepted);
        assert_eq!(result.reason, "signature invalid");
    }

    #[test]
    fn test_generic_rejects_flipped_signature() {
        let body = b"payload";
        let mut sig = hex_hmac(SECRET, body);
        // Flip the last hex digit.
        let flipped = if sig.ends_with('0') { '1' } else { '0' };
        sig.pop();
        sig.push(flipped);
        let headers: Headers = [(GENERIC_SIGNATURE_HEADER, sig)].into_iter().collect();

        assert!(!generic_verifier().verify(body, &headers).accepted);
    }

    #[test]
    fn test_generic_missing_header() {
        let result = generic_verifier().verify(b"payload", &Headers::new());
        assert!(!result.accepted);
        assert_eq!(result.reason, "missing X-Signature header");
    }

    #[test]
    fn test_timestamped_accepts_within_tolerance() {
        let body = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let headers: Headers = [(TIMESTAMPED_SIGNATURE_HEADER, stripe_header(now, body))]
            .into_iter()
            .collect();

        let result = timestamped_verifier(300).verify_at(now, body, &headers);
        assert!(result.accepted);
        assert_eq!(result.reason, "stripe signature valid");
    }

    #[test]
    fn test_timestamped_rejects_outside_tolerance() {
        let body = br#"{"id":"evt_1"}"#;
        let sent_at = 1_700_000_000;
        let headers: Headers = [(TIMESTAMPED_SIGNATURE_HEADER, stripe_header(sent_at, body))]
            .into_iter()
            .collect();

        let verifier = timestamped_verifier(300);
        assert!(verifier.verify_at(sent_at + 300, body, &headers).accepted);

        let result = verifier.verify_at(sent_at + 301, body, &headers);
        assert!(!result.accepted);
        assert_eq!(result.reason, "timestamp outside tolerance");
    }

    #[test]
    fn test_timestamped_accepts_any_v1_candidate() {
        let body = b"payload";
        let now = 1_700_000_000;
        let signed = format!("{now}.payload");
        let good = hex_hmac(SECRET, signed.as_bytes());
        let header = format!("t={now},v1=deadbeef,v1={good}");
        let headers: Headers = [(TIMESTAMPED_SIGNATURE_HEADER, header)].into_iter().collect();

        assert!(timestamped_verifier(300).verify_at(now, body, &headers).accepted);
    }

    #[test]
    fn test_timestamped_missing_header() {
        let result = timestamped_verifier(300).verify_at(0, b"x", &Headers::new());
        assert!(!result.accepted);
        assert_eq!(result.reason, "missing Stripe-Signature header");
    }

    #[test]
    fn test_timestamped_unparseable_header() {
        let headers: Headers = [(TIMESTAMPED_SIGNATURE_HEADER, "v1=abc")].into_iter().collect();
        let result = timestamped_verifier(300).verify_at(0, b"x", &headers);
        assert_eq!(result.reason, "invalid Stripe-Signature header");

        let headers: Headers = [(TIMESTAMPED_SIGNATURE_HEADER, "t=123")].into_iter().collect();
        let result = timestamped_verifier(300).verify_at(0, b"x", &headers);
        assert_eq!(result.reason, "invalid Stripe-Signature header");
    }

    #[test]
    fn test_timestamped_signature_mismatch() {
        let headers: Headers = [(TIMESTAMPED_SIGNATURE_HEADER, "t=123,v1=deadbeef")]
            .into_iter()
            .collect();
        let result = timestamped_verifier(300).verify_at(123, b"payload", &headers);
        assert!(!result.accepted);
        assert_eq!(result.reason, "signature mismatch");
    }

    #[test]
    fn test_timestamped_non_numeric_timestamp() {
        // Signature is valid over the literal "abc.payload", so the parse
        // failure is what rejects it.
        let signed = "abc.payload";
        let header = format!("t=abc,v1={}", hex_hmac(SECRET, signed.as_bytes()));
        let headers: Headers = [(TIMESTAMPED_SIGNATURE_HEADER, header)].into_iter().collect();

        let result = timestamped_verifier(300).verify_at(0, b"payload", &headers);
        assert!(!result.accepted);
        assert_eq!(result.reason, "invalid timestamp");
    }

    #[test]
    fn test_timestamped_invalid_payload_encoding() {
        let headers: Headers = [(TIMESTAMPED_SIGNATURE_HEADER, "t=1,v1=aa")].into_iter().collect();
        let result = timestamped_verifier(300).verify_at(1, &[0xFF, 0xFE], &headers);
        assert!(!result.accepted);
        assert_eq!(result.reason, "invalid payload encoding");
    }

    #[test]
    fn test_disabled_scheme_accepts() {
        let verifier = Verifier::new(SignatureScheme::Disabled);
        let result = verifier.verify(b"anything", &Headers::new());
        assert!(result.accepted);
        assert_eq!(result.reason, "signature check skipped (no secret configured)");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("", "a"));
        assert!(constant_time_eq("", ""));
    }
}
