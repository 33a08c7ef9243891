// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Time-based one-time passwords (RFC 6238, HMAC-SHA1, 30 s, 6 digits).

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use super::CryptoError;

pub const SECRET_LEN: usize = 20;
pub const STEP_SECS: u64 = 30;
pub const DIGITS: u32 = 6;
/// Accepted clock drift, in steps, on either side of now.
pub const SKEW_STEPS: u64 = 1;

/// Fresh random shared secret.
pub fn generate_secret(rng: &SystemRandom) -> Result<[u8; SECRET_LEN], CryptoError> {
    let mut secret = [0u8; SECRET_LEN];
    rng.fill(&mut secret).map_err(|_| CryptoError::Rng)?;
    Ok(secret)
}

/// The code for the step containing `unix_secs`.
pub fn code_at(secret: &[u8], unix_secs: u64) -> u32 {
    hotp(secret, unix_secs / STEP_SECS)
}

fn hotp(secret: &[u8], counter: u64) -> u32 {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret);
    let mac = hmac::sign(&key, &counter.to_be_bytes());
    let digest = mac.as_ref();

    // Dynamic truncation
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    binary % 10u32.pow(DIGITS)
}

/// Check a user-supplied code against the window around `unix_secs`.
pub fn verify(secret: &[u8], code: &str, unix_secs: u64) -> bool {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let step = unix_secs / STEP_SECS;
    let mut matched = false;
    for candidate in step.saturating_sub(SKEW_STEPS)..=step + SKEW_STEPS {
        let expected = format!("{:0width$}", hotp(secret, candidate), width = DIGITS as usize);
        matched |= constant_time_eq(expected.as_bytes(), code.as_bytes());
    }
    matched
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `otpauth://` provisioning URI for authenticator apps.
pub fn provisioning_uri(secret: &[u8], issuer: &str, account: &str) -> String {
    let label = escape(&format!("{issuer}:{account}"));
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("secret", &base32(secret))
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &DIGITS.to_string())
        .append_pair("period", &STEP_SECS.to_string())
        .finish();
    format!("otpauth://totp/{label}?{query}")
}

fn escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// RFC 4648 base32 without padding.
pub fn base32(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for &byte in bytes {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn rfc6238_sha1_vectors() {
        // 8-digit vectors truncated to 6 digits
        assert_eq!(code_at(RFC_SECRET, 59), 287_082);
        assert_eq!(code_at(RFC_SECRET, 1_111_111_109), 81_804);
        assert_eq!(code_at(RFC_SECRET, 1_234_567_890), 5_924);
    }

    #[test]
    fn verify_accepts_adjacent_steps_only() {
        let now = 1_111_111_109;
        assert!(verify(RFC_SECRET, "081804", now));
        assert!(verify(RFC_SECRET, "081804", now + STEP_SECS));
        assert!(verify(RFC_SECRET, "081804", now - STEP_SECS));
        assert!(!verify(RFC_SECRET, "081804", now + 3 * STEP_SECS));
    }

    #[test]
    fn verify_rejects_malformed_codes() {
        let now = 1_111_111_109;
        assert!(!verify(RFC_SECRET, "81804", now));
        assert!(!verify(RFC_SECRET, "08180a", now));
        assert!(!verify(RFC_SECRET, "", now));
    }

    #[test]
    fn base32_matches_rfc4648() {
        assert_eq!(base32(b""), "");
        assert_eq!(base32(b"f"), "MY");
        assert_eq!(base32(b"foobar"), "MZXW6YTBOI");
        assert_eq!(base32(RFC_SECRET), "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ");
    }

    #[test]
    fn provisioning_uri_contains_secret_and_issuer() {
        let uri = provisioning_uri(RFC_SECRET, "GON", "user@example.com");
        assert!(uri.starts_with("otpauth://totp/GON"));
        assert!(uri.contains("secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ"));
        assert!(uri.contains("issuer=GON"));
    }

    #[test]
    fn generated_secrets_differ() {
        let rng = SystemRandom::new();
        let a = generate_secret(&rng).unwrap();
        let b = generate_secret(&rng).unwrap();
        assert_ne!(a, b);
    }
}
