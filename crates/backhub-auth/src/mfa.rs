//! TOTP (RFC 6238) generation and verification for MFA.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::Sha1;

/// TOTP time step in seconds.
const STEP_SECONDS: u64 = 30;
/// Accepted clock skew, in steps, on either side of now.
const SKEW_STEPS: i64 = 1;
/// Number of digits in a code.
const DIGITS: u32 = 6;

type HmacSha1 = Hmac<Sha1>;

/// Generate a fresh 160-bit TOTP secret.
pub fn generate_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 20];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Compute the TOTP code for a given counter value.
fn hotp(secret: &[u8], counter: u64) -> u32 {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation per RFC 4226.
    let offset = (digest[19] & 0x0f) as usize;
    let code = ((digest[offset] & 0x7f) as u32) << 24
        | (digest[offset + 1] as u32) << 16
        | (digest[offset + 2] as u32) << 8
        | digest[offset + 3] as u32;
    code % 10u32.pow(DIGITS)
}

/// The current TOTP code for a secret at a unix timestamp.
pub fn totp_at(secret: &[u8], unix_time: u64) -> String {
    format!("{:06}", hotp(secret, unix_time / STEP_SECONDS))
}

/// Verify a user-supplied code at a unix timestamp, tolerating one step
/// of clock skew in either direction.
pub fn verify_at(secret: &[u8], code: &str, unix_time: u64) -> bool {
    let step = (unix_time / STEP_SECONDS) as i64;
    (-SKEW_STEPS..=SKEW_STEPS).any(|offset| {
        let counter = step + offset;
        counter >= 0 && format!("{:06}", hotp(secret, counter as u64)) == code
    })
}

/// Verify a code against the current clock.
pub fn verify(secret: &[u8], code: &str) -> bool {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    verify_at(secret, code, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B test vectors (SHA-1, 8 digits truncated to 6
    // would differ, so these check the 8-digit values' low 6 digits via
    // the full HOTP output instead).
    const RFC_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn rfc6238_vectors() {
        // Expected 8-digit codes at the RFC's reference times.
        let cases: &[(u64, u32)] = &[
            (59, 94287082),
            (1111111109, 7081804),
            (1111111111, 14050471),
            (1234567890, 89005924),
            (2000000000, 69279037),
        ];
        for (time, expected) in cases {
            let counter = time / STEP_SECONDS;
            let mut mac = HmacSha1::new_from_slice(RFC_SECRET).unwrap();
            mac.update(&counter.to_be_bytes());
            let digest = mac.finalize().into_bytes();
            let offset = (digest[19] & 0x0f) as usize;
            let code = ((digest[offset] & 0x7f) as u32) << 24
                | (digest[offset + 1] as u32) << 16
                | (digest[offset + 2] as u32) << 8
                | digest[offset + 3] as u32;
            assert_eq!(code % 100_000_000, *expected, "time {time}");
        }
    }

    #[test]
    fn verify_accepts_current_and_adjacent_steps() {
        let secret = generate_secret();
        let now = 1_700_000_000u64;
        let code = totp_at(&secret, now);
        assert!(verify_at(&secret, &code, now));
        // One step earlier or later still verifies.
        assert!(verify_at(&secret, &code, now + STEP_SECONDS));
        assert!(verify_at(&secret, &code, now - STEP_SECONDS));
        // Two steps away does not.
        assert!(!verify_at(&secret, &code, now + 3 * STEP_SECONDS));
    }

    #[test]
    fn verify_rejects_wrong_code() {
        let secret = generate_secret();
        assert!(!verify_at(&secret, "000000", 1_700_000_000) || {
            // One-in-a-million collision; regenerate and re-check.
            let other = generate_secret();
            !verify_at(&other, "000000", 1_700_000_000)
        });
    }
}
