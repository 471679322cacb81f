//! OTP manager: per-account TOTP generator/verifier, enrolment URI, and QR
//! rendering. Holds an in-memory registry mapping account id to a `TOTP`
//! instance; the registry is rebuilt on demand from the stored secret
//! rather than treated as the source of truth.

use std::collections::HashMap;

use base32::Alphabet;
use parking_lot::Mutex;
use qrcode::render::svg;
use qrcode::QrCode;
use rand::rngs::OsRng;
use rand::RngCore;
use totp_rs::{Algorithm, TOTP};

use crate::error::{NvrError, Result};

const ISSUER: &str = "CCTV Monitoring System";
const SECRET_BYTES: usize = 10; // 10 bytes -> 16 base32 chars, no padding

/// In-memory mapping from account id to its TOTP instance. Safe to share
/// across connection workers behind an `Arc`.
pub struct OtpManager {
    registry: Mutex<HashMap<String, TOTP>>,
}

impl OtpManager {
    pub fn new() -> Self {
        OtpManager { registry: Mutex::new(HashMap::new()) }
    }

    /// Generate a fresh 16-character base32 secret for `id`, register it,
    /// and return the `otpauth://` enrolment URI alongside the secret (for
    /// the caller to persist via `Store::set_otp_secret`).
    pub fn enrol(&self, id: &str) -> Result<(String, String)> {
        let mut raw = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut raw);
        let secret = base32::encode(Alphabet::Rfc4648 { padding: false }, &raw);

        let totp = build_totp(id, &secret)?;
        let uri = totp.get_url();
        self.registry.lock().insert(id.to_string(), totp);
        Ok((uri, secret))
    }

    /// Rebuild the in-memory TOTP instance for `id` from a stored base32
    /// secret. Idempotent: replaces any prior registration for `id`.
    pub fn restore(&self, id: &str, secret: &str) -> Result<()> {
        let totp = build_totp(id, secret)?;
        self.registry.lock().insert(id.to_string(), totp);
        Ok(())
    }

    /// Verify a 6-digit code for `id` against the current 30-second window
    /// (zero skew tolerance). Returns `false` if `id` has no registration.
    pub fn verify(&self, id: &str, code: &str, now_unix: u64) -> bool {
        let registry = self.registry.lock();
        match registry.get(id) {
            Some(totp) => totp.check(code, now_unix),
            None => false,
        }
    }
}

impl Default for OtpManager {
    fn default() -> Self {
        Self::new()
    }
}

fn build_totp(id: &str, secret_base32: &str) -> Result<TOTP> {
    let secret = base32::decode(Alphabet::Rfc4648 { padding: false }, secret_base32)
        .ok_or_else(|| NvrError::Internal("malformed base32 OTP secret".into()))?;
    TOTP::new(Algorithm::SHA1, 6, 0, 30, secret, Some(ISSUER.to_string()), id.to_string())
        .map_err(|e| NvrError::Internal(format!("invalid TOTP parameters: {e}")))
}

/// Embed an `otpauth://` URI in an SVG QR code for display by the client.
pub fn render_qr_svg(uri: &str) -> Result<String> {
    let code = QrCode::new(uri.as_bytes())
        .map_err(|e| NvrError::Internal(format!("QR encoding failed: {e}")))?;
    Ok(code
        .render()
        .min_dimensions(200, 200)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    #[test]
    fn enrol_then_verify_current_code_succeeds() {
        let manager = OtpManager::new();
        let (uri, secret) = manager.enrol("alice").unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert_eq!(secret.len(), 16);

        let totp = build_totp("alice", &secret).unwrap();
        let code = totp.generate(now());
        assert!(manager.verify("alice", &code, now()));
    }

    #[test]
    fn restore_from_stored_secret_rebuilds_registration() {
        let manager = OtpManager::new();
        let (_, secret) = manager.enrol("bob").unwrap();

        let fresh = OtpManager::new();
        fresh.restore("bob", &secret).unwrap();
        let totp = build_totp("bob", &secret).unwrap();
        let code = totp.generate(now());
        assert!(fresh.verify("bob", &code, now()));
    }

    #[test]
    fn verify_rejects_unknown_account() {
        let manager = OtpManager::new();
        assert!(!manager.verify("nobody", "123456", now()));
    }

    #[test]
    fn verify_rejects_wrong_code() {
        let manager = OtpManager::new();
        manager.enrol("carol").unwrap();
        assert!(!manager.verify("carol", "000000", now()));
    }

    #[test]
    fn qr_svg_embeds_uri_content() {
        let svg = render_qr_svg("otpauth://totp/test?secret=ABC").unwrap();
        assert!(svg.contains("<svg"));
    }
}
