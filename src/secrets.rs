//! Password hashing, recovery-code generation, and secure memory erasure.
//!
//! Every plaintext secret that passes through here — an inbound password, a
//! freshly generated recovery code — must be overwritten with zeroes by the
//! caller via [`secure_clear`] before the owning request handler returns.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::Rng;
use zeroize::Zeroize;

use crate::error::{NvrError, Result};

const RECOVERY_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const RECOVERY_CODE_LEN: usize = 10;
const RECOVERY_CODE_COUNT: usize = 5;

/// Hash `plaintext` with Argon2id (library default, interactive) and return
/// the PHC-encoded string suitable for storage.
pub fn hash_password(plaintext: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| NvrError::Internal(format!("password hash failure: {e}")))
}

/// Constant-time verification of `plaintext` against a stored PHC hash.
/// Returns `false` (rather than propagating) on a malformed stored hash,
/// since that is indistinguishable from a wrong password to the caller.
pub fn verify_password(encoded_hash: &str, plaintext: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(encoded_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

/// Generate five single-use recovery codes, ten characters each, drawn from
/// `[0-9A-Za-z]` using the OS CSPRNG. Callers hash each with
/// [`hash_password`] for storage and must [`secure_clear`] the returned
/// strings once done with them.
pub fn generate_recovery_codes() -> Vec<String> {
    let mut rng = OsRng;
    (0..RECOVERY_CODE_COUNT)
        .map(|_| {
            (0..RECOVERY_CODE_LEN)
                .map(|_| {
                    let idx = rng.gen_range(0..RECOVERY_CODE_ALPHABET.len());
                    RECOVERY_CODE_ALPHABET[idx] as char
                })
                .collect::<String>()
        })
        .collect()
}

/// Overwrite a plaintext secret's bytes with zero before it is dropped.
pub fn secure_clear(secret: &mut String) {
    secret.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_same_plaintext_succeeds() {
        let hash = hash_password("pw12345").unwrap();
        assert!(verify_password(&hash, "pw12345"));
    }

    #[test]
    fn verify_rejects_wrong_plaintext() {
        let hash = hash_password("pw12345").unwrap();
        assert!(!verify_password(&hash, "wrong-password"));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!verify_password("not-a-phc-hash", "pw12345"));
    }

    #[test]
    fn recovery_codes_are_five_unique_ten_char_strings() {
        let codes = generate_recovery_codes();
        assert_eq!(codes.len(), 5);
        for code in &codes {
            assert_eq!(code.len(), 10);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn secure_clear_zeroes_buffer() {
        let mut secret = String::from("pw12345");
        secure_clear(&mut secret);
        assert!(secret.is_empty());
    }
}
