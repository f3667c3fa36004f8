//! Time-based one-time password engine.
//!
//! Standard TOTP: SHA-1, 6 digits, 30-second step, ±1 step of clock drift.
//! Secrets are encrypted at rest with a key derived from the configured
//! master key; the AAD binds each ciphertext to its scope and user.

pub mod crypto;

use anyhow::{Result, anyhow};
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};

#[derive(Clone)]
pub struct TotpEngine {
    key: [u8; 32],
    issuer: String,
}

impl TotpEngine {
    /// Derive the at-rest encryption key from the configured master key.
    #[must_use]
    pub fn new(master_key: &str, issuer: String) -> Self {
        let mut key = [0u8; 32];
        let digest = Sha256::digest(master_key.as_bytes());
        key.copy_from_slice(&digest);
        Self { key, issuer }
    }

    /// Generate a fresh random secret: raw bytes plus the base32 form shown
    /// to the user once during enrollment.
    ///
    /// # Errors
    /// Returns an error if secret generation fails.
    pub fn generate_secret(&self) -> Result<(Vec<u8>, String)> {
        let secret = Secret::generate_secret();
        let bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))?;
        Ok((bytes, secret.to_encoded().to_string()))
    }

    /// `otpauth://` enrollment URL for authenticator apps.
    ///
    /// # Errors
    /// Returns an error if the secret is rejected by the TOTP builder.
    pub fn otpauth_url(&self, secret: &[u8], account: &str) -> Result<String> {
        Ok(self.totp(secret.to_vec(), account)?.get_url())
    }

    /// Validate a 6-digit code against a secret, allowing ±1 step of drift.
    ///
    /// # Errors
    /// Returns an error if the secret is rejected by the TOTP builder.
    pub fn check(&self, secret: &[u8], code: &str) -> Result<bool> {
        let totp = self.totp(secret.to_vec(), "user")?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    /// Encrypt a secret for storage, bound to the request scope and user.
    ///
    /// # Errors
    /// Returns an error if encryption fails.
    pub fn encrypt(&self, secret: &[u8], scope: &str, user_id: i64) -> Result<Vec<u8>> {
        crypto::encrypt_secret(&self.key, secret, scope, user_id)
    }

    /// Decrypt a stored secret. A failure here is an integrity fault.
    ///
    /// # Errors
    /// Returns an error if decryption fails.
    pub fn decrypt(&self, data: &[u8], scope: &str, user_id: i64) -> Result<Vec<u8>> {
        crypto::decrypt_secret(&self.key, data, scope, user_id)
    }

    fn totp(&self, secret: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TotpEngine {
        TotpEngine::new("test-master-key", "Hive".to_string())
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn generated_secret_round_trips_through_storage() {
        let engine = engine();
        let (secret, encoded) = engine.generate_secret().unwrap();
        assert!(!secret.is_empty());
        assert!(!encoded.is_empty());

        let stored = engine.encrypt(&secret, "central", 5).unwrap();
        let loaded = engine.decrypt(&stored, "central", 5).unwrap();
        assert_eq!(loaded, secret);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn current_code_is_accepted_and_garbage_rejected() {
        let engine = engine();
        let (secret, _) = engine.generate_secret().unwrap();

        let totp = engine.totp(secret.clone(), "user").unwrap();
        let code = totp.generate_current().unwrap();
        assert!(engine.check(&secret, &code).unwrap());
        assert!(!engine.check(&secret, "000000").unwrap() || code == "000000");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn otpauth_url_carries_issuer() {
        let engine = engine();
        let (secret, _) = engine.generate_secret().unwrap();
        let url = engine.otpauth_url(&secret, "alice@example.com").unwrap();
        assert!(url.starts_with("otpauth://totp/"));
        assert!(url.contains("Hive"));
    }

    #[test]
    fn same_master_key_same_derived_key() {
        let a = TotpEngine::new("k", "Hive".to_string());
        let b = TotpEngine::new("k", "Hive".to_string());
        let encrypted = a.encrypt(b"secret", "central", 1).expect("encrypt");
        assert_eq!(
            b.decrypt(&encrypted, "central", 1).expect("decrypt"),
            b"secret"
        );
    }
}
