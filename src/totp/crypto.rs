use anyhow::Result;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};

/// Encrypts a TOTP secret with the master key and context (AAD).
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// The AAD binds the ciphertext to the scope and user, so a secret copied
/// between rows or databases fails to decrypt.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn encrypt_secret(key: &[u8; 32], secret: &[u8], scope: &str, user_id: i64) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(scope, user_id);
    let payload = Payload {
        msg: secret,
        aad: &aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("Encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts a stored TOTP secret.
/// Expects `data` to be `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if decryption fails or if ciphertext is too short.
pub fn decrypt_secret(key: &[u8; 32], data: &[u8], scope: &str, user_id: i64) -> Result<Vec<u8>> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("Invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let aad = construct_aad(scope, user_id);
    let payload = Payload {
        msg: ciphertext,
        aad: &aad,
    };

    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("Decryption failure: {e}"))?;

    Ok(plaintext)
}

fn construct_aad(scope: &str, user_id: i64) -> Vec<u8> {
    // AAD = "totp-secret:v1|scope|user_id"
    format!("totp-secret:v1|{scope}|{user_id}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [42u8; 32];
        let secret = b"my-totp-secret-123";

        let encrypted = encrypt_secret(&key, secret, "tenant:acme", 7).unwrap();
        assert_ne!(encrypted, secret);
        assert!(encrypted.len() > secret.len());

        let decrypted = decrypt_secret(&key, &encrypted, "tenant:acme", 7).unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_decrypt_fails_wrong_user() {
        let key = [42u8; 32];
        let encrypted = encrypt_secret(&key, b"secret", "central", 1).unwrap();

        let result = decrypt_secret(&key, &encrypted, "central", 2);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_decrypt_fails_wrong_scope() {
        let key = [42u8; 32];
        let encrypted = encrypt_secret(&key, b"secret", "tenant:acme", 1).unwrap();

        let result = decrypt_secret(&key, &encrypted, "tenant:globex", 1);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_decrypt_fails_tampered_ciphertext() {
        let key = [42u8; 32];
        let mut encrypted = encrypt_secret(&key, b"secret", "central", 1).unwrap();

        let len = encrypted.len();
        if let Some(byte) = encrypted.get_mut(len - 1) {
            *byte ^= 0xFF;
        }

        let result = decrypt_secret(&key, &encrypted, "central", 1);
        assert!(result.is_err());
    }
}
