//! Encrypted credential vault for account auth blobs.
//!
//! AES-256-GCM with a random per-machine key persisted next to the
//! database. Blob layout is nonce ‖ tag ‖ ciphertext, base64'd into the
//! accounts table. A blob that fails to decrypt is treated as "no usable
//! credential" — the account just needs re-authentication.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;

use playhub_providers::Credential;

const KEY_FILE: &str = "vault.key";
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; 32],
}

impl CredentialVault {
    /// Load the machine key, creating it on first run.
    pub fn open(data_dir: &Path) -> Result<Self, anyhow::Error> {
        let path = data_dir.join(KEY_FILE);
        if path.exists() {
            let hex_key = fs::read_to_string(&path)?;
            let bytes = hex::decode(hex_key.trim())
                .map_err(|e| anyhow::anyhow!("corrupt vault key: {e}"))?;
            let key: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("vault key has wrong length"))?;
            return Ok(Self { key });
        }

        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        fs::create_dir_all(data_dir)?;
        fs::write(&path, hex::encode(key))?;
        tracing::info!("Created credential vault key at {}", path.display());
        Ok(Self { key })
    }

    #[cfg(test)]
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt a credential into the storable blob.
    pub fn seal(&self, cred: &Credential) -> Result<String, anyhow::Error> {
        let plaintext = serde_json::to_vec(cred)?;
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("cipher init: {e}"))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm emits ciphertext ‖ tag; reorder to nonce ‖ tag ‖ ciphertext.
        let sealed = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| anyhow::anyhow!("encrypt: {e}"))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(tag);
        blob.extend_from_slice(ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored blob. Any failure — bad base64, wrong key, tampered
    /// data — comes back as `None`.
    pub fn unseal(&self, blob: &str) -> Option<Credential> {
        let bytes = BASE64.decode(blob).ok()?;
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return None;
        }
        let (nonce_bytes, rest) = bytes.split_at(NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);

        let cipher = Aes256Gcm::new_from_slice(&self.key).ok()?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let plaintext = cipher.decrypt(nonce, sealed.as_slice()).ok()?;
        serde_json::from_slice(&plaintext).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::with_key([7u8; 32])
    }

    fn cred() -> Credential {
        Credential {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: 1234567890,
            user_id: "u1".into(),
        }
    }

    #[test]
    fn test_seal_unseal_round_trip() {
        let vault = vault();
        let blob = vault.seal(&cred()).unwrap();
        let out = vault.unseal(&blob).unwrap();
        assert_eq!(out.access_token, "access");
        assert_eq!(out.user_id, "u1");
    }

    #[test]
    fn test_nonce_is_random_per_seal() {
        let vault = vault();
        assert_ne!(vault.seal(&cred()).unwrap(), vault.seal(&cred()).unwrap());
    }

    #[test]
    fn test_unseal_failure_is_none() {
        let vault = vault();
        assert!(vault.unseal("not base64 !!!").is_none());
        assert!(vault.unseal("AAAA").is_none());

        // Tampered blob fails the tag check.
        let blob = vault.seal(&cred()).unwrap();
        let mut bytes = BASE64.decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(vault.unseal(&BASE64.encode(bytes)).is_none());

        // Wrong key fails too.
        let other = CredentialVault::with_key([9u8; 32]);
        assert!(other.unseal(&blob).is_none());
    }
}
