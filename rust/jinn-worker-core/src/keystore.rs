//! `KeyMaterialProvider` implementation (spec §4.I, §6 on-disk layout):
//! decrypts a `ServiceRecord`'s `agent_private_key_encrypted` bytes into a
//! signing key the Rotator hands to a freshly started signing proxy.
//!
//! Layout of the encrypted blob: `salt(16) || nonce(12) || ciphertext`.
//! The passphrase is not part of `WorkerConfig` — it is operator secret
//! material, sourced from the `JINN_KEYSTORE_PASSPHRASE` environment
//! variable (see DESIGN.md), never written to disk or logged.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::SigningKey;
use jinn_worker_clients::ClientError;
use jinn_worker_staking::rotator::KeyMaterialProvider;
use jinn_worker_types::ServiceRecord;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 600_000;

pub struct Keystore {
    passphrase: String,
}

impl Keystore {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(self.passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
        key
    }

    /// Encrypt a raw 32-byte signing key, producing the blob stored as
    /// `ServiceRecord::agent_private_key_encrypted`. Used by provisioning
    /// tooling, not by the main loop.
    pub fn encrypt(&self, plaintext_key: &[u8; 32]) -> Result<Vec<u8>, ClientError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext_key.as_slice())
            .map_err(|e| ClientError::UnexpectedResponse(format!("keystore encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, encrypted: &[u8]) -> Result<SigningKey, ClientError> {
        if encrypted.len() < SALT_LEN + NONCE_LEN {
            return Err(ClientError::Deserialize("keystore blob too short".to_string()));
        }
        let (salt, rest) = encrypted.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ClientError::UnexpectedResponse("keystore decrypt failed: wrong passphrase or corrupt blob".to_string()))?;

        let bytes: [u8; 32] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| ClientError::Deserialize("decrypted key is not 32 bytes".to_string()))?;
        Ok(SigningKey::from_bytes(&bytes))
    }
}

impl KeyMaterialProvider for Keystore {
    fn signing_key_for(&self, record: &ServiceRecord) -> Result<SigningKey, ClientError> {
        self.decrypt(&record.agent_private_key_encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(encrypted: Vec<u8>) -> ServiceRecord {
        ServiceRecord {
            config_id: "svc-1".to_string(),
            service_id: 1,
            mech_address: "0xmech".to_string(),
            service_safe_address: "0xsafe".to_string(),
            agent_address: "0xagent".to_string(),
            agent_private_key_encrypted: encrypted,
            staking_contract_address: "0xstaking".to_string(),
            chain_id: 100,
        }
    }

    #[test]
    fn round_trips_a_signing_key() {
        let keystore = Keystore::new("correct horse battery staple");
        let original = SigningKey::generate(&mut rand::thread_rng());
        let encrypted = keystore.encrypt(&original.to_bytes()).unwrap();

        let decrypted = keystore.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.to_bytes(), original.to_bytes());
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let writer = Keystore::new("correct horse battery staple");
        let reader = Keystore::new("wrong passphrase");
        let original = SigningKey::generate(&mut rand::thread_rng());
        let encrypted = writer.encrypt(&original.to_bytes()).unwrap();

        assert!(reader.decrypt(&encrypted).is_err());
    }

    #[test]
    fn key_material_provider_decrypts_the_service_record() {
        let keystore = Keystore::new("passphrase");
        let original = SigningKey::generate(&mut rand::thread_rng());
        let encrypted = keystore.encrypt(&original.to_bytes()).unwrap();
        let record = sample_record(encrypted);

        let key = keystore.signing_key_for(&record).unwrap();
        assert_eq!(key.to_bytes(), original.to_bytes());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let keystore = Keystore::new("passphrase");
        assert!(keystore.decrypt(&[0u8; 4]).is_err());
    }
}
