//! Tenant-scoped credential encryption.
//!
//! Each tenant gets its own AES-256-GCM key, derived from the master secret
//! with Argon2id and a tenant-specific salt. Blobs are stored as lowercase hex
//! `iv:authTag:ciphertext` so a row never holds plaintext credentials.

use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Minimum accepted master secret length in characters.
pub const MIN_MASTER_SECRET_LEN: usize = 32;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SALT_PREFIX: &str = "openhouse-credentials:";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Master secret must be at least {MIN_MASTER_SECRET_LEN} characters")]
    WeakMasterSecret,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Failed to serialize credentials: {0}")]
    Serialization(String),

    #[error("Encryption failed")]
    Encryption,

    /// Wrong tenant, tampered blob, malformed format. Callers treat this as
    /// "credentials unusable, reconnect required".
    #[error("Failed to decrypt credentials")]
    Decryption,
}

// ---------------------------------------------------------------------------
// Key derivation parameters
// ---------------------------------------------------------------------------

/// Argon2id cost parameters for tenant key derivation.
#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Encrypts and decrypts integration credentials per tenant.
///
/// Cloning is cheap; clones share the derived-key cache.
#[derive(Clone)]
pub struct CredentialVault {
    master_secret: Arc<String>,
    params: KdfParams,
    keys: Arc<DashMap<DbId, [u8; KEY_LEN]>>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("params", &self.params)
            .field("cached_keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    pub fn new(master_secret: impl Into<String>) -> Result<Self, VaultError> {
        Self::with_params(master_secret, KdfParams::default())
    }

    pub fn with_params(
        master_secret: impl Into<String>,
        params: KdfParams,
    ) -> Result<Self, VaultError> {
        let master_secret = master_secret.into();
        if master_secret.chars().count() < MIN_MASTER_SECRET_LEN {
            return Err(VaultError::WeakMasterSecret);
        }
        Ok(Self {
            master_secret: Arc::new(master_secret),
            params,
            keys: Arc::new(DashMap::new()),
        })
    }

    /// Serialize `credentials` to JSON and encrypt it for `tenant_id`.
    pub fn encrypt<T: Serialize>(
        &self,
        tenant_id: DbId,
        credentials: &T,
    ) -> Result<String, VaultError> {
        let plaintext = serde_json::to_vec(credentials)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;
        let cipher = self.cipher_for(tenant_id)?;

        let iv: [u8; IV_LEN] = rand::random();
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|_| VaultError::Encryption)?;

        // aes-gcm appends the tag to the ciphertext.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt) for the same tenant.
    pub fn decrypt<T: DeserializeOwned>(
        &self,
        tenant_id: DbId,
        blob: &str,
    ) -> Result<T, VaultError> {
        let mut parts = blob.split(':');
        let (Some(iv_hex), Some(tag_hex), Some(ct_hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VaultError::Decryption);
        };

        let iv = hex::decode(iv_hex).map_err(|_| VaultError::Decryption)?;
        let tag = hex::decode(tag_hex).map_err(|_| VaultError::Decryption)?;
        let mut sealed = hex::decode(ct_hex).map_err(|_| VaultError::Decryption)?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(VaultError::Decryption);
        }
        sealed.extend_from_slice(&tag);

        let cipher = self.cipher_for(tenant_id)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| VaultError::Decryption)?;

        serde_json::from_slice(&plaintext).map_err(|_| VaultError::Decryption)
    }

    fn cipher_for(&self, tenant_id: DbId) -> Result<Aes256Gcm, VaultError> {
        let key = match self.keys.get(&tenant_id) {
            Some(cached) => *cached,
            None => {
                let derived = self.derive_key(tenant_id)?;
                self.keys.insert(tenant_id, derived);
                derived
            }
        };
        Aes256Gcm::new_from_slice(&key).map_err(|e| VaultError::KeyDerivation(e.to_string()))
    }

    fn derive_key(&self, tenant_id: DbId) -> Result<[u8; KEY_LEN], VaultError> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = format!("{SALT_PREFIX}{tenant_id}");
        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(self.master_secret.as_bytes(), salt.as_bytes(), &mut key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
