//! Key material and DID helpers
//!
//! A seed derives a three-level chain: the seed itself, its read key and its
//! public key. `store_seed` registers every level in the `keyssis`
//! collection so any of the three identifiers resolves back to the seed for
//! signing. DIDs keep an ordered list of private keys in `dids`; the newest
//! key signs and encrypts, any stored key verifies and decrypts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::crypto::{self, SecretKey, SEED_LEN};
use super::{Enclave, Scope};
use crate::collection::with_fallback;
use crate::document::{to_document, Document};
use crate::error::{EnclaveError, Result};

/// Logical collection mapping key identifiers to seeds
pub const KEYSSI_COLLECTION: &str = "keyssis";

/// Logical collection holding DID private keys
pub const DID_COLLECTION: &str = "dids";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyLevel {
    Seed,
    Read,
    Public,
}

impl KeyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyLevel::Seed => "seed",
            KeyLevel::Read => "read",
            KeyLevel::Public => "public",
        }
    }
}

/// Identifier of one level: `<level>:<hex key>`
pub fn key_identifier(level: KeyLevel, key: &[u8]) -> String {
    format!("{}:{}", level.as_str(), hex::encode(key))
}

/// Identifiers of every level derived from a seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedChain {
    pub seed: String,
    pub read: String,
    pub public: String,
}

impl SeedChain {
    pub fn derive(seed: &[u8; SEED_LEN]) -> Self {
        Self {
            seed: key_identifier(KeyLevel::Seed, seed),
            read: key_identifier(KeyLevel::Read, &crypto::read_key(seed)),
            public: key_identifier(KeyLevel::Public, &crypto::public_key(seed)),
        }
    }

    fn levels(&self) -> [(KeyLevel, &str); 3] {
        [
            (KeyLevel::Seed, self.seed.as_str()),
            (KeyLevel::Read, self.read.as_str()),
            (KeyLevel::Public, self.public.as_str()),
        ]
    }
}

#[derive(Serialize, Deserialize)]
struct KeyRecord {
    level: KeyLevel,
    seed: String,
}

#[derive(Default, Serialize, Deserialize)]
struct DidRecord {
    #[serde(default)]
    keys: Vec<String>,
}

impl Enclave {
    /// Register a seed and every key derived from it
    pub async fn store_seed(&self, scope: &Scope, seed: &[u8; SEED_LEN]) -> Result<SeedChain> {
        self.guard("store_seed")?;
        let chain = SeedChain::derive(seed);
        let keys = self.collection(KEYSSI_COLLECTION, true).await?;

        for (level, identifier) in chain.levels() {
            let record = KeyRecord {
                level,
                seed: crypto::encode_key(seed),
            };
            keys.update(identifier, with_fallback(to_document(&record)?))
                .await?;
        }
        info!(scope = %scope, public = %chain.public, "Seed registered");
        Ok(chain)
    }

    /// Sign with the seed behind any registered key identifier
    pub async fn sign_for_key(&self, scope: &Scope, key_id: &str, payload: &[u8]) -> Result<Vec<u8>> {
        self.guard("sign_for_key")?;
        debug!(scope = %scope, key = %key_id, "sign_for_key");
        let seed = self.seed_for(key_id).await?;
        Ok(crypto::sign(&seed, payload))
    }

    /// Verify a signature made by the seed behind a registered key identifier
    pub async fn verify_for_key(
        &self,
        scope: &Scope,
        key_id: &str,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        self.guard("verify_for_key")?;
        debug!(scope = %scope, key = %key_id, "verify_for_key");
        let seed = self.seed_for(key_id).await?;
        crypto::verify(&crypto::public_key(&seed), payload, signature)
    }

    /// Add a private key to a DID. The most recently added key becomes the
    /// active one; storing a known key again changes nothing.
    pub async fn store_did(&self, scope: &Scope, did: &str, private_key: &[u8; SEED_LEN]) -> Result<()> {
        self.guard("store_did")?;
        let dids = self.collection(DID_COLLECTION, true).await?;

        let mut record = match dids.read(did).await {
            Ok(doc) => did_record(doc)?,
            Err(e) if e.is_not_found() => DidRecord::default(),
            Err(e) => return Err(e),
        };

        let encoded = crypto::encode_key(private_key);
        if record.keys.contains(&encoded) {
            debug!(scope = %scope, did = %did, "DID key already stored");
            return Ok(());
        }
        record.keys.push(encoded);
        dids.update(did, with_fallback(to_document(&record)?)).await?;

        info!(scope = %scope, did = %did, keys = record.keys.len(), "DID key stored");
        Ok(())
    }

    pub async fn sign_for_did(&self, scope: &Scope, did: &str, payload: &[u8]) -> Result<Vec<u8>> {
        self.guard("sign_for_did")?;
        debug!(scope = %scope, did = %did, "sign_for_did");
        let key = self.newest_did_key(did).await?;
        Ok(crypto::sign(&key, payload))
    }

    /// True when any key of the DID produced the signature
    pub async fn verify_for_did(
        &self,
        scope: &Scope,
        did: &str,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        self.guard("verify_for_did")?;
        debug!(scope = %scope, did = %did, "verify_for_did");
        for key in self.did_keys(did).await? {
            if crypto::verify(&crypto::public_key(&key), payload, signature)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Encrypt with the DID's newest key, output is `nonce || ciphertext`
    pub async fn encrypt_for_did(&self, scope: &Scope, did: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.guard("encrypt_for_did")?;
        debug!(scope = %scope, did = %did, "encrypt_for_did");
        let key = self.newest_did_key(did).await?;
        crypto::encrypt(&crypto::symmetric_key(&key), plaintext)
    }

    /// Decrypt with whichever of the DID's keys sealed the data, newest first
    pub async fn decrypt_for_did(&self, scope: &Scope, did: &str, data: &[u8]) -> Result<Vec<u8>> {
        self.guard("decrypt_for_did")?;
        debug!(scope = %scope, did = %did, "decrypt_for_did");
        let mut last_error = EnclaveError::not_found(DID_COLLECTION, did);
        for key in self.did_keys(did).await?.iter().rev() {
            match crypto::decrypt(&crypto::symmetric_key(key), data) {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    async fn seed_for(&self, key_id: &str) -> Result<SecretKey> {
        let doc = self
            .collection(KEYSSI_COLLECTION, false)
            .await?
            .read(key_id)
            .await?;
        let record: KeyRecord = serde_json::from_value(Value::Object(doc))?;
        crypto::decode_key(&record.seed)
    }

    /// Keys of a DID, oldest first
    async fn did_keys(&self, did: &str) -> Result<Vec<SecretKey>> {
        let doc = self.collection(DID_COLLECTION, false).await?.read(did).await?;
        did_record(doc)?
            .keys
            .iter()
            .map(|encoded| crypto::decode_key(encoded))
            .collect()
    }

    async fn newest_did_key(&self, did: &str) -> Result<SecretKey> {
        self.did_keys(did)
            .await?
            .pop()
            .ok_or_else(|| EnclaveError::not_found(DID_COLLECTION, did))
    }
}

fn did_record(doc: Document) -> Result<DidRecord> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}
