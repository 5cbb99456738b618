//! Cryptographic primitives for the key helpers.
//!
//! # Algorithms
//!
//! - **Signing**: Ed25519, the 32-byte seed is the private key
//! - **Read key**: SHA-256 of the seed
//! - **Encryption**: ChaCha20-Poly1305 keyed with SHA-256 of a private key,
//!   output laid out as `nonce || ciphertext`

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{EnclaveError, Result};

/// Seed / Ed25519 private key length (32 bytes)
pub const SEED_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Private key material, wiped on drop
pub type SecretKey = Zeroizing<[u8; SEED_LEN]>;

/// Generate cryptographically secure random bytes
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Ed25519 signing key for a seed
pub fn signing_key(seed: &[u8; SEED_LEN]) -> SigningKey {
    SigningKey::from_bytes(seed)
}

/// Read key derived from a seed
pub fn read_key(seed: &[u8; SEED_LEN]) -> [u8; 32] {
    Sha256::digest(seed).into()
}

/// Public key of a seed
pub fn public_key(seed: &[u8; SEED_LEN]) -> [u8; 32] {
    signing_key(seed).verifying_key().to_bytes()
}

/// Sign a payload, returning the 64-byte signature
pub fn sign(seed: &[u8; SEED_LEN], payload: &[u8]) -> Vec<u8> {
    signing_key(seed).sign(payload).to_bytes().to_vec()
}

/// Verify a signature against a public key. A malformed signature is
/// simply invalid.
pub fn verify(public_key: &[u8; 32], payload: &[u8], signature: &[u8]) -> Result<bool> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| EnclaveError::Crypto(format!("Invalid public key: {e}")))?;
    let Ok(signature) = Signature::from_slice(signature) else {
        return Ok(false);
    };
    Ok(verifying_key.verify(payload, &signature).is_ok())
}

/// Symmetric key derived from a private key
pub fn symmetric_key(private_key: &[u8; SEED_LEN]) -> SecretKey {
    Zeroizing::new(Sha256::digest(private_key).into())
}

/// Encrypt with a fresh random nonce
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce: [u8; NONCE_LEN] = generate_random_bytes();
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| EnclaveError::Crypto(format!("Encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `nonce || ciphertext`
pub fn decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN + AUTH_TAG_LEN {
        return Err(EnclaveError::Crypto(format!(
            "Ciphertext too short: {} bytes",
            data.len()
        )));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EnclaveError::Crypto("Failed to decrypt (wrong key?)".into()))
}

/// Base64 text of key material
pub fn encode_key(key: &[u8]) -> String {
    STANDARD.encode(key)
}

/// Decode base64 key material of exactly [`SEED_LEN`] bytes
pub fn decode_key(encoded: &str) -> Result<SecretKey> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(encoded)
            .map_err(|e| EnclaveError::Crypto(format!("Invalid key encoding: {e}")))?,
    );
    if bytes.len() != SEED_LEN {
        return Err(EnclaveError::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            SEED_LEN,
            bytes.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; SEED_LEN]);
    key.copy_from_slice(&bytes);
    Ok(key)
}
