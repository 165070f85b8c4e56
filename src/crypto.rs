use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest};
use ed25519_dalek::hazmat::{self, ExpandedSecretKey};
use ed25519_dalek::{Signature, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::encoding::{encode_address, parse_hex32, Network};
use crate::error::{Result, WalletError};

type Blake2b256 = Blake2b<U32>;

const NONCE_LEN: usize = 12;

/// Ed25519 keypair using the protocol's BLAKE2b-512 variant in place of SHA-512.
#[derive(Clone)]
pub struct KeyPair {
    secret: [u8; 32],
    public: [u8; 32],
}

impl KeyPair {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let expanded = expand(&secret);
        let public = VerifyingKey::from(&expanded).to_bytes();
        KeyPair { secret, public }
    }

    /// Derives the account key at `index` of a wallet seed.
    pub fn from_seed(seed: &[u8; 32], index: u32) -> Self {
        Self::from_secret(derive_secret(seed, index))
    }

    /// Accepts a 32-byte secret, or the 64-byte `secret || public` form some
    /// wallets export. The public half of the long form must match.
    pub fn from_hex(key: &str) -> Result<Self> {
        if !key.is_ascii() {
            return Err(WalletError::InvalidPrivateKey);
        }
        match key.len() {
            64 => parse_hex32(key)
                .map(Self::from_secret)
                .ok_or(WalletError::InvalidPrivateKey),
            128 => {
                let secret = parse_hex32(&key[..64]).ok_or(WalletError::InvalidPrivateKey)?;
                let public = parse_hex32(&key[64..]).ok_or(WalletError::InvalidPrivateKey)?;
                let pair = Self::from_secret(secret);
                if pair.public != public {
                    return Err(WalletError::InvalidPrivateKey);
                }
                Ok(pair)
            }
            _ => Err(WalletError::InvalidPrivateKey),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret)
    }

    pub fn address(&self, network: Network) -> String {
        encode_address(&self.public, network)
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let expanded = expand(&self.secret);
        let verifying = VerifyingKey::from(&expanded);
        hazmat::raw_sign::<Blake2b512>(&expanded, message, &verifying).to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

fn expand(secret: &[u8; 32]) -> ExpandedSecretKey {
    let mut digest = [0u8; 64];
    digest.copy_from_slice(&Blake2b512::digest(secret));
    ExpandedSecretKey::from_bytes(&digest)
}

/// `BLAKE2b-256(seed || be32(index))`
pub fn derive_secret(seed: &[u8; 32], index: u32) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(seed);
    hasher.update(index.to_be_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Verify a signature made by `sign` against a raw public key.
pub fn verify_signature(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    hazmat::raw_verify::<Blake2b512>(&key, message, &signature).is_ok()
}

/// Fresh random wallet seed, hex encoded.
pub fn generate_seed() -> String {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    hex::encode_upper(seed)
}

pub fn parse_seed(seed: &str) -> Result<[u8; 32]> {
    parse_hex32(seed).ok_or(WalletError::InvalidSeed)
}

/// AES-256-GCM keyed by SHA-256 of a passphrase. Output is hex of
/// `nonce || ciphertext || tag`.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    pub fn from_password(password: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(password.as_bytes()));
        SecretCipher { key }
    }

    pub fn from_key_hex(key: &str) -> Result<Self> {
        parse_hex32(key)
            .map(|key| SecretCipher { key })
            .ok_or(WalletError::DecryptionFailed)
    }

    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| WalletError::Internal(format!("cipher init: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| WalletError::Internal("encryption failed".to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    pub fn decrypt(&self, sealed_hex: &str) -> Result<String> {
        let sealed = hex::decode(sealed_hex).map_err(|_| WalletError::DecryptionFailed)?;
        if sealed.len() < NONCE_LEN {
            return Err(WalletError::DecryptionFailed);
        }
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| WalletError::DecryptionFailed)?;

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| WalletError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| WalletError::DecryptionFailed)
    }
}
