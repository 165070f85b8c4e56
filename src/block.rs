use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::crypto::{verify_signature, KeyPair};
use crate::encoding::{decode_address, encode_address, parse_hex32, Network};
use crate::error::{Result, WalletError};

type Blake2b256 = Blake2b<U32>;

/// Every state block hash starts with 31 zero bytes and the state block type code.
const STATE_BLOCK_PREAMBLE: [u8; 32] = {
    let mut p = [0u8; 32];
    p[31] = 6;
    p
};

pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Subtype {
    Send,
    Receive,
    Change,
}

impl Subtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subtype::Send => "send",
            Subtype::Receive => "receive",
            Subtype::Change => "change",
        }
    }
}

/// A state block in the node's JSON shape (`json_block: true`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StateBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub hash: String,
    pub account: String,
    pub previous: String,
    pub representative: String,
    /// Raw amount as a decimal string.
    pub balance: String,
    pub link: String,
    #[serde(default)]
    pub link_as_account: String,
    #[serde(default)]
    pub work: String,
    #[serde(default)]
    pub signature: String,
}

impl StateBlock {
    pub fn new(
        account: &str,
        previous: &[u8; 32],
        representative: &str,
        balance: u128,
        link: &[u8; 32],
        network: Network,
    ) -> Self {
        StateBlock {
            block_type: "state".to_string(),
            hash: String::new(),
            account: account.to_string(),
            previous: hex::encode_upper(previous),
            representative: representative.to_string(),
            balance: balance.to_string(),
            link: hex::encode_upper(link),
            link_as_account: encode_address(link, network),
            work: String::new(),
            signature: String::new(),
        }
    }

    pub fn balance_raw(&self) -> Result<u128> {
        self.balance
            .parse::<u128>()
            .map_err(|_| WalletError::InvalidAmount(self.balance.clone()))
    }

    pub fn compute_hash(&self, network: Network) -> Result<[u8; 32]> {
        let account = decode_address(&self.account, network)?;
        let representative = decode_address(&self.representative, network)?;
        let previous = parse_hex32(&self.previous)
            .ok_or_else(|| WalletError::InvalidHash(self.previous.clone()))?;
        let link =
            parse_hex32(&self.link).ok_or_else(|| WalletError::InvalidHash(self.link.clone()))?;
        let balance = self.balance_raw()?;

        let mut hasher = Blake2b256::new();
        hasher.update(STATE_BLOCK_PREAMBLE);
        hasher.update(account);
        hasher.update(previous);
        hasher.update(representative);
        hasher.update(balance.to_be_bytes());
        hasher.update(link);

        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Ok(out)
    }

    /// Fills `hash` and `signature`.
    pub fn sign(&mut self, key: &KeyPair, network: Network) -> Result<()> {
        let hash = self.compute_hash(network)?;
        self.hash = hex::encode(hash);
        self.signature = hex::encode(key.sign(&hash));
        Ok(())
    }

    /// Checks the signature against the block's own account key.
    pub fn verify(&self, network: Network) -> Result<bool> {
        let hash = self.compute_hash(network)?;
        let account = decode_address(&self.account, network)?;
        let Ok(bytes) = hex::decode(&self.signature) else {
            return Ok(false);
        };
        let Ok(signature) = <[u8; 64]>::try_from(bytes.as_slice()) else {
            return Ok(false);
        };
        Ok(verify_signature(&account, &hash, &signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: &str = "nano_3px37c9f6w361j65yoasrcs6wh3hmmyb6eacpis7dwzp8th4hbb9izgba51j";

    fn sample() -> StateBlock {
        StateBlock {
            block_type: "state".to_string(),
            hash: String::new(),
            account: ACCOUNT.to_string(),
            previous: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855".to_string(),
            representative: ACCOUNT.to_string(),
            balance: "1000000000000000000000000000000".to_string(),
            link: "d9dd06646f96474a46c57c13677812305120be228f39964e222c06ab89f63745".to_string(),
            link_as_account: String::new(),
            work: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_hash_known_block() {
        let hash = sample().compute_hash(Network::Nano).unwrap();
        assert_eq!(
            hex::encode(hash),
            "8ebeb9534a14e0b17b3cd4639721387dedac80789278b540ddbde2a0b267b6d0"
        );
    }

    #[test]
    fn test_sign_known_block() {
        let key = KeyPair::from_hex("3966373239333430653037656565363961626163303439633266646434613363").unwrap();
        assert_eq!(
            hex::encode(key.public_key()),
            "9654410bf19577f90d82749642077517605ec8f8e78345e3bbbc9072c8f0f80f"
        );
        let mut block = sample();
        block.sign(&key, Network::Nano).unwrap();
        assert_eq!(block.hash, "8ebeb9534a14e0b17b3cd4639721387dedac80789278b540ddbde2a0b267b6d0");
        assert_eq!(
            block.signature,
            "b580fa76c0b763aa8a8a90af8592155c9478554ce04c87b5fb115baae624eafa116e04fffb273405c0ffcff6dfb021526292ac4418f3988d7684e15e486f1409"
        );
        // signed by a key other than the account's own
        assert!(!block.verify(Network::Nano).unwrap());
    }

    #[test]
    fn test_sign_verify_own_account() {
        let key = KeyPair::from_seed(&[9u8; 32], 0);
        let account = key.address(Network::Banano);
        let link = [0x11u8; 32];
        let mut block = StateBlock::new(&account, &[0u8; 32], &account, 42, &link, Network::Banano);
        assert_eq!(block.link_as_account, encode_address(&link, Network::Banano));
        block.sign(&key, Network::Banano).unwrap();
        assert!(block.verify(Network::Banano).unwrap());

        block.balance = "43".to_string();
        assert!(!block.verify(Network::Banano).unwrap());
    }

    #[test]
    fn test_invalid_fields() {
        let mut block = sample();
        block.balance = "-1".to_string();
        assert!(matches!(block.compute_hash(Network::Nano), Err(WalletError::InvalidAmount(_))));

        let mut block = sample();
        block.previous = "zz".to_string();
        assert!(matches!(block.compute_hash(Network::Nano), Err(WalletError::InvalidHash(_))));

        // valid address, wrong network
        assert!(sample().compute_hash(Network::Banano).is_err());
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["balance"], "1000000000000000000000000000000");
        let back: StateBlock = serde_json::from_value(value).unwrap();
        assert_eq!(back, sample());
        assert_eq!(serde_json::to_value(Subtype::Change).unwrap(), "change");
    }
}
