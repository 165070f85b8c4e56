//! Account address codec and fixed-width hex helpers.
//!
//! An address is `<prefix><52 chars of key><8 chars of checksum>` in the
//! protocol's 32-symbol alphabet. The key part is the 256-bit public key with 4
//! zero bits of leading pad; the checksum is a 5-byte BLAKE2b digest of the key,
//! byte-reversed.

use blake2::digest::consts::U5;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";
const KEY_CHARS: usize = 52;
const CHECKSUM_CHARS: usize = 8;

type Blake2b40 = Blake2b<U5>;

/// Which member of the protocol family we are serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Nano,
    Banano,
}

impl Network {
    pub fn from_banano_flag(banano: bool) -> Self {
        if banano {
            Network::Banano
        } else {
            Network::Nano
        }
    }

    /// Prefix emitted by `encode_address`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Network::Nano => "nano_",
            Network::Banano => "ban_",
        }
    }

    /// Prefixes accepted by `decode_address`.
    pub fn accepted_prefixes(&self) -> &'static [&'static str] {
        match self {
            Network::Nano => &["nano_", "xrb_"],
            Network::Banano => &["ban_"],
        }
    }

    /// Difficulty multiplier for send and representative change blocks.
    pub fn send_multiplier(&self) -> u64 {
        match self {
            Network::Nano => 64,
            Network::Banano => 1,
        }
    }
}

fn address_checksum(pubkey: &[u8; 32]) -> [u8; 5] {
    let digest = Blake2b40::digest(pubkey);
    let mut out = [0u8; 5];
    out.copy_from_slice(&digest);
    out.reverse();
    out
}

/// Encodes `bytes` as base32, left-padding with zero bits to a 5-bit boundary.
fn to_base32(bytes: &[u8]) -> String {
    let total_bits = bytes.len() * 8;
    let pad = (5 - total_bits % 5) % 5;
    let mut out = String::with_capacity((total_bits + pad) / 5);

    let mut acc: u32 = 0;
    let mut bits = pad;
    for &byte in bytes {
        acc = (acc << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
        }
        acc &= (1 << bits) - 1;
    }
    out
}

/// Inverse of `to_base32`. The leading pad bits must be zero.
fn from_base32(s: &str, out_len: usize) -> Option<Vec<u8>> {
    let total_bits = s.len() * 5;
    if total_bits < out_len * 8 || total_bits - out_len * 8 >= 5 {
        return None;
    }
    let mut pad = total_bits - out_len * 8;

    let mut out = Vec::with_capacity(out_len);
    let mut acc: u32 = 0;
    let mut bits = 0usize;
    for c in s.bytes() {
        let value = ALPHABET.iter().position(|&a| a == c)? as u32;
        acc = (acc << 5) | value;
        bits += 5;
        if pad > 0 {
            if acc >> (bits - pad) != 0 {
                return None;
            }
            bits -= pad;
            pad = 0;
        }
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    (out.len() == out_len).then_some(out)
}

pub fn encode_address(pubkey: &[u8; 32], network: Network) -> String {
    let mut address = String::with_capacity(65);
    address.push_str(network.prefix());
    address.push_str(&to_base32(pubkey));
    address.push_str(&to_base32(&address_checksum(pubkey)));
    address
}

pub fn decode_address(address: &str, network: Network) -> Result<[u8; 32]> {
    let invalid = || WalletError::InvalidAddress(address.to_string());

    let body = network
        .accepted_prefixes()
        .iter()
        .find_map(|prefix| address.strip_prefix(prefix))
        .ok_or_else(invalid)?;
    if !body.is_ascii() || body.len() != KEY_CHARS + CHECKSUM_CHARS {
        return Err(invalid());
    }

    let key = from_base32(&body[..KEY_CHARS], 32).ok_or_else(invalid)?;
    let checksum = from_base32(&body[KEY_CHARS..], 5).ok_or_else(invalid)?;

    let mut pubkey = [0u8; 32];
    pubkey.copy_from_slice(&key);
    if address_checksum(&pubkey)[..] != checksum[..] {
        return Err(invalid());
    }
    Ok(pubkey)
}

pub fn is_valid_address(address: &str, network: Network) -> bool {
    decode_address(address, network).is_ok()
}

/// Parses a 64 character hex string (block hash, seed, key) into 32 bytes.
pub fn parse_hex32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Some(out)
}

pub fn parse_block_hash(s: &str) -> Result<[u8; 32]> {
    parse_hex32(s).ok_or_else(|| WalletError::InvalidHash(s.to_string()))
}
