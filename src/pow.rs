//! Proof-of-work threshold math, validation and local generation.
//!
//! A work value `w` is valid for `previous` when
//! `LE_u64(BLAKE2b-64(reverse(w) || previous)) >= threshold`. Work travels as the
//! 16 hex characters of `w`; the nonce fed to the hash is therefore the
//! little-endian encoding of the same u64.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};
use rand::Rng;

use crate::encoding::parse_hex32;

type Blake2b64 = Blake2b<U8>;

/// Threshold for multiplier 1 (receive, and every block on low difficulty networks).
pub const BASE_THRESHOLD: u64 = 0xfffffe0000000000;
const BASE_DIFFICULTY: u64 = u64::MAX - BASE_THRESHOLD;

const CANCEL_CHECK_INTERVAL: u64 = 1 << 12;

pub fn threshold_from_multiplier(multiplier: u64) -> u64 {
    let multiplier = multiplier.max(1);
    u64::MAX - BASE_DIFFICULTY / multiplier
}

/// Work servers take the threshold as unpadded lowercase hex.
pub fn difficulty_string(threshold: u64) -> String {
    format!("{:x}", threshold)
}

pub fn work_value(previous: &[u8; 32], nonce: u64) -> u64 {
    let mut hasher = Blake2b64::new();
    hasher.update(nonce.to_le_bytes());
    hasher.update(previous);
    let mut out = [0u8; 8];
    out.copy_from_slice(&hasher.finalize());
    u64::from_le_bytes(out)
}

pub fn parse_work(work: &str) -> Option<u64> {
    if work.len() != 16 {
        return None;
    }
    u64::from_str_radix(work, 16).ok()
}

pub fn work_to_string(nonce: u64) -> String {
    format!("{:016x}", nonce)
}

pub fn is_work_valid_for_threshold(previous: &[u8; 32], threshold: u64, work: &str) -> bool {
    match parse_work(work) {
        Some(nonce) => work_value(previous, nonce) >= threshold,
        None => false,
    }
}

/// Validate hex encoded `work` against hex encoded `previous` at `multiplier`.
pub fn is_work_valid(previous: &str, multiplier: u64, work: &str) -> bool {
    match parse_hex32(previous) {
        Some(previous) => {
            is_work_valid_for_threshold(&previous, threshold_from_multiplier(multiplier), work)
        }
        None => false,
    }
}

/// Searches for work on `threads` OS threads until one is found or `cancel` is
/// raised. Returns `None` only when cancelled.
pub fn generate(previous: &[u8; 32], threshold: u64, threads: usize, cancel: &AtomicBool) -> Option<String> {
    let threads = threads.max(1) as u64;
    let found: Mutex<Option<u64>> = Mutex::new(None);
    let start: u64 = rand::thread_rng().gen();

    std::thread::scope(|scope| {
        for offset in 0..threads {
            let found = &found;
            scope.spawn(move || {
                let mut nonce = start.wrapping_add(offset);
                let mut tries: u64 = 0;
                loop {
                    if work_value(previous, nonce) >= threshold {
                        if let Ok(mut slot) = found.lock() {
                            slot.get_or_insert(nonce);
                        }
                        cancel.store(true, Ordering::Relaxed);
                        return;
                    }
                    nonce = nonce.wrapping_add(threads);
                    tries += 1;
                    if tries % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                        return;
                    }
                }
            });
        }
    });

    found.into_inner().ok().flatten().map(work_to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "3F93C5CD2E314FA16702189041E68E68C07B27961BF37F0B7705145BEFBA3AA3";

    #[test]
    fn test_thresholds() {
        assert_eq!(threshold_from_multiplier(1), 0xfffffe0000000000);
        assert_eq!(threshold_from_multiplier(0), 0xfffffe0000000000);
        assert_eq!(threshold_from_multiplier(64), 0xfffffff800000000);
        assert_eq!(threshold_from_multiplier(800), 0xffffffff5c28f5c2);
        assert_eq!(difficulty_string(threshold_from_multiplier(1)), "fffffe0000000000");
        assert_eq!(difficulty_string(threshold_from_multiplier(64)), "fffffff800000000");
    }

    #[test]
    fn test_known_work() {
        let previous = parse_hex32(HASH).unwrap();
        assert_eq!(work_value(&previous, parse_work("205452237a9b01f4").unwrap()), 0xffffffff287741bf);
        assert!(is_work_valid(HASH, 1, "205452237a9b01f4"));
        assert!(is_work_valid(HASH, 64, "205452237a9b01f4"));
        assert!(!is_work_valid(HASH, 800, "205452237a9b01f4"));
    }

    #[test]
    fn test_invalid_work() {
        assert!(!is_work_valid(
            "F1C59E6C738BB82221E082910740BADC58301F8F32291E07CCC4CDBEEAD44348",
            1,
            "205452237a9b01f4"
        ));
        assert!(!is_work_valid(
            "03DDDFF29D3FF3DC41B5374A10A70B49F7AA41E42461511D6A64F346F9C8421E",
            1,
            "00000000002d7708"
        ));
        assert!(!is_work_valid(HASH, 1, "not work"));
        assert!(!is_work_valid(HASH, 1, "205452237a9b01"));
        assert!(!is_work_valid("abcd", 1, "205452237a9b01f4"));
    }

    #[test]
    fn test_generate_low_threshold() {
        let previous = parse_hex32(HASH).unwrap();
        let threshold = 0xff00000000000000;
        let cancel = AtomicBool::new(false);
        let work = generate(&previous, threshold, 2, &cancel).unwrap();
        assert!(is_work_valid_for_threshold(&previous, threshold, &work));
        assert_eq!(work.len(), 16);
    }

    #[test]
    fn test_generate_cancelled() {
        let previous = parse_hex32(HASH).unwrap();
        let cancel = AtomicBool::new(true);
        // unreachable threshold, only cancellation ends the search
        assert!(generate(&previous, u64::MAX, 2, &cancel).is_none());
    }

    #[test]
    fn test_higher_multiplier_implies_lower() {
        let previous = parse_hex32(HASH).unwrap();
        let cancel = AtomicBool::new(false);
        let strict = 0xfff0000000000000;
        let work = generate(&previous, strict, 1, &cancel).unwrap();
        assert!(is_work_valid_for_threshold(&previous, strict, &work));
        assert!(is_work_valid_for_threshold(&previous, 0xff00000000000000, &work));
    }
}
