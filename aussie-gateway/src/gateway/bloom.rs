//! Probabilistic revocation filter.
//!
//! A counting-free bloom filter with no false negatives, used to short
//! circuit the revocation check: if the filter says a JTI
//! is definitely not present, the repository is never consulted. Hash
//! positions are derived from two independent BLAKE3 digests combined via
//! double hashing (Kirsch-Mitzenmacher), avoiding a dependency on `k`
//! separate hash functions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Fixed-size bit array bloom filter, rebuildable under a generation
/// counter so readers never observe a half-rebuilt array.
pub struct BloomFilter {
    bits: RwLock<Vec<AtomicU64>>,
    num_bits: u64,
    num_hashes: u32,
    generation: AtomicU64,
}

impl BloomFilter {
    pub fn new(expected_items: usize, num_hashes: u32) -> Self {
        let num_bits = (expected_items.max(1) as u64 * 10).next_power_of_two();
        let words = (num_bits / 64).max(1);
        Self {
            bits: RwLock::new((0..words).map(|_| AtomicU64::new(0)).collect()),
            num_bits,
            num_hashes: num_hashes.max(1),
            generation: AtomicU64::new(0),
        }
    }

    fn hash_pair(item: &str) -> (u64, u64) {
        let h1 = blake3::hash(item.as_bytes());
        let h2 = blake3::hash(format!("{item}:salt").as_bytes());
        let b1 = h1.as_bytes();
        let b2 = h2.as_bytes();
        (
            u64::from_le_bytes(b1[0..8].try_into().unwrap()),
            u64::from_le_bytes(b2[0..8].try_into().unwrap()),
        )
    }

    fn positions(&self, item: &str) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = Self::hash_pair(item);
        let num_bits = self.num_bits;
        (0..self.num_hashes).map(move |i| h1.wrapping_add((i as u64).wrapping_mul(h2)) % num_bits)
    }

    pub fn insert(&self, item: &str) {
        let bits = self.bits.read().expect("bloom filter lock poisoned");
        for pos in self.positions(item) {
            let word = (pos / 64) as usize;
            let bit = pos % 64;
            bits[word].fetch_or(1 << bit, Ordering::Relaxed);
        }
    }

    /// `true` means the item is *definitely not* present; `false` means it
    /// might be present (repository check still required).
    pub fn definitely_not_present(&self, item: &str) -> bool {
        let bits = self.bits.read().expect("bloom filter lock poisoned");
        for pos in self.positions(item) {
            let word = (pos / 64) as usize;
            let bit = pos % 64;
            if bits[word].load(Ordering::Relaxed) & (1 << bit) == 0 {
                return true;
            }
        }
        false
    }

    /// Atomically swaps the backing array for a freshly rebuilt one and
    /// bumps the generation counter.
    pub fn rebuild_from(&self, items: impl IntoIterator<Item = String>) {
        let words = (self.num_bits / 64).max(1);
        let fresh: Vec<AtomicU64> = (0..words).map(|_| AtomicU64::new(0)).collect();
        {
            let mut bits = self.bits.write().expect("bloom filter lock poisoned");
            *bits = fresh;
        }
        for item in items {
            self.insert(&item);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_items_are_never_false_negative() {
        let filter = BloomFilter::new(1000, 4);
        for i in 0..500 {
            filter.insert(&format!("jti-{i}"));
        }
        for i in 0..500 {
            assert!(!filter.definitely_not_present(&format!("jti-{i}")));
        }
    }

    #[test]
    fn absent_items_are_usually_reported_absent() {
        let filter = BloomFilter::new(1000, 4);
        filter.insert("present");
        let mut not_present_count = 0;
        for i in 0..200 {
            if filter.definitely_not_present(&format!("absent-{i}")) {
                not_present_count += 1;
            }
        }
        assert!(not_present_count > 150, "false positive rate too high: {not_present_count}/200");
    }

    #[test]
    fn rebuild_replaces_contents_and_bumps_generation() {
        let filter = BloomFilter::new(100, 3);
        filter.insert("stale");
        let gen0 = filter.generation();
        filter.rebuild_from(vec!["fresh".to_string()]);
        assert!(filter.generation() > gen0);
        assert!(!filter.definitely_not_present("fresh"));
    }
}
