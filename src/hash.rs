//! XXH64-based short hash and the bloom-plane seed derivation.

use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::consts::{HASH_COUNT, ROW_COUNT};

/// 64-bit short hash of a user key, seeded per store.
pub fn short_hash(seed: u64, key: &[u8]) -> u64 {
	let mut hasher = XxHash64::with_seed(seed);
	hasher.write(key);
	hasher.finish()
}

/// Top 8 bits of the short hash select the row.
pub fn row_of(short_hash: u64) -> u8 {
	(short_hash >> 56) as u8
}

pub const fn row_count() -> usize {
	ROW_COUNT
}

/// Derive the `HASH_COUNT` bloom bucket seeds from one store seed, the way
/// `chainkv.h`'s `metainfo::get_seeds` hashes the small integers `0..HASH_COUNT`
/// with the master seed to get independent-enough hash functions without
/// storing `HASH_COUNT` seeds on disk.
pub fn bloom_seeds(seed: u64) -> [u64; HASH_COUNT] {
	let mut seeds = [0u64; HASH_COUNT];
	for (i, s) in seeds.iter_mut().enumerate() {
		let mut hasher = XxHash64::with_seed(seed);
		hasher.write_u64(i as u64);
		*s = hasher.finish();
	}
	seeds
}

/// Bucket position for bloom hash `i` of `key`, into a plane of `size` bits.
pub fn bloom_bucket(seed: u64, key: &[u8], size: usize) -> usize {
	let mut hasher = XxHash64::with_seed(seed);
	hasher.write(key);
	(hasher.finish() % size as u64) as usize
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn short_hash_is_seed_sensitive() {
		let a = short_hash(0, b"hello");
		let b = short_hash(1, b"hello");
		assert_ne!(a, b);
	}

	#[test]
	fn row_of_uses_top_byte() {
		let h: u64 = 0xAB00_0000_0000_0001;
		assert_eq!(row_of(h), 0xAB);
	}

	#[test]
	fn bloom_seeds_are_distinct() {
		let seeds = bloom_seeds(42);
		for i in 0..HASH_COUNT {
			for j in (i + 1)..HASH_COUNT {
				assert_ne!(seeds[i], seeds[j]);
			}
		}
	}
}
