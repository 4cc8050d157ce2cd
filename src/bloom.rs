//! Per-row bloom-filter plane: `size` parallel bloom filters, one per
//! on-disk generation (indexed by vault_lsb), stored column-major so a
//! lookup touches one 256-bit word per bucket instead of 256 separate
//! filters.

use std::sync::atomic::Ordering;

use crate::bits::{Bits256, Mask256};
use crate::consts::HASH_COUNT;
use crate::error::{Error, Result};

pub struct BloomPlane {
	seeds: [u64; HASH_COUNT],
	size: usize,
	slices: Vec<Bits256>,
}

impl BloomPlane {
	pub fn new(seeds: [u64; HASH_COUNT], size: usize) -> Self {
		let size = round_up_64(size);
		let slices = (0..size).map(|_| Bits256::new()).collect();
		BloomPlane { seeds, size, slices }
	}

	pub fn size(&self) -> usize {
		self.size
	}

	fn buckets(&self, key: &[u8]) -> [usize; HASH_COUNT] {
		let mut out = [0usize; HASH_COUNT];
		for (i, seed) in self.seeds.iter().enumerate() {
			out[i] = crate::hash::bloom_bucket(*seed, key, self.size);
		}
		out
	}

	/// Sets bit `v` in every bucket slice that `key` hashes to.
	pub fn add_at(&self, v: u8, key: &[u8]) {
		for b in self.buckets(key) {
			self.slices[b].set(v, Ordering::Release);
		}
	}

	/// Clears bit `v` in every slice (used when a generation is retired).
	pub fn clear_at(&self, v: u8) {
		for slice in &self.slices {
			slice.clear(v, Ordering::Release);
		}
	}

	/// Copies bit `v` from `single` into every corresponding slice of this
	/// plane. `single` must have been built with the same size as `self`.
	pub fn assign_at(&self, v: u8, single: &SingleBloom) -> Result<()> {
		if single.size != self.size {
			return Err(Error::InvalidInput(format!(
				"bloom size mismatch: plane has {} bits, single filter has {}",
				self.size, single.size
			)));
		}
		for (slice, present) in self.slices.iter().zip(single.bits.iter()) {
			if *present {
				slice.set(v, Ordering::Release);
			} else {
				slice.clear(v, Ordering::Release);
			}
		}
		Ok(())
	}

	/// OR-accumulates the bucket slices for `key` into a 256-bit mask: bit
	/// `v` set means "key may be present in the generation with vault_lsb v".
	pub fn get_mask(&self, key: &[u8]) -> Mask256 {
		let buckets = self.buckets(key);
		let mut out = [0u64; 4];
		for b in buckets {
			self.slices[b].accumulate_into(&mut out, Ordering::Acquire);
		}
		Mask256(out)
	}

	/// A fresh plane of twice the size, its contents duplicated so every
	/// bit that was present remains present under either half's bucket
	/// mapping derived from `key % size` (the buckets simply alias).
	pub fn double_sized(&self) -> Self {
		let new_size = self.size * 2;
		let mut slices = Vec::with_capacity(new_size);
		for i in 0..new_size {
			let src = &self.slices[i % self.size];
			slices.push(src.clone());
		}
		BloomPlane { seeds: self.seeds, size: new_size, slices }
	}
}

fn round_up_64(size: usize) -> usize {
	((size + 63) / 64) * 64
}

/// A single-generation bloom filter, built incrementally by the compactor
/// while packing one row's merged output, then folded into the plane via
/// `BloomPlane::assign_at`.
pub struct SingleBloom {
	seeds: [u64; HASH_COUNT],
	size: usize,
	bits: Vec<bool>,
}

impl SingleBloom {
	pub fn new(seeds: [u64; HASH_COUNT], size: usize) -> Self {
		SingleBloom { seeds, size, bits: vec![false; size] }
	}

	pub fn add(&mut self, key: &[u8]) {
		for seed in &self.seeds {
			let b = crate::hash::bloom_bucket(*seed, key, self.size);
			self.bits[b] = true;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::hash::bloom_seeds;

	#[test]
	fn add_at_is_visible_in_mask() {
		let plane = BloomPlane::new(bloom_seeds(1), 1024);
		plane.add_at(5, b"alpha");
		let mask = plane.get_mask(b"alpha");
		assert!(mask.get(5));
		assert!(!mask.get(6));
	}

	#[test]
	fn double_sized_preserves_membership() {
		let plane = BloomPlane::new(bloom_seeds(7), 128);
		plane.add_at(3, b"beta");
		let doubled = plane.double_sized();
		assert_eq!(doubled.size(), 256);
		assert!(doubled.get_mask(b"beta").get(3));
	}

	#[test]
	fn assign_at_rejects_size_mismatch() {
		let plane = BloomPlane::new(bloom_seeds(1), 128);
		let single = SingleBloom::new(bloom_seeds(1), 64);
		assert!(plane.assign_at(0, &single).is_err());
	}

	#[test]
	fn assign_at_copies_single_filter() {
		let seeds = bloom_seeds(1);
		let plane = BloomPlane::new(seeds, 128);
		let mut single = SingleBloom::new(seeds, 128);
		single.add(b"gamma");
		plane.assign_at(9, &single).unwrap();
		assert!(plane.get_mask(b"gamma").get(9));
	}
}
