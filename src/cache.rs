//! Sharded read-through cache. Each of `CACHE_SHARD_COUNT` shards is an
//! independently mutexed map plus an insertion-order ring used for bounded
//! randomised eviction, so lookups on unrelated keys never contend.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::consts::{CACHE_SHARD_COUNT, EVICT_TRY_DIST};

#[derive(Clone)]
pub struct CacheEntry {
	pub value: Vec<u8>,
	/// -1 denotes a cached proven miss.
	pub id: i64,
	pub timestamp: u64,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ShardKey {
	short_hash: u64,
	key: Vec<u8>,
}

struct Shard {
	entries: HashMap<ShardKey, CacheEntry>,
	order: Vec<ShardKey>,
	cursor: usize,
	max_size: usize,
	clock: u64,
}

impl Shard {
	fn new(max_size: usize) -> Self {
		Shard { entries: HashMap::new(), order: Vec::new(), cursor: 0, max_size, clock: 0 }
	}

	fn evict_one(&mut self, mix: u64) {
		if self.order.is_empty() {
			return;
		}
		self.cursor = (self.cursor ^ mix as usize) % self.order.len();
		let scan = self.order.len().min(EVICT_TRY_DIST);
		let mut oldest_pos = self.cursor;
		let mut oldest_ts = u64::MAX;
		for i in 0..scan {
			let pos = (self.cursor + i) % self.order.len();
			let key = &self.order[pos];
			if let Some(e) = self.entries.get(key) {
				if e.timestamp < oldest_ts {
					oldest_ts = e.timestamp;
					oldest_pos = pos;
				}
			}
		}
		let victim = self.order.remove(oldest_pos);
		self.entries.remove(&victim);
	}
}

pub struct ShardedCache {
	shards: Vec<Mutex<Shard>>,
}

impl ShardedCache {
	pub fn new(max_size_per_shard: usize) -> Self {
		let mut shards = Vec::with_capacity(CACHE_SHARD_COUNT);
		shards.resize_with(CACHE_SHARD_COUNT, || Mutex::new(Shard::new(max_size_per_shard)));
		ShardedCache { shards }
	}

	fn shard_for(&self, short_hash: u64) -> &Mutex<Shard> {
		&self.shards[(short_hash as usize) % CACHE_SHARD_COUNT]
	}

	pub fn lookup(&self, short_hash: u64, key: &[u8]) -> Option<CacheEntry> {
		let mut shard = self.shard_for(short_hash).lock();
		shard.cursor ^= short_hash as usize;
		let k = ShardKey { short_hash, key: key.to_vec() };
		shard.entries.get(&k).cloned()
	}

	pub fn add(&self, short_hash: u64, key: &[u8], id: i64, value: Vec<u8>) {
		let mut shard = self.shard_for(short_hash).lock();
		shard.clock += 1;
		let timestamp = shard.clock;
		let k = ShardKey { short_hash, key: key.to_vec() };
		if !shard.entries.contains_key(&k) {
			if shard.entries.len() >= shard.max_size {
				let mix = self_mix(short_hash);
				shard.evict_one(mix);
			}
			shard.order.push(k.clone());
		}
		shard.entries.insert(k, CacheEntry { value, id, timestamp });
	}

	pub fn add_miss(&self, short_hash: u64, key: &[u8]) {
		self.add(short_hash, key, -1, Vec::new());
	}

	/// Removes a specific key (used when a delete must invalidate a stale
	/// cached hit rather than leave it to be overwritten later).
	pub fn invalidate(&self, short_hash: u64, key: &[u8]) {
		let mut shard = self.shard_for(short_hash).lock();
		let k = ShardKey { short_hash, key: key.to_vec() };
		if shard.entries.remove(&k).is_some() {
			shard.order.retain(|e| e != &k);
		}
	}
}

fn self_mix(short_hash: u64) -> u64 {
	let mut h = short_hash ^ 0x9E37_79B9_7F4A_7C15;
	h ^= h >> 33;
	h = h.wrapping_mul(0xff51afd7ed558ccd);
	h ^= h >> 33;
	h
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn add_then_lookup_hit() {
		let cache = ShardedCache::new(8);
		cache.add(1, b"k", 10, b"v".to_vec());
		let e = cache.lookup(1, b"k").unwrap();
		assert_eq!(e.id, 10);
		assert_eq!(e.value, b"v");
	}

	#[test]
	fn miss_is_cached_with_negative_id() {
		let cache = ShardedCache::new(8);
		cache.add_miss(1, b"missing");
		let e = cache.lookup(1, b"missing").unwrap();
		assert_eq!(e.id, -1);
	}

	#[test]
	fn eviction_keeps_shard_bounded() {
		let cache = ShardedCache::new(4);
		for i in 0..100u64 {
			cache.add(1, format!("k{}", i).as_bytes(), i as i64, vec![]);
		}
		let shard = cache.shard_for(1).lock();
		assert!(shard.entries.len() <= 4);
	}

	#[test]
	fn invalidate_removes_entry() {
		let cache = ShardedCache::new(8);
		cache.add(1, b"k", 10, b"v".to_vec());
		cache.invalidate(1, b"k");
		assert!(cache.lookup(1, b"k").is_none());
	}
}
