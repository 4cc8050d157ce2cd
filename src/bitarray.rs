//! Sparse, logged deletion bit-array. Virtually 2^54 bits wide; storage is a
//! map from leaf id (high bits of the position) to a lazily-allocated
//! 2^24-bit leaf page, in place of the four-level atomic-pointer tree the
//! original engine used for this — the access pattern here is "set once,
//! read many, occasionally prune a whole leaf", which a sharded hash map
//! serves just as well as a hand-rolled tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::wal::{self, WalWriter};

const LEAF_BITS: u64 = 1 << 24;
const LEAF_WORDS: usize = (1 << 24) / 64;

struct LeafPage {
	words: Vec<AtomicU64>,
}

impl LeafPage {
	fn new() -> Self {
		let mut words = Vec::with_capacity(LEAF_WORDS);
		words.resize_with(LEAF_WORDS, || AtomicU64::new(0));
		LeafPage { words }
	}

	fn get(&self, bit: u64) -> bool {
		let w = (bit / 64) as usize;
		let b = bit % 64;
		self.words[w].load(Ordering::Acquire) & (1 << b) != 0
	}

	fn set(&self, bit: u64) {
		let w = (bit / 64) as usize;
		let b = bit % 64;
		self.words[w].fetch_or(1 << b, Ordering::Release);
	}

	fn clear(&self, bit: u64) {
		let w = (bit / 64) as usize;
		let b = bit % 64;
		self.words[w].fetch_and(!(1 << b), Ordering::Release);
	}
}

pub struct BitArray {
	leaves: RwLock<HashMap<u64, Arc<LeafPage>>>,
	log_dir: PathBuf,
	writer: parking_lot::Mutex<WalWriter>,
	generation: AtomicU64,
}

impl BitArray {
	pub fn open(log_dir: &Path, generation: u64) -> Result<Self> {
		wal::ensure_dir(log_dir)?;
		let writer = WalWriter::create(log_dir, generation)?;
		Ok(BitArray {
			leaves: RwLock::new(HashMap::new()),
			log_dir: log_dir.to_path_buf(),
			writer: parking_lot::Mutex::new(writer),
			generation: AtomicU64::new(generation),
		})
	}

	fn leaf_id(pos: u64) -> u64 {
		pos / LEAF_BITS
	}

	pub fn get(&self, pos: u64) -> bool {
		let leaf_id = Self::leaf_id(pos);
		let leaves = self.leaves.read();
		match leaves.get(&leaf_id) {
			Some(leaf) => leaf.get(pos % LEAF_BITS),
			None => false,
		}
	}

	fn leaf_for_write(&self, pos: u64) -> Arc<LeafPage> {
		let leaf_id = Self::leaf_id(pos);
		if let Some(leaf) = self.leaves.read().get(&leaf_id) {
			return leaf.clone();
		}
		let mut leaves = self.leaves.write();
		leaves.entry(leaf_id).or_insert_with(|| Arc::new(LeafPage::new())).clone()
	}

	pub fn set(&self, pos: u64) -> Result<()> {
		self.leaf_for_write(pos).set(pos % LEAF_BITS);
		self.log_set(pos)
	}

	pub fn clear(&self, pos: u64) -> Result<()> {
		self.leaf_for_write(pos).clear(pos % LEAF_BITS);
		self.log_clear(pos)
	}

	pub fn log_set(&self, pos: u64) -> Result<()> {
		assert!(pos as i64 > 0, "position must fit in a positive i64");
		let mut w = self.writer.lock();
		w.append(&(pos as i64).to_le_bytes())
	}

	pub fn log_clear(&self, pos: u64) -> Result<()> {
		assert!(pos as i64 > 0, "position must fit in a positive i64");
		let mut w = self.writer.lock();
		w.append(&(-(pos as i64)).to_le_bytes())
	}

	pub fn flush(&self) -> Result<()> {
		self.writer.lock().flush()
	}

	/// Switches to a new log file named by `new_generation`; used when the
	/// id window boundary moves at a generation roll.
	pub fn switch_log(&self, new_generation: u64) -> Result<()> {
		self.flush()?;
		let mut w = self.writer.lock();
		*w = WalWriter::create(&self.log_dir, new_generation)?;
		self.generation.store(new_generation, Ordering::Release);
		Ok(())
	}

	/// Drops whole leaf pages strictly below `pos >> 24`, i.e. every bit
	/// they hold is guaranteed dead once no surviving on-disk generation
	/// can reference ids that low.
	pub fn prune_till(&self, pos: u64) {
		let boundary = Self::leaf_id(pos);
		let mut leaves = self.leaves.write();
		leaves.retain(|id, _| *id >= boundary);
	}

	/// Replays every generation file in `log_dir` in ascending order,
	/// reconstructing in-memory state.
	pub fn recover(log_dir: &Path) -> Result<(Self, u64)> {
		let generations = wal::list_generations(log_dir)?;
		let latest = *generations.last().unwrap_or(&0);
		let arr = BitArray::open(log_dir, latest)?;
		for gen in &generations {
			let path = wal::generation_path(log_dir, *gen);
			let bytes = wal::read_truncated(&path, 8)?;
			for v in bytes.chunks_exact(8).map(|c| i64::from_le_bytes(c.try_into().unwrap())) {
				if v > 0 {
					arr.leaf_for_write(v as u64).set(v as u64 % LEAF_BITS);
				} else if v < 0 {
					arr.leaf_for_write((-v) as u64).clear((-v) as u64 % LEAF_BITS);
				}
			}
		}
		Ok((arr, latest))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn set_get_clear() {
		let dir = TempDir::new().unwrap();
		let arr = BitArray::open(dir.path(), 0).unwrap();
		assert!(!arr.get(42));
		arr.set(42).unwrap();
		assert!(arr.get(42));
		arr.clear(42).unwrap();
		assert!(!arr.get(42));
	}

	#[test]
	fn recover_replays_log() {
		let dir = TempDir::new().unwrap();
		{
			let arr = BitArray::open(dir.path(), 0).unwrap();
			arr.set(10).unwrap();
			arr.set(20).unwrap();
			arr.clear(10).unwrap();
			arr.flush().unwrap();
		}
		let (arr, _gen) = BitArray::recover(dir.path()).unwrap();
		assert!(!arr.get(10));
		assert!(arr.get(20));
	}

	#[test]
	fn prune_drops_low_leaves() {
		let dir = TempDir::new().unwrap();
		let arr = BitArray::open(dir.path(), 0).unwrap();
		arr.set(5).unwrap();
		arr.set(LEAF_BITS + 5).unwrap();
		arr.prune_till(LEAF_BITS);
		assert!(!arr.get(5));
		assert!(arr.get(LEAF_BITS + 5));
	}
}
