//! In-memory vault: 256 row-partitioned ordered multimaps of
//! short-hash -> (key, value, id), each row backed by a shared WAL file
//! named by the vault's generation number.

use std::collections::BTreeMap;
use std::convert::TryInto;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::consts::ROW_COUNT;
use crate::error::Result;
use crate::hash::row_of;
use crate::wal::{self, WalWriter};

#[derive(Clone)]
pub struct VaultEntry {
	pub id: i64,
	pub key: Vec<u8>,
	pub value: Vec<u8>,
}

pub struct Vault {
	rows: Vec<RwLock<BTreeMap<u64, Vec<VaultEntry>>>>,
	writer: Option<parking_lot::Mutex<WalWriter>>,
	generation: u64,
}

impl Vault {
	pub fn empty(generation: u64) -> Self {
		let mut rows = Vec::with_capacity(ROW_COUNT);
		rows.resize_with(ROW_COUNT, || RwLock::new(BTreeMap::new()));
		Vault { rows, writer: None, generation }
	}

	pub fn create(log_dir: &Path, generation: u64) -> Result<Self> {
		let mut v = Self::empty(generation);
		v.writer = Some(parking_lot::Mutex::new(WalWriter::create(log_dir, generation)?));
		Ok(v)
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn add(&self, short_hash: u64, entry: VaultEntry) -> Result<()> {
		if let Some(w) = &self.writer {
			let mut record = Vec::with_capacity(8 + 8 + 4 + entry.key.len() + 4 + entry.value.len());
			record.extend_from_slice(&short_hash.to_le_bytes());
			record.extend_from_slice(&entry.id.to_le_bytes());
			record.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
			record.extend_from_slice(&entry.key);
			record.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
			record.extend_from_slice(&entry.value);
			w.lock().append(&record)?;
		}
		self.add_no_log(short_hash, entry);
		Ok(())
	}

	fn add_no_log(&self, short_hash: u64, entry: VaultEntry) {
		let row = row_of(short_hash) as usize;
		self.rows[row].write().entry(short_hash).or_insert_with(Vec::new).push(entry);
	}

	pub fn flush(&self) -> Result<()> {
		if let Some(w) = &self.writer {
			w.lock().flush()?;
		}
		Ok(())
	}

	pub fn log_size(&self) -> Result<u64> {
		match &self.writer {
			Some(w) => w.lock().len(),
			None => Ok(0),
		}
	}

	/// Scans equal-short-hash entries in insertion order, skipping
	/// tombstoned ids, returning the first live match.
	pub fn lookup(&self, short_hash: u64, key: &[u8], is_deleted: impl Fn(i64) -> bool) -> Option<(Vec<u8>, i64)> {
		let row = row_of(short_hash) as usize;
		let guard = self.rows[row].read();
		let entries = guard.get(&short_hash)?;
		for e in entries {
			if e.key == key && !is_deleted(e.id) {
				return Some((e.value.clone(), e.id));
			}
		}
		None
	}

	/// Live records of `row`, in short-hash-ascending order.
	pub fn row_records(&self, row: u8, is_deleted: impl Fn(i64) -> bool) -> Vec<(u64, VaultEntry)> {
		let guard = self.rows[row as usize].read();
		let mut out = Vec::new();
		for (short_hash, entries) in guard.iter() {
			for e in entries {
				if !is_deleted(e.id) {
					out.push((*short_hash, e.clone()));
				}
			}
		}
		out
	}

	pub fn row_len(&self, row: u8) -> usize {
		self.rows[row as usize].read().values().map(|v| v.len()).sum()
	}

	pub fn total_len(&self) -> usize {
		(0..ROW_COUNT).map(|r| self.row_len(r as u8)).sum()
	}

	/// Highest record id seen across every row, or `None` if empty. Used on
	/// recovery to resume `next_id` past whatever WAL replay restored.
	pub fn max_id(&self) -> Option<i64> {
		(0..ROW_COUNT)
			.flat_map(|r| self.rows[r].read().values().flat_map(|v| v.iter().map(|e| e.id)).collect::<Vec<_>>())
			.max()
	}

	/// Replays every WAL file under `log_dir` in ascending generation order
	/// into a fresh in-memory vault whose own WAL continues at `generation`.
	pub fn recover(log_dir: &Path, generation: u64) -> Result<Self> {
		let v = Self::create(log_dir, generation)?;
		for gen in wal::list_generations(log_dir)? {
			let path = wal::generation_path(log_dir, gen);
			replay_file(&path, &v)?;
		}
		Ok(v)
	}
}

fn replay_file(path: &PathBuf, v: &Vault) -> Result<()> {
	let bytes = std::fs::read(path)?;
	let mut pos = 0usize;
	loop {
		if pos + 16 > bytes.len() {
			break;
		}
		let short_hash = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
		let id = i64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().unwrap());
		let mut cursor = pos + 16;
		if cursor + 4 > bytes.len() {
			break;
		}
		let key_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
		cursor += 4;
		if cursor + key_len + 4 > bytes.len() {
			break;
		}
		let key = bytes[cursor..cursor + key_len].to_vec();
		cursor += key_len;
		let value_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
		cursor += 4;
		if cursor + value_len > bytes.len() {
			break;
		}
		let value = bytes[cursor..cursor + value_len].to_vec();
		cursor += value_len;
		v.add_no_log(short_hash, VaultEntry { id, key, value });
		pos = cursor;
	}
	if pos != bytes.len() {
		log::warn!(
			target: "vaultkv",
			"Truncating partial record at tail of {:?} ({} of {} bytes kept)",
			path, pos, bytes.len(),
		);
		wal::truncate_file(path, pos as u64)?;
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn add_then_lookup() {
		let dir = TempDir::new().unwrap();
		let v = Vault::create(dir.path(), 0).unwrap();
		v.add(42, VaultEntry { id: 1, key: b"k".to_vec(), value: b"v".to_vec() }).unwrap();
		let (value, id) = v.lookup(42, b"k", |_| false).unwrap();
		assert_eq!(value, b"v");
		assert_eq!(id, 1);
	}

	/// Two distinct keys sharing a short hash both live in the same row's
	/// entry list; lookup disambiguates by key bytes rather than returning
	/// whichever happened to be inserted first.
	#[test]
	fn same_short_hash_distinct_keys_both_resolve() {
		let dir = TempDir::new().unwrap();
		let v = Vault::create(dir.path(), 0).unwrap();
		v.add(7, VaultEntry { id: 1, key: b"key-one".to_vec(), value: b"v1".to_vec() }).unwrap();
		v.add(7, VaultEntry { id: 2, key: b"key-two".to_vec(), value: b"v2".to_vec() }).unwrap();

		let (value, id) = v.lookup(7, b"key-one", |_| false).unwrap();
		assert_eq!(value, b"v1");
		assert_eq!(id, 1);

		let (value, id) = v.lookup(7, b"key-two", |_| false).unwrap();
		assert_eq!(value, b"v2");
		assert_eq!(id, 2);

		assert!(v.lookup(7, b"key-three", |_| false).is_none());
	}

	#[test]
	fn recover_replays_wal() {
		let dir = TempDir::new().unwrap();
		{
			let v = Vault::create(dir.path(), 3).unwrap();
			v.add(42, VaultEntry { id: 1, key: b"k1".to_vec(), value: b"v1".to_vec() }).unwrap();
			v.add(43, VaultEntry { id: 2, key: b"k2".to_vec(), value: b"v2".to_vec() }).unwrap();
			v.flush().unwrap();
		}
		let v2 = Vault::recover(dir.path(), 4).unwrap();
		assert_eq!(v2.lookup(42, b"k1", |_| false).unwrap().1, 1);
		assert_eq!(v2.lookup(43, b"k2", |_| false).unwrap().1, 2);
	}
}
