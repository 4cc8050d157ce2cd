//! Bit-exact 4096-byte on-disk page: a sorted-by-short-hash group of
//! records, a binary-searchable key array, and an offset table pointing at
//! each record's payload.
//!
//! Layout:
//!   [0..2)   count: u16
//!   [8..8+8*count)              short-hash keys, ascending
//!   [8+8*count..+2*count)       u16 payload offsets, one per key
//!   payload area: id:i64, key_len:u16, value_len:u16, key bytes, value bytes

use std::convert::TryInto;

use crate::consts::PAGE_SIZE;
use crate::error::{Error, Result};

const COUNT_OFFSET: usize = 0;
const KEYS_OFFSET: usize = 8;
const RECORD_HEADER_SIZE: usize = 8 + 2 + 2; // id + key_len + value_len

/// Fixed per-record overhead charged against the 4096-byte budget: an 8-byte
/// key slot, a 2-byte offset slot, and the record header (id + lengths).
pub const RECORD_OVERHEAD: usize = 8 + 2 + RECORD_HEADER_SIZE;

#[derive(Clone)]
pub struct PageRecord {
	pub short_hash: u64,
	pub id: i64,
	pub key: Vec<u8>,
	pub value: Vec<u8>,
}

impl PageRecord {
	pub fn packed_size(&self) -> usize {
		RECORD_OVERHEAD + self.key.len() + self.value.len()
	}
}

pub struct Page(pub Box<[u8; PAGE_SIZE]>);

impl Page {
	pub fn zeroed() -> Self {
		Page(Box::new([0u8; PAGE_SIZE]))
	}

	pub fn from_bytes(buf: [u8; PAGE_SIZE]) -> Self {
		Page(Box::new(buf))
	}

	fn count(&self) -> usize {
		u16::from_le_bytes(self.0[COUNT_OFFSET..COUNT_OFFSET + 2].try_into().unwrap()) as usize
	}

	fn key_at(&self, i: usize) -> u64 {
		let start = KEYS_OFFSET + i * 8;
		u64::from_le_bytes(self.0[start..start + 8].try_into().unwrap())
	}

	fn offset_at(&self, i: usize, count: usize) -> usize {
		let start = KEYS_OFFSET + count * 8 + i * 2;
		u16::from_le_bytes(self.0[start..start + 2].try_into().unwrap()) as usize
	}

	/// Packs `records` (already sorted by short_hash, caller-verified to
	/// fit within `PAGE_SIZE`) into a fresh page.
	pub fn fill(records: &[PageRecord]) -> Result<Page> {
		let count = records.len();
		let header_size = KEYS_OFFSET + count * 8 + count * 2;
		let mut page = Page::zeroed();
		page.0[COUNT_OFFSET..COUNT_OFFSET + 2].copy_from_slice(&(count as u16).to_le_bytes());

		let mut cursor = header_size;
		for (i, rec) in records.iter().enumerate() {
			let keys_pos = KEYS_OFFSET + i * 8;
			page.0[keys_pos..keys_pos + 8].copy_from_slice(&rec.short_hash.to_le_bytes());

			let offsets_pos = KEYS_OFFSET + count * 8 + i * 2;
			if cursor > u16::MAX as usize {
				return Err(Error::InvalidInput("page payload offset overflowed u16".into()));
			}
			page.0[offsets_pos..offsets_pos + 2].copy_from_slice(&(cursor as u16).to_le_bytes());

			let end = cursor + RECORD_HEADER_SIZE + rec.key.len() + rec.value.len();
			if end > PAGE_SIZE {
				return Err(Error::InvalidInput("page overflow while packing".into()));
			}
			page.0[cursor..cursor + 8].copy_from_slice(&rec.id.to_le_bytes());
			page.0[cursor + 8..cursor + 10].copy_from_slice(&(rec.key.len() as u16).to_le_bytes());
			page.0[cursor + 10..cursor + 12].copy_from_slice(&(rec.value.len() as u16).to_le_bytes());
			page.0[cursor + 12..cursor + 12 + rec.key.len()].copy_from_slice(&rec.key);
			page.0[cursor + 12 + rec.key.len()..end].copy_from_slice(&rec.value);
			cursor = end;
		}
		Ok(page)
	}

	fn read_record_at(&self, payload_off: usize) -> Result<(i64, &[u8], &[u8])> {
		if payload_off + RECORD_HEADER_SIZE > PAGE_SIZE {
			return Err(Error::Corruption("page record header out of bounds".into()));
		}
		let id = i64::from_le_bytes(self.0[payload_off..payload_off + 8].try_into().unwrap());
		let key_len = u16::from_le_bytes(self.0[payload_off + 8..payload_off + 10].try_into().unwrap()) as usize;
		let value_len = u16::from_le_bytes(self.0[payload_off + 10..payload_off + 12].try_into().unwrap()) as usize;
		let key_start = payload_off + RECORD_HEADER_SIZE;
		let value_start = key_start + key_len;
		let value_end = value_start + value_len;
		if value_end > PAGE_SIZE {
			return Err(Error::Corruption("page record payload out of bounds".into()));
		}
		Ok((id, &self.0[key_start..value_start], &self.0[value_start..value_end]))
	}

	/// Binary search on short hash; for equal-hash runs, compares key bytes
	/// and checks the deletion bit-array before accepting a match.
	pub fn lookup(&self, short_hash: u64, key: &[u8], is_deleted: impl Fn(i64) -> bool) -> Result<Option<(Vec<u8>, i64)>> {
		let count = self.count();
		if count > (PAGE_SIZE - KEYS_OFFSET) / 10 {
			return Err(Error::Corruption("implausible page record count".into()));
		}
		let mut lo = 0isize;
		let mut hi = count as isize - 1;
		let mut first = None;
		while lo <= hi {
			let mid = lo + (hi - lo) / 2;
			let k = self.key_at(mid as usize);
			if k < short_hash {
				lo = mid + 1;
			} else if k > short_hash {
				hi = mid - 1;
			} else {
				first = Some(mid as usize);
				hi = mid - 1;
			}
		}
		let mut i = match first {
			Some(i) => i,
			None => return Ok(None),
		};
		while i < count && self.key_at(i) == short_hash {
			let off = self.offset_at(i, count);
			let (id, rec_key, rec_value) = self.read_record_at(off)?;
			if rec_key == key && !is_deleted(id) {
				return Ok(Some((rec_value.to_vec(), id)));
			}
			i += 1;
		}
		Ok(None)
	}

	/// Sequential scan of all live (non-tombstoned) records, in stored order.
	pub fn extract(&self, is_deleted: impl Fn(i64) -> bool) -> Result<Vec<PageRecord>> {
		let count = self.count();
		if count > (PAGE_SIZE - KEYS_OFFSET) / 10 {
			return Err(Error::Corruption("implausible page record count".into()));
		}
		let mut out = Vec::with_capacity(count);
		for i in 0..count {
			let short_hash = self.key_at(i);
			let off = self.offset_at(i, count);
			let (id, key, value) = self.read_record_at(off)?;
			if !is_deleted(id) {
				out.push(PageRecord { short_hash, id, key: key.to_vec(), value: value.to_vec() });
			}
		}
		Ok(out)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn rec(short_hash: u64, id: i64, key: &[u8], value: &[u8]) -> PageRecord {
		PageRecord { short_hash, id, key: key.to_vec(), value: value.to_vec() }
	}

	#[test]
	fn fill_then_lookup_roundtrip() {
		let records = vec![
			rec(10, 1, b"a", b"value-a"),
			rec(20, 2, b"b", b"value-b"),
			rec(30, 3, b"c", b"value-c"),
		];
		let page = Page::fill(&records).unwrap();
		let (value, id) = page.lookup(20, b"b", |_| false).unwrap().unwrap();
		assert_eq!(value, b"value-b");
		assert_eq!(id, 2);
		assert!(page.lookup(40, b"z", |_| false).unwrap().is_none());
	}

	#[test]
	fn lookup_respects_deletion_bits() {
		let records = vec![rec(10, 5, b"a", b"v")];
		let page = Page::fill(&records).unwrap();
		assert!(page.lookup(10, b"a", |id| id == 5).unwrap().is_none());
	}

	#[test]
	fn same_short_hash_resolved_by_key_bytes() {
		let records = vec![rec(7, 1, b"k1", b"v1"), rec(7, 2, b"k2", b"v2")];
		let page = Page::fill(&records).unwrap();
		let (v, id) = page.lookup(7, b"k2", |_| false).unwrap().unwrap();
		assert_eq!(v, b"v2");
		assert_eq!(id, 2);
	}

	#[test]
	fn extract_skips_tombstones() {
		let records = vec![rec(1, 1, b"a", b"v"), rec(2, 2, b"b", b"v"), rec(3, 3, b"c", b"v")];
		let page = Page::fill(&records).unwrap();
		let live = page.extract(|id| id == 2).unwrap();
		assert_eq!(live.len(), 2);
		assert_eq!(live[0].id, 1);
		assert_eq!(live[1].id, 3);
	}
}
