//! Streaming producers and a page-packing consumer used during compaction:
//! a reader over an on-disk vault's pages, a two-source merge of that
//! reader against a frozen in-memory vault row, and a packer that groups
//! the merged stream back into 4096-byte pages.

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;

use crate::consts::PAGE_SIZE;
use crate::error::Result;
use crate::page::{Page, PageRecord, RECORD_OVERHEAD};
use crate::pageindex::PageIndex;

/// Reads every page in `[start, end)` of `fd` and extracts live records.
pub fn read_range(fd: &File, start: u64, end: u64, is_deleted: impl Fn(i64) -> bool) -> Result<Vec<PageRecord>> {
	let mut out = Vec::new();
	let mut offset = start;
	while offset < end {
		let mut buf = [0u8; PAGE_SIZE];
		fd.read_exact_at(&mut buf, offset)?;
		let page = Page::from_bytes(buf);
		out.extend(page.extract(&is_deleted)?);
		offset += PAGE_SIZE as u64;
	}
	Ok(out)
}

/// Two-source ascending merge of already-sorted record lists, exposing
/// whether the stream is currently "inside" a run of same-short-hash
/// records so the packer can avoid splitting such a run across two pages.
pub struct Merger {
	a: std::vec::IntoIter<PageRecord>,
	b: std::vec::IntoIter<PageRecord>,
	peek_a: Option<PageRecord>,
	peek_b: Option<PageRecord>,
	last_produced_hash: Option<u64>,
}

impl Merger {
	pub fn new(a: Vec<PageRecord>, b: Vec<PageRecord>) -> Self {
		let mut a = a.into_iter();
		let mut b = b.into_iter();
		let peek_a = a.next();
		let peek_b = b.next();
		Merger { a, b, peek_a, peek_b, last_produced_hash: None }
	}

	pub fn produce(&mut self) -> Option<PageRecord> {
		let take_a = match (&self.peek_a, &self.peek_b) {
			(Some(x), Some(y)) => x.short_hash <= y.short_hash,
			(Some(_), None) => true,
			(None, Some(_)) => false,
			(None, None) => return None,
		};
		let record = if take_a {
			let next = self.a.next();
			std::mem::replace(&mut self.peek_a, next)
		} else {
			let next = self.b.next();
			std::mem::replace(&mut self.peek_b, next)
		};
		if let Some(r) = &record {
			self.last_produced_hash = Some(r.short_hash);
		}
		record
	}

	/// True iff the next record (if any) shares the short hash of the
	/// record just produced.
	pub fn in_middle_of_same_key(&self) -> bool {
		let next_hash = match (&self.peek_a, &self.peek_b) {
			(Some(x), Some(y)) => Some(x.short_hash.min(y.short_hash)),
			(Some(x), None) => Some(x.short_hash),
			(None, Some(y)) => Some(y.short_hash),
			(None, None) => None,
		};
		matches!((self.last_produced_hash, next_hash), (Some(a), Some(b)) if a == b)
	}
}

/// Packs a merged record stream into 4096-byte pages, writing each full
/// page sequentially to `out` and recording the first key of every page in
/// a growing page index.
pub struct Packer<'a> {
	out: &'a mut File,
	pending: Vec<PageRecord>,
	pending_size: usize,
	page_index: PageIndex,
	pages_written: u64,
}

impl<'a> Packer<'a> {
	pub fn new(out: &'a mut File) -> Self {
		Packer { out, pending: Vec::new(), pending_size: 0, page_index: PageIndex::new(), pages_written: 0 }
	}

	pub fn can_consume(&self, rec: &PageRecord) -> bool {
		self.pending_size + rec.packed_size() <= PAGE_SIZE
	}

	pub fn consume(&mut self, rec: PageRecord) -> Result<()> {
		debug_assert!(self.can_consume(&rec));
		self.pending_size += rec.packed_size();
		self.pending.push(rec);
		Ok(())
	}

	/// Writes out the in-progress page, if any. Idempotent.
	pub fn flush(&mut self) -> Result<()> {
		if self.pending.is_empty() {
			return Ok(());
		}
		let first_key = self.pending[0].short_hash;
		let page = Page::fill(&self.pending)?;
		self.out.write_all(&*page.0)?;
		self.page_index.append(first_key);
		self.pages_written += 1;
		self.pending.clear();
		self.pending_size = 0;
		Ok(())
	}

	pub fn into_page_index(self) -> PageIndex {
		self.page_index
	}

	pub fn pages_written(&self) -> u64 {
		self.pages_written
	}
}

/// Lower bound on a single record's packed footprint, used by callers
/// deciding whether a filter/page can accept even the smallest record.
pub const MIN_RECORD_SIZE: usize = RECORD_OVERHEAD;

pub fn open_rw(path: &std::path::Path) -> Result<File> {
	Ok(std::fs::OpenOptions::new().create(true).read(true).write(true).open(path)?)
}

#[cfg(test)]
mod test {
	use super::*;

	fn rec(short_hash: u64, id: i64) -> PageRecord {
		PageRecord { short_hash, id, key: format!("k{}", short_hash).into_bytes(), value: b"v".to_vec() }
	}

	#[test]
	fn merger_yields_ascending_order() {
		let a = vec![rec(1, 1), rec(3, 3), rec(5, 5)];
		let b = vec![rec(2, 2), rec(4, 4)];
		let mut m = Merger::new(a, b);
		let mut out = Vec::new();
		while let Some(r) = m.produce() {
			out.push(r.short_hash);
		}
		assert_eq!(out, vec![1, 2, 3, 4, 5]);
	}

	#[test]
	fn merger_detects_same_key_run() {
		let a = vec![rec(1, 1), rec(1, 2)];
		let b = vec![rec(1, 3)];
		let mut m = Merger::new(a, b);
		m.produce().unwrap();
		assert!(m.in_middle_of_same_key());
		m.produce().unwrap();
		assert!(m.in_middle_of_same_key());
		m.produce().unwrap();
		assert!(!m.in_middle_of_same_key());
	}
}
