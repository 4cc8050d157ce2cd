//! Per-generation compaction: merges the oldest on-disk vault with the
//! frozen read-only in-memory vault, row by row, into a fresh on-disk
//! vault. Records that cannot be placed because a row's bloom filter has
//! saturated are spilled into a fresh "overflow" in-memory vault instead.

use std::fs::File;
use std::sync::Arc;

use crate::bloom::{BloomPlane, SingleBloom};
use crate::compact::{read_range, Merger, Packer};
use crate::consts::{BITS_PER_ENTRY, PAGE_SIZE};
use crate::error::Result;
use crate::page::PageRecord;
use crate::pageindex::PageIndex;
use crate::vault::{Vault, VaultEntry};

pub struct CompactionInputs<'a> {
	/// `None` when no on-disk vault exists yet (the very first compaction
	/// cycle has nothing old to merge against).
	pub old_fd: Option<&'a File>,
	pub old_page_index: &'a PageIndex,
	pub new_fd: &'a mut File,
	pub new_vault_lsb: u8,
	pub ro_vault: &'a Vault,
	pub overflow: &'a Vault,
	pub bloom_planes: &'a [Arc<BloomPlane>],
	pub seeds: [u64; crate::consts::HASH_COUNT],
}

pub struct CompactionOutput {
	pub new_page_index: PageIndex,
}

fn row_start_key(row: u8) -> u64 {
	(row as u64) << 56
}

fn row_end_key(row: u8) -> u64 {
	if row == 255 {
		u64::MAX
	} else {
		row_start_key(row + 1) - 1
	}
}

/// Runs one full compaction cycle over all 256 rows.
pub fn run(inputs: &mut CompactionInputs, is_deleted: &dyn Fn(i64) -> bool) -> Result<CompactionOutput> {
	let mut global_index = PageIndex::new();

	for row in 0..=255u8 {
		let start_i = inputs.old_page_index.search(row_start_key(row));
		let end_i = inputs.old_page_index.search(row_end_key(row));
		let old_records = match (end_i, inputs.old_fd) {
			(i, Some(fd)) if i >= 0 => {
				let start_page = if start_i < 0 { 0u64 } else { start_i as u64 };
				let start_off = start_page * PAGE_SIZE as u64;
				let end_off = (i as u64 + 1) * PAGE_SIZE as u64;
				read_range(fd, start_off, end_off, is_deleted)?
			}
			_ => Vec::new(),
		};

		if old_records.is_empty() && inputs.ro_vault.row_len(row) == 0 {
			continue;
		}

		// The engine is expected to have already published a doubled plane
		// via `needs_double` before calling `run`, so `plane.size()` here
		// reflects whatever capacity this row will compact into.
		let plane = &inputs.bloom_planes[row as usize];
		let mut single = SingleBloom::new(inputs.seeds, plane.size());

		let ro_records: Vec<PageRecord> = inputs
			.ro_vault
			.row_records(row, is_deleted)
			.into_iter()
			.map(|(short_hash, e)| PageRecord { short_hash, id: e.id, key: e.key, value: e.value })
			.collect();

		let mut merger = Merger::new(old_records, ro_records);
		let mut packer = Packer::new(inputs.new_fd);
		let mut packed_count: u64 = 0;
		let mut full = false;

		while let Some(rec) = merger.produce() {
			if full {
				route_to_overflow(inputs.overflow, &rec)?;
				continue;
			}
			if !packer.can_consume(&rec) {
				packer.flush()?;
				// Same-key runs cannot be split across a page boundary:
				// anything still tied to the record we just flushed on
				// goes to overflow instead of starting a fresh page mid-run.
				if merger.in_middle_of_same_key() {
					route_to_overflow(inputs.overflow, &rec)?;
					while merger.in_middle_of_same_key() {
						if let Some(spill) = merger.produce() {
							route_to_overflow(inputs.overflow, &spill)?;
						}
					}
					continue;
				}
			}
			single.add(&rec.key);
			packed_count += 1;
			packer.consume(rec)?;

			if (plane.size() as u64) < (BITS_PER_ENTRY as u64) * packed_count {
				full = true;
				packer.flush()?;
			}
		}
		packer.flush()?;
		let row_index = packer.into_page_index();
		for i in 0..row_index.len() {
			global_index.append(row_index.get(i));
		}

		plane.assign_at(inputs.new_vault_lsb, &single)?;
	}

	Ok(CompactionOutput { new_page_index: global_index })
}

fn route_to_overflow(overflow: &Vault, rec: &PageRecord) -> Result<()> {
	overflow.add(rec.short_hash, VaultEntry { id: rec.id, key: rec.key.clone(), value: rec.value.clone() })
}

/// Convenience used by the engine to decide, ahead of a cycle, whether any
/// row's plane needs doubling before compaction starts (doubling must
/// happen through the engine's rentable pointer, not inside `run`).
pub fn needs_double(plane: &BloomPlane, ro_row_size: u64) -> bool {
	(plane.size() as u64) < 2 * BITS_PER_ENTRY as u64 * ro_row_size.max(1)
}
