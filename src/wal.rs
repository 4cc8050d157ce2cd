//! Shared plumbing for the generation-numbered write-ahead log directories
//! (`mvault/`, `del/`). Each directory holds one file per generation, named
//! by its decimal generation number; recovery enumerates, sorts, and replays
//! them in ascending order.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub fn ensure_dir(dir: &Path) -> Result<()> {
	fs::create_dir_all(dir)?;
	Ok(())
}

/// Enumerate a log directory's generation files, skipping any entry whose
/// name does not parse as a non-negative integer (logged and ignored rather
/// than treated as fatal, per the recovery rule for malformed filenames).
pub fn list_generations(dir: &Path) -> Result<Vec<u64>> {
	let mut gens = Vec::new();
	if !dir.exists() {
		return Ok(gens);
	}
	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		let name = entry.file_name();
		let name = match name.to_str() {
			Some(n) => n,
			None => continue,
		};
		match name.parse::<u64>() {
			Ok(g) => gens.push(g),
			Err(_) => {
				log::warn!(target: "vaultkv", "Skipping unrecognised log file name {:?}", name);
			}
		}
	}
	gens.sort_unstable();
	Ok(gens)
}

pub fn generation_path(dir: &Path, generation: u64) -> PathBuf {
	dir.join(generation.to_string())
}

pub fn open_append(dir: &Path, generation: u64) -> Result<File> {
	ensure_dir(dir)?;
	let path = generation_path(dir, generation);
	let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
	Ok(file)
}

/// A thin append-only writer over one generation's log file. Mirrors the
/// begin/end-record discipline the value table tests exercise: callers
/// build up a record's bytes and hand them to `append` as one unit, then
/// `flush` once per batch.
pub struct WalWriter {
	file: File,
}

impl WalWriter {
	pub fn create(dir: &Path, generation: u64) -> Result<Self> {
		Ok(WalWriter { file: open_append(dir, generation)? })
	}

	pub fn append(&mut self, record: &[u8]) -> Result<()> {
		self.file.write_all(record)?;
		Ok(())
	}

	pub fn flush(&mut self) -> Result<()> {
		self.file.flush()?;
		self.file.sync_data()?;
		Ok(())
	}

	pub fn len(&self) -> Result<u64> {
		Ok(self.file.metadata()?.len())
	}
}

/// Physically truncates a log file to `len` bytes, so a reopened append
/// writer resumes right after the last complete record rather than behind a
/// garbage tail left by a crash mid-write.
pub fn truncate_file(path: &Path, len: u64) -> Result<()> {
	let file = OpenOptions::new().write(true).open(path)?;
	file.set_len(len)?;
	Ok(())
}

/// Read an entire generation file's bytes, truncating a trailing partial
/// record so that only whole `record_size`-byte records remain. Used by
/// readers that frame their log as fixed-size records (the deletion log).
/// Also truncates the file on disk to that boundary, since the same
/// generation's file may be reopened for append right after recovery.
pub fn read_truncated(path: &Path, record_size: usize) -> Result<Vec<u8>> {
	let mut bytes = fs::read(path)?;
	let whole = (bytes.len() / record_size) * record_size;
	if whole != bytes.len() {
		log::warn!(
			target: "vaultkv",
			"Truncating partial record at tail of {:?} ({} of {} bytes kept)",
			path, whole, bytes.len(),
		);
		bytes.truncate(whole);
		truncate_file(path, whole as u64)?;
	}
	Ok(bytes)
}
