//! `meta.txt`: a small line-oriented file recording the generation
//! window and the read-write vault's WAL size, plus one bloom-plane size
//! per row.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::consts::ROW_COUNT;
use crate::error::{Error, Result};

pub struct Meta {
	pub youngest_vault: u64,
	pub oldest_vault: u64,
	pub rw_vault_log_size: u64,
	pub bloom_sizes: Vec<usize>,
}

impl Meta {
	pub fn fresh(bloom_initial_size: usize) -> Self {
		Meta {
			youngest_vault: 0,
			oldest_vault: 0,
			rw_vault_log_size: 0,
			bloom_sizes: vec![bloom_initial_size; ROW_COUNT],
		}
	}

	pub fn path(data_dir: &Path) -> std::path::PathBuf {
		data_dir.join("meta.txt")
	}

	pub fn load(data_dir: &Path) -> Result<Option<Self>> {
		let path = Self::path(data_dir);
		if !path.exists() {
			return Ok(None);
		}
		let file = std::fs::File::open(&path)?;
		let reader = BufReader::new(file);
		let mut youngest_vault = None;
		let mut oldest_vault = None;
		let mut rw_vault_log_size = None;
		let mut bloom_sizes = Vec::new();
		let mut in_bloom_sizes = false;

		for line in reader.lines() {
			let line = line?;
			let line = line.trim();
			if line.is_empty() {
				continue;
			}
			if line == "bloomfilter_sizes" {
				in_bloom_sizes = true;
				continue;
			}
			if in_bloom_sizes {
				let size = line.parse::<usize>().map_err(|_| Error::Corruption(format!("bad bloom size line {:?}", line)))?;
				bloom_sizes.push(size);
				continue;
			}
			let mut parts = line.splitn(2, ' ');
			let key = parts.next().unwrap_or("");
			let value = parts.next().unwrap_or("").trim();
			match key {
				"youngest_vault" => youngest_vault = value.parse::<u64>().ok(),
				"oldest_vault" => oldest_vault = value.parse::<u64>().ok(),
				"rw_vault_log_size" => rw_vault_log_size = value.parse::<u64>().ok(),
				_ => log::warn!(target: "vaultkv", "Ignoring unrecognised meta.txt line {:?}", line),
			}
		}

		if bloom_sizes.len() != ROW_COUNT {
			return Err(Error::Corruption(format!(
				"meta.txt has {} bloom sizes, expected {}",
				bloom_sizes.len(),
				ROW_COUNT
			)));
		}

		Ok(Some(Meta {
			youngest_vault: youngest_vault.ok_or_else(|| Error::Corruption("meta.txt missing youngest_vault".into()))?,
			oldest_vault: oldest_vault.ok_or_else(|| Error::Corruption("meta.txt missing oldest_vault".into()))?,
			rw_vault_log_size: rw_vault_log_size.unwrap_or(0),
			bloom_sizes,
		}))
	}

	pub fn save(&self, data_dir: &Path) -> Result<()> {
		let path = Self::path(data_dir);
		let tmp_path = path.with_extension("txt.tmp");
		let mut file = std::fs::File::create(&tmp_path)?;
		writeln!(file, "youngest_vault {}", self.youngest_vault)?;
		writeln!(file, "oldest_vault {}", self.oldest_vault)?;
		writeln!(file, "rw_vault_log_size {}", self.rw_vault_log_size)?;
		writeln!(file, "bloomfilter_sizes")?;
		for size in &self.bloom_sizes {
			writeln!(file, "{}", size)?;
		}
		file.flush()?;
		file.sync_all()?;
		std::fs::rename(&tmp_path, &path)?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn save_then_load_roundtrip() {
		let dir = TempDir::new().unwrap();
		let mut meta = Meta::fresh(1024);
		meta.youngest_vault = 7;
		meta.oldest_vault = 2;
		meta.rw_vault_log_size = 512;
		meta.save(dir.path()).unwrap();

		let loaded = Meta::load(dir.path()).unwrap().unwrap();
		assert_eq!(loaded.youngest_vault, 7);
		assert_eq!(loaded.oldest_vault, 2);
		assert_eq!(loaded.bloom_sizes.len(), ROW_COUNT);
	}

	#[test]
	fn load_missing_file_is_none() {
		let dir = TempDir::new().unwrap();
		assert!(Meta::load(dir.path()).unwrap().is_none());
	}
}
