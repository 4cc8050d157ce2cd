use std::path::PathBuf;

/// Tunables for a store. Mirrors the constructor parameters named by the
/// external interface plus the compaction threshold left open by the
/// design notes.
#[derive(Debug, Clone)]
pub struct Options {
	pub data_dir: PathBuf,
	/// Seed mixed into every short hash and, derived per-bucket, into the
	/// eight bloom hash functions.
	pub seed: u64,
	/// Initial per-row bloom plane size in bits (rounded up to a multiple of 64).
	pub bloom_initial_size: usize,
	/// Maximum live entries held by a single cache shard before eviction kicks in.
	pub cache_shard_max_size: usize,
	/// Number of freshly-inserted records in the read-write vault required
	/// before a generation roll may be triggered, once the previous
	/// compaction cycle has reported done.
	pub rw_vault_compaction_threshold: u64,
}

impl Options {
	pub fn new(data_dir: impl Into<PathBuf>) -> Self {
		Options {
			data_dir: data_dir.into(),
			seed: 0,
			bloom_initial_size: crate::consts::BLOOM_INITIAL_SIZE,
			cache_shard_max_size: crate::consts::CACHE_SHARD_MAX_SIZE,
			rw_vault_compaction_threshold: crate::consts::RW_VAULT_COMPACTION_THRESHOLD,
		}
	}
}

impl Default for Options {
	fn default() -> Self {
		Options::new("vaultkv_data")
	}
}
