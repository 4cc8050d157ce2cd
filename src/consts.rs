//! Fixed constants from the external interface. These are not `Options`
//! fields because the on-disk layout is defined in terms of them.

pub const ROW_COUNT: usize = 256;
pub const VAULT_COUNT: usize = 256;
pub const PAGE_SIZE: usize = 4096;
pub const HASH_COUNT: usize = 8;
pub const BITS_PER_ENTRY: usize = 20;
pub const CACHE_SHARD_COUNT: usize = 1024;
pub const EVICT_TRY_DIST: usize = 10;

pub const BLOOM_INITIAL_SIZE: usize = 1 << 16;
pub const CACHE_SHARD_MAX_SIZE: usize = 256;
pub const RW_VAULT_COMPACTION_THRESHOLD: u64 = 100_000;
