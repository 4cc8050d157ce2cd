//! An embedded, single-node, hash-keyed persistent key-value store.
//!
//! Keys are routed by a 64-bit seeded hash into one of 256 rows; each row is
//! served by its own slice of the in-memory read-write vault, an optional
//! frozen read-only vault, a ring of on-disk generations, and a per-row
//! bloom-filter plane that lets a miss resolve without touching disk most of
//! the time. A background thread compacts the oldest on-disk generation
//! against the frozen vault whenever the read-write vault crosses
//! [`Options::rw_vault_compaction_threshold`].
//!
//! There is no ordered iteration and no range scan: this is a hash table,
//! not a tree.

pub mod bitarray;
pub mod bits;
pub mod bloom;
pub mod cache;
pub mod compact;
pub mod compactor;
pub mod consts;
pub mod display;
pub mod engine;
pub mod error;
pub mod hash;
pub mod meta;
pub mod options;
pub mod page;
pub mod pageindex;
pub mod rentable;
pub mod vault;
pub mod wal;

pub use engine::{BatchEntry, Engine, LookupResult};
pub use error::{Error, Result};
pub use options::Options;
