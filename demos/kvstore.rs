//! Thin user-facing wrapper over `vaultkv::Engine`: hashes caller-supplied
//! keys and groups individual calls into single-entry batches. Not part of
//! the engine's specified surface; exists so the engine can be driven from
//! a terminal or an end-to-end test without every caller re-deriving
//! `BatchEntry`/`Engine::update` boilerplate.

use vaultkv::engine::{BatchEntry, LookupResult};
use vaultkv::{Engine, Options, Result};

pub struct KvStore {
	engine: Engine,
}

impl KvStore {
	pub fn open(options: Options) -> Result<Self> {
		Ok(KvStore { engine: Engine::open(options)? })
	}

	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		match self.engine.lookup(key)? {
			LookupResult::Found(value, _id) => Ok(Some(value)),
			LookupResult::Miss => Ok(None),
		}
	}

	pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		self.engine.update(vec![BatchEntry { key: key.to_vec(), value: Some(value.to_vec()) }])
	}

	pub fn delete(&self, key: &[u8]) -> Result<()> {
		self.engine.update(vec![BatchEntry { key: key.to_vec(), value: None }])
	}

	pub fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
		let batch = entries.into_iter().map(|(key, value)| BatchEntry { key, value: Some(value) }).collect();
		self.engine.update(batch)
	}
}
