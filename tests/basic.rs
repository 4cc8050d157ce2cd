use tempfile::TempDir;
use vaultkv::engine::{BatchEntry, LookupResult};
use vaultkv::{Engine, Options};

fn open(dir: &TempDir) -> Engine {
	env_logger::try_init().ok();
	Engine::open(Options::new(dir.path())).unwrap()
}

fn put(engine: &Engine, key: &str, value: &str) {
	engine.update(vec![BatchEntry { key: key.as_bytes().to_vec(), value: Some(value.as_bytes().to_vec()) }]).unwrap();
}

fn delete(engine: &Engine, key: &str) {
	engine.update(vec![BatchEntry { key: key.as_bytes().to_vec(), value: None }]).unwrap();
}

fn get(engine: &Engine, key: &str) -> Option<Vec<u8>> {
	match engine.lookup(key.as_bytes()).unwrap() {
		LookupResult::Found(value, _id) => Some(value),
		LookupResult::Miss => None,
	}
}

/// Scenario 1: basic insert/lookup/delete/miss.
#[test]
fn insert_lookup_delete_miss() {
	let dir = TempDir::new().unwrap();
	let engine = open(&dir);

	put(&engine, "alpha", "1");
	put(&engine, "beta", "2");
	put(&engine, "gamma", "3");

	assert_eq!(get(&engine, "alpha").unwrap(), b"1");
	assert_eq!(get(&engine, "beta").unwrap(), b"2");
	assert_eq!(get(&engine, "gamma").unwrap(), b"3");
	assert!(get(&engine, "delta").is_none());

	delete(&engine, "beta");
	assert!(get(&engine, "beta").is_none());
	assert_eq!(get(&engine, "alpha").unwrap(), b"1");
}

/// Scenario 6: a lookup after a delete never serves a stale cached hit.
#[test]
fn cache_coherence_on_delete() {
	let dir = TempDir::new().unwrap();
	let engine = open(&dir);

	put(&engine, "cached", "v1");
	assert_eq!(get(&engine, "cached").unwrap(), b"v1");

	delete(&engine, "cached");
	assert!(get(&engine, "cached").is_none());
}

/// Ids returned for a repeatedly-overwritten key never decrease until deleted.
#[test]
fn ids_are_non_decreasing_until_deleted() {
	let dir = TempDir::new().unwrap();
	let engine = open(&dir);

	let mut last_id = -1i64;
	for v in 0..5 {
		put(&engine, "k", &v.to_string());
		if let LookupResult::Found(_, id) = engine.lookup(b"k").unwrap() {
			assert!(id >= last_id);
			last_id = id;
		} else {
			panic!("expected hit");
		}
	}
}

/// A batch can mix inserts and deletes for distinct keys in one call.
#[test]
fn mixed_batch() {
	let dir = TempDir::new().unwrap();
	let engine = open(&dir);

	put(&engine, "x", "1");
	engine
		.update(vec![
			BatchEntry { key: b"x".to_vec(), value: None },
			BatchEntry { key: b"y".to_vec(), value: Some(b"2".to_vec()) },
		])
		.unwrap();

	assert!(get(&engine, "x").is_none());
	assert_eq!(get(&engine, "y").unwrap(), b"2");
}
