use tempfile::TempDir;
use vaultkv::engine::{BatchEntry, LookupResult};
use vaultkv::{Engine, Options};

fn small_threshold_options(dir: &TempDir) -> Options {
	let mut options = Options::new(dir.path());
	options.rw_vault_compaction_threshold = 8;
	options
}

fn put(engine: &Engine, key: &str, value: &str) {
	engine.update(vec![BatchEntry { key: key.as_bytes().to_vec(), value: Some(value.as_bytes().to_vec()) }]).unwrap();
}

fn get(engine: &Engine, key: &str) -> Option<Vec<u8>> {
	match engine.lookup(key.as_bytes()).unwrap() {
		LookupResult::Found(value, _id) => Some(value),
		LookupResult::Miss => None,
	}
}

/// Scenario 2 (scaled down): many rotations, correctness survives all of them,
/// deletes remain effective across compaction cycles.
#[test]
fn many_rotations_preserve_correctness() {
	let dir = TempDir::new().unwrap();
	env_logger::try_init().ok();
	let engine = Engine::open(small_threshold_options(&dir)).unwrap();

	let keys: Vec<String> = (0..400).map(|i| format!("k{}", i)).collect();
	for (i, key) in keys.iter().enumerate() {
		put(&engine, key, &i.to_string());
	}
	engine.wait_for_compaction().unwrap();

	for (i, key) in keys.iter().enumerate() {
		assert_eq!(get(&engine, key).unwrap(), i.to_string().into_bytes(), "key {}", key);
	}

	for key in keys.iter().take(40) {
		engine.update(vec![BatchEntry { key: key.as_bytes().to_vec(), value: None }]).unwrap();
	}
	engine.wait_for_compaction().unwrap();

	for key in keys.iter().take(40) {
		assert!(get(&engine, key).is_none(), "expected {} deleted", key);
	}
	for (i, key) in keys.iter().enumerate().skip(40) {
		assert_eq!(get(&engine, key).unwrap(), i.to_string().into_bytes(), "key {}", key);
	}
}

/// Scenario 3: a row's bloom plane doubles once enough live entries land in
/// it, and membership survives the doubling.
#[test]
fn bloom_plane_grows_under_load() {
	let dir = TempDir::new().unwrap();
	env_logger::try_init().ok();
	let mut options = small_threshold_options(&dir);
	options.bloom_initial_size = 64;
	let engine = Engine::open(options).unwrap();

	let keys: Vec<String> = (0..200).map(|i| format!("bloomkey{}", i)).collect();
	for (i, key) in keys.iter().enumerate() {
		put(&engine, key, &i.to_string());
	}
	engine.wait_for_compaction().unwrap();

	let grew = (0u8..=255).any(|row| engine.bloom_plane_size(row) > 64);
	assert!(grew, "expected at least one row's bloom plane to have doubled");

	for (i, key) in keys.iter().enumerate() {
		assert_eq!(get(&engine, key).unwrap(), i.to_string().into_bytes());
	}
}

/// Scenario 5 (simplified): dropping the engine mid-cycle (without waiting
/// for compaction to finish) and reopening must not lose or corrupt any
/// previously-acknowledged write, and the half-finished on-disk vault must
/// not be picked up since it was never recorded in `meta.txt`.
#[test]
fn recovers_after_drop_mid_cycle() {
	let dir = TempDir::new().unwrap();
	env_logger::try_init().ok();
	{
		let engine = Engine::open(small_threshold_options(&dir)).unwrap();
		for i in 0..40 {
			put(&engine, &format!("r{}", i), &i.to_string());
		}
		// Intentionally dropped without `wait_for_compaction`: any cycle
		// `update` just kicked off is left running in its detached thread.
	}

	let engine = Engine::open(small_threshold_options(&dir)).unwrap();
	for i in 0..40 {
		assert_eq!(get(&engine, &format!("r{}", i)).unwrap(), i.to_string().into_bytes());
	}
}
