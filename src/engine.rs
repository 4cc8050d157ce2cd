//! Owns every other component, routes lookups and batched updates, and
//! schedules background compaction across generation rolls.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::bitarray::BitArray;
use crate::bloom::BloomPlane;
use crate::cache::ShardedCache;
use crate::compact::open_rw;
use crate::compactor::{self, CompactionInputs, CompactionOutput};
use crate::consts::{HASH_COUNT, PAGE_SIZE, ROW_COUNT, VAULT_COUNT};
use crate::error::{Error, Result};
use crate::hash::{bloom_seeds, row_of, short_hash};
use crate::meta::Meta;
use crate::options::Options;
use crate::pageindex::PageIndex;
use crate::rentable::Rentable;
use crate::vault::{Vault, VaultEntry};
use crate::wal;

/// A single write or delete in a batch. `value = None` is a deletion.
pub struct BatchEntry {
	pub key: Vec<u8>,
	pub value: Option<Vec<u8>>,
}

pub enum LookupResult {
	Found(Vec<u8>, i64),
	Miss,
}

struct OnDiskVault {
	fd: File,
	page_index: PageIndex,
	generation: u64,
}

enum CompactionPhase {
	Running,
	Done,
}

struct CompactionCycle {
	new_vault_lsb: u8,
	new_generation: u64,
	new_path: PathBuf,
	phase: Arc<Mutex<CompactionPhase>>,
	result: Arc<Mutex<Option<Result<CompactionOutput>>>>,
	handle: Option<JoinHandle<()>>,
}

pub struct Engine {
	options: Options,
	bloom_seeds: [u64; HASH_COUNT],
	next_id: AtomicI64,
	/// Generation window of on-disk vaults currently present: valid only
	/// while `on_disk_count > 0`, and updated exclusively by
	/// `finalize_cycle` once a new on-disk vault is actually installed —
	/// never optimistically advanced while a compaction is still running.
	oldest_vault: AtomicU64,
	youngest_vault: AtomicU64,
	on_disk_count: AtomicU64,
	rw_vault: Rentable<Vault>,
	ro_vault: Rentable<Vault>,
	on_disk: Vec<Rentable<Option<OnDiskVault>>>,
	bloom_planes: Vec<Rentable<BloomPlane>>,
	deletion_bits: Arc<BitArray>,
	cache: ShardedCache,
	cycle: Mutex<Option<CompactionCycle>>,
	mvault_dir: PathBuf,
	vault_dir: PathBuf,
}

impl Engine {
	pub fn open(options: Options) -> Result<Self> {
		std::fs::create_dir_all(&options.data_dir)?;
		let mvault_dir = options.data_dir.join("mvault");
		let vault_dir = options.data_dir.join("vault");
		let del_dir = options.data_dir.join("del");
		wal::ensure_dir(&mvault_dir)?;
		wal::ensure_dir(&vault_dir)?;
		wal::ensure_dir(&del_dir)?;

		let meta = Meta::load(&options.data_dir)?;
		let bloom_seeds_arr = bloom_seeds(options.seed);

		let (youngest_vault, oldest_vault, bloom_sizes) = match &meta {
			Some(m) => (m.youngest_vault, m.oldest_vault, m.bloom_sizes.clone()),
			None => (0, 0, vec![options.bloom_initial_size; ROW_COUNT]),
		};

		let mut on_disk = Vec::with_capacity(VAULT_COUNT);
		for _ in 0..VAULT_COUNT {
			on_disk.push(Rentable::new(None));
		}
		let mut on_disk_count: u64 = 0;
		if let Some(m) = &meta {
			for gen in m.oldest_vault..=m.youngest_vault {
				let lsb = (gen & 0xff) as u8;
				let path = vault_dir.join(gen.to_string());
				if path.exists() {
					let fd = open_rw(&path)?;
					let page_index = load_page_index(&fd)?;
					on_disk[lsb as usize].replace(Some(OnDiskVault { fd, page_index, generation: gen }));
					on_disk_count += 1;
				}
			}
		}

		let bloom_planes = bloom_sizes
			.into_iter()
			.map(|size| Rentable::new(BloomPlane::new(bloom_seeds_arr, size)))
			.collect();

		let (deletion_bits, _del_gen) = BitArray::recover(&del_dir)?;
		let rw_vault = Vault::recover(&mvault_dir, youngest_vault + 1)?;
		let next_id = rw_vault.max_id().map(|m| m + 1).unwrap_or(0);

		log::info!(
			target: "vaultkv",
			"Opened store at {:?}: vaults [{}, {}], next_id {}",
			options.data_dir, oldest_vault, youngest_vault, next_id,
		);

		let cache = ShardedCache::new(options.cache_shard_max_size);

		Ok(Engine {
			bloom_seeds: bloom_seeds_arr,
			next_id: AtomicI64::new(next_id),
			oldest_vault: AtomicU64::new(oldest_vault),
			youngest_vault: AtomicU64::new(youngest_vault),
			on_disk_count: AtomicU64::new(on_disk_count),
			rw_vault: Rentable::new(rw_vault),
			ro_vault: Rentable::new(Vault::empty(0)),
			on_disk,
			bloom_planes,
			deletion_bits: Arc::new(deletion_bits),
			cache,
			cycle: Mutex::new(None),
			mvault_dir,
			vault_dir,
			options,
		})
	}

	fn is_deleted(&self, id: i64) -> bool {
		if id < 0 {
			return true;
		}
		self.deletion_bits.get(id as u64)
	}

	pub fn lookup(&self, key: &[u8]) -> Result<LookupResult> {
		let sh = short_hash(self.options.seed, key);
		if let Some(entry) = self.cache.lookup(sh, key) {
			if entry.id < 0 {
				return Ok(LookupResult::Miss);
			}
			return Ok(LookupResult::Found(entry.value, entry.id));
		}

		match self.lookup_uncached(sh, key)? {
			LookupResult::Found(value, id) => {
				self.cache.add(sh, key, id, value.clone());
				Ok(LookupResult::Found(value, id))
			}
			LookupResult::Miss => {
				self.cache.add_miss(sh, key);
				Ok(LookupResult::Miss)
			}
		}
	}

	fn lookup_uncached(&self, sh: u64, key: &[u8]) -> Result<LookupResult> {
		if let Some((value, id)) = self.rw_vault.rent(|v| v.lookup(sh, key, |id| self.is_deleted(id))) {
			return Ok(LookupResult::Found(value, id));
		}
		if let Some((value, id)) = self.ro_vault.rent(|v| v.lookup(sh, key, |id| self.is_deleted(id))) {
			return Ok(LookupResult::Found(value, id));
		}

		let row = row_of(sh) as usize;
		let mask = self.bloom_planes[row].rent(|plane| plane.get_mask(key));
		let youngest = self.youngest_vault.load(Ordering::Acquire);
		let oldest = self.oldest_vault.load(Ordering::Acquire);

		let mut generation = youngest;
		loop {
			let lsb = (generation & 0xff) as u8;
			if mask.get(lsb) {
				let found = self.on_disk[lsb as usize].rent(|slot| -> Result<Option<(Vec<u8>, i64)>> {
					match slot {
						Some(od) if od.generation == generation => page_lookup(od, sh, key, |id| self.is_deleted(id)),
						_ => Ok(None),
					}
				})?;
				if let Some((value, id)) = found {
					return Ok(LookupResult::Found(value, id));
				}
			}
			if generation == oldest {
				break;
			}
			generation -= 1;
		}
		Ok(LookupResult::Miss)
	}

	/// Applies a batch of inserts/deletes. Every WAL record for this batch
	/// is flushed before the call returns successfully.
	pub fn update(&self, batch: Vec<BatchEntry>) -> Result<()> {
		let mut to_delete: Vec<(u64, Vec<u8>, i64)> = Vec::new();
		let mut to_insert: Vec<(u64, VaultEntry)> = Vec::new();

		for entry in batch {
			let sh = short_hash(self.options.seed, &entry.key);
			match entry.value {
				None => {
					if let LookupResult::Found(_, id) = self.lookup_uncached(sh, &entry.key)? {
						to_delete.push((sh, entry.key, id));
					}
				}
				Some(value) => {
					let id = self.next_id.fetch_add(1, Ordering::Relaxed);
					to_insert.push((sh, VaultEntry { id, key: entry.key, value }));
				}
			}
		}

		for (sh, key, id) in &to_delete {
			self.deletion_bits.set(*id as u64)?;
			self.cache.invalidate(*sh, key);
		}
		for (sh, entry) in &to_insert {
			self.rw_vault.rent(|v| v.add(*sh, entry.clone()))?;
			self.cache.add(*sh, &entry.key, entry.id, entry.value.clone());
		}

		self.deletion_bits.flush()?;
		self.rw_vault.rent(|v| v.flush())?;

		self.maybe_roll_generation()?;
		self.persist_meta()?;
		Ok(())
	}

	/// Current size, in bits, of the bloom plane covering `row`.
	pub fn bloom_plane_size(&self, row: u8) -> usize {
		self.bloom_planes[row as usize].rent(|p| p.size())
	}

	/// Blocks until any in-flight compaction cycle finishes and its result is
	/// published. A no-op if no cycle is running. Exposed for callers (tests,
	/// a clean shutdown path) that need on-disk state to be fully settled
	/// rather than relying on the next `update()` to notice completion.
	pub fn wait_for_compaction(&self) -> Result<()> {
		let mut cycle_guard = self.cycle.lock();
		if let Some(cycle) = cycle_guard.take() {
			self.finalize_cycle(cycle)?;
		}
		Ok(())
	}

	fn can_start_compaction(&self) -> bool {
		let cycle = self.cycle.lock();
		let previous_done = match &*cycle {
			None => true,
			Some(c) => matches!(*c.phase.lock(), CompactionPhase::Done),
		};
		drop(cycle);
		previous_done && self.rw_vault.rent(|v| v.total_len() as u64) >= self.options.rw_vault_compaction_threshold
	}

	fn maybe_roll_generation(&self) -> Result<()> {
		if !self.can_start_compaction() {
			return Ok(());
		}

		let mut cycle_guard = self.cycle.lock();
		if let Some(cycle) = cycle_guard.take() {
			self.finalize_cycle(cycle)?;
		}

		// Freeze the current read-write vault; its own generation number
		// becomes the new on-disk vault's generation once this cycle
		// finishes compacting it. This is the only place a generation
		// number is minted, so it stays monotonic without a separate
		// counter.
		let frozen = self.rw_vault.rent_arc();
		let new_gen = frozen.generation();
		let new_lsb = (new_gen & 0xff) as u8;
		self.ro_vault.replace_arc(frozen);
		// The vault that takes over live writes for the duration of this
		// cycle also receives anything the compactor cannot place on disk
		// (`route_to_overflow`): both are ordinary `add()` calls against the
		// same WAL-backed vault, so nothing written during a cycle can be
		// lost by discarding a separate overflow vault at the end of it.
		let interim_rw = Arc::new(Vault::create(&self.mvault_dir, new_gen + 1)?);
		self.rw_vault.replace_arc(interim_rw.clone());

		for (row, plane) in self.bloom_planes.iter().enumerate() {
			let ro_row_size = self.ro_vault.rent(|v| v.row_len(row as u8) as u64);
			let doubled = plane.rent(|p| if compactor::needs_double(p, ro_row_size) { Some(p.double_sized()) } else { None });
			if let Some(doubled) = doubled {
				plane.replace(doubled);
			}
		}

		let oldest = self.oldest_vault.load(Ordering::Acquire);
		let oldest_lsb = (oldest & 0xff) as u8;
		let old_snapshot: Option<(File, PageIndex)> = self.on_disk[oldest_lsb as usize]
			.rent(|slot| slot.as_ref().map(|od| od.fd.try_clone().map(|fd| (fd, od.page_index.clone()))))
			.transpose()?;

		let new_path = self.vault_dir.join(new_gen.to_string());
		let phase = Arc::new(Mutex::new(CompactionPhase::Running));
		let result = Arc::new(Mutex::new(None));

		let bloom_plane_snapshots: Vec<Arc<BloomPlane>> = self.bloom_planes.iter().map(|p| p.rent_arc()).collect();
		let ro_vault = self.ro_vault.rent_arc();
		let overflow_for_thread = interim_rw.clone();
		let seeds = self.bloom_seeds;
		let phase_for_thread = phase.clone();
		let result_for_thread = result.clone();
		let new_path_for_thread = new_path.clone();
		let deletion_bits = self.deletion_bits.clone();

		let handle = std::thread::spawn(move || {
			let is_deleted = move |id: i64| if id < 0 { true } else { deletion_bits.get(id as u64) };
			let run = move || -> Result<CompactionOutput> {
				// `truncate` here, unlike the teacher's plain re-open: a
				// stale file can linger at this path from a cycle that
				// started this same generation number and then crashed
				// before finishing, and it must not bleed trailing garbage
				// past whatever this attempt actually writes.
				let mut new_fd =
					std::fs::OpenOptions::new().create(true).read(true).write(true).truncate(true).open(&new_path_for_thread)?;
				let empty_index = PageIndex::new();
				let (old_fd, old_page_index) = match &old_snapshot {
					Some((fd, idx)) => (Some(fd), idx),
					None => (None, &empty_index),
				};
				let mut inputs = CompactionInputs {
					old_fd,
					old_page_index,
					new_fd: &mut new_fd,
					new_vault_lsb: new_lsb,
					ro_vault: ro_vault.as_ref(),
					overflow: overflow_for_thread.as_ref(),
					bloom_planes: &bloom_plane_snapshots,
					seeds,
				};
				compactor::run(&mut inputs, &is_deleted)
			};
			let outcome = run();
			*result_for_thread.lock() = Some(outcome);
			*phase_for_thread.lock() = CompactionPhase::Done;
		});

		*cycle_guard = Some(CompactionCycle {
			new_vault_lsb: new_lsb,
			new_generation: new_gen,
			new_path,
			phase,
			result,
			handle: Some(handle),
		});

		Ok(())
	}

	fn finalize_cycle(&self, mut cycle: CompactionCycle) -> Result<()> {
		if let Some(handle) = cycle.handle.take() {
			let _ = handle.join();
		}
		let output = match cycle.result.lock().take() {
			Some(Ok(o)) => o,
			Some(Err(e)) => return Err(e),
			None => return Err(Error::Corruption("compaction cycle produced no result".into())),
		};

		let fd = open_rw(&cycle.new_path)?;
		log::info!(target: "vaultkv", "Compaction cycle for generation {} done", cycle.new_generation);
		self.on_disk[cycle.new_vault_lsb as usize]
			.replace(Some(OnDiskVault { fd, page_index: output.new_page_index, generation: cycle.new_generation }));
		self.youngest_vault.store(cycle.new_generation, Ordering::Release);

		// Only now, with the new vault actually installed, does the on-disk
		// window grow. A generation is retired (and `oldest_vault` advances)
		// only once the window would otherwise exceed `VAULT_COUNT` slots.
		let count = self.on_disk_count.fetch_add(1, Ordering::AcqRel) + 1;
		if count == 1 {
			self.oldest_vault.store(cycle.new_generation, Ordering::Release);
		} else if count > VAULT_COUNT as u64 {
			let oldest = self.oldest_vault.fetch_add(1, Ordering::AcqRel);
			let oldest_lsb = (oldest & 0xff) as u8;
			let retired_generation = self.on_disk[oldest_lsb as usize].rent(|slot| slot.as_ref().map(|od| od.generation));
			if let Some(gen) = retired_generation {
				self.on_disk[oldest_lsb as usize].replace(None);
				let _ = std::fs::remove_file(self.vault_dir.join(gen.to_string()));
			}
			self.on_disk_count.fetch_sub(1, Ordering::AcqRel);
		}

		// The frozen vault's WAL is now fully represented by the on-disk
		// vault just installed; its log file would otherwise be replayed
		// forever on every future recovery.
		let _ = std::fs::remove_file(wal::generation_path(&self.mvault_dir, cycle.new_generation));
		Ok(())
	}

	fn persist_meta(&self) -> Result<()> {
		let bloom_sizes = self.bloom_planes.iter().map(|p| p.rent(|p| p.size())).collect();
		let meta = Meta {
			youngest_vault: self.youngest_vault.load(Ordering::Acquire),
			oldest_vault: self.oldest_vault.load(Ordering::Acquire),
			rw_vault_log_size: self.rw_vault.rent(|v| v.log_size())?,
			bloom_sizes,
		};
		meta.save(&self.options.data_dir)
	}
}

fn load_page_index(fd: &File) -> Result<PageIndex> {
	use std::os::unix::fs::FileExt;
	let len = fd.metadata()?.len();
	let pages = len / PAGE_SIZE as u64;
	let mut keys = Vec::with_capacity(pages as usize);
	for i in 0..pages {
		let mut buf = [0u8; 8];
		fd.read_exact_at(&mut buf, i * PAGE_SIZE as u64 + 8)?;
		keys.push(u64::from_le_bytes(buf));
	}
	Ok(PageIndex::from_keys(keys))
}

fn page_lookup(od: &OnDiskVault, sh: u64, key: &[u8], is_deleted: impl Fn(i64) -> bool) -> Result<Option<(Vec<u8>, i64)>> {
	use std::os::unix::fs::FileExt;
	let page_no = od.page_index.search(sh);
	if page_no < 0 {
		return Ok(None);
	}
	let mut buf = [0u8; PAGE_SIZE];
	od.fd.read_exact_at(&mut buf, page_no as u64 * PAGE_SIZE as u64)?;
	let page = crate::page::Page::from_bytes(buf);
	page.lookup(sh, key, is_deleted)
}
