//! Single-writer, many-reader publish-replace primitive. The original
//! engine hand-rolled this with a release-flag packed into an atomic word
//! plus manual refcounting; `arc_swap::ArcSwap` gives the same "publish a
//! new value, let whoever is still holding the old one finish on their own
//! time" contract without the unsafe bookkeeping, so it stands in here.

use std::sync::Arc;

use arc_swap::ArcSwap;

pub struct Rentable<T> {
	inner: ArcSwap<T>,
}

impl<T> Rentable<T> {
	pub fn new(value: T) -> Self {
		Rentable { inner: ArcSwap::from_pointee(value) }
	}

	/// Publishes `value`, replacing whatever was rented before. Readers
	/// already holding the previous value keep it alive until they drop
	/// their guard; this call never blocks on them.
	pub fn replace(&self, value: T) {
		self.inner.store(Arc::new(value));
	}

	/// Publishes an already-boxed value directly, avoiding a clone when the
	/// caller already holds the `Arc` it wants to hand off (e.g. moving the
	/// read-write vault into the read-only slot at a generation roll).
	pub fn replace_arc(&self, value: Arc<T>) {
		self.inner.store(value);
	}

	/// Rents the current value for the duration of `f`. Concurrent with
	/// any number of other renters and with a concurrent `replace`.
	pub fn rent<R>(&self, f: impl FnOnce(&T) -> R) -> R {
		let guard = self.inner.load();
		f(&guard)
	}

	/// A cloned `Arc` to the currently published value, for callers that
	/// need to hold it across an operation longer than a single closure.
	pub fn rent_arc(&self) -> Arc<T> {
		self.inner.load_full()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Barrier;

	#[test]
	fn replace_is_visible_to_new_renters() {
		let r = Rentable::new(1u32);
		assert_eq!(r.rent(|v| *v), 1);
		r.replace(2);
		assert_eq!(r.rent(|v| *v), 2);
	}

	#[test]
	fn concurrent_rent_and_replace() {
		let r = Arc::new(Rentable::new(0u64));
		let seen_max = Arc::new(AtomicUsize::new(0));
		let barrier = Arc::new(Barrier::new(4));
		let mut handles = Vec::new();
		for i in 0..3 {
			let r = r.clone();
			let seen_max = seen_max.clone();
			let barrier = barrier.clone();
			handles.push(std::thread::spawn(move || {
				barrier.wait();
				for _ in 0..1000 {
					let v = r.rent(|v| *v);
					seen_max.fetch_max(v as usize, Ordering::Relaxed);
					let _ = i;
				}
			}));
		}
		{
			let r = r.clone();
			let barrier = barrier.clone();
			handles.push(std::thread::spawn(move || {
				barrier.wait();
				for v in 1..=1000u64 {
					r.replace(v);
				}
			}));
		}
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(r.rent(|v| *v), 1000);
	}
}
