//! Append-only sorted vector of the first short-hash of every page in an
//! on-disk vault, segmented so the index can grow without large
//! reallocations.

const SEGMENT_LEN: usize = 16_384;

#[derive(Clone)]
pub struct PageIndex {
	segments: Vec<Vec<u64>>,
	len: usize,
}

impl PageIndex {
	pub fn new() -> Self {
		PageIndex { segments: Vec::new(), len: 0 }
	}

	pub fn from_keys(keys: Vec<u64>) -> Self {
		let mut idx = PageIndex::new();
		for k in keys {
			idx.append(k);
		}
		idx
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn append(&mut self, key: u64) {
		if self.len % SEGMENT_LEN == 0 {
			self.segments.push(Vec::with_capacity(SEGMENT_LEN));
		}
		self.segments.last_mut().unwrap().push(key);
		self.len += 1;
	}

	pub fn get(&self, i: usize) -> u64 {
		self.segments[i / SEGMENT_LEN][i % SEGMENT_LEN]
	}

	/// Largest `i` with `arr[i] <= target`, or `-1` if no such `i` exists.
	/// Narrows with an interpolation guess before falling back to plain
	/// binary search once the bracket is small.
	pub fn search(&self, target: u64) -> i64 {
		if self.len == 0 {
			return -1;
		}
		let mut lo = 0usize;
		let mut hi = self.len - 1;
		if target < self.get(lo) {
			return -1;
		}
		if target >= self.get(hi) {
			return hi as i64;
		}

		while hi - lo >= 100 {
			let lo_val = self.get(lo) as f64;
			let hi_val = self.get(hi) as f64;
			if hi_val <= lo_val {
				break;
			}
			let ratio = (target as f64 - lo_val) / (hi_val - lo_val);
			let span = (hi - lo) as f64;
			let probe_low = lo + ((ratio * 0.85 * span) as usize);
			let probe_high = lo + ((ratio * 1.15 * span) as usize).min(hi - lo);
			let probe_low = probe_low.clamp(lo, hi);
			let probe_high = probe_high.clamp(probe_low, hi);

			let v_low = self.get(probe_low);
			if v_low == target {
				return probe_low as i64;
			}
			let v_high = self.get(probe_high);
			if v_high == target {
				return probe_high as i64;
			}

			if v_low > target {
				hi = probe_low.saturating_sub(1).max(lo);
			} else if v_high < target {
				lo = probe_high;
			} else {
				lo = probe_low;
				hi = probe_high;
			}
			if hi <= lo {
				break;
			}
		}

		// Binary search fallback / final narrowing: largest i with arr[i] <= target.
		let (mut lo, mut hi) = (lo, hi);
		while lo < hi {
			let mid = lo + (hi - lo + 1) / 2;
			if self.get(mid) <= target {
				lo = mid;
			} else {
				hi = mid - 1;
			}
		}
		lo as i64
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn built(values: &[u64]) -> PageIndex {
		PageIndex::from_keys(values.to_vec())
	}

	#[test]
	fn search_below_range_is_miss() {
		let idx = built(&[10, 20, 30]);
		assert_eq!(idx.search(5), -1);
	}

	#[test]
	fn search_exact_and_between() {
		let idx = built(&[10, 20, 30, 40]);
		assert_eq!(idx.search(20), 1);
		assert_eq!(idx.search(25), 1);
		assert_eq!(idx.search(40), 3);
		assert_eq!(idx.search(1000), 3);
	}

	#[test]
	fn search_large_array_matches_linear_scan() {
		let values: Vec<u64> = (0..50_000u64).map(|i| i * 3).collect();
		let idx = built(&values);
		for target in [0u64, 1, 4, 149_997, 149_998, 150_000, 77_777] {
			let expected = values.iter().rposition(|v| *v <= target).map(|i| i as i64).unwrap_or(-1);
			assert_eq!(idx.search(target), expected, "target={}", target);
		}
	}
}
