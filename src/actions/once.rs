use std::sync::atomic::{AtomicBool, Ordering};

/// Lets exactly one caller through, no matter how many ask.
#[derive(Debug, Default)]
pub struct FireOnce {
	fired: AtomicBool,
}

impl FireOnce {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns `true` for the first call only.
	pub fn fire(&self) -> bool {
		!self.fired.swap(true, Ordering::AcqRel)
	}

	pub fn has_fired(&self) -> bool {
		self.fired.load(Ordering::Acquire)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn test_fires_once() {
		let once = FireOnce::new();
		assert!(!once.has_fired());
		assert!(once.fire());
		assert!(!once.fire());
		assert!(once.has_fired());
	}

	#[test]
	fn test_fires_once_across_threads() {
		let once = Arc::new(FireOnce::new());
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let once = once.clone();
				std::thread::spawn(move || once.fire())
			})
			.collect();
		let fired = handles.into_iter().map(|h| h.join().unwrap()).filter(|&won| won).count();
		assert_eq!(fired, 1);
	}
}
