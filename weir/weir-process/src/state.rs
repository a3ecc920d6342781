use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

/// A set-once observable value cell.
///
/// Writers call [StateCell::set]; readers either poll with [StateCell::get]
/// or block on [StateCell::wait]. Clones share the same cell.
#[derive(Clone)]
pub struct StateCell<T: Clone + Send + Sync + 'static> {
	inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
	value: RwLock<Option<T>>,
	notify: Notify,
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> {
	pub fn new() -> Self {
		Self { inner: Arc::new(CellInner { value: RwLock::new(None), notify: Notify::new() }) }
	}

	/// Stores a value and wakes every pending waiter.
	pub fn set(&self, value: T) {
		let mut lock = self.inner.value.write().expect("state lock poisoned");
		*lock = Some(value);
		drop(lock);
		self.inner.notify.notify_waiters();
	}

	/// Returns a clone of the value if it has been set.
	pub fn get(&self) -> Option<T> {
		self.inner.value.read().expect("state lock poisoned").clone()
	}

	pub fn is_set(&self) -> bool {
		self.inner.value.read().expect("state lock poisoned").is_some()
	}

	/// Blocks until the value is set and returns it.
	pub async fn wait(&self) -> T {
		loop {
			if let Some(value) = self.get() {
				return value;
			}

			let notified = self.inner.notify.notified();

			// Double-check between registering and awaiting, a set may
			// have landed in the gap.
			if let Some(value) = self.get() {
				return value;
			}

			notified.await;
		}
	}
}

impl<T: Clone + Send + Sync + 'static> Default for StateCell<T> {
	fn default() -> Self {
		Self::new()
	}
}
