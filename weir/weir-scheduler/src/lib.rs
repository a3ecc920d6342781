use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Notify;
use tracing::warn;

/// The error type observer tasks are allowed to fail with.
///
/// The scheduler does not interpret failures, it only logs them. Callers that
/// care about a task's outcome should communicate it through their own channel.
pub type TaskFailure = Box<dyn std::error::Error + Send + Sync>;

/// A unique identifier for scheduled tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

struct Inner {
	live: Mutex<HashSet<TaskId>>,
	notify: Notify,
	next_id: AtomicU64,
}

impl Inner {
	fn complete(&self, id: TaskId) {
		let mut live = self.live.lock().expect("scheduler lock poisoned");
		live.remove(&id);
		if live.is_empty() {
			self.notify.notify_waiters();
		}
	}
}

/// A registry of concurrently running observer tasks.
///
/// Tasks are registered before they are spawned and unregister themselves on
/// completion, so [Scheduler::wait] is a wait-group join rather than a poll
/// loop. Clones share the same registry.
#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<Inner>,
}

impl Scheduler {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				live: Mutex::new(HashSet::new()),
				notify: Notify::new(),
				next_id: AtomicU64::new(0),
			}),
		}
	}

	/// Spawns a task onto the tokio runtime and tracks it until completion.
	///
	/// Must be called from within a tokio runtime. A task that returns an
	/// error is logged and otherwise dropped; it does not affect siblings.
	pub fn spawn<F>(&self, future: F) -> TaskId
	where
		F: Future<Output = Result<(), TaskFailure>> + Send + 'static,
	{
		let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
		self.inner.live.lock().expect("scheduler lock poisoned").insert(id);

		let inner = self.inner.clone();
		tokio::spawn(async move {
			if let Err(e) = future.await {
				warn!(task = id.0, error = %e, "scheduled task failed");
			}
			inner.complete(id);
		});

		id
	}

	/// Returns the number of tasks that have been spawned but not yet finished.
	pub fn live_tasks(&self) -> usize {
		self.inner.live.lock().expect("scheduler lock poisoned").len()
	}

	/// Blocks until every task spawned so far has finished.
	///
	/// Tasks submitted while a wait is in progress extend the wait. There is
	/// no timeout; a task that never finishes blocks the join indefinitely.
	pub async fn wait(&self) {
		loop {
			if self.live_tasks() == 0 {
				return;
			}
			let notified = self.inner.notify.notified();
			if self.live_tasks() == 0 {
				return;
			}
			notified.await;
		}
	}
}

impl Default for Scheduler {
	fn default() -> Self {
		Self::new()
	}
}

/// Returns the process-wide default scheduler.
pub fn global() -> &'static Scheduler {
	static GLOBAL: OnceLock<Scheduler> = OnceLock::new();
	GLOBAL.get_or_init(Scheduler::new)
}

/// Joins every task spawned on the global scheduler so far.
pub async fn wait() {
	global().wait().await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;
	use tokio::time::{sleep, Duration};

	#[tokio::test]
	async fn test_wait_joins_all_tasks() -> Result<(), anyhow::Error> {
		let scheduler = Scheduler::new();
		let counter = Arc::new(AtomicUsize::new(0));

		for i in 0..8 {
			let counter = counter.clone();
			scheduler.spawn(async move {
				sleep(Duration::from_millis(10 * i)).await;
				counter.fetch_add(1, Ordering::SeqCst);
				Ok(())
			});
		}

		scheduler.wait().await;

		assert_eq!(counter.load(Ordering::SeqCst), 8);
		assert_eq!(scheduler.live_tasks(), 0);
		Ok(())
	}

	#[tokio::test]
	async fn test_wait_returns_immediately_when_empty() {
		let scheduler = Scheduler::new();
		scheduler.wait().await;
		assert_eq!(scheduler.live_tasks(), 0);
	}

	#[tokio::test]
	async fn test_failed_task_does_not_wedge_the_join() -> Result<(), anyhow::Error> {
		let scheduler = Scheduler::new();

		scheduler.spawn(async move { Err("task went sideways".into()) });
		scheduler.spawn(async move {
			sleep(Duration::from_millis(20)).await;
			Ok(())
		});

		scheduler.wait().await;

		assert_eq!(scheduler.live_tasks(), 0);
		Ok(())
	}

	#[tokio::test]
	async fn test_tasks_submitted_during_wait_extend_it() -> Result<(), anyhow::Error> {
		let scheduler = Scheduler::new();
		let done = Arc::new(AtomicUsize::new(0));

		let inner_done = done.clone();
		let inner_scheduler = scheduler.clone();
		scheduler.spawn(async move {
			sleep(Duration::from_millis(10)).await;
			inner_scheduler.spawn(async move {
				sleep(Duration::from_millis(10)).await;
				inner_done.fetch_add(1, Ordering::SeqCst);
				Ok(())
			});
			Ok(())
		});

		scheduler.wait().await;

		assert_eq!(done.load(Ordering::SeqCst), 1);
		assert_eq!(scheduler.live_tasks(), 0);
		Ok(())
	}

	#[tokio::test]
	async fn test_global_scheduler_join() {
		global().spawn(async move { Ok(()) });
		wait().await;
		assert_eq!(global().live_tasks(), 0);
	}
}
