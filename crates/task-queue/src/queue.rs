use std::{
	future::Future,
	pin::Pin,
	sync::{
		atomic::{AtomicU64, AtomicUsize, Ordering},
		Arc, Mutex, PoisonError,
	},
	task::{Context, Poll},
};

use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{error, trace};

use super::Error;

#[derive(Debug, Default)]
pub struct TaskQueue {
	/// Settles when the most recently enqueued task does.
	tail: Mutex<Option<oneshot::Receiver<()>>>,
	pending: Arc<AtomicUsize>,
	enqueued: AtomicU64,
}

impl TaskQueue {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Spawns `task` to run once every task enqueued before it has settled. The task runs to
	/// completion whether or not the returned handle is awaited.
	///
	/// # Panics
	///
	/// Panics if called outside of a tokio runtime.
	pub fn enqueue<F>(&self, task: F) -> TaskHandle<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		let (done_tx, done_rx) = oneshot::channel::<()>();

		let previous = self
			.tail
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.replace(done_rx);

		let position = self.enqueued.fetch_add(1, Ordering::Relaxed);
		let waiting = self.pending.fetch_add(1, Ordering::AcqRel);
		trace!(%position, %waiting, "Task enqueued");

		let pending = PendingGuard(Arc::clone(&self.pending));

		let handle = tokio::spawn(async move {
			// Dropped when this task settles, even by panicking, which releases the next task
			let _done_tx = done_tx;
			let _pending = pending;

			if let Some(previous) = previous {
				// A receive error means the previous task panicked, it has settled all the same
				let _ = previous.await;
			}

			trace!(%position, "Task started");
			task.await
		});

		TaskHandle { position, handle }
	}

	/// Number of tasks that were enqueued and have not settled yet.
	#[must_use]
	pub fn len(&self) -> usize {
		self.pending.load(Ordering::Acquire)
	}

	#[must_use]
	pub fn is_idle(&self) -> bool {
		self.len() == 0
	}
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::AcqRel);
	}
}

/// Resolves to the output of a task enqueued on a [`TaskQueue`].
///
/// Dropping the handle detaches the task, it keeps its place in the queue.
#[derive(Debug)]
pub struct TaskHandle<T> {
	position: u64,
	handle: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
	/// Position of the task among every task its queue has ever received.
	#[must_use]
	pub const fn position(&self) -> u64 {
		self.position
	}
}

impl<T> Future for TaskHandle<T> {
	type Output = Result<T, Error>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let position = self.position;

		Pin::new(&mut self.handle).poll(cx).map(|res| {
			res.map_err(|e| {
				if e.is_panic() {
					error!(%position, "Queued task panicked");
					Error::TaskPanicked(position)
				} else {
					Error::TaskCancelled(position)
				}
			})
		})
	}
}
