//! FIFO holding area for callers parked behind an in-flight refresh.

// crates.io
use tokio::sync::oneshot;
// self
use crate::{_prelude::*, auth::Credential};

/// Outcome broadcast to every waiter of one refresh cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum WaiterOutcome {
	/// The refresh succeeded; retry with this credential.
	Refreshed(Credential),
	/// The refresh failed; surface this error.
	Failed(NormalizedError),
	/// The refresh was cancelled before it finished; re-enter the protocol.
	Abandoned,
}

#[derive(Debug, Default)]
struct QueueState {
	next_id: u64,
	waiters: VecDeque<(u64, oneshot::Sender<WaiterOutcome>)>,
}

/// Queue of parked callers released together once a refresh cycle completes.
///
/// Every enqueued [`Waiter`] is released at most once, in insertion order; a waiter that is
/// dropped first removes itself and is never released.
#[derive(Clone, Debug, Default)]
pub struct RequestQueue {
	state: Arc<Mutex<QueueState>>,
}
impl RequestQueue {
	/// Creates an empty queue.
	pub fn new() -> Self {
		Self::default()
	}

	/// Parks a new caller at the back of the queue.
	pub fn enqueue(&self) -> Waiter {
		let (tx, rx) = oneshot::channel();
		let mut state = self.state.lock();
		let id = state.next_id;

		state.next_id += 1;
		state.waiters.push_back((id, tx));

		Waiter { id, rx: Some(rx), queue: Arc::downgrade(&self.state) }
	}

	/// Releases every parked caller with `outcome`, front to back, and returns how many were
	/// still listening.
	pub fn release_all(&self, outcome: WaiterOutcome) -> usize {
		let drained = std::mem::take(&mut self.state.lock().waiters);
		let mut released = 0;

		for (_, tx) in drained {
			if tx.send(outcome.clone()).is_ok() {
				released += 1;
			}
		}

		released
	}

	/// Number of parked callers.
	pub fn len(&self) -> usize {
		self.state.lock().waiters.len()
	}

	/// Returns `true` when nobody is parked.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// One parked caller.
#[derive(Debug)]
pub struct Waiter {
	id: u64,
	rx: Option<oneshot::Receiver<WaiterOutcome>>,
	queue: std::sync::Weak<Mutex<QueueState>>,
}
impl Waiter {
	/// Suspends until the queue releases this waiter.
	///
	/// A queue that disappears without releasing resolves as [`WaiterOutcome::Abandoned`].
	pub async fn wait(mut self) -> WaiterOutcome {
		match self.rx.take() {
			Some(rx) => rx.await.unwrap_or(WaiterOutcome::Abandoned),
			None => WaiterOutcome::Abandoned,
		}
	}
}
impl Drop for Waiter {
	fn drop(&mut self) {
		if let Some(queue) = self.queue.upgrade() {
			queue.lock().waiters.retain(|(id, _)| *id != self.id);
		}
	}
}
