//! Single-flight credential refresh with waiter coordination and sign-out signalling.
//!
//! [`AuthTokenManager::refresh`] is called by every request that received a `401`. The first
//! caller to find the manager idle becomes the leader and performs the one refresh call; callers
//! arriving while it runs park a [`Waiter`](crate::auth::Waiter) in the [`RequestQueue`] and are
//! released together with the leader's outcome. A failed refresh clears the stored credential
//! and fires the unauthorized handler exactly once. Sign-in and sign-out start a new session; a
//! refresh that finishes after the session changed is discarded instead of persisted.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use tokio::sync::Mutex as AsyncMutex;
// self
use crate::{
	_prelude::*,
	auth::{Credential, RequestQueue, TokenRefresher, WaiterOutcome},
	obs,
	store::TokenStore,
};

/// Callback invoked once per failed refresh (sign-out plus redirect in the embedding UI).
pub type UnauthorizedHandler = Arc<dyn Fn(&NormalizedError) + Send + Sync>;

/// Refresh protocol state; exactly one per manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshState {
	/// No refresh call is outstanding.
	Idle,
	/// A leader is performing the refresh call.
	Refreshing,
}

#[derive(Debug)]
struct Shared {
	state: RefreshState,
	/// Credential produced by the last successful refresh or sign-in.
	latest: Option<Credential>,
	/// Credential whose refresh failed; callers still holding it fail without a new call.
	rejected: Option<Credential>,
	/// Bumped by every sign-in and sign-out.
	session: u64,
	signed_out: bool,
}

/// Owns the stored credential and the single-flight refresh protocol.
pub struct AuthTokenManager {
	store: Arc<dyn TokenStore>,
	refresher: RwLock<Arc<dyn TokenRefresher>>,
	unauthorized: RwLock<Option<UnauthorizedHandler>>,
	shared: Mutex<Shared>,
	/// Serializes store writes against session changes.
	writes: AsyncMutex<()>,
	queue: RequestQueue,
	metrics: Arc<RefreshMetrics>,
}
impl AuthTokenManager {
	/// Creates an idle manager over `store`, refreshing through `refresher`.
	pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
		Self {
			store,
			refresher: RwLock::new(refresher),
			unauthorized: RwLock::new(None),
			shared: Mutex::new(Shared {
				state: RefreshState::Idle,
				latest: None,
				rejected: None,
				session: 0,
				signed_out: false,
			}),
			writes: AsyncMutex::new(()),
			queue: RequestQueue::new(),
			metrics: Default::default(),
		}
	}

	/// Registers the unauthorized handler.
	pub fn with_unauthorized_handler(self, handler: UnauthorizedHandler) -> Self {
		self.set_unauthorized_handler(handler);

		self
	}

	/// Replaces the unauthorized handler.
	pub fn set_unauthorized_handler(&self, handler: UnauthorizedHandler) {
		*self.unauthorized.write() = Some(handler);
	}

	/// Replaces the refresh call used by future refresh cycles.
	pub fn set_refresher(&self, refresher: Arc<dyn TokenRefresher>) {
		*self.refresher.write() = refresher;
	}

	/// Current protocol state.
	pub fn state(&self) -> RefreshState {
		self.shared.lock().state
	}

	/// Number of callers parked behind the in-flight refresh.
	pub fn waiting(&self) -> usize {
		self.queue.len()
	}

	/// Refresh counters shared with the caller.
	pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
		self.metrics.clone()
	}

	/// Backing credential store.
	pub fn store(&self) -> &Arc<dyn TokenStore> {
		&self.store
	}

	/// Reads the stored credential.
	pub async fn current(&self) -> Result<Option<Credential>> {
		Ok(self.store.get().await?)
	}

	/// Stores a freshly issued credential and forgets any earlier refresh failure.
	///
	/// A refresh still in flight is discarded; its callers receive `credential` instead.
	pub async fn sign_in(&self, credential: Credential) -> Result<()> {
		let _writes = self.writes.lock().await;

		self.store.set(credential.clone()).await?;

		let mut shared = self.shared.lock();

		shared.session += 1;
		shared.latest = Some(credential);
		shared.rejected = None;
		shared.signed_out = false;

		Ok(())
	}

	/// Clears the stored credential.
	///
	/// Until the next [`sign_in`](Self::sign_in), a `401` fails with the signed-out error instead
	/// of refreshing, and a refresh still in flight is discarded.
	pub async fn sign_out(&self) -> Result<()> {
		let _writes = self.writes.lock().await;

		{
			let mut shared = self.shared.lock();

			shared.session += 1;
			shared.latest = None;
			shared.rejected = None;
			shared.signed_out = true;
		}

		self.store.clear().await?;

		Ok(())
	}

	/// Obtains a credential to replace `stale`, the credential the API just rejected.
	///
	/// Concurrent callers share one refresh call. A caller whose `stale` credential was already
	/// replaced by a finished refresh receives the replacement without a new call; one whose
	/// credential was already rejected by a failed refresh fails with the session-expired error.
	/// After [`sign_out`](Self::sign_out) every caller fails with the signed-out error.
	pub async fn refresh(&self, stale: Option<&Credential>) -> Result<Credential> {
		loop {
			let waiter = {
				let mut shared = self.shared.lock();

				match shared.state {
					RefreshState::Refreshing => self.queue.enqueue(),
					RefreshState::Idle => {
						if shared.signed_out {
							return Err(NormalizedError::signed_out());
						}
						if stale.is_some() && shared.rejected.as_ref() == stale {
							return Err(NormalizedError::session_expired());
						}
						if let Some(latest) = &shared.latest
							&& Some(latest) != stale
						{
							self.metrics.record_coalesced();

							return Ok(latest.clone());
						}

						shared.state = RefreshState::Refreshing;

						break;
					},
				}
			};

			obs::trace_refresh("waiting", self.queue.len());

			match waiter.wait().await {
				WaiterOutcome::Refreshed(credential) => {
					self.metrics.record_coalesced();

					return Ok(credential);
				},
				WaiterOutcome::Failed(err) => return Err(err),
				WaiterOutcome::Abandoned => continue,
			}
		}

		self.lead(stale).await
	}

	async fn lead(&self, stale: Option<&Credential>) -> Result<Credential> {
		let mut guard = LeaderGuard { manager: self, armed: true };
		let session = self.shared.lock().session;

		self.metrics.record_attempt();

		obs::trace_refresh("started", self.queue.len());

		let refresher = self.refresher.read().clone();
		let refreshed = refresher.refresh(stale.cloned()).await;
		let outcome = {
			let _writes = self.writes.lock().await;
			let current = self.shared.lock().session;

			if current != session {
				LeadOutcome::Superseded
			} else {
				match refreshed {
					Ok(credential) => match self.store.set(credential.clone()).await {
						Ok(()) => LeadOutcome::Refreshed(credential),
						Err(e) => self.expire(e.into()).await,
					},
					Err(e) => self.expire(e).await,
				}
			}
		};

		guard.armed = false;

		self.finish(stale, outcome)
	}

	/// Clears the store after a failed refresh; the session ends even if the clear fails.
	async fn expire(&self, cause: NormalizedError) -> LeadOutcome {
		if let Err(e) = self.store.clear().await {
			obs::trace_store_clear_failed(&e.into());
		}

		LeadOutcome::Failed(cause)
	}

	fn finish(&self, stale: Option<&Credential>, outcome: LeadOutcome) -> Result<Credential> {
		let mut shared = self.shared.lock();

		shared.state = RefreshState::Idle;

		match outcome {
			LeadOutcome::Refreshed(credential) => {
				shared.latest = Some(credential.clone());
				shared.rejected = None;

				let released = self.queue.release_all(WaiterOutcome::Refreshed(credential.clone()));

				drop(shared);
				self.metrics.record_success();

				obs::trace_refresh("succeeded", released);

				Ok(credential)
			},
			LeadOutcome::Failed(cause) => {
				let err = NormalizedError::session_expired().with_source(cause.clone());

				shared.latest = None;
				shared.rejected = stale.cloned();

				let released = self.queue.release_all(WaiterOutcome::Failed(err.clone()));

				drop(shared);
				self.metrics.record_failure();

				obs::trace_session_expired(&cause);
				obs::trace_refresh("failed", released);

				let handler = self.unauthorized.read().clone();

				if let Some(handler) = handler {
					handler(&err);
				}

				Err(err)
			},
			LeadOutcome::Superseded => {
				let (outcome, result) = match shared.latest.clone() {
					Some(credential) =>
						(WaiterOutcome::Refreshed(credential.clone()), Ok(credential)),
					None => {
						let err = NormalizedError::signed_out();

						(WaiterOutcome::Failed(err.clone()), Err(err))
					},
				};
				let released = self.queue.release_all(outcome);

				drop(shared);

				obs::trace_refresh("superseded", released);

				result
			},
		}
	}
}
impl Debug for AuthTokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthTokenManager")
			.field("state", &self.state())
			.field("waiting", &self.waiting())
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}

enum LeadOutcome {
	Refreshed(Credential),
	Failed(NormalizedError),
	/// The session changed while the refresh call was in flight.
	Superseded,
}

/// Resets the protocol when the leader's future is dropped mid-refresh.
struct LeaderGuard<'a> {
	manager: &'a AuthTokenManager,
	armed: bool,
}
impl Drop for LeaderGuard<'_> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}

		let mut shared = self.manager.shared.lock();

		shared.state = RefreshState::Idle;

		let released = self.manager.queue.release_all(WaiterOutcome::Abandoned);

		drop(shared);

		obs::trace_refresh("abandoned", released);
	}
}
