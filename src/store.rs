//! Persistence boundary for the current credential plus built-in store implementations.

pub mod file;
pub mod memory;

pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;

// self
use crate::{_prelude::*, auth::Credential};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Single-slot storage for the active credential.
///
/// Each call must be atomic with respect to the slot; the
/// [`AuthTokenManager`](crate::auth::AuthTokenManager) serializes writers.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Reads the stored credential, if any.
	fn get(&self) -> StoreFuture<'_, Option<Credential>>;

	/// Replaces the stored credential.
	fn set(&self, credential: Credential) -> StoreFuture<'_, ()>;

	/// Removes the stored credential.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl From<StoreError> for NormalizedError {
	fn from(e: StoreError) -> Self {
		Self::internal(format!("Credential store failed: {e}")).with_source(e)
	}
}
