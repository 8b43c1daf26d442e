//! Optional observability helpers for client calls.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to wrap every call in an `api_courier.call` span with `kind`, `method`, and
//!   `path` fields, and to emit dispatch/response/retry/refresh events. Bodies and credentials
//!   are never recorded.
//! - Enable `metrics` to increment `api_courier_call_total` (labeled by `kind` + `outcome`) and
//!   `api_courier_retry_total` (labeled by `kind` + `error`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::{_prelude::*, http::Method};

/// Call families observed by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
	/// Plain request/response call.
	Request,
	/// Multipart upload.
	Upload,
	/// Streaming download.
	Download,
	/// Credential refresh call.
	Refresh,
	/// Health probe.
	HealthCheck,
}
impl CallKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallKind::Request => "request",
			CallKind::Upload => "upload",
			CallKind::Download => "download",
			CallKind::Refresh => "refresh",
			CallKind::HealthCheck => "health_check",
		}
	}
}
impl Display for CallKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry to a client operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `fut` inside a [`CallSpan`] and records its attempt plus final outcome.
pub(crate) async fn observe_call<R, Fut>(kind: CallKind, method: Method, path: &str, fut: Fut) -> Result<R>
where
	Fut: Future<Output = Result<R>>,
{
	let span = CallSpan::new(kind, method.as_str(), path);

	record_call_outcome(kind, CallOutcome::Attempt);

	let result = span.instrument(fut).await;

	match &result {
		Ok(_) => record_call_outcome(kind, CallOutcome::Success),
		Err(_) => record_call_outcome(kind, CallOutcome::Failure),
	}

	result
}
