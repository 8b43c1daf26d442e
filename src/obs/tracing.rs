// self
use crate::{_prelude::*, obs::CallKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// A span builder used by client operations.
#[derive(Clone, Debug)]
pub struct CallSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl CallSpan {
	/// Creates a new span tagged with the provided call kind, method, and path.
	pub fn new(kind: CallKind, method: &str, path: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("api_courier.call", kind = kind.as_str(), method, path);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, method, path);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits the event for one dispatch leaving the client.
pub fn trace_dispatch(request_id: &str, attempt: u32, authenticated: bool) {
	#[cfg(feature = "tracing")]
	tracing::debug!(request_id, attempt, authenticated, "dispatching request");
	#[cfg(not(feature = "tracing"))]
	let _ = (request_id, attempt, authenticated);
}

/// Emits the event for a response (or transport failure when `status` is `None`).
pub fn trace_response(request_id: &str, status: Option<u16>, elapsed: Duration) {
	#[cfg(feature = "tracing")]
	{
		let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

		match status {
			Some(status) => tracing::debug!(request_id, status, elapsed_ms, "response received"),
			None => tracing::debug!(request_id, elapsed_ms, "no response received"),
		}
	}
	#[cfg(not(feature = "tracing"))]
	let _ = (request_id, status, elapsed);
}

/// Emits the event for a scheduled retry.
pub fn trace_retry(error: &NormalizedError, attempt: u32, delay: Duration) {
	#[cfg(feature = "tracing")]
	{
		let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

		tracing::info!(
			error = error.kind().as_str(),
			status = error.status(),
			attempt,
			delay_ms,
			"retrying request"
		);
	}
	#[cfg(not(feature = "tracing"))]
	let _ = (error, attempt, delay);
}

/// Emits the event for a refresh cycle transition.
pub fn trace_refresh(stage: &'static str, waiters: usize) {
	#[cfg(feature = "tracing")]
	tracing::info!(stage, waiters, "credential refresh");
	#[cfg(not(feature = "tracing"))]
	let _ = (stage, waiters);
}

/// Emits the event for a refresh failure that ends the session.
pub fn trace_session_expired(cause: &NormalizedError) {
	#[cfg(feature = "tracing")]
	tracing::warn!(
		error = cause.kind().as_str(),
		status = cause.status(),
		"credential refresh failed; session cleared"
	);
	#[cfg(not(feature = "tracing"))]
	let _ = cause;
}

/// Emits the event for a session-ending store clear that failed.
pub fn trace_store_clear_failed(error: &NormalizedError) {
	#[cfg(feature = "tracing")]
	tracing::warn!(
		error = error.kind().as_str(),
		message = error.message(),
		"failed to clear the credential store; a stale credential may remain"
	);
	#[cfg(not(feature = "tracing"))]
	let _ = error;
}
