//! Pure retry decisions: which failures are transient and how long to back off.

// crates.io
use rand::Rng;
// self
use crate::_prelude::*;

/// Outcome of consulting a [`RetryPolicy`] for one failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
	/// Whether the request should be dispatched again.
	pub should_retry: bool,
	/// How long to wait before the next dispatch.
	pub delay: Duration,
}
impl RetryDecision {
	/// Decision that ends the retry loop.
	pub const STOP: Self = Self { should_retry: false, delay: Duration::ZERO };

	/// Decision that retries after `delay`.
	pub const fn retry_after(delay: Duration) -> Self {
		Self { should_retry: true, delay }
	}
}

/// Bounded exponential backoff over a fixed set of retryable conditions.
///
/// `max_attempts` counts retries after the first failure, so a request is dispatched at
/// most `max_attempts + 1` times. The delay before retry `n` (1-based) is
/// `base_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Retries allowed after the first failure.
	pub max_attempts: u32,
	/// Delay before the first retry.
	pub base_delay: Duration,
	/// Upper bound applied to every computed delay.
	pub max_delay: Duration,
	/// Status codes treated as transient.
	pub retryable_status_codes: BTreeSet<u16>,
	/// Draws each delay uniformly from `[0, backoff]` when enabled.
	pub jitter: bool,
	/// Waits at least the server's Retry-After hint when enabled.
	pub respect_retry_after: bool,
}
impl RetryPolicy {
	/// Default number of retries after the first failure.
	pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
	/// Default delay before the first retry.
	pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
	/// Default cap for computed delays.
	pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
	/// Default transient status codes.
	pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

	/// Policy that never retries.
	pub fn disabled() -> Self {
		Self { max_attempts: 0, ..Self::default() }
	}

	/// Overrides the retry budget.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Overrides the base delay.
	pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
		self.base_delay = base_delay;

		self
	}

	/// Returns `true` when `error` describes a transient condition.
	pub fn is_retryable(&self, error: &NormalizedError) -> bool {
		if matches!(
			error.kind(),
			ErrorKind::Unauthorized
				| ErrorKind::Forbidden
				| ErrorKind::NotFound
				| ErrorKind::Validation
				| ErrorKind::Internal
		) {
			return false;
		}

		match error.status() {
			Some(status) => self.retryable_status_codes.contains(&status),
			None => error.kind() == ErrorKind::Network,
		}
	}

	/// Deterministic backoff for the 1-based retry number `attempt`, before jitter.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(31);
		let factor = 1_u32 << exponent;

		self.base_delay.saturating_mul(factor).min(self.max_delay)
	}

	/// Decides whether retry number `attempt` (1-based) should happen for `error`.
	pub fn should_retry(&self, error: &NormalizedError, attempt: u32) -> RetryDecision {
		if attempt == 0 || attempt > self.max_attempts || !self.is_retryable(error) {
			return RetryDecision::STOP;
		}

		let mut delay = self.backoff(attempt);

		if self.jitter && !delay.is_zero() {
			let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

			delay = Duration::from_millis(rand::rng().random_range(0..=millis));
		}
		if self.respect_retry_after
			&& let Some(hint) = error.retry_after()
		{
			delay = delay.max(hint.min(self.max_delay));
		}

		RetryDecision::retry_after(delay)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
			base_delay: Self::DEFAULT_BASE_DELAY,
			max_delay: Self::DEFAULT_MAX_DELAY,
			retryable_status_codes: Self::DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
			jitter: false,
			respect_retry_after: false,
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn status_error(status: u16) -> NormalizedError {
		NormalizedError::from_kind(ErrorKind::from_status(status)).with_status(status)
	}

	#[test]
	fn delays_double_from_base() {
		let policy = RetryPolicy::default();
		let err = status_error(503);

		assert_eq!(policy.should_retry(&err, 1), RetryDecision::retry_after(Duration::from_secs(1)));
		assert_eq!(policy.should_retry(&err, 2), RetryDecision::retry_after(Duration::from_secs(2)));
		assert_eq!(policy.should_retry(&err, 3), RetryDecision::retry_after(Duration::from_secs(4)));
		assert_eq!(policy.should_retry(&err, 4), RetryDecision::STOP);
	}

	#[test]
	fn network_errors_and_transient_statuses_retry() {
		let policy = RetryPolicy::default();

		assert!(policy.should_retry(&NormalizedError::network(), 1).should_retry);

		for status in [408, 429, 500, 502, 503, 504] {
			assert!(policy.should_retry(&status_error(status), 1).should_retry, "{status}");
		}
	}

	#[test]
	fn permanent_failures_never_retry() {
		let policy = RetryPolicy::default();

		for status in [400, 401, 403, 404, 409, 422, 501] {
			assert_eq!(policy.should_retry(&status_error(status), 1), RetryDecision::STOP);
		}

		assert_eq!(
			policy.should_retry(&NormalizedError::internal("serialization failed"), 1),
			RetryDecision::STOP
		);
	}

	#[test]
	fn backoff_is_capped_and_saturates() {
		let policy = RetryPolicy::default().with_max_attempts(u32::MAX);

		assert_eq!(policy.backoff(6), Duration::from_secs(30));
		assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
	}

	#[test]
	fn jitter_stays_within_backoff() {
		let policy = RetryPolicy { jitter: true, ..RetryPolicy::default() };

		for _ in 0..32 {
			let decision = policy.should_retry(&status_error(502), 2);

			assert!(decision.should_retry);
			assert!(decision.delay <= Duration::from_secs(2));
		}
	}

	#[test]
	fn retry_after_hint_extends_delay_when_enabled() {
		let err = status_error(429).with_retry_after(Duration::from_secs(5));
		let policy = RetryPolicy::default();

		assert_eq!(policy.should_retry(&err, 1).delay, Duration::from_secs(1));

		let policy = RetryPolicy { respect_retry_after: true, ..RetryPolicy::default() };

		assert_eq!(policy.should_retry(&err, 1).delay, Duration::from_secs(5));
	}

	#[test]
	fn disabled_policy_stops_immediately() {
		assert_eq!(RetryPolicy::disabled().should_retry(&status_error(503), 1), RetryDecision::STOP);
	}
}
