//! Client configuration, validated through [`ClientConfigBuilder`].

// self
use crate::{_prelude::*, error::ConfigError, retry::RetryPolicy};

/// Immutable client configuration.
///
/// Durations serialize as integer milliseconds so the struct can be read from the same
/// JSON/TOML documents that carry the surrounding application's environment settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Base URL every request path is joined onto.
	pub base_url: Url,
	/// Per-attempt timeout, body included, applied unless a request overrides it.
	#[serde(rename = "timeout_ms", with = "duration_ms")]
	pub timeout: Duration,
	/// Per-attempt timeout for uploads and downloads, body included.
	#[serde(rename = "transfer_timeout_ms", with = "duration_ms")]
	pub transfer_timeout: Duration,
	/// Retries allowed after the first failure.
	pub retry_attempts: u32,
	/// Delay before the first retry.
	#[serde(rename = "retry_base_delay_ms", with = "duration_ms")]
	pub retry_base_delay: Duration,
	/// Upper bound for any backoff delay.
	#[serde(rename = "retry_max_delay_ms", with = "duration_ms")]
	pub retry_max_delay: Duration,
	/// Randomizes backoff delays when enabled.
	pub retry_jitter: bool,
	/// Honors server Retry-After hints when enabled.
	pub respect_retry_after: bool,
	/// Statuses treated as transient.
	pub retryable_status_codes: BTreeSet<u16>,
	/// Path of the credential refresh endpoint.
	pub refresh_path: String,
	/// Path probed by health checks.
	pub health_path: String,
	/// Headers added to every request beneath per-request headers.
	pub default_headers: BTreeMap<String, String>,
	/// Optional `User-Agent` for the default transport.
	pub user_agent: Option<String>,
}
impl ClientConfig {
	/// Default per-dispatch timeout.
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15_000);
	/// Default timeout for uploads and downloads.
	pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);
	/// Default refresh endpoint.
	pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
	/// Default health endpoint.
	pub const DEFAULT_HEALTH_PATH: &str = "/health";

	/// Starts a builder for the provided base URL.
	pub fn builder(base_url: impl AsRef<str>) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Derives the retry policy described by this configuration.
	pub fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy {
			max_attempts: self.retry_attempts,
			base_delay: self.retry_base_delay,
			max_delay: self.retry_max_delay,
			retryable_status_codes: self.retryable_status_codes.clone(),
			jitter: self.retry_jitter,
			respect_retry_after: self.respect_retry_after,
		}
	}

	/// Resolves `path` against the base URL.
	///
	/// Leading slashes are relative to the base path, so `/products` under
	/// `https://api.example.com/v1` resolves to `https://api.example.com/v1/products`.
	/// Absolute `http(s)` URLs pass through unchanged.
	pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
		if let Ok(absolute) = Url::parse(path)
			&& matches!(absolute.scheme(), "http" | "https")
		{
			return Ok(absolute);
		}

		let mut base = self.base_url.clone();

		if !base.path().ends_with('/') {
			let with_slash = format!("{}/", base.path());

			base.set_path(&with_slash);
		}

		base.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidPath { path: path.to_owned(), source })
	}

	/// Validates invariants for the configuration.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ConfigError::UnsupportedScheme { url: self.base_url.to_string() });
		}
		if self.base_url.cannot_be_a_base() {
			return Err(ConfigError::CannotBeABase { url: self.base_url.to_string() });
		}

		for (name, value) in &self.default_headers {
			if !is_valid_header(name, value) {
				return Err(ConfigError::InvalidHeader { name: name.clone() });
			}
		}

		Ok(())
	}
}
impl Default for ClientConfig {
	fn default() -> Self {
		let policy = RetryPolicy::default();

		Self {
			base_url: Url::parse("http://localhost/").expect("Static default base URL must parse."),
			timeout: Self::DEFAULT_TIMEOUT,
			transfer_timeout: Self::DEFAULT_TRANSFER_TIMEOUT,
			retry_attempts: policy.max_attempts,
			retry_base_delay: policy.base_delay,
			retry_max_delay: policy.max_delay,
			retry_jitter: policy.jitter,
			respect_retry_after: policy.respect_retry_after,
			retryable_status_codes: policy.retryable_status_codes,
			refresh_path: Self::DEFAULT_REFRESH_PATH.into(),
			health_path: Self::DEFAULT_HEALTH_PATH.into(),
			default_headers: BTreeMap::new(),
			user_agent: None,
		}
	}
}

/// Builder for [`ClientConfig`] values.
#[derive(Debug)]
pub struct ClientConfigBuilder {
	base_url: String,
	config: ClientConfig,
}
impl ClientConfigBuilder {
	/// Creates a builder seeded with defaults.
	pub fn new(base_url: impl AsRef<str>) -> Self {
		Self { base_url: base_url.as_ref().to_owned(), config: ClientConfig::default() }
	}

	/// Overrides the per-dispatch timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.config.timeout = timeout;

		self
	}

	/// Overrides the transfer timeout.
	pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
		self.config.transfer_timeout = timeout;

		self
	}

	/// Overrides the retry budget.
	pub fn retry_attempts(mut self, attempts: u32) -> Self {
		self.config.retry_attempts = attempts;

		self
	}

	/// Overrides the base backoff delay.
	pub fn retry_base_delay(mut self, delay: Duration) -> Self {
		self.config.retry_base_delay = delay;

		self
	}

	/// Overrides the backoff cap.
	pub fn retry_max_delay(mut self, delay: Duration) -> Self {
		self.config.retry_max_delay = delay;

		self
	}

	/// Enables or disables backoff jitter.
	pub fn retry_jitter(mut self, enabled: bool) -> Self {
		self.config.retry_jitter = enabled;

		self
	}

	/// Enables or disables Retry-After handling.
	pub fn respect_retry_after(mut self, enabled: bool) -> Self {
		self.config.respect_retry_after = enabled;

		self
	}

	/// Replaces the transient status set.
	pub fn retryable_status_codes<I>(mut self, codes: I) -> Self
	where
		I: IntoIterator<Item = u16>,
	{
		self.config.retryable_status_codes = codes.into_iter().collect();

		self
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.config.refresh_path = path.into();

		self
	}

	/// Overrides the health endpoint path.
	pub fn health_path(mut self, path: impl Into<String>) -> Self {
		self.config.health_path = path.into();

		self
	}

	/// Adds a header sent with every request.
	pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.default_headers.insert(name.into().to_ascii_lowercase(), value.into());

		self
	}

	/// Sets the `User-Agent` for the default transport.
	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.config.user_agent = Some(user_agent.into());

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		let base_url =
			Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidBaseUrl { source })?;
		let config = ClientConfig { base_url, ..self.config };

		config.validate()?;

		Ok(config)
	}
}

/// Returns `true` when `name` is an RFC 7230 token and `value` holds no control bytes.
pub(crate) fn is_valid_header(name: &str, value: &str) -> bool {
	const TOKEN_SPECIALS: &[u8] = b"!#$%&'*+-.^_`|~";

	!name.is_empty()
		&& name.bytes().all(|b| b.is_ascii_alphanumeric() || TOKEN_SPECIALS.contains(&b))
		&& value.bytes().all(|b| b == b'\t' || (b >= 0x20 && b != 0x7f))
}

mod duration_ms {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};
	// self
	use crate::_prelude::Duration;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
