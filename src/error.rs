//! Normalized error taxonomy shared by the pipeline, the retry policy, and callers.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`NormalizedError`] by default.
pub type Result<T, E = NormalizedError> = std::result::Result<T, E>;

/// Shared, cloneable error source kept behind a normalized error.
pub type SharedSource = Arc<dyn StdError + Send + Sync>;

/// Closed set of failure categories surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// No response was received (connection refused, DNS failure, timeout).
	Network,
	/// Credential is missing, expired, or was rejected (401).
	Unauthorized,
	/// Credential lacks permission for the resource (403).
	Forbidden,
	/// Resource does not exist (404).
	NotFound,
	/// Server rejected the input (422).
	Validation,
	/// Server is throttling the caller (429).
	RateLimited,
	/// Upstream failure (5xx).
	ServerError,
	/// Any other non-success status (400, 408, 409, 410, ...).
	Http,
	/// Client-side construction, serialization, or storage fault.
	Internal,
}
impl ErrorKind {
	/// Maps an HTTP status code onto the taxonomy.
	pub const fn from_status(status: u16) -> Self {
		match status {
			401 => Self::Unauthorized,
			403 => Self::Forbidden,
			404 => Self::NotFound,
			422 => Self::Validation,
			429 => Self::RateLimited,
			500..=599 => Self::ServerError,
			_ => Self::Http,
		}
	}

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Network => "network",
			Self::Unauthorized => "unauthorized",
			Self::Forbidden => "forbidden",
			Self::NotFound => "not_found",
			Self::Validation => "validation",
			Self::RateLimited => "rate_limited",
			Self::ServerError => "server_error",
			Self::Http => "http",
			Self::Internal => "internal",
		}
	}

	/// Human-readable fallback message used when the server supplies none.
	pub const fn default_message(self) -> &'static str {
		match self {
			Self::Network => "network error, check connection",
			Self::Unauthorized => "session expired, please sign in again",
			Self::Forbidden => "you do not have permission to perform this action",
			Self::NotFound => "resource not found",
			Self::Validation => "validation failed",
			Self::RateLimited => "too many requests, please slow down",
			Self::ServerError => "server error, please try again later",
			Self::Http => "request failed",
			Self::Internal => "internal client error",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Immutable, display-ready failure returned by every public operation.
///
/// Construct values through [`NormalizedError::new`] and the `with_*` helpers; the
/// [`ErrorNormalizer`](crate::normalize::ErrorNormalizer) is the usual producer.
#[derive(Clone, ThisError)]
#[error("{message}")]
pub struct NormalizedError {
	kind: ErrorKind,
	message: String,
	status: Option<u16>,
	code: Option<String>,
	details: Option<Value>,
	retry_after: Option<Duration>,
	#[source]
	source: Option<SharedSource>,
}
impl NormalizedError {
	/// Creates an error of the given kind with an explicit message.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			status: None,
			code: None,
			details: None,
			retry_after: None,
			source: None,
		}
	}

	/// Creates an error of the given kind using its default message.
	pub fn from_kind(kind: ErrorKind) -> Self {
		Self::new(kind, kind.default_message())
	}

	/// Shorthand for an [`ErrorKind::Internal`] error.
	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Internal, message)
	}

	/// Shorthand for the [`ErrorKind::Network`] error with the standard message.
	pub fn network() -> Self {
		Self::from_kind(ErrorKind::Network)
	}

	/// Error surfaced when a credential refresh fails and the session is dropped.
	pub fn session_expired() -> Self {
		Self::from_kind(ErrorKind::Unauthorized).with_status(401)
	}

	/// Error surfaced to a `401` that arrives after an explicit sign-out.
	pub fn signed_out() -> Self {
		Self::new(ErrorKind::Unauthorized, "signed out, please sign in again").with_status(401)
	}

	/// Attaches the HTTP status code.
	pub fn with_status(mut self, status: u16) -> Self {
		self.status = Some(status);

		self
	}

	/// Attaches a machine-readable error code.
	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.code = Some(code.into());

		self
	}

	/// Attaches opaque structured details (e.g. field errors).
	pub fn with_details(mut self, details: Value) -> Self {
		self.details = Some(details);

		self
	}

	/// Attaches the server-provided Retry-After hint.
	pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
		self.retry_after = Some(retry_after);

		self
	}

	/// Attaches the underlying cause.
	pub fn with_source(mut self, source: impl 'static + Send + Sync + StdError) -> Self {
		self.source = Some(Arc::new(source));

		self
	}

	/// Failure category.
	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	/// Display-ready message.
	pub fn message(&self) -> &str {
		&self.message
	}

	/// HTTP status, when a response was received.
	pub fn status(&self) -> Option<u16> {
		self.status
	}

	/// Server-supplied error code, if any.
	pub fn code(&self) -> Option<&str> {
		self.code.as_deref()
	}

	/// Server-supplied details, if any.
	pub fn details(&self) -> Option<&Value> {
		self.details.as_ref()
	}

	/// Server-supplied Retry-After hint, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		self.retry_after
	}

	/// Returns `true` when the failure means the credential was rejected.
	pub fn is_unauthorized(&self) -> bool {
		self.status == Some(401) || self.kind == ErrorKind::Unauthorized
	}
}
impl Debug for NormalizedError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("NormalizedError")
			.field("kind", &self.kind)
			.field("message", &self.message)
			.field("status", &self.status)
			.field("code", &self.code)
			.field("details", &self.details)
			.field("retry_after", &self.retry_after)
			.field("source", &self.source.as_ref().map(ToString::to_string))
			.finish()
	}
}
impl PartialEq for NormalizedError {
	fn eq(&self, other: &Self) -> bool {
		self.kind == other.kind
			&& self.message == other.message
			&& self.status == other.status
			&& self.code == other.code
			&& self.details == other.details
	}
}
impl From<serde_json::Error> for NormalizedError {
	fn from(e: serde_json::Error) -> Self {
		Self::internal(format!("Failed to serialize request body: {e}.")).with_source(e)
	}
}

/// Configuration and validation failures raised while building a client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Base URL could not be parsed.
	#[error("Base URL is invalid.")]
	InvalidBaseUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL uses a scheme other than http or https.
	#[error("Base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Rejected URL.
		url: String,
	},
	/// Base URL cannot have relative paths joined onto it.
	#[error("Base URL cannot be used as a base: {url}.")]
	CannotBeABase {
		/// Rejected URL.
		url: String,
	},
	/// Default header name or value contains forbidden characters.
	#[error("Header `{name}` is invalid.")]
	InvalidHeader {
		/// Offending header name.
		name: String,
	},
	/// Request path cannot be joined onto the base URL.
	#[error("Path `{path}` cannot be joined onto the base URL.")]
	InvalidPath {
		/// Offending path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedSource,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
impl From<ConfigError> for NormalizedError {
	fn from(e: ConfigError) -> Self {
		Self::internal(e.to_string()).with_source(e)
	}
}
