//! Raw failure capture and normalization into the [`ErrorKind`] taxonomy.
//!
//! Transports report failures as [`RawFailure`] values that carry only primitive data
//! (status, headers, body bytes, boxed cause) so normalizers stay decoupled from any HTTP
//! client. [`DefaultErrorNormalizer`] prefers server-supplied `message`/`code` fields and
//! falls back to status-derived messages.

// crates.io
use time::{OffsetDateTime, format_description::well_known::Rfc2822};
// self
use crate::{_prelude::*, error::SharedSource};

/// Failure as observed by a transport, before classification.
#[derive(Clone, Debug)]
pub enum RawFailure {
	/// A response arrived with a non-success status.
	Response {
		/// HTTP status code.
		status: u16,
		/// Response headers with lower-cased names.
		headers: BTreeMap<String, String>,
		/// Raw response body.
		body: Bytes,
	},
	/// No response was received (connect, DNS, TLS, or a broken body stream).
	Transport {
		/// Transport-specific cause.
		source: SharedSource,
	},
	/// The dispatch exceeded its deadline before a response arrived.
	Timeout {
		/// Deadline that elapsed.
		after: Duration,
	},
	/// The request could not be constructed or serialized.
	Build {
		/// Human-readable description.
		message: String,
		/// Underlying cause, when one exists.
		source: Option<SharedSource>,
	},
}
impl RawFailure {
	/// Wraps a transport-level cause.
	pub fn transport(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Transport { source: Arc::new(src) }
	}

	/// Describes a request-construction failure.
	pub fn build(message: impl Into<String>) -> Self {
		Self::Build { message: message.into(), source: None }
	}

	/// Convenience constructor for a status-only response failure.
	pub fn status(status: u16, body: impl Into<Bytes>) -> Self {
		Self::Response { status, headers: BTreeMap::new(), body: body.into() }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for RawFailure {
	fn from(e: ReqwestError) -> Self {
		if e.is_builder() {
			return Self::Build {
				message: "Request could not be constructed.".into(),
				source: Some(Arc::new(e)),
			};
		}
		if e.is_timeout() {
			return Self::Timeout { after: Duration::ZERO };
		}

		Self::transport(e)
	}
}

/// Maps a [`RawFailure`] into a [`NormalizedError`].
pub trait ErrorNormalizer
where
	Self: 'static + Send + Sync,
{
	/// Classifies the failure.
	fn normalize(&self, raw: RawFailure) -> NormalizedError;
}

/// Default normalizer that reads JSON error bodies of the shape
/// `{"message": "...", "code": "...", "errors": {...}}`.
#[derive(Clone, Debug, Default)]
pub struct DefaultErrorNormalizer;
impl ErrorNormalizer for DefaultErrorNormalizer {
	fn normalize(&self, raw: RawFailure) -> NormalizedError {
		match raw {
			RawFailure::Response { status, headers, body } =>
				normalize_response(status, &headers, &body),
			RawFailure::Transport { source } =>
				NormalizedError::network().with_source(TransportCause(source)),
			RawFailure::Timeout { .. } => NormalizedError::network(),
			RawFailure::Build { message, source } => {
				let err = NormalizedError::internal(message);

				match source {
					Some(source) => err.with_source(TransportCause(source)),
					None => err,
				}
			},
		}
	}
}

/// Adapter so a shared cause can be reattached as an owned source.
#[derive(Debug)]
struct TransportCause(SharedSource);
impl Display for TransportCause {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		Display::fmt(&self.0, f)
	}
}
impl StdError for TransportCause {
	fn source(&self) -> Option<&(dyn StdError + 'static)> {
		self.0.source()
	}
}

fn normalize_response(
	status: u16,
	headers: &BTreeMap<String, String>,
	body: &[u8],
) -> NormalizedError {
	let kind = ErrorKind::from_status(status);
	let payload = serde_json::from_slice::<Value>(body).ok();
	let payload = payload.as_ref().and_then(Value::as_object);
	let message = payload
		.and_then(|map| {
			["message", "error", "detail"]
				.iter()
				.find_map(|field| {
					map.get(*field).and_then(Value::as_str).filter(|text| !text.trim().is_empty())
				})
				.map(str::to_owned)
		})
		.unwrap_or_else(|| kind.default_message().to_owned());
	let mut err = NormalizedError::new(kind, message).with_status(status);

	if let Some(code) = payload.and_then(|map| map.get("code")).and_then(code_string) {
		err = err.with_code(code);
	}
	if let Some(details) =
		payload.and_then(|map| map.get("errors").or_else(|| map.get("details"))).cloned()
	{
		err = err.with_details(details);
	}
	if let Some(retry_after) = headers.get("retry-after").and_then(|raw| parse_retry_after(raw)) {
		err = err.with_retry_after(retry_after);
	}

	err
}

fn code_string(value: &Value) -> Option<String> {
	match value {
		Value::String(code) => Some(code.clone()),
		Value::Number(code) => Some(code.to_string()),
		_ => None,
	}
}

/// Parses a `Retry-After` header expressed as delta-seconds or an RFC 2822 date.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Duration::try_from(delta).ok();
		}
	}

	None
}
