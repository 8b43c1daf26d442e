//! Request descriptors and the per-attempt bookkeeping threaded through the pipeline.

// crates.io
use uuid::Uuid;
// self
use crate::{_prelude::*, http::Method, transfer::MultipartUpload};

/// Logical request submitted to [`ApiClient::send`](crate::client::ApiClient::send).
///
/// The descriptor is never mutated by the pipeline; retries reuse it as-is.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// HTTP verb.
	pub method: Method,
	/// Path relative to the configured base URL (may carry a query string).
	pub path: String,
	/// Extra query pairs appended to the URL.
	pub query: Vec<(String, String)>,
	/// Per-request headers; names are matched case-insensitively.
	pub headers: BTreeMap<String, String>,
	/// Request payload.
	pub body: RequestBody,
	/// Timeout override for each dispatch.
	pub timeout: Option<Duration>,
	/// Disables the retry policy for this request when `false`.
	pub retry: bool,
}
impl RequestDescriptor {
	/// Creates a descriptor with an empty body.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			headers: BTreeMap::new(),
			body: RequestBody::Empty,
			timeout: None,
			retry: true,
		}
	}

	/// Shorthand for a `GET` descriptor.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::Get, path)
	}

	/// Adds a query pair.
	pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
		self.query.push((name.into(), value.to_string()));

		self
	}

	/// Adds or replaces a header.
	pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Serializes `body` as the JSON payload.
	pub fn json<B>(mut self, body: &B) -> Result<Self>
	where
		B: ?Sized + Serialize,
	{
		self.body = RequestBody::Json(serde_json::to_value(body)?);

		Ok(self)
	}

	/// Sets an already-built payload.
	pub fn body(mut self, body: RequestBody) -> Self {
		self.body = body;

		self
	}

	/// Overrides the dispatch timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Opts this request out of retries.
	pub fn without_retry(mut self) -> Self {
		self.retry = false;

		self
	}
}

/// Payload variants accepted by the pipeline.
#[derive(Clone, Debug, Default)]
pub enum RequestBody {
	/// No body.
	#[default]
	Empty,
	/// JSON document sent as `application/json`.
	Json(Value),
	/// Raw bytes with an explicit content type.
	Raw {
		/// Payload bytes.
		bytes: Bytes,
		/// Value of the `Content-Type` header.
		content_type: String,
	},
	/// Streamed multipart upload.
	Multipart(MultipartUpload),
}

/// Opaque correlation token sent as `X-Request-ID`; fresh for every dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);
impl RequestId {
	/// Generates a new random identifier.
	pub fn generate() -> Self {
		Self(Uuid::new_v4().to_string())
	}

	/// Returns the identifier as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for RequestId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Retry bookkeeping for one logical call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Attempt {
	/// Retries already scheduled by the retry policy.
	pub(crate) retries: u32,
	/// Whether the one refresh-triggered retry has been spent.
	pub(crate) auth_retried: bool,
}
impl Attempt {
	/// Zero-based dispatch counter used in trace events.
	pub(crate) fn dispatch_index(&self) -> u32 {
		self.retries + u32::from(self.auth_retried)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn builder_lowercases_headers_and_serializes_json() {
		let descriptor = RequestDescriptor::new(Method::Post, "/orders")
			.header("X-Trace", "abc")
			.query("page", 2)
			.json(&serde_json::json!({ "sku": "A-1" }))
			.expect("JSON body should serialize.");

		assert_eq!(descriptor.headers.get("x-trace").map(String::as_str), Some("abc"));
		assert_eq!(descriptor.query, vec![("page".to_owned(), "2".to_owned())]);
		assert!(matches!(descriptor.body, RequestBody::Json(ref v) if v["sku"] == "A-1"));
		assert!(descriptor.retry);
	}

	#[test]
	fn request_ids_are_unique() {
		assert_ne!(RequestId::generate(), RequestId::generate());
	}
}
