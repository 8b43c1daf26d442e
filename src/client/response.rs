//! Decoded responses and the pagination metadata derived from headers.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{_prelude::*, client::RequestId};

/// Pagination derived from `X-Total-Count` and `X-Page-Count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
	/// Value of `X-Total-Count`.
	pub total: u64,
	/// Value of `X-Page-Count`.
	pub page: u64,
}
impl Pagination {
	/// Reads pagination headers; both must be present and numeric.
	pub fn from_headers(headers: &BTreeMap<String, String>) -> Option<Self> {
		let read = |name: &str| headers.get(name).and_then(|raw| raw.trim().parse().ok());

		Some(Self { total: read("x-total-count")?, page: read("x-page-count")? })
	}
}

/// Successful response returned by the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse<T = Value> {
	/// HTTP status code (2xx).
	pub status: u16,
	/// Response headers with lower-cased names.
	pub headers: BTreeMap<String, String>,
	/// Decoded body.
	pub data: T,
	/// Pagination metadata, when the server sent it.
	pub pagination: Option<Pagination>,
	/// Identifier of the dispatch that produced this response.
	pub request_id: RequestId,
}
impl ApiResponse {
	/// Decodes a buffered body: empty → `null`, JSON → value, anything else → string.
	pub(crate) fn decode(
		status: u16,
		headers: BTreeMap<String, String>,
		body: &[u8],
		request_id: RequestId,
	) -> Self {
		let data = if body.iter().all(u8::is_ascii_whitespace) {
			Value::Null
		} else {
			serde_json::from_slice(body)
				.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
		};
		let pagination = Pagination::from_headers(&headers);

		Self { status, headers, data, pagination, request_id }
	}

	/// Deserializes the body into `T`, naming the failing path on mismatch.
	pub fn json<T>(self) -> Result<ApiResponse<T>>
	where
		T: DeserializeOwned,
	{
		let data = serde_path_to_error::deserialize(self.data).map_err(|e| {
			NormalizedError::internal(format!(
				"Response body does not match the expected shape at `{}`.",
				e.path()
			))
			.with_source(e.into_inner())
		})?;

		Ok(ApiResponse {
			status: self.status,
			headers: self.headers,
			data,
			pagination: self.pagination,
			request_id: self.request_id,
		})
	}
}
