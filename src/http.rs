//! Transport primitives for outbound API calls.
//!
//! [`HttpTransport`] is the client's only dependency on an HTTP stack. A transport resolves
//! with a [`TransportResponse`] for every status code it receives (success or not) and with a
//! [`RawFailure`] only when no response arrived or the request could not be built. Status
//! interpretation, timeouts, and retries belong to the pipeline.

// crates.io
use futures::{Stream, StreamExt, stream};
#[cfg(feature = "reqwest")] use reqwest::{
	Body, RequestBuilder,
	multipart::{Form, Part},
};
// self
use crate::{_prelude::*, normalize::RawFailure, transfer::MultipartUpload};

/// Boxed stream of response body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, RawFailure>> + Send>>;

/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TransportResponse, RawFailure>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing one request.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by every
/// clone of the client, and the returned futures must be `Send` so callers can spawn them.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and resolves once response headers are available.
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_>;
}

/// HTTP verbs supported by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`.
	Get,
	/// `POST`.
	Post,
	/// `PUT`.
	Put,
	/// `PATCH`.
	Patch,
	/// `DELETE`.
	Delete,
}
impl Method {
	/// Returns the canonical upper-case verb.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Fully resolved request handed to a transport.
#[derive(Clone, Debug)]
pub struct TransportRequest {
	/// HTTP verb.
	pub method: Method,
	/// Absolute URL including the query string.
	pub url: Url,
	/// Header map with lower-cased names.
	pub headers: BTreeMap<String, String>,
	/// Request payload.
	pub body: TransportBody,
}
impl TransportRequest {
	/// Returns a header value by (case-insensitive) name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}
}

/// Payload carried by a [`TransportRequest`].
#[derive(Clone, Debug, Default)]
pub enum TransportBody {
	/// No body.
	#[default]
	Empty,
	/// Fully buffered body; the content type travels in the headers.
	Bytes(Bytes),
	/// Streamed multipart form with a single file part.
	Multipart(MultipartUpload),
}

/// Response headers plus a lazily consumed body.
pub struct TransportResponse {
	/// HTTP status code.
	pub status: u16,
	/// Header map with lower-cased names.
	pub headers: BTreeMap<String, String>,
	/// Body chunks; dropping the stream abandons the body.
	pub body: BodyStream,
}
impl TransportResponse {
	/// Builds a response around an already buffered body.
	pub fn buffered(status: u16, headers: BTreeMap<String, String>, body: impl Into<Bytes>) -> Self {
		let body: Bytes = body.into();

		Self { status, headers, body: Box::pin(stream::iter([Ok(body)])) }
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns a header value by (case-insensitive) name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Declared body length, when the server sent one.
	pub fn content_length(&self) -> Option<u64> {
		self.header("content-length").and_then(|raw| raw.trim().parse().ok())
	}

	/// Drains the body into a single buffer.
	pub async fn bytes(self) -> Result<Bytes, RawFailure> {
		let mut body = self.body;
		let mut buf = Vec::new();

		while let Some(chunk) = body.next().await {
			buf.extend_from_slice(&chunk?);
		}

		Ok(Bytes::from(buf))
	}
}
impl Debug for TransportResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TransportResponse")
			.field("status", &self.status)
			.field("headers", &self.headers)
			.finish_non_exhaustive()
	}
}

/// Sends `request` and turns non-2xx statuses into [`RawFailure::Response`].
///
/// No deadline applies; callers wrap it together with the body read in [`with_deadline`].
pub(crate) async fn exchange<T>(
	transport: &T,
	request: TransportRequest,
) -> Result<TransportResponse, RawFailure>
where
	T: ?Sized + HttpTransport,
{
	let response = transport.execute(request).await?;

	if response.is_success() {
		return Ok(response);
	}

	let status = response.status;
	let headers = response.headers.clone();
	let body = response.bytes().await.unwrap_or_default();

	Err(RawFailure::Response { status, headers, body })
}

/// Runs `work` under `timeout`, mapping expiry onto [`RawFailure::Timeout`].
pub(crate) async fn with_deadline<F, R>(timeout: Duration, work: F) -> Result<R, RawFailure>
where
	F: Future<Output = Result<R, RawFailure>>,
{
	match tokio::time::timeout(timeout, work).await {
		Ok(result) => result,
		Err(_) => Err(RawFailure::Timeout { after: timeout }),
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client carrying the optional `User-Agent`.
	pub fn build(user_agent: Option<&str>) -> Result<Self, crate::error::ConfigError> {
		let mut builder = ReqwestClient::builder();

		if let Some(user_agent) = user_agent {
			builder = builder.user_agent(user_agent);
		}

		builder.build().map(Self).map_err(crate::error::ConfigError::http_client_build)
	}

	fn prepare(&self, request: TransportRequest) -> Result<RequestBuilder, RawFailure> {
		let method = match request.method {
			Method::Get => reqwest::Method::GET,
			Method::Post => reqwest::Method::POST,
			Method::Put => reqwest::Method::PUT,
			Method::Patch => reqwest::Method::PATCH,
			Method::Delete => reqwest::Method::DELETE,
		};
		let mut builder = self.0.request(method, request.url);

		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}

		let builder = match request.body {
			TransportBody::Empty => builder,
			TransportBody::Bytes(bytes) => builder.body(bytes),
			TransportBody::Multipart(upload) => builder.multipart(multipart_form(upload)?),
		};

		Ok(builder)
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let response = self.prepare(request)?.send().await?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
				})
				.collect();
			let body = response.bytes_stream().map(|chunk| chunk.map_err(RawFailure::from));

			Ok(TransportResponse { status, headers, body: Box::pin(body) })
		})
	}
}

#[cfg(feature = "reqwest")]
fn multipart_form(upload: MultipartUpload) -> Result<Form, RawFailure> {
	let length = upload.file.len();
	let file_name = upload.file.file_name.clone();
	let content_type = upload.file.content_type.clone();
	let field_name = upload.field_name.clone();
	let fields = upload.fields.clone();
	let chunks = stream::iter(upload.chunks().map(Ok::<_, std::io::Error>));
	let part = Part::stream_with_length(Body::wrap_stream(chunks), length)
		.file_name(file_name)
		.mime_str(&content_type)
		.map_err(|e| RawFailure::Build {
			message: format!("Upload content type `{content_type}` is invalid."),
			source: Some(Arc::new(e)),
		})?;
	let mut form = Form::new();

	for (name, value) in fields {
		form = form.text(name, value);
	}

	Ok(form.part(field_name, part))
}
