//! Request pipeline: credential attachment, dispatch, refresh hand-off, and bounded retry.
//!
//! [`ApiClient::send`] runs one logical call. Every dispatch reads the current credential,
//! stamps a fresh `X-Request-ID`, and waits for the response under the configured timeout. A
//! `401` hands off to the [`AuthTokenManager`] exactly once per call; other failures consult
//! the [`RetryPolicy`] and sleep the computed backoff before the next dispatch.

pub mod descriptor;
pub mod response;

pub use descriptor::{RequestBody, RequestDescriptor, RequestId};
pub use response::{ApiResponse, Pagination};

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::{AuthTokenManager, Credential, EndpointRefresher, TokenRefresher},
	client::descriptor::Attempt,
	config::ClientConfig,
	http::{self, HttpTransport, Method, TransportBody, TransportRequest, TransportResponse},
	normalize::{DefaultErrorNormalizer, ErrorNormalizer, RawFailure},
	obs::{self, CallKind},
	retry::RetryPolicy,
	store::TokenStore,
};
#[cfg(feature = "reqwest")] use crate::{error::ConfigError, http::ReqwestTransport};

#[cfg(feature = "reqwest")]
/// Client specialized for the crate's default reqwest transport.
pub type ReqwestApiClient = ApiClient<ReqwestTransport>;

/// Resilient API client bound to one base URL and one credential slot.
///
/// Clones share the transport, the credential manager, and therefore the single-flight
/// refresh state.
pub struct ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Transport used for every dispatch.
	pub transport: Arc<T>,
	/// Classifier applied to every failure.
	pub normalizer: Arc<dyn ErrorNormalizer>,
	/// Owner of the credential and the refresh protocol.
	pub auth: Arc<AuthTokenManager>,
	/// Immutable configuration.
	pub config: Arc<ClientConfig>,
	/// Retry policy derived from the configuration unless overridden.
	pub retry_policy: Arc<RetryPolicy>,
}
impl<T> ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a client over a caller-provided transport.
	///
	/// Credentials are refreshed through `config.refresh_path` on the same transport; use
	/// [`ApiClient::with_refresher`] to plug in a different refresh call.
	pub fn with_transport(
		config: ClientConfig,
		transport: impl Into<Arc<T>>,
		store: Arc<dyn TokenStore>,
	) -> Self {
		let transport = transport.into();
		let config = Arc::new(config);
		let normalizer: Arc<dyn ErrorNormalizer> = Arc::new(DefaultErrorNormalizer);
		let refresher =
			EndpointRefresher::new(transport.clone(), normalizer.clone(), config.clone());
		let auth = Arc::new(AuthTokenManager::new(store, Arc::new(refresher)));
		let retry_policy = Arc::new(config.retry_policy());

		Self { transport, normalizer, auth, config, retry_policy }
	}

	/// Replaces the refresh call used by the credential manager.
	pub fn with_refresher(self, refresher: Arc<dyn TokenRefresher>) -> Self {
		self.auth.set_refresher(refresher);

		self
	}

	/// Registers the handler invoked once per failed refresh (sign-out signal).
	pub fn on_unauthorized<F>(self, handler: F) -> Self
	where
		F: 'static + Fn(&NormalizedError) + Send + Sync,
	{
		self.auth.set_unauthorized_handler(Arc::new(handler));

		self
	}

	/// Replaces the error normalizer.
	pub fn with_normalizer(mut self, normalizer: Arc<dyn ErrorNormalizer>) -> Self {
		self.normalizer = normalizer;

		self
	}

	/// Replaces the retry policy.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = Arc::new(policy);

		self
	}

	/// Stores a freshly issued credential (login/signup).
	pub async fn sign_in(&self, credential: Credential) -> Result<()> {
		self.auth.sign_in(credential).await
	}

	/// Clears the stored credential.
	pub async fn sign_out(&self) -> Result<()> {
		self.auth.sign_out().await
	}

	/// Reads the stored credential.
	pub async fn credential(&self) -> Result<Option<Credential>> {
		self.auth.current().await
	}

	/// Runs one logical request through the pipeline.
	pub async fn send(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
		let kind = CallKind::Request;

		obs::observe_call(kind, descriptor.method, &descriptor.path, async {
			self.run(&descriptor, kind, self.config.timeout, &mut Buffered).await
		})
		.await
	}

	/// `GET path`.
	pub async fn get(&self, path: impl Into<String>) -> Result<ApiResponse> {
		self.send(RequestDescriptor::get(path)).await
	}

	/// `POST path` with a JSON body.
	pub async fn post<B>(&self, path: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestDescriptor::new(Method::Post, path).json(body)?).await
	}

	/// `PUT path` with a JSON body.
	pub async fn put<B>(&self, path: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestDescriptor::new(Method::Put, path).json(body)?).await
	}

	/// `PATCH path` with a JSON body.
	pub async fn patch<B>(&self, path: impl Into<String>, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		self.send(RequestDescriptor::new(Method::Patch, path).json(body)?).await
	}

	/// `DELETE path`.
	pub async fn delete(&self, path: impl Into<String>) -> Result<ApiResponse> {
		self.send(RequestDescriptor::new(Method::Delete, path)).await
	}

	/// Probes `config.health_path` once, without retries.
	pub async fn health_check(&self) -> Result<HealthReport> {
		let kind = CallKind::HealthCheck;
		let descriptor = RequestDescriptor::get(self.config.health_path.clone()).without_retry();

		obs::observe_call(kind, descriptor.method, &descriptor.path, async {
			let started = Instant::now();
			let response = self.run(&descriptor, kind, self.config.timeout, &mut Buffered).await?;

			Ok(HealthReport { status: response.status, latency: started.elapsed(), body: response.data })
		})
		.await
	}

	/// Dispatch loop shared by every call kind.
	///
	/// `consumer` turns a 2xx response into the call's output; a failure it reports goes
	/// through the same normalize/refresh/retry path as a failed dispatch. Each attempt, body
	/// included, runs under the descriptor's timeout or `default_timeout`.
	pub(crate) async fn run<C>(
		&self,
		descriptor: &RequestDescriptor,
		kind: CallKind,
		default_timeout: Duration,
		consumer: &mut C,
	) -> Result<C::Output>
	where
		C: Consume,
	{
		let timeout = descriptor.timeout.unwrap_or(default_timeout);
		let mut attempt = Attempt::default();
		let mut refreshed = None;

		loop {
			let credential = match refreshed.take() {
				Some(credential) => Some(credential),
				None => self.auth.current().await?,
			};
			let request_id = RequestId::generate();
			let request = self.build_request(descriptor, credential.as_ref(), &request_id)?;

			obs::trace_dispatch(request_id.as_str(), attempt.dispatch_index(), credential.is_some());

			let started = Instant::now();
			// The deadline spans the whole attempt, body included.
			let outcome = http::with_deadline(timeout, async {
				let outcome = http::exchange(self.transport.as_ref(), request).await;

				obs::trace_response(request_id.as_str(), observed_status(&outcome), started.elapsed());

				consumer.consume(outcome?, &request_id).await
			})
			.await;
			let failure = match outcome {
				Ok(output) => return Ok(output),
				Err(failure) => failure,
			};
			let error = self.normalizer.normalize(failure);

			if error.status() == Some(401) {
				let Some(stale) = credential.filter(|_| !attempt.auth_retried) else {
					return Err(error);
				};

				attempt.auth_retried = true;
				refreshed = Some(self.auth.refresh(Some(&stale)).await?);

				continue;
			}
			if !descriptor.retry {
				return Err(error);
			}

			let decision = self.retry_policy.should_retry(&error, attempt.retries + 1);

			if !decision.should_retry {
				return Err(error);
			}

			attempt.retries += 1;

			obs::trace_retry(&error, attempt.retries, decision.delay);
			obs::record_retry(kind, error.kind());

			tokio::time::sleep(decision.delay).await;
		}
	}

	fn build_request(
		&self,
		descriptor: &RequestDescriptor,
		credential: Option<&Credential>,
		request_id: &RequestId,
	) -> Result<TransportRequest> {
		let mut url = self.config.resolve(&descriptor.path)?;

		if !descriptor.query.is_empty() {
			url.query_pairs_mut().extend_pairs(descriptor.query.iter());
		}

		let mut headers = BTreeMap::from([
			("accept".to_owned(), "application/json".to_owned()),
			("x-requested-with".to_owned(), "XMLHttpRequest".to_owned()),
		]);
		let body = match &descriptor.body {
			RequestBody::Empty => TransportBody::Empty,
			RequestBody::Json(value) => {
				headers.insert("content-type".into(), "application/json".into());

				TransportBody::Bytes(Bytes::from(serde_json::to_vec(value)?))
			},
			RequestBody::Raw { bytes, content_type } => {
				headers.insert("content-type".into(), content_type.clone());

				TransportBody::Bytes(bytes.clone())
			},
			RequestBody::Multipart(upload) => TransportBody::Multipart(upload.clone()),
		};

		for (name, value) in self.config.default_headers.iter().chain(descriptor.headers.iter()) {
			headers.insert(name.to_ascii_lowercase(), value.clone());
		}

		if let Some(credential) = credential
			&& !headers.contains_key("authorization")
		{
			headers.insert("authorization".into(), credential.authorization());
		}

		headers.insert("x-request-id".into(), request_id.to_string());

		Ok(TransportRequest { method: descriptor.method, url, headers, body })
	}
}
impl<T> Clone for ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			normalizer: self.normalizer.clone(),
			auth: self.auth.clone(),
			config: self.config.clone(),
			retry_policy: self.retry_policy.clone(),
		}
	}
}
#[cfg(feature = "reqwest")]
impl ApiClient<ReqwestTransport> {
	/// Creates a client that provisions its own reqwest transport.
	pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self, ConfigError> {
		let transport = ReqwestTransport::build(config.user_agent.as_deref())?;

		Ok(Self::with_transport(config, transport, store))
	}
}
impl<T> Debug for ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("base_url", &self.config.base_url.as_str())
			.field("retry_policy", &self.retry_policy)
			.field("refresh_state", &self.auth.state())
			.finish()
	}
}

/// Result of [`ApiClient::health_check`].
#[derive(Clone, Debug, PartialEq)]
pub struct HealthReport {
	/// Status returned by the health endpoint.
	pub status: u16,
	/// Time from dispatch to decoded body.
	pub latency: Duration,
	/// Decoded body.
	pub body: Value,
}

/// Turns a successful transport response into a call's output.
pub(crate) trait Consume: Send {
	type Output: Send;

	fn consume(
		&mut self,
		response: TransportResponse,
		request_id: &RequestId,
	) -> impl Future<Output = Result<Self::Output, RawFailure>> + Send;
}

/// Buffers and decodes the body.
pub(crate) struct Buffered;
impl Consume for Buffered {
	type Output = ApiResponse;

	fn consume(
		&mut self,
		response: TransportResponse,
		request_id: &RequestId,
	) -> impl Future<Output = Result<Self::Output, RawFailure>> + Send {
		let request_id = request_id.clone();

		async move {
			let status = response.status;
			let headers = response.headers.clone();
			let body = response.bytes().await?;

			Ok(ApiResponse::decode(status, headers, &body, request_id))
		}
	}
}

fn observed_status(outcome: &Result<TransportResponse, RawFailure>) -> Option<u16> {
	match outcome {
		Ok(response) => Some(response.status),
		Err(RawFailure::Response { status, .. }) => Some(*status),
		Err(_) => None,
	}
}
