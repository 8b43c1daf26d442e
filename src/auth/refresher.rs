//! Refresh-call seam and the default implementation backed by the API's refresh endpoint.

// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	client::RequestId,
	config::ClientConfig,
	http::{self, HttpTransport, Method, TransportBody, TransportRequest},
	normalize::ErrorNormalizer,
	obs::{self, CallKind},
};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

/// Performs the network call that exchanges a rejected credential for a new one.
///
/// Implementations only make the call; single-flight coordination, persistence, and the
/// sign-out signal belong to [`AuthTokenManager`](crate::auth::AuthTokenManager).
pub trait TokenRefresher
where
	Self: 'static + Send + Sync,
{
	/// Exchanges `stale` (the credential the API rejected) for a fresh credential.
	fn refresh(&self, stale: Option<Credential>) -> RefreshFuture<'_>;
}

/// Refreshes by POSTing to `config.refresh_path` over the client's transport.
///
/// The request carries the rejected bearer token and, when one exists, a JSON body
/// `{"refresh_token": "..."}`. The response must contain `token` or `access_token` at the top
/// level or under `data`; a `refresh_token` field rotates the refresh secret, otherwise the old
/// one is kept.
pub struct EndpointRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	normalizer: Arc<dyn ErrorNormalizer>,
	config: Arc<ClientConfig>,
}
impl<T> EndpointRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a refresher sharing the client's transport, normalizer, and configuration.
	pub fn new(
		transport: Arc<T>,
		normalizer: Arc<dyn ErrorNormalizer>,
		config: Arc<ClientConfig>,
	) -> Self {
		Self { transport, normalizer, config }
	}

	fn request(&self, stale: Option<&Credential>) -> Result<TransportRequest> {
		let url = self.config.resolve(&self.config.refresh_path)?;
		let mut headers = self.config.default_headers.clone();

		headers.insert("accept".into(), "application/json".into());
		headers.insert("content-type".into(), "application/json".into());
		headers.insert("x-requested-with".into(), "XMLHttpRequest".into());
		headers.insert("x-request-id".into(), RequestId::generate().to_string());

		if let Some(credential) = stale {
			headers.insert("authorization".into(), credential.authorization());
		}

		let body = match stale.and_then(|credential| credential.refresh_token.as_ref()) {
			Some(secret) => serde_json::json!({ "refresh_token": secret.expose() }),
			None => serde_json::json!({}),
		};

		Ok(TransportRequest {
			method: Method::Post,
			url,
			headers,
			body: TransportBody::Bytes(Bytes::from(serde_json::to_vec(&body)?)),
		})
	}
}
impl<T> TokenRefresher for EndpointRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	fn refresh(&self, stale: Option<Credential>) -> RefreshFuture<'_> {
		Box::pin(async move {
			obs::observe_call(CallKind::Refresh, Method::Post, &self.config.refresh_path, async {
				let request = self.request(stale.as_ref())?;
				let body = http::with_deadline(self.config.timeout, async {
					http::exchange(self.transport.as_ref(), request).await?.bytes().await
				})
				.await
				.map_err(|failure| self.normalizer.normalize(failure))?;

				credential_from_body(&body, stale.as_ref())
			})
			.await
		})
	}
}
impl<T> Debug for EndpointRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EndpointRefresher").field("refresh_path", &self.config.refresh_path).finish()
	}
}

fn credential_from_body(body: &[u8], stale: Option<&Credential>) -> Result<Credential> {
	let payload: Value = serde_json::from_slice(body)?;
	let token = string_field(&payload, "token")
		.or_else(|| string_field(&payload, "access_token"))
		.ok_or_else(|| {
			NormalizedError::internal("Refresh response did not include an access token.")
		})?;
	let mut credential = Credential::bearer(token);

	credential.refresh_token = string_field(&payload, "refresh_token")
		.map(TokenSecret::new)
		.or_else(|| stale.and_then(|stale| stale.refresh_token.clone()));

	Ok(credential)
}

/// Looks `name` up at the top level, then under `data`.
fn string_field<'a>(payload: &'a Value, name: &str) -> Option<&'a str> {
	[Some(payload), payload.get("data")]
		.into_iter()
		.flatten()
		.find_map(|scope| scope.get(name).and_then(Value::as_str))
		.filter(|value| !value.is_empty())
}
