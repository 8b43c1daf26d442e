//! Scripted in-process transport shared by the integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::{BTreeMap, VecDeque},
	io,
	sync::Arc,
	time::Duration,
};
// crates.io
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::time::Instant;
// self
use api_courier::{
	auth::Credential,
	bytes::Bytes,
	client::ApiClient,
	config::{ClientConfig, ClientConfigBuilder},
	http::{HttpTransport, TransportBody, TransportFuture, TransportRequest, TransportResponse},
	normalize::RawFailure,
	store::MemoryTokenStore,
};

pub const BASE_URL: &str = "https://api.example.com/v1";

/// One scripted reply.
#[derive(Clone, Debug)]
pub enum Reply {
	/// Full response.
	Status { status: u16, headers: Vec<(String, String)>, body: String },
	/// Connection failure before any response.
	Drop,
	/// `200` whose body stream breaks after `prefix`.
	Broken { prefix: String },
	/// `200` whose body stream stops after `prefix` and never finishes.
	Stall { prefix: String },
	/// Never answers.
	Hang,
}
impl Reply {
	pub fn status(status: u16, body: &str) -> Self {
		Self::Status { status, headers: Vec::new(), body: body.to_owned() }
	}

	pub fn with_header(self, name: &str, value: &str) -> Self {
		match self {
			Self::Status { status, mut headers, body } => {
				headers.push((name.to_ascii_lowercase(), value.to_owned()));

				Self::Status { status, headers, body }
			},
			other => other,
		}
	}
}

/// Request as seen by the transport, stamped with the virtual clock.
#[derive(Clone, Debug)]
pub struct Seen {
	pub request: TransportRequest,
	pub at: Instant,
	pub uploaded: usize,
}
impl Seen {
	pub fn header(&self, name: &str) -> Option<&str> {
		self.request.header(name)
	}

	pub fn path(&self) -> &str {
		self.request.url.path()
	}
}

/// Transport replying from per-path queues; every reply waits `latency` first.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
	replies: Mutex<BTreeMap<String, VecDeque<Reply>>>,
	seen: Mutex<Vec<Seen>>,
	latency: Duration,
}
impl ScriptedTransport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_latency(latency: Duration) -> Self {
		Self { latency, ..Self::default() }
	}

	/// Queues `reply` for requests whose URL path is `path` (including the `/v1` base path).
	pub fn push(&self, path: &str, reply: Reply) -> &Self {
		self.replies.lock().entry(path.to_owned()).or_default().push_back(reply);

		self
	}

	pub fn seen(&self) -> Vec<Seen> {
		self.seen.lock().clone()
	}

	pub fn seen_at(&self, path: &str) -> Vec<Seen> {
		self.seen.lock().iter().filter(|seen| seen.path() == path).cloned().collect()
	}
}
impl HttpTransport for ScriptedTransport {
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
		let path = request.url.path().to_owned();
		let reply = self.replies.lock().get_mut(&path).and_then(VecDeque::pop_front);
		// Draining the chunks stands in for writing the body to the socket.
		let uploaded = match &request.body {
			TransportBody::Multipart(upload) => upload.chunks().map(|chunk| chunk.len()).sum(),
			TransportBody::Bytes(bytes) => bytes.len(),
			TransportBody::Empty => 0,
		};

		self.seen.lock().push(Seen { request, at: Instant::now(), uploaded });

		Box::pin(async move {
			tokio::time::sleep(self.latency).await;

			match reply {
				Some(Reply::Status { status, headers, body }) => Ok(TransportResponse::buffered(
					status,
					headers.into_iter().collect(),
					body,
				)),
				Some(Reply::Drop) => Err(RawFailure::transport(io::Error::new(
					io::ErrorKind::ConnectionReset,
					"connection reset by peer",
				))),
				Some(Reply::Broken { prefix }) => {
					let chunks: Vec<Result<Bytes, RawFailure>> = vec![
						Ok(Bytes::from(prefix)),
						Err(RawFailure::transport(io::Error::new(
							io::ErrorKind::UnexpectedEof,
							"body cut short",
						))),
					];

					Ok(TransportResponse {
						status: 200,
						headers: BTreeMap::new(),
						body: Box::pin(stream::iter(chunks)),
					})
				},
				Some(Reply::Stall { prefix }) => {
					let head = stream::iter([Ok::<_, RawFailure>(Bytes::from(prefix))]);

					Ok(TransportResponse {
						status: 200,
						headers: BTreeMap::new(),
						body: Box::pin(head.chain(stream::pending())),
					})
				},
				Some(Reply::Hang) => futures::future::pending().await,
				None => Err(RawFailure::build(format!("No scripted reply for `{path}`."))),
			}
		})
	}
}

/// Client over `transport` with the default configuration and a signed-in `tok1`.
pub fn client(transport: Arc<ScriptedTransport>) -> (ApiClient<ScriptedTransport>, MemoryTokenStore) {
	client_with(ClientConfig::builder(BASE_URL), transport)
}

pub fn client_with(
	builder: ClientConfigBuilder,
	transport: Arc<ScriptedTransport>,
) -> (ApiClient<ScriptedTransport>, MemoryTokenStore) {
	let config = builder.build().expect("Test configuration should build.");
	let store = MemoryTokenStore::with_credential(Credential::bearer("tok1"));
	let client = ApiClient::with_transport(config, transport, Arc::new(store.clone()));

	(client, store)
}
