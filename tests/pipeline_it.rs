mod common;

// std
use std::{sync::Arc, time::Duration};
// crates.io
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
// self
use api_courier::{
	client::RequestDescriptor,
	config::ClientConfig,
	error::ErrorKind,
	http::Method,
};
use common::{BASE_URL, Reply, ScriptedTransport};

fn assert_gap(earlier: Instant, later: Instant, expected: Duration) {
	let gap = later - earlier;

	assert!(
		gap >= expected && gap < expected + Duration::from_millis(50),
		"Expected a gap of {expected:?}, observed {gap:?}."
	);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_exponentially_then_succeed() {
	let transport = Arc::new(ScriptedTransport::new());

	transport
		.push("/v1/products", Reply::status(503, ""))
		.push("/v1/products", Reply::status(503, "{\"message\":\"maintenance\"}"))
		.push("/v1/products", Reply::status(200, "{\"items\":[{\"sku\":\"A-1\"}]}"));

	let (client, _) = common::client(transport.clone());
	let response = client.get("/products?page=1").await.expect("Third attempt should succeed.");

	assert_eq!(response.status, 200);
	assert_eq!(response.data, json!({ "items": [{ "sku": "A-1" }] }));

	let seen = transport.seen_at("/v1/products");

	assert_eq!(seen.len(), 3);
	assert_eq!(seen[0].request.url.query(), Some("page=1"));
	assert_gap(seen[0].at, seen[1].at, Duration::from_millis(1_000));
	assert_gap(seen[1].at, seen[2].at, Duration::from_millis(2_000));

	let ids = seen.iter().filter_map(|seen| seen.header("x-request-id")).collect::<Vec<_>>();

	assert_eq!(ids.len(), 3);
	assert!(ids[0] != ids[1] && ids[1] != ids[2] && ids[0] != ids[2]);
	assert_eq!(response.request_id.as_str(), ids[2]);
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_the_configured_budget() {
	let transport = Arc::new(ScriptedTransport::new());

	for _ in 0..6 {
		transport.push("/v1/orders", Reply::status(502, ""));
	}

	let (client, _) = common::client(transport.clone());
	let started = Instant::now();
	let err = client.get("/orders").await.expect_err("Persistent 502s should surface.");

	assert_eq!(err.kind(), ErrorKind::ServerError);
	assert_eq!(err.status(), Some(502));
	assert_eq!(err.message(), "server error, please try again later");
	assert_eq!(transport.seen_at("/v1/orders").len(), 4);
	assert_gap(started, Instant::now(), Duration::from_millis(1_000 + 2_000 + 4_000));
}

#[tokio::test(start_paused = true)]
async fn budget_follows_configuration() {
	let transport = Arc::new(ScriptedTransport::new());

	for _ in 0..4 {
		transport.push("/v1/orders", Reply::status(429, ""));
	}

	let (client, _) = common::client_with(
		ClientConfig::builder(BASE_URL).retry_attempts(1).retry_base_delay(Duration::from_millis(200)),
		transport.clone(),
	);
	let err = client.get("/orders").await.expect_err("Rate limiting should surface.");
	let seen = transport.seen_at("/v1/orders");

	assert_eq!(err.kind(), ErrorKind::RateLimited);
	assert_eq!(seen.len(), 2);
	assert_gap(seen[0].at, seen[1].at, Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn validation_errors_surface_immediately() {
	let transport = Arc::new(ScriptedTransport::new());

	transport.push("/v1/users", Reply::status(422, "{\"message\":\"email required\"}"));

	let (client, _) = common::client(transport.clone());
	let started = Instant::now();
	let err = client
		.post("/users", &json!({ "name": "Ada" }))
		.await
		.expect_err("A 422 should not be retried.");

	assert_eq!(err.kind(), ErrorKind::Validation);
	assert_eq!(err.message(), "email required");
	assert_eq!(err.status(), Some(422));
	assert_eq!(transport.seen_at("/v1/users").len(), 1);
	assert_eq!(Instant::now(), started);
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_never_wait() {
	let transport = Arc::new(ScriptedTransport::new());

	transport
		.push("/v1/admin", Reply::status(403, ""))
		.push("/v1/admin", Reply::status(200, ""))
		.push("/v1/missing", Reply::status(404, ""))
		.push("/v1/missing", Reply::status(200, ""))
		.push("/v1/conflict", Reply::status(409, "{\"message\":\"already exists\",\"code\":\"E_DUP\"}"));

	let (client, _) = common::client(transport.clone());
	let started = Instant::now();
	let forbidden = client.get("/admin").await.expect_err("403 should surface.");
	let missing = client.delete("/missing").await.expect_err("404 should surface.");
	let conflict = client.put("/conflict", &json!({})).await.expect_err("409 should surface.");

	assert_eq!(forbidden.kind(), ErrorKind::Forbidden);
	assert_eq!(forbidden.message(), "you do not have permission to perform this action");
	assert_eq!(missing.kind(), ErrorKind::NotFound);
	assert_eq!(conflict.kind(), ErrorKind::Http);
	assert_eq!(conflict.code(), Some("E_DUP"));
	assert_eq!(transport.seen().len(), 3);
	assert_eq!(Instant::now(), started);
}

#[tokio::test(start_paused = true)]
async fn dropped_connections_are_retried_as_network_errors() {
	let transport = Arc::new(ScriptedTransport::new());

	transport
		.push("/v1/products", Reply::Drop)
		.push("/v1/products", Reply::status(200, "[]"));

	let (client, _) = common::client(transport.clone());
	let response = client.get("/products").await.expect("Retry after a reset should succeed.");

	assert_eq!(response.data, json!([]));
	assert_eq!(transport.seen_at("/v1/products").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn timeouts_become_network_errors() {
	let transport = Arc::new(ScriptedTransport::new());

	transport.push("/v1/slow", Reply::Hang);

	let (client, _) = common::client(transport.clone());
	let started = Instant::now();
	let err = client
		.send(RequestDescriptor::get("/slow").timeout(Duration::from_secs(5)).without_retry())
		.await
		.expect_err("A hanging request should time out.");

	assert_eq!(err.kind(), ErrorKind::Network);
	assert_eq!(err.message(), "network error, check connection");
	assert_gap(started, Instant::now(), Duration::from_secs(5));
	assert_eq!(transport.seen().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn default_timeout_is_fifteen_seconds() {
	let transport = Arc::new(ScriptedTransport::new());

	transport.push("/v1/slow", Reply::Hang);

	let (client, _) =
		common::client_with(ClientConfig::builder(BASE_URL).retry_attempts(0), transport.clone());
	let started = Instant::now();
	let err = client.get("/slow").await.expect_err("A hanging request should time out.");

	assert_eq!(err.kind(), ErrorKind::Network);
	assert_gap(started, Instant::now(), Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn stalled_bodies_time_out_as_network_errors() {
	let transport = Arc::new(ScriptedTransport::new());

	transport.push("/v1/products", Reply::Stall { prefix: "{\"par".into() });

	let (client, _) =
		common::client_with(ClientConfig::builder(BASE_URL).retry_attempts(0), transport.clone());
	let started = Instant::now();
	let err = tokio::time::timeout(Duration::from_secs(600), client.get("/products"))
		.await
		.expect("A stalled body must not outlive the request timeout.")
		.expect_err("A stalled body should time out.");

	assert_eq!(err.kind(), ErrorKind::Network);
	assert_gap(started, Instant::now(), Duration::from_secs(15));
	assert_eq!(transport.seen().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_bodies_are_retried() {
	let transport = Arc::new(ScriptedTransport::new());

	transport
		.push("/v1/products", Reply::Stall { prefix: "[".into() })
		.push("/v1/products", Reply::Stall { prefix: "[".into() })
		.push("/v1/products", Reply::status(200, "[]"));

	let (client, _) = common::client(transport.clone());
	let response = client.get("/products").await.expect("The third attempt should succeed.");

	assert_eq!(response.data, json!([]));

	let seen = transport.seen();

	assert_eq!(seen.len(), 3);
	assert_gap(seen[0].at, seen[1].at, Duration::from_secs(16));
	assert_gap(seen[1].at, seen[2].at, Duration::from_secs(17));
}

#[tokio::test]
async fn standard_headers_are_attached_and_overridable() {
	let transport = Arc::new(ScriptedTransport::new());

	transport
		.push("/v1/orders", Reply::status(201, "{\"id\":7}"))
		.push("/v1/export", Reply::status(200, "id,total\n7,10\n"));

	let (client, _) = common::client_with(
		ClientConfig::builder(BASE_URL).default_header("X-Client", "mobile"),
		transport.clone(),
	);

	client.post("/orders", &json!({ "sku": "A-1" })).await.expect("Create should succeed.");

	let export = client
		.send(RequestDescriptor::get("/export").header("Accept", "text/csv").header("X-Client", "cli"))
		.await
		.expect("Export should succeed.");
	let seen = transport.seen();
	let create = &seen[0];

	assert_eq!(create.request.method, Method::Post);
	assert_eq!(create.header("authorization"), Some("Bearer tok1"));
	assert_eq!(create.header("accept"), Some("application/json"));
	assert_eq!(create.header("content-type"), Some("application/json"));
	assert_eq!(create.header("x-requested-with"), Some("XMLHttpRequest"));
	assert_eq!(create.header("x-client"), Some("mobile"));
	assert!(create.header("x-request-id").is_some_and(|id| !id.is_empty()));
	assert_eq!(seen[1].header("accept"), Some("text/csv"));
	assert_eq!(seen[1].header("x-client"), Some("cli"));
	assert_eq!(seen[1].header("content-type"), None);
	assert_eq!(export.data, json!("id,total\n7,10\n"));
}

#[tokio::test]
async fn anonymous_requests_carry_no_authorization() {
	let transport = Arc::new(ScriptedTransport::new());

	transport.push("/v1/catalog", Reply::status(200, ""));

	let (client, _) = common::client(transport.clone());

	client.sign_out().await.expect("Sign-out should succeed.");

	let response = client.get("/catalog").await.expect("Anonymous request should succeed.");

	assert_eq!(response.data, serde_json::Value::Null);
	assert_eq!(transport.seen()[0].header("authorization"), None);
}

#[tokio::test]
async fn pagination_and_typed_bodies() {
	#[derive(Debug, Deserialize, PartialEq)]
	struct Product {
		sku: String,
		price: u32,
	}

	let transport = Arc::new(ScriptedTransport::new());

	transport
		.push(
			"/v1/products",
			Reply::status(200, "[{\"sku\":\"A-1\",\"price\":300}]")
				.with_header("X-Total-Count", "41")
				.with_header("X-Page-Count", "3"),
		)
		.push("/v1/products", Reply::status(200, "[{\"sku\":\"A-1\",\"price\":\"free\"}]"));

	let (client, _) = common::client(transport.clone());
	let response = client.get("/products").await.expect("Listing should succeed.");
	let pagination = response.pagination.expect("Pagination headers should be parsed.");

	assert_eq!((pagination.total, pagination.page), (41, 3));

	let typed = response.json::<Vec<Product>>().expect("Body should match the product shape.");

	assert_eq!(typed.data, vec![Product { sku: "A-1".into(), price: 300 }]);

	let err = client
		.get("/products")
		.await
		.expect("Listing should succeed.")
		.json::<Vec<Product>>()
		.expect_err("A string price should not decode.");

	assert_eq!(err.kind(), ErrorKind::Internal);
	assert!(err.message().contains("[0].price"), "{}", err.message());
}

#[tokio::test]
async fn health_check_reports_status_without_retrying() {
	let transport = Arc::new(ScriptedTransport::new());

	transport
		.push("/v1/health", Reply::status(200, "{\"status\":\"ok\"}"))
		.push("/v1/health", Reply::status(503, ""))
		.push("/v1/health", Reply::status(200, ""));

	let (client, _) = common::client(transport.clone());
	let report = client.health_check().await.expect("Healthy endpoint should report.");

	assert_eq!(report.status, 200);
	assert_eq!(report.body, json!({ "status": "ok" }));

	let err = client.health_check().await.expect_err("An unhealthy endpoint should surface.");

	assert_eq!(err.kind(), ErrorKind::ServerError);
	assert_eq!(transport.seen_at("/v1/health").len(), 2);
}
