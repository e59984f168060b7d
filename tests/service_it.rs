#![cfg(all(feature = "test", feature = "service"))]

// std
use std::{io, time::Duration as StdDuration};
// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
use time::{UtcOffset, macros};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
// self
use credential_broker::{
	_preludet::*,
	broker::Broker,
	clock::ManualClock,
	issuer::{IssuerEndpoints, ReqwestIssuerClient},
	retry::RetryPolicy,
	service::{self, ServiceState},
	source::{CredentialSource, ErrorReply, RemoteBroker},
};

struct Harness {
	base: String,
	shutdown: oneshot::Sender<()>,
	server: JoinHandle<io::Result<()>>,
}
impl Harness {
	async fn start(issuer: &MockServer) -> Self {
		Self::start_with(issuer, RetryPolicy::single_attempt()).await
	}

	async fn start_with(issuer: &MockServer, retry: RetryPolicy) -> Self {
		let endpoints =
			IssuerEndpoints::from_base(&issuer.base_url()).expect("Mock base URL should be valid.");
		let client = ReqwestIssuerClient::new(endpoints).expect("Issuer client should build.");
		let broker = Broker::<ReqwestIssuerClient>::new(client)
			.with_clock(Arc::new(clock()))
			.with_retry(retry);

		broker.register("wx1", "s1").expect("Fixture identity should register.");

		let listener = TcpListener::bind("127.0.0.1:0").await.expect("Listener should bind.");
		let base =
			format!("http://{}", listener.local_addr().expect("Listener should have an address."));
		let (shutdown, signal) = oneshot::channel::<()>();
		let server = tokio::spawn(async move {
			service::serve(listener, ServiceState::new(broker, UtcOffset::UTC), async move {
				let _ = signal.await;
			})
			.await
		});

		Self { base, shutdown, server }
	}

	async fn get(&self, path: &str) -> (u16, Value) {
		let response = ReqwestClient::new()
			.get(format!("{}{path}", self.base))
			.send()
			.await
			.expect("Service should answer.");
		let status = response.status().as_u16();
		let body = response.bytes().await.expect("Body should be readable.");

		(status, serde_json::from_slice(&body).expect("Body should be JSON."))
	}

	async fn stop(self) {
		self.shutdown.send(()).expect("Server should still be running.");
		self.server
			.await
			.expect("Server task should not panic.")
			.expect("Server should shut down cleanly.");
	}
}

fn clock() -> ManualClock {
	ManualClock::new(macros::datetime!(2025-11-10 08:00 UTC))
}

async fn mock_token(issuer: &MockServer) -> httpmock::Mock<'_> {
	issuer
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/token").query_param("appid", "wx1");
			then.status(200).json_body(json!({ "access_token": "TOK1", "expires_in": 7200 }));
		})
		.await
}

async fn mock_ticket(issuer: &MockServer) -> httpmock::Mock<'_> {
	issuer
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/ticket/getticket").query_param("access_token", "TOK1");
			then.status(200).json_body(json!({
				"errcode": 0,
				"errmsg": "ok",
				"ticket": "TKT1",
				"expires_in": 7200,
			}));
		})
		.await
}

#[tokio::test]
async fn token_and_ticket_routes_render_expiry() {
	let issuer = MockServer::start_async().await;
	let token_mock = mock_token(&issuer).await;
	let ticket_mock = mock_ticket(&issuer).await;
	let harness = Harness::start(&issuer).await;

	assert_eq!(
		harness.get("/token?appid=wx1").await,
		(
			200,
			json!({
				"token": "TOK1",
				"expired": "2025-11-10 10:00:00",
				"expires_at": 1_762_768_800,
			})
		)
	);
	assert_eq!(
		harness.get("/ticket?appid=wx1").await,
		(
			200,
			json!({
				"ticket": "TKT1",
				"expired": "2025-11-10 10:00:00",
				"expires_at": 1_762_768_800,
			})
		)
	);

	token_mock.assert_calls_async(1).await;
	ticket_mock.assert_calls_async(1).await;
	harness.stop().await;
}

#[tokio::test]
async fn request_errors_have_distinct_statuses() {
	let issuer = MockServer::start_async().await;
	let token_mock = mock_token(&issuer).await;
	let harness = Harness::start(&issuer).await;

	for path in ["/token", "/token?appid=", "/ticket"] {
		let (status, body) = harness.get(path).await;

		assert_eq!(status, 400, "Missing appid should be rejected: {path}.");
		assert_eq!(body["errcode"], 400);
	}
	for path in ["/token?appid=wxbad", "/ticket?appid=wxbad", "/token?appid=wx%20bad"] {
		let (status, _) = harness.get(path).await;

		assert_eq!(status, 404, "Unknown appid should be reported: {path}.");
	}

	token_mock.assert_calls_async(0).await;
	harness.stop().await;
}

#[tokio::test]
async fn issuer_failure_is_a_bad_gateway() {
	let issuer = MockServer::start_async().await;

	issuer
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/token");
			then.status(200).json_body(json!({ "errcode": 40164, "errmsg": "invalid ip" }));
		})
		.await;

	let harness = Harness::start(&issuer).await;
	let (status, body) = harness.get("/token?appid=wx1").await;
	let reply: ErrorReply = serde_json::from_value(body).expect("Error body should match.");

	assert_eq!(status, 502);
	assert_eq!(reply.errcode, 40164);
	assert_eq!(reply.errmsg, "invalid ip");

	harness.stop().await;
}

#[tokio::test]
async fn health_reports_identity_count() {
	let issuer = MockServer::start_async().await;
	let harness = Harness::start(&issuer).await;

	assert_eq!(harness.get("/health").await, (200, json!({ "status": "ok", "identities": 1 })));

	harness.stop().await;
}

#[tokio::test]
async fn shutdown_drains_in_flight_request() {
	let issuer = MockServer::start_async().await;

	issuer
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/token");
			then.status(200)
				.delay(StdDuration::from_millis(300))
				.json_body(json!({ "access_token": "TOK1", "expires_in": 7200 }));
		})
		.await;

	let harness = Harness::start(&issuer).await;
	let url = format!("{}/token?appid=wx1", harness.base);
	let request = tokio::spawn(async move { ReqwestClient::new().get(url).send().await });

	tokio::time::sleep(StdDuration::from_millis(100)).await;
	harness.stop().await;

	let response = request
		.await
		.expect("Request task should not panic.")
		.expect("In-flight request should complete.");

	assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn remote_broker_shares_policy_with_service() {
	let issuer = MockServer::start_async().await;
	let token_mock = mock_token(&issuer).await;
	let ticket_mock = mock_ticket(&issuer).await;
	let harness = Harness::start(&issuer).await;
	let remote = RemoteBroker::new(&harness.base)
		.expect("Remote broker should build.")
		.with_clock(Arc::new(clock()))
		.with_retry(RetryPolicy::single_attempt());
	let source: &dyn CredentialSource = &remote;
	let token = source.get_token("wx1").await.expect("Remote token should be fetched.");
	let cached = source.get_token("wx1").await.expect("Remote token should be cached.");
	let ticket = source.get_ticket("wx1").await.expect("Remote ticket should be fetched.");

	assert_eq!(token.expose(), "TOK1");
	assert_eq!(cached.expires_at, macros::datetime!(2025-11-10 10:00 UTC));
	assert_eq!(ticket.expose(), "TKT1");
	assert!(matches!(
		source.get_token("wxbad").await,
		Err(Error::UnregisteredIdentity { app_id }) if app_id == "wxbad"
	));

	token_mock.assert_calls_async(1).await;
	ticket_mock.assert_calls_async(1).await;
	harness.stop().await;
}

#[tokio::test]
async fn remote_failure_costs_only_the_service_retries() {
	let issuer = MockServer::start_async().await;
	let mock = issuer
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/token");
			then.status(200).json_body(json!({ "errcode": -1, "errmsg": "system busy" }));
		})
		.await;
	let retry = RetryPolicy::new(3, StdDuration::from_millis(1)).expect("Policy should be valid.");
	let harness = Harness::start_with(&issuer, retry).await;
	let remote = RemoteBroker::new(&harness.base)
		.expect("Remote broker should build.")
		.with_clock(Arc::new(clock()))
		.with_retry(retry);
	let err = remote.get_token("wx1").await.expect_err("Issuer failure should surface.");

	match err {
		Error::IssuerRejected { code, message } => {
			assert_eq!(code, -1);
			assert_eq!(message, "system busy");
		},
		other => panic!("Unexpected error: {other:?}."),
	}

	mock.assert_calls_async(3).await;
	harness.stop().await;
}
