//! HTTP client for a running broker service.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	auth::{AppId, Credential, CredentialKind, Secret},
	cache::{CacheKey, CredentialCache, MemoryCache},
	clock::{Clock, SystemClock},
	error::{ConfigError, TransportError},
	flight::SingleFlight,
	retry::RetryPolicy,
	source::{CredentialReply, CredentialSource, ErrorReply, SourceFuture},
};

/// [`CredentialSource`] backed by a broker service's `/token` and `/ticket` endpoints.
///
/// Credentials are cached locally until the absolute expiry reported by the service, and
/// concurrent misses per key share one request.
///
/// The service already retries the issuer, so a single attempt is made by default. A custom
/// [`RetryPolicy`] only applies when the service itself cannot be reached or times out; any
/// answer from the service is final.
#[derive(Clone)]
pub struct RemoteBroker {
	client: ReqwestClient,
	base: Url,
	timeout: StdDuration,
	retry: RetryPolicy,
	cache: Arc<MemoryCache>,
	clock: Arc<dyn Clock>,
	flights: Arc<SingleFlight<CacheKey, Result<Credential>>>,
}
impl RemoteBroker {
	/// Default per-request timeout.
	pub const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(10);

	/// Creates a client for the service at `base`, for example `http://127.0.0.1:8080`.
	pub fn new(base: &str) -> Result<Self, ConfigError> {
		Self::with_client(ReqwestClient::builder().build()?, base)
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient, base: &str) -> Result<Self, ConfigError> {
		let mut base = Url::parse(base).map_err(|source| ConfigError::InvalidEndpoint { source })?;

		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());

			base.set_path(&path);
		}

		Ok(Self {
			client,
			base,
			timeout: Self::DEFAULT_TIMEOUT,
			retry: RetryPolicy::single_attempt(),
			cache: Default::default(),
			clock: Arc::new(SystemClock),
			flights: Default::default(),
		})
	}

	/// Replaces the retry policy used when the service cannot be reached.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Replaces the time source used for local expiry checks.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Overrides the per-request timeout.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}

	async fn get(&self, kind: CredentialKind, app_id: &str) -> Result<Credential> {
		let app_id = AppId::new(app_id).map_err(ConfigError::from)?;
		let key = CacheKey::new(app_id, kind);

		if let Some(hit) = self.cache.get(&key, self.clock.now()) {
			return Ok(hit);
		}

		let remote = self.clone();

		self.flights.run(key.clone(), move || async move { remote.refresh(key).await }).await
	}

	async fn refresh(&self, key: CacheKey) -> Result<Credential> {
		if let Some(hit) = self.cache.get(&key, self.clock.now()) {
			return Ok(hit);
		}

		let credential = self
			.retry
			.run(|_| self.fetch(key.kind, &key.app_id), |e| !is_unreachable(e))
			.await?;

		self.cache.put(key, credential.clone());

		Ok(credential)
	}

	async fn fetch(&self, kind: CredentialKind, app_id: &AppId) -> Result<Credential> {
		let mut url = self
			.base
			.join(kind.as_str())
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;

		url.query_pairs_mut().append_pair("appid", app_id.as_str());

		let response = self
			.client
			.get(url)
			.timeout(self.timeout)
			.send()
			.await
			.map_err(|e| TransportError::from_reqwest(kind, e))?;
		let status = response.status();
		let body = response.bytes().await.map_err(|e| TransportError::from_reqwest(kind, e))?;

		if !status.is_success() {
			return Err(map_error_reply(kind, app_id, status.as_u16(), &body));
		}

		let mut de = serde_json::Deserializer::from_slice(&body);
		let reply: CredentialReply = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| TransportError::MalformedBody { kind, source: Arc::new(source) })?;
		let value = reply
			.value(kind)
			.ok_or(TransportError::IncompleteReply { kind, field: kind.as_str() })?;
		let expires_at = OffsetDateTime::from_unix_timestamp(reply.expires_at)
			.map_err(|_| TransportError::IncompleteReply { kind, field: "expires_at" })?;

		Ok(Credential {
			kind,
			value: Secret::new(value),
			issued_at: self.clock.now(),
			expires_at,
		})
	}
}
impl CredentialSource for RemoteBroker {
	fn get_token<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a> {
		Box::pin(self.get(CredentialKind::Token, app_id))
	}

	fn get_ticket<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a> {
		Box::pin(self.get(CredentialKind::Ticket, app_id))
	}
}
impl Debug for RemoteBroker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RemoteBroker")
			.field("base", &self.base.as_str())
			.field("retry", &self.retry)
			.field("cached", &self.cache.len())
			.finish()
	}
}

fn is_unreachable(err: &Error) -> bool {
	matches!(err, Error::Transport(TransportError::Network { .. } | TransportError::Timeout { .. }))
}

// A 502 carrying the issuer's own code is an issuer rejection; any other failure status is a
// transport error.
fn map_error_reply(kind: CredentialKind, app_id: &AppId, status: u16, body: &[u8]) -> Error {
	let Ok(reply) = serde_json::from_slice::<ErrorReply>(body) else {
		return TransportError::http_status(kind, status, body).into();
	};

	match status {
		400 => Error::InvalidRequest { reason: reply.errmsg },
		404 => Error::UnregisteredIdentity { app_id: app_id.to_string() },
		502 if reply.errcode != i64::from(status) =>
			Error::IssuerRejected { code: reply.errcode, message: reply.errmsg },
		_ => TransportError::http_status(kind, status, body).into(),
	}
}
