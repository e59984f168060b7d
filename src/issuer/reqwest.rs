//! reqwest-backed [`IssuerClient`].

// std
use std::time::Duration as StdDuration;
// crates.io
use reqwest::redirect::Policy;
// self
use crate::{
	_prelude::*,
	auth::{AppId, CredentialKind, Secret},
	error::{ConfigError, TransportError},
	issuer::{IssuedCredential, IssuerClient, IssuerEndpoints, IssuerFuture, IssuerReply},
};

/// Issuer client talking to the upstream HTTP API.
///
/// Issuer endpoints answer directly, so the default client never follows redirects.
/// Every request carries its own timeout, independent of the retry budget around it.
#[derive(Clone, Debug)]
pub struct ReqwestIssuerClient {
	client: ReqwestClient,
	endpoints: IssuerEndpoints,
	timeout: StdDuration,
}
impl ReqwestIssuerClient {
	/// Default per-request timeout.
	pub const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(10);

	/// Builds a client for the given endpoints with a dedicated reqwest client.
	pub fn new(endpoints: IssuerEndpoints) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self::with_client(client, endpoints))
	}

	/// Builds a client for the public production host.
	pub fn production() -> Result<Self, ConfigError> {
		Self::new(IssuerEndpoints::from_base(IssuerEndpoints::DEFAULT_BASE_URL)?)
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient, endpoints: IssuerEndpoints) -> Self {
		Self { client, endpoints, timeout: Self::DEFAULT_TIMEOUT }
	}

	/// Overrides the per-request timeout.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Endpoints this client calls.
	pub fn endpoints(&self) -> &IssuerEndpoints {
		&self.endpoints
	}

	async fn fetch(&self, kind: CredentialKind, url: Url) -> Result<IssuedCredential> {
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
			return Err(TransportError::http_status(kind, status.as_u16(), &body).into());
		}

		IssuerReply::parse(kind, &body)?.into_credential(kind)
	}
}
impl IssuerClient for ReqwestIssuerClient {
	fn fetch_token<'a>(&'a self, app_id: &'a AppId, secret: &'a Secret) -> IssuerFuture<'a> {
		let mut url = self.endpoints.token.clone();

		url.query_pairs_mut()
			.append_pair("grant_type", "client_credential")
			.append_pair("appid", app_id.as_str())
			.append_pair("secret", secret.expose());

		Box::pin(self.fetch(CredentialKind::Token, url))
	}

	fn fetch_ticket<'a>(&'a self, _app_id: &'a AppId, token: &'a str) -> IssuerFuture<'a> {
		let mut url = self.endpoints.ticket.clone();

		url.query_pairs_mut().append_pair("access_token", token).append_pair("type", "jsapi");

		Box::pin(self.fetch(CredentialKind::Ticket, url))
	}
}
