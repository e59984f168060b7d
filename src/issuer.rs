//! Upstream issuer contract and reply classification.
//!
//! An [`IssuerClient`] performs exactly one request per call. Retrying, caching, and
//! deduplication are the broker's job; the client only turns an issuer reply into an
//! [`IssuedCredential`] or a classified [`Error`].

#[cfg(feature = "reqwest")] mod reqwest;
#[cfg(feature = "reqwest")] pub use reqwest::ReqwestIssuerClient;

// self
use crate::{
	_prelude::*,
	auth::{AppId, CredentialKind, Secret},
	error::{ConfigError, TransportError},
};

/// Boxed future returned by [`IssuerClient`] calls.
pub type IssuerFuture<'a> = Pin<Box<dyn Future<Output = Result<IssuedCredential>> + 'a + Send>>;

/// Single-attempt access to the upstream credential endpoints.
pub trait IssuerClient
where
	Self: 'static + Send + Sync,
{
	/// Exchanges the application secret for an access token.
	fn fetch_token<'a>(&'a self, app_id: &'a AppId, secret: &'a Secret) -> IssuerFuture<'a>;

	/// Exchanges a valid access token for a JSAPI ticket.
	fn fetch_ticket<'a>(&'a self, app_id: &'a AppId, token: &'a str) -> IssuerFuture<'a>;
}

/// Credential payload plus the issuer-relative lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredential {
	/// Credential payload.
	pub value: Secret,
	/// Lifetime counted from the moment the reply was received.
	pub lifetime: Duration,
}
impl IssuedCredential {
	/// Builds an issued credential.
	pub fn new(value: impl Into<String>, lifetime: Duration) -> Self {
		Self { value: Secret::new(value), lifetime }
	}
}
impl Debug for IssuedCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IssuedCredential")
			.field("value", &self.value)
			.field("lifetime", &self.lifetime)
			.finish()
	}
}

/// Resolved issuer endpoint URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuerEndpoints {
	/// Token endpoint.
	pub token: Url,
	/// Ticket endpoint.
	pub ticket: Url,
}
impl IssuerEndpoints {
	/// Public production host.
	pub const DEFAULT_BASE_URL: &'static str = "https://api.weixin.qq.com";

	const TICKET_PATH: &'static str = "cgi-bin/ticket/getticket";
	const TOKEN_PATH: &'static str = "cgi-bin/token";

	/// Derives both endpoints from a base URL such as `https://api.weixin.qq.com`.
	pub fn from_base(base: &str) -> Result<Self, ConfigError> {
		let mut base = Url::parse(base).map_err(|source| ConfigError::InvalidEndpoint { source })?;

		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());

			base.set_path(&path);
		}

		let join = |path| base.join(path).map_err(|source| ConfigError::InvalidEndpoint { source });

		Ok(Self { token: join(Self::TOKEN_PATH)?, ticket: join(Self::TICKET_PATH)? })
	}

	/// Returns the endpoint serving `kind`.
	pub fn for_kind(&self, kind: CredentialKind) -> &Url {
		match kind {
			CredentialKind::Token => &self.token,
			CredentialKind::Ticket => &self.ticket,
		}
	}
}

/// Raw JSON envelope shared by both issuer endpoints.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IssuerReply {
	/// Application error code; absent or zero means success.
	#[serde(default)]
	pub errcode: i64,
	/// Human-readable error message.
	#[serde(default)]
	pub errmsg: String,
	/// Token payload.
	#[serde(default)]
	pub access_token: Option<String>,
	/// Ticket payload.
	#[serde(default)]
	pub ticket: Option<String>,
	/// Lifetime in seconds.
	#[serde(default)]
	pub expires_in: Option<i64>,
}
impl IssuerReply {
	/// Parses a reply body, keeping the JSON path of the first mismatch.
	pub fn parse(kind: CredentialKind, body: &[u8]) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_slice(body);

		serde_path_to_error::deserialize(&mut de).map_err(|source| {
			TransportError::MalformedBody { kind, source: Arc::new(source) }.into()
		})
	}

	/// Classifies the reply into a credential or an error.
	pub fn into_credential(self, kind: CredentialKind) -> Result<IssuedCredential> {
		if self.errcode != 0 {
			return Err(Error::IssuerRejected { code: self.errcode, message: self.errmsg });
		}

		let (value, field) = match kind {
			CredentialKind::Token => (self.access_token, "access_token"),
			CredentialKind::Ticket => (self.ticket, "ticket"),
		};
		let value = value
			.filter(|value| !value.is_empty())
			.ok_or(TransportError::IncompleteReply { kind, field })?;
		let expires_in = self
			.expires_in
			.filter(|secs| *secs > 0)
			.ok_or(TransportError::IncompleteReply { kind, field: "expires_in" })?;

		Ok(IssuedCredential::new(value, Duration::seconds(expires_in)))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn success_reply_yields_credential() {
		let reply = IssuerReply::parse(
			CredentialKind::Token,
			br#"{"access_token":"TOK1","expires_in":7200}"#,
		)
		.expect("Reply should parse.");
		let issued = reply.into_credential(CredentialKind::Token).expect("Reply should classify.");

		assert_eq!(issued.value.expose(), "TOK1");
		assert_eq!(issued.lifetime, Duration::seconds(7200));
	}

	#[test]
	fn zero_errcode_with_ticket_is_success() {
		let reply = IssuerReply::parse(
			CredentialKind::Ticket,
			br#"{"errcode":0,"errmsg":"ok","ticket":"TKT1","expires_in":7200}"#,
		)
		.expect("Reply should parse.");

		assert_eq!(
			reply
				.into_credential(CredentialKind::Ticket)
				.expect("Reply should classify.")
				.value
				.expose(),
			"TKT1"
		);
	}

	#[test]
	fn non_zero_errcode_is_issuer_rejection() {
		let reply = IssuerReply::parse(
			CredentialKind::Token,
			br#"{"errcode":40013,"errmsg":"invalid appid"}"#,
		)
		.expect("Reply should parse.");

		match reply.into_credential(CredentialKind::Token) {
			Err(Error::IssuerRejected { code, message }) => {
				assert_eq!(code, 40013);
				assert_eq!(message, "invalid appid");
			},
			other => panic!("Unexpected classification: {other:?}"),
		}
	}

	#[test]
	fn missing_payload_or_lifetime_is_incomplete() {
		let missing = IssuerReply::parse(CredentialKind::Token, br#"{"expires_in":7200}"#)
			.expect("Reply should parse.")
			.into_credential(CredentialKind::Token);

		assert!(matches!(
			missing,
			Err(Error::Transport(TransportError::IncompleteReply { field: "access_token", .. }))
		));

		let zero = IssuerReply::parse(CredentialKind::Ticket, br#"{"ticket":"T","expires_in":0}"#)
			.expect("Reply should parse.")
			.into_credential(CredentialKind::Ticket);

		assert!(matches!(
			zero,
			Err(Error::Transport(TransportError::IncompleteReply { field: "expires_in", .. }))
		));
	}

	#[test]
	fn malformed_body_reports_path() {
		let err = IssuerReply::parse(CredentialKind::Token, br#"{"expires_in":"soon"}"#)
			.expect_err("String lifetime should fail to parse.");

		match err {
			Error::Transport(TransportError::MalformedBody { source, .. }) => {
				assert_eq!(source.path().to_string(), "expires_in");
			},
			other => panic!("Unexpected error: {other:?}"),
		}
	}

	#[test]
	fn endpoints_join_base_url() {
		let endpoints =
			IssuerEndpoints::from_base("http://127.0.0.1:9000/mock").expect("Base should parse.");

		assert_eq!(endpoints.token.as_str(), "http://127.0.0.1:9000/mock/cgi-bin/token");
		assert_eq!(
			endpoints.for_kind(CredentialKind::Ticket).as_str(),
			"http://127.0.0.1:9000/mock/cgi-bin/ticket/getticket"
		);
		assert!(IssuerEndpoints::from_base(IssuerEndpoints::DEFAULT_BASE_URL).is_ok());
		assert!(IssuerEndpoints::from_base("not a url").is_err());
	}
}
