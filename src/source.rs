//! Uniform credential access for in-process and remote brokers.
//!
//! Downstream API clients depend on [`CredentialSource`] instead of a concrete broker, so the
//! same retry and deduplication policy applies whether credentials come from a local
//! [`Broker`] or from a broker service reached over HTTP through [`RemoteBroker`].

#[cfg(feature = "reqwest")] mod remote;
#[cfg(feature = "reqwest")] pub use remote::RemoteBroker;

// crates.io
use time::{UtcOffset, macros::format_description};
// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialKind},
	broker::Broker,
	issuer::IssuerClient,
};

/// Boxed future returned by [`CredentialSource`] calls.
pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

/// Anything that can hand out valid tokens and tickets by application id.
pub trait CredentialSource
where
	Self: Send + Sync,
{
	/// Returns a valid access token for `app_id`.
	fn get_token<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a>;

	/// Returns a valid JSAPI ticket for `app_id`.
	fn get_ticket<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a>;
}
impl<I> CredentialSource for Broker<I>
where
	I: ?Sized + IssuerClient,
{
	fn get_token<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a> {
		Box::pin(Broker::<I>::get_token(self, app_id))
	}

	fn get_ticket<'a>(&'a self, app_id: &'a str) -> SourceFuture<'a> {
		Box::pin(Broker::<I>::get_ticket(self, app_id))
	}
}

/// Success body returned by the broker service.
///
/// Exactly one of `token` and `ticket` is present, matching the endpoint that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialReply {
	/// Access token payload (`/token`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	/// JSAPI ticket payload (`/ticket`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ticket: Option<String>,
	/// Expiry rendered as `YYYY-MM-DD hh:mm:ss` in the service's local time.
	pub expired: String,
	/// Expiry as a Unix timestamp in seconds.
	pub expires_at: i64,
}
impl CredentialReply {
	/// Renders `credential` with its expiry shown at `offset`.
	pub fn new(credential: &Credential, offset: UtcOffset) -> Self {
		let value = Some(credential.expose().to_owned());
		let (token, ticket) = match credential.kind {
			CredentialKind::Token => (value, None),
			CredentialKind::Ticket => (None, value),
		};

		Self {
			token,
			ticket,
			expired: format_expiry(credential.expires_at, offset),
			expires_at: credential.expires_at.unix_timestamp(),
		}
	}

	/// Payload for `kind`, if present and non-empty.
	pub fn value(&self, kind: CredentialKind) -> Option<&str> {
		match kind {
			CredentialKind::Token => self.token.as_deref(),
			CredentialKind::Ticket => self.ticket.as_deref(),
		}
		.filter(|value| !value.is_empty())
	}
}

/// Failure body returned by the broker service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
	/// Issuer error code when the issuer refused, otherwise the HTTP status code.
	pub errcode: i64,
	/// Human-readable message.
	pub errmsg: String,
}

/// Formats `instant` as `YYYY-MM-DD hh:mm:ss` at `offset`.
pub fn format_expiry(instant: OffsetDateTime, offset: UtcOffset) -> String {
	let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

	instant.to_offset(offset).format(format).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn expiry_is_rendered_at_offset() {
		let instant = macros::datetime!(2025-11-10 14:00:05 UTC);

		assert_eq!(format_expiry(instant, UtcOffset::UTC), "2025-11-10 14:00:05");
		assert_eq!(format_expiry(instant, macros::offset!(+8)), "2025-11-10 22:00:05");
	}

	#[test]
	fn reply_carries_only_matching_field() {
		let credential = Credential::issued(
			CredentialKind::Ticket,
			"TKT1",
			macros::datetime!(2025-11-10 12:00 UTC),
			Duration::seconds(7200),
		);
		let reply = CredentialReply::new(&credential, UtcOffset::UTC);
		let json = serde_json::to_value(&reply).expect("Reply should serialize.");

		assert_eq!(
			json,
			serde_json::json!({
				"ticket": "TKT1",
				"expired": "2025-11-10 14:00:00",
				"expires_at": 1_762_783_200,
			})
		);
		assert_eq!(reply.value(CredentialKind::Ticket), Some("TKT1"));
		assert_eq!(reply.value(CredentialKind::Token), None);
	}
}
