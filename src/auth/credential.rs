//! Credential values, kinds, and registered identities.

// self
use crate::{
	_prelude::*,
	auth::{AppId, Secret},
};

/// The two credential flavors brokered per identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
	/// Primary credential fetched with the application secret.
	Token,
	/// Secondary credential fetched with a valid token.
	Ticket,
}
impl CredentialKind {
	/// Returns a stable label suitable for keys, span fields, and metric labels.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialKind::Token => "token",
			CredentialKind::Ticket => "ticket",
		}
	}
}
impl Display for CredentialKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// A registered application: public id plus private secret.
///
/// Identities are immutable once registered and live as long as the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
	/// Public application identifier.
	pub app_id: AppId,
	/// Secret presented to the issuer when minting tokens.
	pub secret: Secret,
}
impl Identity {
	/// Creates a new identity.
	pub fn new(app_id: AppId, secret: impl Into<String>) -> Self {
		Self { app_id, secret: Secret::new(secret) }
	}
}

/// Immutable credential with an absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	/// Which credential this is.
	pub kind: CredentialKind,
	/// Credential payload; callers must avoid logging it.
	pub value: Secret,
	/// Instant the broker received the credential.
	pub issued_at: OffsetDateTime,
	/// Instant from which the credential must no longer be used.
	pub expires_at: OffsetDateTime,
}
impl Credential {
	/// Builds a credential from an issuer-relative lifetime.
	pub fn issued(
		kind: CredentialKind,
		value: impl Into<String>,
		issued_at: OffsetDateTime,
		lifetime: Duration,
	) -> Self {
		Self { kind, value: Secret::new(value), issued_at, expires_at: issued_at + lifetime }
	}

	/// Returns `true` iff `instant` is strictly before the expiry.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		instant < self.expires_at
	}

	/// Remaining lifetime at `instant`, clamped to zero.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		let remaining = self.expires_at - instant;

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}

	/// Returns the payload. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		self.value.expose()
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("kind", &self.kind)
			.field("value", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}
