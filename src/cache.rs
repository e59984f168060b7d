//! Credential cache contract and the built-in in-memory implementation.

pub mod memory;

pub use memory::MemoryCache;

// self
use crate::{
	_prelude::*,
	auth::{AppId, Credential, CredentialKind},
};

/// Expiry-aware credential table keyed by identity and credential kind.
///
/// Implementations must make [`put`](CredentialCache::put) atomic with respect to
/// concurrent readers: a reader observes either the previous credential or the new one.
pub trait CredentialCache
where
	Self: Send + Sync,
{
	/// Returns the stored credential only if it is still valid at `now`.
	///
	/// Expired and absent entries are indistinguishable to callers.
	fn get(&self, key: &CacheKey, now: OffsetDateTime) -> Option<Credential>;

	/// Unconditionally replaces the entry for `key`.
	fn put(&self, key: CacheKey, credential: Credential);

	/// Removes the entry for `key` if it still holds `value`, returning whether it did.
	fn invalidate(&self, key: &CacheKey, value: &str) -> bool;
}

/// Unique key identifying one cached credential.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
	/// Identity the credential belongs to.
	pub app_id: AppId,
	/// Credential flavor.
	pub kind: CredentialKind,
}
impl CacheKey {
	/// Builds a key for the given identity and kind.
	pub fn new(app_id: AppId, kind: CredentialKind) -> Self {
		Self { app_id, kind }
	}

	/// Token key for `app_id`.
	pub fn token(app_id: AppId) -> Self {
		Self::new(app_id, CredentialKind::Token)
	}

	/// Ticket key for `app_id`.
	pub fn ticket(app_id: AppId) -> Self {
		Self::new(app_id, CredentialKind::Ticket)
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}:{}", self.kind, self.app_id)
	}
}
