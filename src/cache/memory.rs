//! Thread-safe in-memory [`CredentialCache`] implementation.

// self
use crate::{
	_prelude::*,
	auth::Credential,
	cache::{CacheKey, CredentialCache},
};

type CacheMap = Arc<RwLock<HashMap<CacheKey, Credential>>>;

/// Process-local credential table; clones share the same entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache(CacheMap);
impl MemoryCache {
	/// Number of stored entries, including expired ones.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` if nothing has been stored yet.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	/// Returns the raw entry regardless of validity.
	pub fn peek(&self, key: &CacheKey) -> Option<Credential> {
		self.0.read().get(key).cloned()
	}
}
impl CredentialCache for MemoryCache {
	fn get(&self, key: &CacheKey, now: OffsetDateTime) -> Option<Credential> {
		self.0.read().get(key).filter(|credential| credential.is_valid_at(now)).cloned()
	}

	fn put(&self, key: CacheKey, credential: Credential) {
		self.0.write().insert(key, credential);
	}

	fn invalidate(&self, key: &CacheKey, value: &str) -> bool {
		let mut guard = self.0.write();
		let matches = guard.get(key).is_some_and(|current| current.expose() == value);

		if matches {
			guard.remove(key);
		}

		matches
	}
}
