//! Credential broker composing the cache, single-flight coordinator, and retry policy.
//!
//! [`Broker::get_token`] and [`Broker::get_ticket`] answer from the cache when possible. On a
//! miss, exactly one refresh per key runs at a time; every concurrent caller for that key
//! shares its outcome. Failures are never cached.

mod metrics;
mod ticket;
mod token;

pub use metrics::RefreshMetrics;

// std
use std::collections::hash_map::Entry;
// self
use crate::{
	_prelude::*,
	auth::{AppId, Credential, CredentialKind, Identity},
	cache::{CacheKey, CredentialCache, MemoryCache},
	clock::{Clock, SystemClock},
	error::ConfigError,
	flight::SingleFlight,
	issuer::{IssuedCredential, IssuerClient, IssuerFuture},
	obs::{self, FlowOutcome},
	retry::RetryPolicy,
};
#[cfg(feature = "reqwest")] use crate::issuer::ReqwestIssuerClient;

#[cfg(feature = "reqwest")]
/// Broker specialized for the crate's default reqwest issuer client.
pub type ReqwestBroker = Broker<ReqwestIssuerClient>;

type Identities = Arc<RwLock<HashMap<AppId, Identity>>>;
type Flights = Arc<SingleFlight<CacheKey, Result<Credential>>>;

/// Brokers tokens and tickets for every registered identity.
///
/// Clones share the identity table, cache, in-flight calls and metrics, so a broker can be
/// handed to many request handlers. Separate brokers never interfere with each other.
pub struct Broker<I>
where
	I: ?Sized + IssuerClient,
{
	/// Upstream issuer used for every refresh.
	pub issuer: Arc<I>,
	/// Credential cache consulted before any refresh.
	pub cache: Arc<dyn CredentialCache>,
	/// Time source for expiry decisions.
	pub clock: Arc<dyn Clock>,
	/// Retry budget applied to each refresh.
	pub retry: RetryPolicy,
	/// Shared counters for refresh outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
	identities: Identities,
	flights: Flights,
}
impl<I> Broker<I>
where
	I: ?Sized + IssuerClient,
{
	/// Creates a broker with an in-memory cache, the system clock and the default retry policy.
	pub fn new(issuer: impl Into<Arc<I>>) -> Self {
		Self {
			issuer: issuer.into(),
			cache: Arc::new(MemoryCache::default()),
			clock: Arc::new(SystemClock),
			retry: RetryPolicy::default(),
			refresh_metrics: Default::default(),
			identities: Default::default(),
			flights: Default::default(),
		}
	}

	/// Replaces the credential cache.
	pub fn with_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
		self.cache = cache;

		self
	}

	/// Replaces the time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Replaces the retry policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Registers an identity.
	///
	/// Registering the same id again with the same secret is a no-op; a different secret is
	/// rejected so a running broker never silently switches credentials.
	pub fn register(&self, app_id: &str, secret: impl Into<String>) -> Result<(), ConfigError> {
		let app_id = AppId::new(app_id)?;
		let identity = Identity::new(app_id.clone(), secret);

		match self.identities.write().entry(app_id) {
			Entry::Occupied(existing) if existing.get().secret == identity.secret => Ok(()),
			Entry::Occupied(existing) =>
				Err(ConfigError::DuplicateIdentity { app_id: existing.key().to_string() }),
			Entry::Vacant(slot) => {
				slot.insert(identity);

				Ok(())
			},
		}
	}

	/// Returns `true` if `app_id` has been registered.
	pub fn is_registered(&self, app_id: &str) -> bool {
		self.identities.read().contains_key(app_id)
	}

	/// Number of registered identities.
	pub fn identity_count(&self) -> usize {
		self.identities.read().len()
	}

	fn parse_app_id(app_id: &str) -> Result<AppId> {
		AppId::new(app_id).map_err(|e| ConfigError::from(e).into())
	}

	fn identity(&self, app_id: &AppId) -> Result<Identity> {
		self.identities
			.read()
			.get(app_id)
			.cloned()
			.ok_or_else(|| Error::UnregisteredIdentity { app_id: app_id.to_string() })
	}

	fn cached(&self, key: &CacheKey) -> Option<Credential> {
		let hit = self.cache.get(key, self.clock.now())?;

		self.refresh_metrics.record_cache_hit();
		obs::record_flow_outcome(key.kind, FlowOutcome::CacheHit);
		obs::log_cache_hit(key.kind, hit.expires_at);

		Some(hit)
	}

	async fn attempt(
		&self,
		kind: CredentialKind,
		number: u32,
		request: IssuerFuture<'_>,
	) -> Result<IssuedCredential> {
		self.refresh_metrics.record_attempt();

		let result = request.await;

		if let Err(e) = &result {
			obs::log_attempt_failure(kind, number, e);
		}

		result
	}

	fn settle(&self, key: CacheKey, result: Result<IssuedCredential>) -> Result<Credential> {
		match result {
			Ok(issued) => Ok(self.store(key, issued)),
			Err(e) => {
				self.refresh_metrics.record_failure();

				Err(e)
			},
		}
	}

	fn store(&self, key: CacheKey, issued: IssuedCredential) -> Credential {
		let issued_at = self.clock.now();
		let credential = Credential {
			kind: key.kind,
			value: issued.value,
			issued_at,
			expires_at: issued_at + issued.lifetime,
		};

		self.cache.put(key, credential.clone());
		self.refresh_metrics.record_success();
		obs::log_refreshed(credential.kind, credential.expires_at);

		credential
	}
}
#[cfg(feature = "reqwest")]
impl Broker<ReqwestIssuerClient> {
	/// Creates a broker talking to the public production issuer.
	pub fn production() -> Result<Self, ConfigError> {
		Ok(Self::new(ReqwestIssuerClient::production()?))
	}
}
impl<I> Clone for Broker<I>
where
	I: ?Sized + IssuerClient,
{
	fn clone(&self) -> Self {
		Self {
			issuer: self.issuer.clone(),
			cache: self.cache.clone(),
			clock: self.clock.clone(),
			retry: self.retry,
			refresh_metrics: self.refresh_metrics.clone(),
			identities: self.identities.clone(),
			flights: self.flights.clone(),
		}
	}
}
impl<I> Debug for Broker<I>
where
	I: ?Sized + IssuerClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("identities", &self.identity_count())
			.field("retry", &self.retry)
			.field("in_flight", &self.flights.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::ScriptedIssuer;

	#[test]
	fn register_is_idempotent_for_same_secret() {
		let broker = Broker::<ScriptedIssuer>::new(ScriptedIssuer::default());

		broker.register("wx1", "s1").expect("First registration should succeed.");
		broker.register("wx1", "s1").expect("Repeated registration should be a no-op.");

		assert_eq!(broker.identity_count(), 1);
		assert!(broker.is_registered("wx1"));
		assert!(!broker.is_registered("wx2"));
	}

	#[test]
	fn register_rejects_conflicting_secret_and_bad_ids() {
		let broker = Broker::<ScriptedIssuer>::new(ScriptedIssuer::default());

		broker.register("wx1", "s1").expect("First registration should succeed.");

		assert!(matches!(
			broker.register("wx1", "other"),
			Err(ConfigError::DuplicateIdentity { app_id }) if app_id == "wx1"
		));
		assert!(matches!(broker.register("", "s1"), Err(ConfigError::InvalidIdentifier(_))));
		assert!(matches!(broker.register("wx 1", "s1"), Err(ConfigError::InvalidIdentifier(_))));
	}

	#[test]
	fn clones_share_identities_and_debug_hides_secrets() {
		let broker = Broker::<ScriptedIssuer>::new(ScriptedIssuer::default());
		let shared = broker.clone();

		shared.register("wx1", "very-secret").expect("Registration should succeed.");

		assert!(broker.is_registered("wx1"));
		assert!(!format!("{broker:?}").contains("very-secret"));
	}
}
