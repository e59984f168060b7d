//! Access token retrieval with cache reuse, single-flight refreshes and bounded retries.

// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialKind, Identity},
	broker::Broker,
	cache::CacheKey,
	issuer::IssuerClient,
	obs::{self, FlowOutcome, FlowSpan},
};

impl<I> Broker<I>
where
	I: ?Sized + IssuerClient,
{
	/// Returns a valid access token for `app_id`, refreshing it on a cache miss.
	///
	/// Unknown identities fail with [`Error::UnregisteredIdentity`] before any network call.
	/// Concurrent misses for the same identity share one refresh.
	pub async fn get_token(&self, app_id: &str) -> Result<Credential> {
		const KIND: CredentialKind = CredentialKind::Token;

		let span = FlowSpan::new(KIND, "get_token", app_id);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let key = CacheKey::token(Self::parse_app_id(app_id)?);

				if let Some(hit) = self.cached(&key) {
					return Ok(hit);
				}

				let identity = self.identity(&key.app_id)?;
				let broker = self.clone();

				self.flights
					.run(key.clone(), move || async move { broker.refresh_token(key, identity).await })
					.await
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn refresh_token(&self, key: CacheKey, identity: Identity) -> Result<Credential> {
		// A flight for this key may have completed between the caller's lookup and now.
		if let Some(hit) = self.cache.get(&key, self.clock.now()) {
			return Ok(hit);
		}

		let result = self
			.retry
			.run(
				|number| {
					self.attempt(
						CredentialKind::Token,
						number,
						self.issuer.fetch_token(&identity.app_id, &identity.secret),
					)
				},
				|_| false,
			)
			.await;

		self.settle(key, result)
	}
}
