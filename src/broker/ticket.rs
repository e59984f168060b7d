//! JSAPI ticket retrieval layered on top of [`Broker::get_token`].

// self
use crate::{
	_prelude::*,
	auth::{AppId, Credential, CredentialKind, Secret},
	broker::Broker,
	cache::CacheKey,
	issuer::{IssuedCredential, IssuerClient},
	obs::{self, FlowOutcome, FlowSpan},
};

impl<I> Broker<I>
where
	I: ?Sized + IssuerClient,
{
	/// Returns a valid JSAPI ticket for `app_id`, refreshing it on a cache miss.
	///
	/// The token needed for the refresh comes from [`Broker::get_token`], so it is cached and
	/// deduplicated like any other token request.
	pub async fn get_ticket(&self, app_id: &str) -> Result<Credential> {
		const KIND: CredentialKind = CredentialKind::Ticket;

		let span = FlowSpan::new(KIND, "get_ticket", app_id);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let key = CacheKey::ticket(Self::parse_app_id(app_id)?);

				if let Some(hit) = self.cached(&key) {
					return Ok(hit);
				}

				self.identity(&key.app_id)?;

				let broker = self.clone();

				self.flights
					.run(key.clone(), move || async move { broker.refresh_ticket(key).await })
					.await
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn refresh_ticket(&self, key: CacheKey) -> Result<Credential> {
		if let Some(hit) = self.cache.get(&key, self.clock.now()) {
			return Ok(hit);
		}

		let result = self.fetch_ticket(&key.app_id).await;

		self.settle(key, result)
	}

	async fn fetch_ticket(&self, app_id: &AppId) -> Result<IssuedCredential> {
		const KIND: CredentialKind = CredentialKind::Ticket;

		// Token presented by the latest attempt; `None` when that attempt could not get one.
		let presented = &Mutex::new(None::<Secret>);
		let result = self
			.retry
			.run(
				move |number| async move {
					*presented.lock() = None;

					// Re-read every attempt so an expired token is never presented.
					let token = self.get_token(app_id).await?;

					*presented.lock() = Some(token.value.clone());

					self.attempt(KIND, number, self.issuer.fetch_ticket(app_id, token.expose()))
						.await
				},
				|e| e.is_token_rejected() || presented.lock().is_none(),
			)
			.await;

		match result {
			// The token was revoked upstream; replace it and try exactly once more.
			Err(e) if e.is_token_rejected() => {
				let stale = presented.lock().take();

				if let Some(stale) = stale {
					self.cache.invalidate(&CacheKey::token(app_id.clone()), stale.expose());
				}

				let fresh = self.get_token(app_id).await?;

				self.attempt(
					KIND,
					self.retry.max_attempts + 1,
					self.issuer.fetch_ticket(app_id, fresh.expose()),
				)
				.await
			},
			result => result,
		}
	}
}
