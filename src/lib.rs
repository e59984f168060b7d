//! Expiry-aware broker for access tokens and JSAPI tickets: single-flight refreshes, bounded
//! retries, and an HTTP front end that drains in-flight requests on shutdown.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod broker;
pub mod cache;
pub mod clock;
pub mod error;
pub mod flight;
pub mod issuer;
pub mod obs;
pub mod retry;
#[cfg(feature = "service")] pub mod service;
pub mod source;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and a scripted issuer for tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration as StdDuration,
	};
	// self
	use crate::{
		auth::{AppId, Secret},
		issuer::{IssuedCredential, IssuerClient, IssuerFuture},
	};

	type Script = Mutex<VecDeque<Result<IssuedCredential>>>;

	/// In-process issuer answering from pre-recorded replies.
	///
	/// Each call pops the next reply for its endpoint. An exhausted script answers with the
	/// issuer's transient "system busy" code so retry paths stay observable.
	#[derive(Debug, Default)]
	pub struct ScriptedIssuer {
		tokens: Script,
		tickets: Script,
		token_calls: AtomicUsize,
		ticket_calls: AtomicUsize,
		presented: Mutex<Vec<String>>,
		delay: Option<StdDuration>,
	}
	impl ScriptedIssuer {
		/// Appends replies for the token endpoint.
		pub fn with_tokens(self, replies: impl IntoIterator<Item = Result<IssuedCredential>>) -> Self {
			self.tokens.lock().extend(replies);

			self
		}

		/// Appends replies for the ticket endpoint.
		pub fn with_tickets(
			self,
			replies: impl IntoIterator<Item = Result<IssuedCredential>>,
		) -> Self {
			self.tickets.lock().extend(replies);

			self
		}

		/// Delays every reply on the runtime timer.
		pub fn with_delay(mut self, delay: StdDuration) -> Self {
			self.delay = Some(delay);

			self
		}

		/// Number of token requests received.
		pub fn token_calls(&self) -> usize {
			self.token_calls.load(Ordering::SeqCst)
		}

		/// Number of ticket requests received.
		pub fn ticket_calls(&self) -> usize {
			self.ticket_calls.load(Ordering::SeqCst)
		}

		/// Tokens presented to the ticket endpoint, in call order.
		pub fn presented_tokens(&self) -> Vec<String> {
			self.presented.lock().clone()
		}

		async fn answer(&self, script: &Script) -> Result<IssuedCredential> {
			if let Some(delay) = self.delay {
				tokio::time::sleep(delay).await;
			}

			let next = script.lock().pop_front();

			next.unwrap_or_else(|| rejected(-1, "system busy"))
		}
	}
	impl IssuerClient for ScriptedIssuer {
		fn fetch_token<'a>(&'a self, _app_id: &'a AppId, _secret: &'a Secret) -> IssuerFuture<'a> {
			self.token_calls.fetch_add(1, Ordering::SeqCst);

			Box::pin(self.answer(&self.tokens))
		}

		fn fetch_ticket<'a>(&'a self, _app_id: &'a AppId, token: &'a str) -> IssuerFuture<'a> {
			self.ticket_calls.fetch_add(1, Ordering::SeqCst);
			self.presented.lock().push(token.to_owned());

			Box::pin(self.answer(&self.tickets))
		}
	}

	/// Successful issuer reply lasting `secs` seconds.
	pub fn issued(value: &str, secs: i64) -> Result<IssuedCredential> {
		Ok(IssuedCredential::new(value, Duration::seconds(secs)))
	}

	/// Issuer refusal with the given `errcode` and `errmsg`.
	pub fn rejected(code: i64, message: &str) -> Result<IssuedCredential> {
		Err(Error::IssuerRejected { code, message: message.into() })
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::OnceCell;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(feature = "service")] use color_eyre as _;
#[cfg(test)] use httpmock as _;
