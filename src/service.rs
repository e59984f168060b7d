//! HTTP front end exposing a [`Broker`] to callers that cannot embed it.
//!
//! Routes:
//!
//! - `GET /token?appid=<id>` returns `{"token", "expired", "expires_at"}`.
//! - `GET /ticket?appid=<id>` returns `{"ticket", "expired", "expires_at"}`.
//! - `GET /health` returns `{"status": "ok", "identities": N}`.
//!
//! Failures carry an [`ErrorReply`] body and a status describing who is at fault: `400` for a
//! missing `appid`, `404` for an unknown or malformed one, `502` when the issuer or the network
//! failed, and `500` for local configuration problems. Issuer rejections forward the issuer's
//! `errcode` and `errmsg` untouched.

pub mod config;

pub use config::*;

// std
use std::{future, io};
// crates.io
use axum::{
	Json, Router,
	extract::{Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::get,
};
use time::UtcOffset;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
// self
use crate::{
	_prelude::*,
	auth::CredentialKind,
	broker::Broker,
	error::ConfigError,
	issuer::IssuerClient,
	source::{CredentialReply, ErrorReply},
};

/// Shared handler state.
pub struct ServiceState<I>
where
	I: ?Sized + IssuerClient,
{
	/// Broker answering every request.
	pub broker: Broker<I>,
	/// Offset used to render the human-readable `expired` field.
	pub offset: UtcOffset,
}
impl<I> ServiceState<I>
where
	I: ?Sized + IssuerClient,
{
	/// Bundles a broker with the offset its replies are rendered in.
	pub fn new(broker: Broker<I>, offset: UtcOffset) -> Self {
		Self { broker, offset }
	}
}
impl<I> Clone for ServiceState<I>
where
	I: ?Sized + IssuerClient,
{
	fn clone(&self) -> Self {
		Self { broker: self.broker.clone(), offset: self.offset }
	}
}

/// Query string accepted by the credential routes.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialQuery {
	/// Application id; required.
	pub appid: Option<String>,
}
impl CredentialQuery {
	fn app_id(&self) -> Result<&str> {
		self.appid.as_deref().filter(|id| !id.is_empty()).ok_or_else(|| Error::InvalidRequest {
			reason: "query parameter `appid` is required".into(),
		})
	}
}

/// [`Error`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ServiceError(pub Error);
impl ServiceError {
	/// HTTP status reported for the wrapped error.
	pub fn status(&self) -> StatusCode {
		match &self.0 {
			Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
			Error::UnregisteredIdentity { .. } |
			Error::Config(ConfigError::InvalidIdentifier(_)) => StatusCode::NOT_FOUND,
			Error::Transport(_) | Error::IssuerRejected { .. } => StatusCode::BAD_GATEWAY,
			Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}
impl From<Error> for ServiceError {
	fn from(e: Error) -> Self {
		Self(e)
	}
}
impl IntoResponse for ServiceError {
	fn into_response(self) -> Response {
		let status = self.status();
		let reply = match self.0 {
			Error::IssuerRejected { code, message } => ErrorReply { errcode: code, errmsg: message },
			e => ErrorReply { errcode: i64::from(status.as_u16()), errmsg: e.to_string() },
		};

		(status, Json(reply)).into_response()
	}
}

/// Builds the router serving `/token`, `/ticket` and `/health`.
pub fn router<I>(state: ServiceState<I>) -> Router
where
	I: ?Sized + IssuerClient,
{
	Router::new()
		.route("/token", get(token_handler::<I>))
		.route("/ticket", get(ticket_handler::<I>))
		.route("/health", get(health_handler::<I>))
		.with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves.
///
/// Once `shutdown` fires the listener stops accepting connections; the future completes after
/// every in-flight request has been answered.
pub async fn serve<I, F>(
	listener: TcpListener,
	state: ServiceState<I>,
	shutdown: F,
) -> io::Result<()>
where
	I: ?Sized + IssuerClient,
	F: 'static + Send + Future<Output = ()>,
{
	axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			tracing::error!(error = %e, "failed to install SIGINT handler");
			future::pending::<()>().await;
		}
	};
	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			},
			Err(e) => {
				tracing::error!(error = %e, "failed to install SIGTERM handler");
				future::pending::<()>().await;
			},
		}
	};
	#[cfg(not(unix))]
	let terminate = future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => tracing::info!("received SIGINT, draining"),
		_ = terminate => tracing::info!("received SIGTERM, draining"),
	}
}

/// Installs the global `tracing` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(tracing_subscriber::fmt::layer())
		.try_init()
}

async fn token_handler<I>(
	State(state): State<ServiceState<I>>,
	Query(query): Query<CredentialQuery>,
) -> Result<Json<CredentialReply>, ServiceError>
where
	I: ?Sized + IssuerClient,
{
	issue(&state, &query, CredentialKind::Token).await
}

async fn ticket_handler<I>(
	State(state): State<ServiceState<I>>,
	Query(query): Query<CredentialQuery>,
) -> Result<Json<CredentialReply>, ServiceError>
where
	I: ?Sized + IssuerClient,
{
	issue(&state, &query, CredentialKind::Ticket).await
}

async fn health_handler<I>(State(state): State<ServiceState<I>>) -> Json<serde_json::Value>
where
	I: ?Sized + IssuerClient,
{
	Json(serde_json::json!({ "status": "ok", "identities": state.broker.identity_count() }))
}

async fn issue<I>(
	state: &ServiceState<I>,
	query: &CredentialQuery,
	kind: CredentialKind,
) -> Result<Json<CredentialReply>, ServiceError>
where
	I: ?Sized + IssuerClient,
{
	let app_id = query.app_id()?;
	let result = match kind {
		CredentialKind::Token => state.broker.get_token(app_id).await,
		CredentialKind::Ticket => state.broker.get_ticket(app_id).await,
	};

	match result {
		Ok(credential) => Ok(Json(CredentialReply::new(&credential, state.offset))),
		Err(e) => {
			tracing::warn!(kind = kind.as_str(), app_id, error = %e, "request failed");

			Err(e.into())
		},
	}
}
