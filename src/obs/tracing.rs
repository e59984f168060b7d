// self
use crate::{_prelude::*, auth::CredentialKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by broker operations.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the credential kind, stage and application.
	pub fn new(kind: CredentialKind, stage: &'static str, app_id: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span =
				tracing::info_span!("credential_broker.flow", kind = kind.as_str(), stage, app_id);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage, app_id);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a debug event for a request served from the cache.
pub fn log_cache_hit(kind: CredentialKind, expires_at: OffsetDateTime) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(kind = kind.as_str(), %expires_at, "served from cache");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, expires_at);
	}
}

/// Emits a warning for one failed refresh attempt.
pub fn log_attempt_failure(kind: CredentialKind, attempt: u32, err: &Error) {
	#[cfg(feature = "tracing")]
	{
		let source = match err {
			Error::IssuerRejected { .. } => "issuer",
			Error::Transport(_) => "transport",
			_ => "local",
		};

		tracing::warn!(kind = kind.as_str(), attempt, source, error = %err, "refresh attempt failed");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, attempt, err);
	}
}

/// Emits an info event once a fresh credential has been stored.
pub fn log_refreshed(kind: CredentialKind, expires_at: OffsetDateTime) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(kind = kind.as_str(), %expires_at, "credential refreshed");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, expires_at);
	}
}
