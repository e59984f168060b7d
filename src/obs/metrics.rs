// self
use crate::{auth::CredentialKind, obs::FlowOutcome};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: CredentialKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"credential_broker_flow_total",
			"kind" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}
