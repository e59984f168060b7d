//! Broker-level error types shared across the cache, issuer, broker, and service layers.
//!
//! Every error is `Clone` because a single failed refresh is handed to all callers that
//! joined the same in-flight call; non-`Clone` sources are shared behind an [`Arc`].

// self
use crate::{_prelude::*, auth::CredentialKind};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

const BODY_PREVIEW_LIMIT: usize = 512;

/// Issuer codes signalling that the access token used for a request was rejected.
const TOKEN_REJECTED_CODES: [i64; 3] = [40001, 40014, 42001];

/// Canonical broker error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Network-level failure talking to the issuer; retried.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Caller referenced an identity that was never registered.
	#[error("App `{app_id}` is not registered with the broker.")]
	UnregisteredIdentity {
		/// Identifier supplied by the caller.
		app_id: String,
	},
	/// Issuer answered with a non-zero application error code; retried.
	#[error("Issuer rejected the request with code {code}: {message}.")]
	IssuerRejected {
		/// Issuer `errcode`, kept verbatim.
		code: i64,
		/// Issuer `errmsg`, kept verbatim.
		message: String,
	},
	/// Malformed inbound request (for example a missing `appid` parameter).
	#[error("Invalid request: {reason}.")]
	InvalidRequest {
		/// Human-readable explanation.
		reason: String,
	},
}
impl Error {
	/// Returns `true` when another refresh attempt may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transport(_) | Self::IssuerRejected { .. })
	}

	/// Returns `true` when the issuer refused the access token attached to the request.
	pub fn is_token_rejected(&self) -> bool {
		matches!(self, Self::IssuerRejected { code, .. } if TOKEN_REJECTED_CODES.contains(code))
	}
}

/// Configuration and validation failures raised by the broker.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// Issuer endpoint cannot be parsed or joined.
	#[error("Issuer endpoint is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Application identifier failed validation.
	#[error("Application identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Identity was registered twice with different secrets.
	#[error("App `{app_id}` is already registered with a different secret.")]
	DuplicateIdentity {
		/// Identifier that collided.
		app_id: String,
	},
	/// Retry policy cannot perform any attempt.
	#[error("Retry policy must allow at least one attempt.")]
	ZeroAttempts,
	/// Configuration file could not be read.
	#[error("Configuration file `{path}` could not be read.")]
	Read {
		/// Path that failed to load.
		path: String,
		/// Underlying IO failure.
		#[source]
		source: SharedError,
	},
	/// Configuration file could not be parsed.
	#[error("Configuration file could not be parsed.")]
	Parse {
		/// Underlying deserialization failure.
		#[source]
		source: SharedError,
	},
	/// Configuration file parsed but holds an unusable value.
	#[error("Configuration value `{field}` is invalid: {reason}.")]
	InvalidValue {
		/// Offending field.
		field: &'static str,
		/// Human-readable explanation.
		reason: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, status, body) surfaced while calling an endpoint.
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the {kind} endpoint.")]
	Network {
		/// Endpoint being called.
		kind: CredentialKind,
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Request exceeded its per-attempt timeout.
	#[error("Request to the {kind} endpoint timed out.")]
	Timeout {
		/// Endpoint being called.
		kind: CredentialKind,
	},
	/// Endpoint answered with a non-success HTTP status.
	#[error("The {kind} endpoint returned HTTP status {status}.")]
	HttpStatus {
		/// Endpoint being called.
		kind: CredentialKind,
		/// HTTP status code.
		status: u16,
		/// Truncated response body, when readable.
		body: Option<String>,
	},
	/// Endpoint responded with JSON that could not be parsed.
	#[error("The {kind} endpoint returned a malformed body.")]
	MalformedBody {
		/// Endpoint being called.
		kind: CredentialKind,
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
	},
	/// Endpoint reported success but omitted or zeroed a required field.
	#[error("The {kind} endpoint reply is missing a usable `{field}`.")]
	IncompleteReply {
		/// Endpoint being called.
		kind: CredentialKind,
		/// Missing or invalid field.
		field: &'static str,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(kind: CredentialKind, src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { kind, source: Arc::new(src) }
	}

	/// Builds an [`TransportError::HttpStatus`] keeping a bounded preview of the body.
	pub fn http_status(kind: CredentialKind, status: u16, body: &[u8]) -> Self {
		let body = (!body.is_empty()).then(|| {
			let end = body.len().min(BODY_PREVIEW_LIMIT);

			String::from_utf8_lossy(&body[..end]).into_owned()
		});

		Self::HttpStatus { kind, status, body }
	}

	/// Classifies a reqwest failure as a timeout or a network error.
	#[cfg(feature = "reqwest")]
	pub fn from_reqwest(kind: CredentialKind, err: ReqwestError) -> Self {
		if err.is_timeout() { Self::Timeout { kind } } else { Self::network(kind, err) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn retry_classification_matches_taxonomy() {
		let transport = Error::from(TransportError::Timeout { kind: CredentialKind::Token });
		let rejected = Error::IssuerRejected { code: 40013, message: "invalid appid".into() };
		let unregistered = Error::UnregisteredIdentity { app_id: "wxbad".into() };
		let invalid = Error::InvalidRequest { reason: "missing appid".into() };

		assert!(transport.is_retryable());
		assert!(rejected.is_retryable());
		assert!(!unregistered.is_retryable());
		assert!(!invalid.is_retryable());
		assert!(!Error::from(ConfigError::ZeroAttempts).is_retryable());
	}

	#[test]
	fn token_rejection_codes_are_recognized() {
		for code in TOKEN_REJECTED_CODES {
			let err = Error::IssuerRejected { code, message: "access_token expired".into() };

			assert!(err.is_token_rejected(), "Code {code} should mark the token as rejected.");
		}

		assert!(!Error::IssuerRejected { code: 45009, message: "quota".into() }.is_token_rejected());
	}

	#[test]
	fn issuer_rejection_preserves_code_and_message() {
		let err = Error::IssuerRejected { code: 40164, message: "invalid ip 1.2.3.4".into() };

		assert_eq!(
			err.to_string(),
			"Issuer rejected the request with code 40164: invalid ip 1.2.3.4."
		);
	}

	#[test]
	fn http_status_body_is_truncated_or_omitted() {
		let empty = TransportError::http_status(CredentialKind::Token, 502, b"");
		let long = TransportError::http_status(CredentialKind::Token, 502, &[b'x'; 2048]);

		assert!(matches!(empty, TransportError::HttpStatus { body: None, .. }));
		assert!(matches!(
			long,
			TransportError::HttpStatus { body: Some(preview), .. } if preview.len() == BODY_PREVIEW_LIMIT
		));
	}

	#[test]
	fn shared_sources_survive_clone() {
		let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
		let err = Error::from(TransportError::network(CredentialKind::Ticket, io));
		let cloned = err.clone();
		let source = StdError::source(&cloned)
			.expect("Network error should expose the IO failure as its source.");

		assert_eq!(source.to_string(), "refused");
		assert_eq!(err.to_string(), cloned.to_string());
	}
}
