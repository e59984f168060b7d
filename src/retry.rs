//! Fixed-delay retry policy for refresh attempts.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::time;
// self
use crate::{_prelude::*, error::ConfigError};

/// Bounded retry budget applied to a single refresh.
///
/// Every failed attempt is followed by `delay` before the next one; no delay follows the final
/// attempt. Only errors for which [`Error::is_retryable`] holds consume further attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Total attempts, including the first.
	pub max_attempts: u32,
	/// Pause between consecutive attempts.
	pub delay: StdDuration,
}
impl RetryPolicy {
	/// Default attempt budget.
	pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
	/// Default pause between attempts.
	pub const DEFAULT_DELAY: StdDuration = StdDuration::from_secs(1);

	/// Creates a validated policy.
	pub fn new(max_attempts: u32, delay: StdDuration) -> Result<Self, ConfigError> {
		if max_attempts == 0 {
			return Err(ConfigError::ZeroAttempts);
		}

		Ok(Self { max_attempts, delay })
	}

	/// Policy performing exactly one attempt.
	pub fn single_attempt() -> Self {
		Self { max_attempts: 1, delay: StdDuration::ZERO }
	}

	/// Drives `attempt` until it succeeds, fails with a non-retryable error, `abort` accepts the
	/// error, or the budget runs out. The last error is returned on exhaustion.
	///
	/// `attempt` receives the 1-based attempt number.
	pub async fn run<T, F, Fut, A>(&self, mut attempt: F, abort: A) -> Result<T>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<T>>,
		A: Fn(&Error) -> bool,
	{
		let mut number = 1;

		loop {
			match attempt(number).await {
				Ok(value) => return Ok(value),
				Err(err) => {
					if !err.is_retryable() || abort(&err) || number >= self.max_attempts {
						return Err(err);
					}
				},
			}

			if !self.delay.is_zero() {
				time::sleep(self.delay).await;
			}

			number += 1;
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_attempts: Self::DEFAULT_MAX_ATTEMPTS, delay: Self::DEFAULT_DELAY }
	}
}
