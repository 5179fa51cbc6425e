//! Bounded retry of transient sink errors.

use std::thread;

use omop_model::RetryPolicy;
use tracing::warn;

use crate::sink::SinkError;

/// Outcome of a retried operation together with the attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, SinkError>,
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// the policy's retry budget is spent. Sleeps between attempts.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: impl FnMut() -> Result<T, SinkError>,
) -> Retried<T> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation() {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(error) if error.is_transient() && attempt <= policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(
                    operation = what,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient sink error, retrying"
                );
                thread::sleep(delay);
            }
            Err(error) => {
                return Retried {
                    result: Err(error),
                    attempts: attempt,
                };
            }
        }
    }
}
