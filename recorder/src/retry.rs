//! Retry utility with exponential backoff

use oatrace_shared::OaError;
use std::time::Duration;
use tracing::warn;

const MAX_DELAY: Duration = Duration::from_millis(100);

/// Retry a device query while it reports `TransientUnavailable`.
///
/// Returns `Ok` on first success, any non-transient error immediately, or the
/// last transient error after all attempts are exhausted.
/// Delays: `initial_delay`, `2 * initial_delay`, `4 * initial_delay`, ... capped at 100ms.
pub fn retry_with_backoff<F, T>(
    operation_name: &str,
    max_attempts: u32,
    initial_delay: Duration,
    mut f: F,
) -> Result<T, OaError>
where
    F: FnMut() -> Result<T, OaError>,
{
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match f() {
            Ok(val) => return Ok(val),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                std::thread::sleep(delay);
                delay = (delay * 2).min(MAX_DELAY);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_first_try() {
        let result = retry_with_backoff("test", 3, Duration::from_millis(1), || Ok("done"));
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_succeeds_after_retries() {
        let mut calls = 0;
        let result = retry_with_backoff("test", 3, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(OaError::TransientUnavailable)
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_all_attempts_fail() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("test", 2, Duration::from_millis(1), || {
            calls += 1;
            Err(OaError::TransientUnavailable)
        });
        assert!(matches!(result, Err(OaError::TransientUnavailable)));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("test", 5, Duration::from_millis(1), || {
            calls += 1;
            Err(OaError::InvalidCommand("bad".into()))
        });
        assert!(matches!(result, Err(OaError::InvalidCommand(_))));
        assert_eq!(calls, 1);
    }
}
