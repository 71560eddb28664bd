use log::debug;
use slsreq_core::{Error, Result};
use std::future::Future;

/// Attempts a credential fetch gets before giving up.
pub const DEFAULT_FETCH_ATTEMPTS: usize = 3;

/// Call `fetch` up to `max_attempts` times without delay.
///
/// Returns the first success. When every attempt fails the error lists each
/// attempt's failure in order.
pub async fn fetch_with_retry<T, F, Fut>(what: &str, max_attempts: usize, mut fetch: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut errors = Vec::with_capacity(max_attempts);
    for attempt in 1..=max_attempts {
        match fetch().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                debug!("{what}: attempt {attempt}/{max_attempts} failed: {err}");
                errors.push(err.to_string());
            }
        }
    }

    Err(
        Error::credential_unavailable(format!("{what} failed after {max_attempts} attempts"))
            .with_context(format!("errors: [{}]", errors.join(", "))),
    )
}
