//! Bounded retry.

use crate::error::Result;

/// Call `attempt` up to `max_attempts` times until it yields a value.
///
/// `attempt` receives the 1-based attempt number and returns `Ok(None)` to
/// ask for another try. Errors stop the loop immediately. Returns `Ok(None)`
/// once the budget is spent.
pub fn retry<T, F>(max_attempts: usize, mut attempt: F) -> Result<Option<T>>
where
    F: FnMut(usize) -> Result<Option<T>>,
{
    for n in 1..=max_attempts {
        if let Some(value) = attempt(n)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}
