//! Bounded sequential attempt ladder.
//!
//! Runs an async attempt up to `max` times. Each attempt gets the
//! configuration produced for its attempt number. The ladder stops at the
//! first error, the first accepted value, or when attempts run out; in the
//! last case the final (rejected) value becomes the outcome.
//!
//! Attempts never run concurrently: attempt `n + 1` starts only after
//! attempt `n` has been judged.

use std::future::Future;

/// Result of running a ladder.
#[derive(Debug)]
pub struct LadderOutcome<T, E> {
    /// Values rejected by the accept predicate, oldest first. Does not
    /// include the final value.
    pub rejected: Vec<T>,
    /// The last attempt's result.
    pub last: Result<T, E>,
    /// Number of attempts made.
    pub attempts: u32,
}

impl<T, E> LadderOutcome<T, E> {
    /// Every successful value in attempt order, the final one last.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.rejected.iter().chain(self.last.as_ref().ok())
    }
}

/// Run `attempt` up to `max` times (at least once).
///
/// `overrides_for(n)` builds the configuration for attempt `n` (1-based).
/// `accept` decides whether a value ends the ladder early.
pub async fn run_ladder<C, T, E, O, A, Fut, P>(
    max: u32,
    overrides_for: O,
    mut attempt: A,
    accept: P,
) -> LadderOutcome<T, E>
where
    O: Fn(u32) -> C,
    A: FnMut(u32, C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let max = max.max(1);
    let mut rejected = Vec::new();
    let mut n = 1;

    loop {
        let config = overrides_for(n);
        match attempt(n, config).await {
            Err(e) => {
                return LadderOutcome {
                    rejected,
                    last: Err(e),
                    attempts: n,
                }
            }
            Ok(value) if accept(&value) || n >= max => {
                return LadderOutcome {
                    rejected,
                    last: Ok(value),
                    attempts: n,
                }
            }
            Ok(value) => rejected.push(value),
        }
        n += 1;
    }
}
