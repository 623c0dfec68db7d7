//! C1: bounded-retry invocation of fallible operations with exponential
//! backoff and an explicit retryable/fatal signal (spec.md §4.1).

use std::error::Error as StdError;
use std::fmt;
use std::thread;
use std::time::Duration;

/// What a retried closure reports back for one attempt.
pub enum Attempt<T> {
    Success(T),
    /// Caller-signalled transient failure; retried in place.
    Retryable(Box<dyn StdError + Send + Sync>),
    /// Caller-signalled permanent failure; not retried, bubbles out.
    Fatal(Box<dyn StdError + Send + Sync>),
}

impl<T> Attempt<T> {
    pub fn retryable<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Retryable(Box::new(err))
    }

    pub fn fatal<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Fatal(Box::new(err))
    }
}

/// Outcome of [`invoke`].
#[derive(Debug)]
pub enum InvocationResult<T> {
    Succeeded { attempts: u32, value: T },
    Exhausted {
        attempts: u32,
        last_error: Box<dyn StdError + Send + Sync>,
    },
}

impl<T> InvocationResult<T> {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Unwrap the value, panicking with the last error on exhaustion.
    /// Intended for tests and call sites that have already checked
    /// [`succeeded`](Self::succeeded).
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Succeeded { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Raised by `invoke`'s closure to signal a non-retryable exception that
/// should bubble straight out to the caller (spec.md §4.1/§8: "a callback
/// raising a generic exception is not retried and the exception escapes").
#[derive(Debug)]
pub struct NonRetryableEscape(pub Box<dyn StdError + Send + Sync>);

impl fmt::Display for NonRetryableEscape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "non-retryable error escaped retry wrapper: {}", self.0)
    }
}

impl StdError for NonRetryableEscape {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Notified once per failing attempt, in order, before the backoff sleep.
pub trait FailureObserver {
    fn on_failure(&mut self, attempt: u32, error: &(dyn StdError + Send + Sync), will_retry: bool);
}

impl<F> FailureObserver for F
where
    F: FnMut(u32, &(dyn StdError + Send + Sync), bool),
{
    fn on_failure(&mut self, attempt: u32, error: &(dyn StdError + Send + Sync), will_retry: bool) {
        self(attempt, error, will_retry)
    }
}

/// Invoke `op` up to `max_attempts` times. `op` receives the current
/// 1-based attempt number.
///
/// `backoff_base == 0` disables sleeping entirely (the test hook named
/// in spec.md §4.1); otherwise attempt `i`'s failure sleeps
/// `backoff_base.powi(i)` seconds before the next attempt, unless it was
/// the last allowed attempt.
pub fn invoke<T>(
    max_attempts: u32,
    backoff_base: f64,
    mut op: impl FnMut(u32) -> Attempt<T>,
) -> Result<InvocationResult<T>, NonRetryableEscape> {
    invoke_observed(max_attempts, backoff_base, &mut op, &mut |_, _, _| {})
}

/// Like [`invoke`] but with a [`FailureObserver`] notified on every
/// failing attempt.
pub fn invoke_observed<T>(
    max_attempts: u32,
    backoff_base: f64,
    op: &mut impl FnMut(u32) -> Attempt<T>,
    observer: &mut impl FailureObserver,
) -> Result<InvocationResult<T>, NonRetryableEscape> {
    assert!(max_attempts >= 1, "max_attempts must be at least 1");

    let mut last_error: Option<Box<dyn StdError + Send + Sync>> = None;
    for attempt in 1..=max_attempts {
        match op(attempt) {
            Attempt::Success(value) => {
                return Ok(InvocationResult::Succeeded { attempts: attempt, value })
            }
            Attempt::Fatal(err) => {
                observer.on_failure(attempt, err.as_ref(), false);
                return Err(NonRetryableEscape(err));
            }
            Attempt::Retryable(err) => {
                let will_retry = attempt < max_attempts;
                observer.on_failure(attempt, err.as_ref(), will_retry);
                if will_retry && backoff_base > 0.0 {
                    let secs = backoff_base.powi(attempt as i32);
                    thread::sleep(Duration::from_secs_f64(secs));
                }
                last_error = Some(err);
            }
        }
    }

    Ok(InvocationResult::Exhausted {
        attempts: max_attempts,
        last_error: last_error.expect("at least one attempt runs when max_attempts >= 1"),
    })
}
