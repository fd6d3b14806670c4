//! Caller-supplied cancellation for in-flight installs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity at which [`CancelToken::sleep`] rechecks the token.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A cloneable cancellation signal with an optional deadline.
///
/// Clones share the same flag, so a caller can keep one handle and pass
/// another into the install. The token also reports cancelled once its
/// deadline has passed.
///
/// # Examples
///
/// ```
/// use formula_installer::cancel::CancelToken;
///
/// let token = CancelToken::new();
/// let handle = token.clone();
/// assert!(!token.is_cancelled());
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Create a token that is cancelled only explicitly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that cancels itself at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    /// Create a token that cancels itself after `timeout` from now.
    ///
    /// A timeout too large to represent as an [`Instant`] leaves the token
    /// without a deadline.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Return whether the token was cancelled or its deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `true` when the full duration elapsed and `false` when the
    /// token was cancelled first.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> bool {
        let end = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let remaining = match end {
                Some(end) => end.saturating_duration_since(Instant::now()),
                None => POLL_INTERVAL,
            };
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}
