//! Cooperative cancellation.
//!
//! The runner only polls a [`CancelToken`]. On unix,
//! [`install_signal_handlers`] routes SIGINT and SIGTERM into the same
//! token; a second signal while the first is being honored exits the process
//! immediately with status 130 and no further checkpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Exit status used when a repeated signal forces termination.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Signals received since the handlers were installed.
static SIGNALS: AtomicUsize = AtomicUsize::new(0);

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run will stop at the next deck boundary.
    First,
    /// A stop was already requested; the caller should escalate.
    Repeated,
}

/// One-shot cancellation flag shared between the runner and its host.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requests: Arc<AtomicUsize>,
    watch_signals: bool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) -> CancelOutcome {
        let signalled = self.signal_count();
        let previous = self.requests.fetch_add(1, Ordering::SeqCst);
        if previous + signalled == 0 {
            CancelOutcome::First
        } else {
            CancelOutcome::Repeated
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.requests.load(Ordering::SeqCst) + self.signal_count() > 0
    }

    fn signal_count(&self) -> usize {
        if self.watch_signals {
            SIGNALS.load(Ordering::SeqCst)
        } else {
            0
        }
    }
}

/// Install SIGINT/SIGTERM handlers and return a token that observes them.
#[cfg(unix)]
pub fn install_signal_handlers() -> CancelToken {
    SIGNALS.store(0, Ordering::SeqCst);
    unsafe {
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
    }
    CancelToken {
        requests: Arc::new(AtomicUsize::new(0)),
        watch_signals: true,
    }
}

/// Signals are not wired on this platform; the token only sees in-process
/// cancellation.
#[cfg(not(unix))]
pub fn install_signal_handlers() -> CancelToken {
    CancelToken::new()
}

#[cfg(unix)]
extern "C" fn signal_handler(_sig: libc::c_int) {
    if SIGNALS.fetch_add(1, Ordering::SeqCst) > 0 {
        unsafe { libc::_exit(FORCED_EXIT_CODE) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reports_first_then_repeated() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.cancel(), CancelOutcome::First);
        assert!(token.is_cancelled());
        assert_eq!(token.cancel(), CancelOutcome::Repeated);
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let host = token.clone();
        host.cancel();
        assert!(token.is_cancelled());
    }
}
