//! Long-running, resumable discovery sessions.
//!
//! A session is named by a tag and owns three files under the session base
//! directory: a checkpoint, a PID marker and the result store. The
//! [`DiscoveryRunner`] pulls batches from a generator, scores them, records
//! every success in the store and checkpoints periodically so a cancelled or
//! crashed session can continue where it stopped.
//!
//! ```ignore
//! let paths = SessionPaths::from_config(None);
//! let mut runner = DiscoveryRunner::open(config, &generator, pool, evaluator, &paths)?
//!     .with_cancel_token(install_signal_handlers());
//! if runner.has_checkpoint() {
//!     runner.resume()?;
//! }
//! let outcome = runner.run()?;
//! println!("{}", status_summary(outcome.stats()));
//! ```

mod checkpoint;
mod runner;
mod session;
mod signal;

pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointError, CheckpointStore};
pub use runner::{
    CompletionReason, DiscoveryError, DiscoveryRunner, SessionOutcome, SessionState,
    status_summary,
};
pub use session::{
    DEFAULT_DIR_NAME, SessionError, SessionLock, SessionPaths, active_session, is_alive, read_pid,
    sanitize_tag, stop_session,
};
pub use signal::{CancelOutcome, CancelToken, FORCED_EXIT_CODE, install_signal_handlers};
