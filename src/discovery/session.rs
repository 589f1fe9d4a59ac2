//! Session file layout and the PID marker that guards one run per tag.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Directory under the home directory used when no base is configured.
pub const DEFAULT_DIR_NAME: &str = ".deck-discovery";

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session tag '{0}': use letters and digits")]
    InvalidTag(String),
    #[error("A discovery session for {tag} is already running (pid {pid}); stop existing session first")]
    AlreadyRunning { tag: String, pid: u32 },
    #[error("No running discovery session for {0}")]
    NotRunning(String),
    #[error("Failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error("Stopping background sessions is not supported on this platform")]
    Unsupported,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Normalize a session tag: drop a leading `#`, uppercase, letters and digits only.
pub fn sanitize_tag(tag: &str) -> Result<String, SessionError> {
    let trimmed = tag.trim();
    let bare = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if bare.is_empty() || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SessionError::InvalidTag(tag.to_string()));
    }
    Ok(bare.to_ascii_uppercase())
}

/// Where a session keeps its files.
///
/// ```text
/// <base>/discover/<TAG>.json      checkpoint
/// <base>/discover/<TAG>.pid       background session marker
/// <base>/leaderboards/<TAG>.db    result store
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    base: PathBuf,
}

impl SessionPaths {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    /// `~/.deck-discovery`, or `./.deck-discovery` without a home directory.
    pub fn default_base() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_DIR_NAME)
    }

    pub fn from_config(base: Option<&Path>) -> Self {
        match base {
            Some(b) => Self::new(b),
            None => Self::new(Self::default_base()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn discover_dir(&self) -> PathBuf {
        self.base.join("discover")
    }

    pub fn checkpoint_file(&self, tag: &str) -> PathBuf {
        self.discover_dir().join(format!("{tag}.json"))
    }

    pub fn pid_file(&self, tag: &str) -> PathBuf {
        self.discover_dir().join(format!("{tag}.pid"))
    }

    pub fn store_file(&self, tag: &str) -> PathBuf {
        self.base.join("leaderboards").join(format!("{tag}.db"))
    }
}

/// PID marker held for the lifetime of a session. Removed on drop.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
    pid: u32,
}

impl SessionLock {
    /// Claim the tag. Fails if a live process already holds it; a marker
    /// left by a dead process is replaced.
    pub fn acquire(paths: &SessionPaths, tag: &str) -> Result<Self, SessionError> {
        let path = paths.pid_file(tag);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        if let Some(pid) = read_pid(&path) {
            if is_alive(pid) {
                return Err(SessionError::AlreadyRunning {
                    tag: tag.to_string(),
                    pid,
                });
            }
            log::warn!("Removing stale PID file for {} (pid {})", tag, pid);
            fs::remove_file(&path)?;
        }

        let pid = std::process::id();
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SessionError::AlreadyRunning {
                    tag: tag.to_string(),
                    pid: read_pid(&path).unwrap_or(0),
                });
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{pid}")?;

        log::debug!("Acquired session lock {} (pid {})", path.display(), pid);
        Ok(Self { path, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if read_pid(&self.path) == Some(self.pid)
            && let Err(e) = fs::remove_file(&self.path)
        {
            log::warn!("Failed to remove PID file {}: {}", self.path.display(), e);
        }
    }
}

/// PID recorded in a marker file, if any.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether a process with this PID exists.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

/// PID of the live session holding `tag`, if any.
pub fn active_session(paths: &SessionPaths, tag: &str) -> Option<u32> {
    read_pid(&paths.pid_file(tag)).filter(|&pid| is_alive(pid))
}

/// Ask a background session to stop. It takes the same cooperative path as
/// an in-process cancel and writes a final checkpoint.
pub fn stop_session(paths: &SessionPaths, tag: &str) -> Result<u32, SessionError> {
    let path = paths.pid_file(tag);
    let Some(pid) = read_pid(&path) else {
        return Err(SessionError::NotRunning(tag.to_string()));
    };
    if !is_alive(pid) {
        fs::remove_file(&path)?;
        return Err(SessionError::NotRunning(tag.to_string()));
    }
    send_terminate(pid)?;
    log::info!("Sent stop signal to {} (pid {})", tag, pid);
    Ok(pid)
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<(), SessionError> {
    let raw = libc::pid_t::try_from(pid).map_err(|_| SessionError::NotRunning(pid.to_string()))?;
    if unsafe { libc::kill(raw, libc::SIGTERM) } != 0 {
        return Err(SessionError::Signal {
            pid,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> Result<(), SessionError> {
    Err(SessionError::Unsupported)
}
