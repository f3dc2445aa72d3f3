use std::fmt;
use std::io;
use std::path::PathBuf;

/// Error type covering every failure the lifecycle core can report.
#[derive(Debug)]
pub enum DaemonError {
    /// Standard IO errors (PID file access, /dev/null, etc.)
    Io(io::Error),
    /// `start` found an existing PID file; another instance owns the lock.
    AlreadyRunning,
    /// A PID file was present but its content was not a decimal process id.
    CorruptPidFile { path: PathBuf, content: String },
    /// No privilege-dropped identity could be resolved, not even the
    /// fallback account. Fatal configuration error.
    Credential(String),
    /// A system call failed (fork, setsid, setgid, ...).
    Syscall { call: &'static str, errno: i32 },
    /// The caller-supplied setup action failed before the supervisor ran.
    Setup(String),
    /// The work body reported a failure; recovered by the supervisor.
    Work(String),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Io(err) => write!(f, "IO error: {}", err),
            DaemonError::AlreadyRunning => write!(f, "daemon is already running"),
            DaemonError::CorruptPidFile { path, content } => {
                write!(f, "PID file {} holds non-numeric content {:?}", path.display(), content)
            }
            DaemonError::Credential(msg) => write!(f, "credential resolution failed: {}", msg),
            DaemonError::Syscall { call, errno } => {
                write!(f, "syscall '{}' failed with errno {}", call, errno)
            }
            DaemonError::Setup(msg) => write!(f, "privileged setup failed: {}", msg),
            DaemonError::Work(msg) => write!(f, "work failed: {}", msg),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DaemonError {
    fn from(err: io::Error) -> Self {
        DaemonError::Io(err)
    }
}

/// A specialized Result type for lifecycle operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Captures the current errno for a failed system call.
pub(crate) fn syscall_error(call: &'static str) -> DaemonError {
    DaemonError::Syscall {
        call,
        errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
    }
}
