use std::env;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DaemonError, DaemonResult};

/// Directory holding the PID file when none is configured.
pub const DEFAULT_PID_DIR: &str = "/var/run";

/// Immutable configuration for one daemonized service.
///
/// `Setup` is the value produced by the privileged setup action and handed
/// to the work body on every (re)start. Construct the spec once, hand it to
/// [`ServiceController`](crate::ServiceController), never mutate it.
pub struct DaemonSpec<Setup> {
    pub(crate) name: Option<String>,
    pub(crate) user: Option<String>,
    pub(crate) group: Option<String>,
    pub(crate) pid_dir: Option<PathBuf>,
    pub(crate) kill_wait: Option<Duration>,

    // Run with full privileges, before the identity drop.
    pub(crate) setup: Box<dyn FnOnce() -> DaemonResult<Setup>>,
    // Re-invoked by the supervisor after every failure.
    pub(crate) work: Box<dyn Fn(&Setup) -> DaemonResult<()>>,
}

// Manual Debug because the closures are opaque.
impl<T> fmt::Debug for DaemonSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonSpec")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("group", &self.group)
            .field("pid_dir", &self.pid_dir)
            .field("kill_wait", &self.kill_wait)
            .field("setup", &"FnOnce")
            .field("work", &"Fn")
            .finish()
    }
}

impl Default for DaemonSpec<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonSpec<()> {
    /// Creates a configuration with no-op setup and an idle work body.
    ///
    /// # Defaults
    /// - name: the executable's own file stem
    /// - PID directory: `/var/run`
    /// - user/group: the daemon name, then the `daemon` account
    /// - kill wait: indefinite
    pub fn new() -> Self {
        DaemonSpec {
            name: None,
            user: None,
            group: None,
            pid_dir: None,
            kill_wait: None,
            setup: Box::new(|| Ok(())),
            work: Box::new(|_| Ok(())),
        }
    }
}

impl<Setup> DaemonSpec<Setup> {
    // --- Builder methods ---

    /// Sets the daemon identity used for the PID file, the log tag and the
    /// default account names.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    /// Sets the account whose identity the daemon assumes after setup.
    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_owned());
        self
    }

    /// Sets the group whose identity the daemon assumes after setup.
    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_owned());
        self
    }

    /// Sets the directory the PID file is kept in.
    pub fn pid_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.pid_dir = Some(dir.into());
        self
    }

    /// Bounds how long `stop` waits after the soft-terminate signal before
    /// escalating to a hard kill. Without a bound `stop` waits forever.
    pub fn kill_wait(mut self, wait: Duration) -> Self {
        self.kill_wait = Some(wait);
        self
    }

    /// Replaces the privileged setup action.
    ///
    /// Runs inside the detached process with full (pre-drop) privileges; its
    /// result is threaded into the work body. Returning `Err` aborts startup.
    /// Consumes the builder and re-types it over the new setup output `N`,
    /// resetting the work body; set the setup before the work.
    pub fn privileged_setup<N, F>(self, setup: F) -> DaemonSpec<N>
    where
        F: FnOnce() -> DaemonResult<N> + 'static,
    {
        DaemonSpec {
            name: self.name,
            user: self.user,
            group: self.group,
            pid_dir: self.pid_dir,
            kill_wait: self.kill_wait,
            setup: Box::new(setup),
            work: Box::new(|_| Ok(())),
        }
    }

    /// Sets the service's main activity.
    ///
    /// Expected to run indefinitely; any return, normal or not, puts the
    /// supervisor through a restart cycle.
    pub fn work<F>(mut self, work: F) -> Self
    where
        F: Fn(&Setup) -> DaemonResult<()> + 'static,
    {
        self.work = Box::new(work);
        self
    }

    /// Validates the configuration without touching any state.
    /// Checks that the PID directory exists.
    pub fn build(self) -> DaemonResult<Self> {
        let dir = self.pid_directory();
        if !dir.is_dir() {
            return Err(DaemonError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("PID directory {} does not exist", dir.display()),
            )));
        }
        Ok(self)
    }

    // --- Resolution (pure functions of the spec) ---

    /// The effective daemon name: configured, or the executable's file stem.
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "daemon".to_owned())
    }

    /// The effective PID directory.
    pub fn pid_directory(&self) -> PathBuf {
        self.pid_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_DIR))
    }

    /// Full path of the PID file, `<pid_dir>/<name>.pid`.
    pub fn pid_path(&self) -> PathBuf {
        self.pid_directory().join(format!("{}.pid", self.resolved_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_path_joins_directory_and_name() {
        let spec = DaemonSpec::new().name("echoer").pid_dir("/tmp");
        assert_eq!(spec.pid_path(), PathBuf::from("/tmp/echoer.pid"));
    }

    #[test]
    fn pid_directory_defaults_to_var_run() {
        let spec = DaemonSpec::new().name("echoer");
        assert_eq!(spec.pid_path(), PathBuf::from("/var/run/echoer.pid"));
    }

    #[test]
    fn name_defaults_to_executable_stem() {
        let spec = DaemonSpec::new();
        let name = spec.resolved_name();
        assert!(!name.is_empty());
        assert!(!name.contains('/'));
    }

    #[test]
    fn build_rejects_missing_pid_directory() {
        let spec = DaemonSpec::new().name("x").pid_dir("/nonexistent/surely/not");
        assert!(spec.build().is_err());
    }

    #[test]
    fn build_accepts_existing_pid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spec = DaemonSpec::new().name("x").pid_dir(dir.path());
        assert!(spec.build().is_ok());
    }
}
