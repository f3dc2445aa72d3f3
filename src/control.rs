use std::env;
use std::io;
use std::process::exit;
use std::thread;
use std::time::Duration;

use crate::creds::{self, SystemAccounts};
use crate::detach::{Detach, DoubleFork};
use crate::error::{syscall_error, DaemonError, DaemonResult};
use crate::pidfile::{PidFile, PidStore};
use crate::spec::DaemonSpec;
use crate::supervise;

/// The four-verb control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Start,
    Stop,
    Restart,
    Status,
}

impl Verb {
    pub fn parse(arg: &str) -> Option<Verb> {
        match arg {
            "start" => Some(Verb::Start),
            "stop" => Some(Verb::Stop),
            "restart" => Some(Verb::Restart),
            "status" => Some(Verb::Status),
            _ => None,
        }
    }
}

/// Usage line printed for an unknown or missing verb.
pub fn usage(program: &str) -> String {
    format!("usage: {} start|stop|restart|status", program)
}

/// What `status` observed. The stale case is deliberately distinct from
/// "not running": the instance lock is still held by a dead process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    NotRunning,
    Running(i32),
    /// PID file present but the process is gone, or the file is unreadable.
    Stale(Option<i32>),
}

impl ServiceStatus {
    pub fn describe(&self) -> &'static str {
        match self {
            ServiceStatus::NotRunning => "not running",
            ServiceStatus::Running(_) => "running",
            ServiceStatus::Stale(_) => "not running, but pidfile is remaining",
        }
    }
}

/// Signal and liveness collaborator, behind a seam so stop/status logic is
/// testable without touching real processes.
pub trait ProcessControl {
    /// Best-effort existence probe. Says nothing about whether the PID
    /// still belongs to the same service.
    fn is_alive(&self, pid: i32) -> bool;
    /// Soft terminate (the target may catch it and wind down).
    fn terminate(&self, pid: i32) -> DaemonResult<()>;
    /// Hard terminate (the target cannot intercept it).
    fn kill(&self, pid: i32) -> DaemonResult<()>;
}

/// Real signals via kill(2).
#[derive(Debug, Default)]
pub struct SystemProcs;

impl SystemProcs {
    fn send(&self, pid: i32, sig: libc::c_int, call: &'static str) -> DaemonResult<()> {
        if unsafe { libc::kill(pid, sig) } == 0 {
            return Ok(());
        }
        // The target dying between probe and signal is not a failure.
        if io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(syscall_error(call))
        }
    }
}

impl ProcessControl for SystemProcs {
    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM means the process exists but belongs to someone else.
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn terminate(&self, pid: i32) -> DaemonResult<()> {
        self.send(pid, libc::SIGTERM, "kill(SIGTERM)")
    }

    fn kill(&self, pid: i32) -> DaemonResult<()> {
        self.send(pid, libc::SIGKILL, "kill(SIGKILL)")
    }
}

/// Top-level state machine dispatching the four verbs over the PID file,
/// the detacher and the signal collaborator.
pub struct ServiceController<Setup, S = PidFile, D = DoubleFork, C = SystemProcs> {
    spec: DaemonSpec<Setup>,
    store: S,
    detacher: D,
    procs: C,
    poll_interval: Duration,
}

impl<Setup: 'static> ServiceController<Setup> {
    /// Wires the controller to the real filesystem, double fork and kill(2).
    pub fn new(spec: DaemonSpec<Setup>) -> Self {
        let store = PidFile::new(spec.pid_path());
        Self::with_parts(spec, store, DoubleFork, SystemProcs)
    }
}

impl<Setup, S, D, C> ServiceController<Setup, S, D, C>
where
    Setup: 'static,
    S: PidStore + 'static,
    D: Detach,
    C: ProcessControl,
{
    /// Wires the controller to explicit collaborators. Tests use this to
    /// run the state machine against in-memory fakes.
    pub fn with_parts(spec: DaemonSpec<Setup>, store: S, detacher: D, procs: C) -> Self {
        ServiceController {
            spec,
            store,
            detacher,
            procs,
            poll_interval: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Launches the daemon.
    ///
    /// An existing PID file means another instance holds the lock; nothing
    /// is spawned and the file is left untouched. The check is existence
    /// only, so a stale file from a crashed instance blocks starts until it
    /// is removed (by `stop` or by hand). Otherwise the process detaches
    /// and the grandchild records its PID, runs the privileged setup, drops
    /// privileges and enters the supervisor for good.
    pub fn start(self) -> DaemonResult<()> {
        if self.store.exists() {
            return Err(DaemonError::AlreadyRunning);
        }
        let ServiceController {
            spec,
            store,
            detacher,
            ..
        } = self;
        let body: Box<dyn FnOnce() -> DaemonResult<()>> =
            Box::new(move || daemon_body(spec, store));

        // Under systemd's notify protocol the service stays in the
        // foreground and reports readiness instead of double-forking.
        #[cfg(target_os = "linux")]
        if env::var_os("NOTIFY_SOCKET").is_some() {
            let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);
            return body();
        }

        detacher.detach(body)
    }

    /// Terminates the recorded instance.
    ///
    /// Soft-terminates a live process, polls liveness once per poll
    /// interval up to `kill_wait` (indefinitely when unset), then escalates
    /// to a hard kill. The PID file is removed as a final guaranteed step
    /// no matter how the signalling went.
    pub fn stop(&self) -> DaemonResult<()> {
        let outcome = self.signal_recorded_process();
        let removed = self.store.remove();
        outcome?;
        removed
    }

    fn signal_recorded_process(&self) -> DaemonResult<()> {
        let pid = match self.store.read() {
            Ok(Some(pid)) => pid,
            // No record, nothing to signal.
            Ok(None) => return Ok(()),
            Err(DaemonError::CorruptPidFile { path, content }) => {
                log::warn!(
                    "PID file {} holds {:?}; nothing to signal",
                    path.display(),
                    content.trim()
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if !self.procs.is_alive(pid) {
            return Ok(());
        }

        self.procs.terminate(pid)?;
        let budget = self.spec.kill_wait.map(|wait| wait.as_secs());
        let mut waited = 0u64;
        loop {
            if !self.procs.is_alive(pid) {
                return Ok(());
            }
            if let Some(budget) = budget {
                if waited >= budget {
                    break;
                }
            }
            thread::sleep(self.poll_interval);
            waited += 1;
        }
        log::warn!("pid {} survived SIGTERM for {}s, sending SIGKILL", pid, waited);
        self.procs.kill(pid)
    }

    /// `stop` followed by `start`. Sequential; a concurrent external
    /// `start` can race in between.
    pub fn restart(self) -> DaemonResult<()> {
        self.stop()?;
        self.start()
    }

    /// Reports one of three states and never fails on a missing file.
    pub fn status(&self) -> DaemonResult<ServiceStatus> {
        match self.store.read() {
            Ok(None) => Ok(ServiceStatus::NotRunning),
            Ok(Some(pid)) if self.procs.is_alive(pid) => Ok(ServiceStatus::Running(pid)),
            Ok(Some(pid)) => Ok(ServiceStatus::Stale(Some(pid))),
            Err(DaemonError::CorruptPidFile { .. }) => Ok(ServiceStatus::Stale(None)),
            Err(err) => Err(err),
        }
    }

    /// Runs one verb. `status` is the only verb with an observation to
    /// hand back.
    pub fn dispatch(self, verb: Verb) -> DaemonResult<Option<ServiceStatus>> {
        match verb {
            Verb::Start => self.start().map(|_| None),
            Verb::Stop => self.stop().map(|_| None),
            Verb::Restart => self.restart().map(|_| None),
            Verb::Status => self.status().map(Some),
        }
    }
}

/// Everything the grandchild does: record the PID, run the privileged
/// setup, drop to the service identity, then supervise the work forever.
fn daemon_body<Setup, S: PidStore>(spec: DaemonSpec<Setup>, store: S) -> DaemonResult<()> {
    store.write(std::process::id() as i32)?;
    let name = spec.resolved_name();
    let DaemonSpec {
        user,
        group,
        setup,
        work,
        ..
    } = spec;
    let setup_out = setup()?;
    creds::drop_privileges(&SystemAccounts, &name, user.as_deref(), group.as_deref())?;
    log::info!("{} detached as pid {}", name, std::process::id());
    supervise::run(work.as_ref(), &setup_out)
}

/// Entry-point helper: reads the verb from the command line, dispatches it
/// and exits with the documented status codes.
///
/// Exit codes: 0 on every defined success path, 1 when `start` finds an
/// existing PID file or any operation fails, 2 for a missing or unknown
/// verb (usage is printed instead).
pub fn run<Setup: 'static>(spec: DaemonSpec<Setup>) -> ! {
    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "daemon".to_owned());
    let verb = match args.next().as_deref().and_then(Verb::parse) {
        Some(verb) => verb,
        None => {
            println!("{}", usage(&program));
            exit(2);
        }
    };
    match ServiceController::new(spec).dispatch(verb) {
        Ok(Some(status)) => {
            println!("{}", status.describe());
            exit(0)
        }
        Ok(None) => exit(0),
        Err(DaemonError::AlreadyRunning) => {
            eprintln!("{}", DaemonError::AlreadyRunning);
            exit(1)
        }
        Err(err) => {
            eprintln!("{}", err);
            exit(1)
        }
    }
}
