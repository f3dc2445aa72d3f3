use std::io;
use std::process::exit;

use crate::error::{syscall_error, DaemonError, DaemonResult};

/// Converts the calling process into a detached background daemon.
///
/// One entry point, one outcome that reaches the caller: the final detached
/// process running `action`. The trait seam lets unit tests run the daemon
/// body synchronously without forking.
pub trait Detach {
    fn detach(&self, action: Box<dyn FnOnce() -> DaemonResult<()>>) -> DaemonResult<()>;
}

/// Classic SVR4 double-fork daemonization.
///
/// A session leader can reacquire a controlling terminal; forking a second
/// time and exiting the leader guarantees the surviving process never can.
#[derive(Debug, Default)]
pub struct DoubleFork;

impl Detach for DoubleFork {
    /// Runs `action` in the fully detached grandchild.
    ///
    /// The parent and the intermediate process exit with status 0 and never
    /// return from this call; only the grandchild proceeds past it. A failed
    /// first fork is reported to the invoking process, which treats it as
    /// fatal. Later failures happen after the invoker is gone and are logged
    /// before the child exits nonzero.
    fn detach(&self, action: Box<dyn FnOnce() -> DaemonResult<()>>) -> DaemonResult<()> {
        unsafe {
            libc::umask(0);

            // Fork 1: the parent's only job was to fork.
            if fork_checked()? > 0 {
                exit(0);
            }

            if libc::setsid() < 0 {
                die("setsid", io::Error::last_os_error());
            }

            // Fork 2: exit the session leader.
            let pid = libc::fork();
            if pid < 0 {
                die("fork", io::Error::last_os_error());
            }
            if pid > 0 {
                exit(0);
            }

            if libc::chdir(c"/".as_ptr()) < 0 {
                die("chdir", io::Error::last_os_error());
            }

            if let Err(err) = redirect_to_devnull() {
                log::error!("daemonization failed: {}", err);
                exit(1);
            }

            // The terminal is gone; a late SIGHUP must not kill the daemon.
            libc::signal(libc::SIGHUP, libc::SIG_IGN);
        }

        match action() {
            // The body normally never returns; a clean return still means
            // the daemon is done.
            Ok(()) => exit(0),
            Err(err) => {
                log::error!("daemon body failed: {}", err);
                exit(1);
            }
        }
    }
}

unsafe fn fork_checked() -> DaemonResult<libc::pid_t> {
    let pid = libc::fork();
    if pid < 0 {
        Err(syscall_error("fork"))
    } else {
        Ok(pid)
    }
}

/// Duplicates /dev/null over stdin, stdout and stderr.
unsafe fn redirect_to_devnull() -> DaemonResult<()> {
    let fd = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
    if fd < 0 {
        return Err(DaemonError::Io(io::Error::last_os_error()));
    }
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if libc::dup2(fd, target) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(DaemonError::Io(err));
        }
    }
    // With all std streams closed at entry, open can hand back fd 0..2.
    if fd > libc::STDERR_FILENO {
        libc::close(fd);
    }
    Ok(())
}

// Past the first fork there is no caller left to report to.
fn die(call: &'static str, err: io::Error) -> ! {
    log::error!("daemonization failed: syscall '{}': {}", call, err);
    exit(1)
}
