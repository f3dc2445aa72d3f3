//! # daemon_warden
//!
//! **daemon_warden** turns an arbitrary unit of work into a proper UNIX
//! background service: double-fork detachment from the controlling
//! terminal, single-instance enforcement through a PID file, a four-verb
//! control protocol (`start`/`stop`/`restart`/`status`), privilege drop
//! before the work runs, and an infinite crash-restart supervisor.
//!
//! ```no_run
//! use daemon_warden::DaemonSpec;
//! use std::time::Duration;
//!
//! let spec = DaemonSpec::new()
//!     .name("echoer")
//!     .pid_dir("/tmp")
//!     .kill_wait(Duration::from_secs(2))
//!     .work(|_| {
//!         loop {
//!             std::thread::sleep(Duration::from_secs(1));
//!         }
//!     });
//! daemon_warden::run(spec); // start | stop | restart | status
//! ```

mod control;
pub mod creds;
mod detach;
mod error;
mod logging;
mod pidfile;
mod spec;
pub mod supervise;

// Re-export public types to keep the API flat
pub use control::{run, usage, ProcessControl, ServiceController, ServiceStatus, SystemProcs, Verb};
pub use creds::{AccountLookup, Credential, SystemAccounts, FALLBACK_ACCOUNT};
pub use detach::{Detach, DoubleFork};
pub use error::{DaemonError, DaemonResult};
pub use logging::{init as init_logging, LogTarget};
pub use pidfile::{PidFile, PidStore};
pub use spec::{DaemonSpec, DEFAULT_PID_DIR};
