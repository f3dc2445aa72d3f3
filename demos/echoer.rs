//! The "echoer" service: appends a timestamped line to a file once per
//! second until it is told to stop.
//!
//! ```text
//! cargo run --example echoer -- start
//! cargo run --example echoer -- status
//! cargo run --example echoer -- stop
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use daemon_warden::{supervise, DaemonSpec, LogTarget};
use signal_hook::consts::signal::SIGTERM;
use signal_hook::flag;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    daemon_warden::init_logging(
        "echoer",
        log::LevelFilter::Info,
        LogTarget::File("/tmp/echoer.log".as_ref()),
    )?;

    let spec = DaemonSpec::new()
        .name("echoer")
        .pid_dir("/tmp")
        .kill_wait(Duration::from_secs(2))
        .work(|_| {
            // A soft terminate should end the service cleanly rather than
            // trip the supervisor into a restart.
            let term = Arc::new(AtomicBool::new(false));
            flag::register(SIGTERM, Arc::clone(&term))?;

            loop {
                if term.load(Ordering::Relaxed) {
                    supervise::exit_cleanly();
                }
                log::info!("echo from pid {}", std::process::id());
                thread::sleep(Duration::from_secs(1));
            }
        });

    daemon_warden::run(spec)
}
