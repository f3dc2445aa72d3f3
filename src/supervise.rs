use std::panic::{self, AssertUnwindSafe};
use std::process::exit;
use std::thread;
use std::time::Duration;

use crate::error::{DaemonError, DaemonResult};

/// Pause between restart attempts.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Why a work invocation ended. Every variant is retryable; the supervisor
/// classifies instead of unwinding.
#[derive(Debug)]
pub enum WorkFailure {
    /// The work returned an error.
    Failed(DaemonError),
    /// The work panicked; the payload message is preserved for the log.
    Panicked(String),
    /// The work returned normally. It was expected to run forever, so a
    /// clean return still goes through a restart cycle.
    Returned,
}

impl WorkFailure {
    fn describe(&self) -> String {
        match self {
            WorkFailure::Failed(err) => err.to_string(),
            WorkFailure::Panicked(msg) => format!("panic: {}", msg),
            WorkFailure::Returned => "work returned unexpectedly".to_owned(),
        }
    }
}

/// Runs `work` forever, restarting it after every failure.
///
/// This loop is the daemon's entire remaining lifetime. The only ways out
/// are [`exit_cleanly`] and [`fatal`], called from inside the work itself.
pub fn run<Setup>(work: &dyn Fn(&Setup) -> DaemonResult<()>, arg: &Setup) -> ! {
    run_with_delay(work, arg, RESTART_DELAY)
}

fn run_with_delay<Setup>(
    work: &dyn Fn(&Setup) -> DaemonResult<()>,
    arg: &Setup,
    delay: Duration,
) -> ! {
    loop {
        let failure = attempt(work, arg);
        log::error!(
            "{}; restarting in {} seconds",
            failure.describe(),
            delay.as_secs()
        );
        thread::sleep(delay);
    }
}

/// One supervised invocation of the work, with its outcome as data.
fn attempt<Setup>(work: &dyn Fn(&Setup) -> DaemonResult<()>, arg: &Setup) -> WorkFailure {
    match panic::catch_unwind(AssertUnwindSafe(|| work(arg))) {
        Ok(Ok(())) => WorkFailure::Returned,
        Ok(Err(err)) => WorkFailure::Failed(err),
        Err(payload) => WorkFailure::Panicked(panic_message(&*payload)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

/// Terminates the daemon process successfully, bypassing the supervisor.
/// The legitimate way for the work to shut the service down.
pub fn exit_cleanly() -> ! {
    log::info!("work requested clean exit");
    exit(0)
}

/// Terminates the daemon process with a failure status, bypassing the
/// supervisor. For conditions a restart cannot fix.
pub fn fatal(msg: &str) -> ! {
    log::error!("fatal: {}", msg);
    exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn error_return_is_classified_as_failed() {
        let work = |_: &()| -> DaemonResult<()> { Err(DaemonError::Work("boom".into())) };
        match attempt(&work, &()) {
            WorkFailure::Failed(DaemonError::Work(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn panic_is_caught_and_message_preserved() {
        let work = |_: &()| -> DaemonResult<()> { panic!("sky fell") };
        match attempt(&work, &()) {
            WorkFailure::Panicked(msg) => assert_eq!(msg, "sky fell"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn normal_return_still_counts_as_a_failure() {
        let work = |_: &()| -> DaemonResult<()> { Ok(()) };
        assert!(matches!(attempt(&work, &()), WorkFailure::Returned));
    }

    #[test]
    fn loop_reinvokes_work_after_each_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let (park_tx, park_rx) = mpsc::channel::<()>();

        let counted = Arc::clone(&calls);
        // Fails three times, then signals and parks forever. The thread is
        // deliberately leaked; the loop has no exit.
        thread::spawn(move || {
            let work = move |_: &()| -> DaemonResult<()> {
                let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 3 {
                    return Err(DaemonError::Work(format!("injected failure {}", n)));
                }
                done_tx.send(()).ok();
                park_rx.recv().ok();
                Ok(())
            };
            run_with_delay(&work, &(), Duration::from_millis(1));
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("supervisor never reached the fourth attempt");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        drop(park_tx);
    }
}
