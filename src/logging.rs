use std::path::Path;

use crate::error::DaemonResult;

/// Where log records end up.
///
/// The detached daemon has its stdio on `/dev/null`, so it needs the file
/// target; the short-lived control process can keep stdout.
#[derive(Debug)]
pub enum LogTarget<'a> {
    Stdout,
    /// Append-mode log file.
    File(&'a Path),
}

/// Installs a timestamped dispatcher for the `log` facade.
///
/// Call once, before `start`, so both the control process and the daemon
/// it forks report through the same sink.
pub fn init(name: &str, level: log::LevelFilter, target: LogTarget<'_>) -> DaemonResult<()> {
    let tag = name.to_owned();
    let logger = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                tag,
                record.level(),
                message
            ))
        })
        .level(level);

    let logger = match target {
        LogTarget::Stdout => logger.chain(std::io::stdout()),
        LogTarget::File(path) => logger.chain(fern::log_file(path)?),
    };

    logger
        .apply()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
    Ok(())
}
