use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";
const SERVER_LOG_PREFIX: &str = "autodeploy";

/// Rolling file destination for the server's own diagnostics.
///
/// Build output does not go here; each build has its own log under
/// `log_dir`.
pub struct ServerLogFile {
    log_directory: PathBuf,
    rotation: Rotation,
}

impl ServerLogFile {
    pub fn new(log_directory: impl Into<PathBuf>) -> Self {
        Self {
            log_directory: log_directory.into(),
            rotation: Rotation::DAILY,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Create the directory and a non-blocking writer into it.
    ///
    /// The guard must be held for as long as events should reach the file.
    pub fn writer(&self) -> io::Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory)?;

        let appender = RollingFileAppender::builder()
            .rotation(self.rotation.clone())
            .filename_prefix(SERVER_LOG_PREFIX)
            .filename_suffix("log")
            .build(&self.log_directory)
            .map_err(io::Error::other)?;

        Ok(tracing_appender::non_blocking(appender))
    }
}

/// Install the global subscriber: console output, plus a rolling file when
/// `server_log_dir` is set. Honors `RUST_LOG`, defaulting to `info`.
pub fn setup_logging(server_log_dir: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match server_log_dir {
        Some(dir) => {
            let (writer, guard) = ServerLogFile::new(dir).writer()?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_log_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("server");
        let (_writer, _guard) = ServerLogFile::new(&log_dir)
            .with_rotation(Rotation::NEVER)
            .writer()
            .unwrap();
        assert!(log_dir.is_dir());
    }
}
