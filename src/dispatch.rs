//! Running the external build script for one repository event.

use std::future;
use std::io;
use std::pin::pin;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::build_log::{SanitizingWriter, create_log_file, log_path};
use crate::config::Config;
use crate::credentials::AuthenticatedUrl;
use crate::error::BuildError;
use crate::payload::RepositoryEvent;

/// How long to keep draining output after the script has been killed.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(5);
/// How long output may stay open after the script has exited on its own.
const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// One execution of the build script.
#[derive(Debug, Clone)]
pub struct BuildTask {
    /// Stringified repository ID; also names the log file.
    pub id: String,
    pub clone_url: AuthenticatedUrl,
    pub default_branch: String,
}

impl BuildTask {
    pub fn new(event: &RepositoryEvent, clone_url: AuthenticatedUrl) -> Self {
        Self {
            id: event.id.to_string(),
            clone_url,
            default_branch: event.default_branch.clone(),
        }
    }

    /// Arguments handed to the build script.
    pub fn args(&self) -> [String; 3] {
        [
            format!("REPO_URL={}", self.clone_url.expose()),
            format!("DEFAULT_BRANCH={}", self.default_branch),
            format!("REPO_ID={}", self.id),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct BuildDispatcher {
    script: PathBuf,
    log_dir: PathBuf,
    timeout: Option<Duration>,
}

impl BuildDispatcher {
    pub fn new(script: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            log_dir: log_dir.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.script, &config.log_dir).with_timeout(config.build_timeout())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the build script for `task` and wait for it to exit.
    ///
    /// The log file is truncated before the script starts. Both output
    /// streams are sanitized into it. The script is killed when `cancel`
    /// fires or the timeout elapses.
    pub async fn run(
        &self,
        task: &BuildTask,
        cancel: CancellationToken,
    ) -> Result<ExitStatus, BuildError> {
        let log_file_error = |source: io::Error| BuildError::LogFile {
            path: log_path(&self.log_dir, &task.id),
            source,
        };
        let (path, stdout_log) = create_log_file(&self.log_dir, &task.id)
            .await
            .map_err(log_file_error)?;
        let stderr_log = stdout_log.try_clone().await.map_err(log_file_error)?;

        info!(
            build_id = %task.id,
            repo_url = %task.clone_url,
            branch = %task.default_branch,
            log = %path.display(),
            "Starting build script {}",
            self.script.display()
        );

        let mut child = Command::new(&self.script)
            .args(task.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(BuildError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut pumps = tokio::spawn(async move {
            tokio::try_join!(pump(stdout, stdout_log), pump(stderr, stderr_log)).map(|_| ())
        });

        let deadline = async {
            match self.timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    timeout
                }
                None => future::pending::<Duration>().await,
            }
        };
        let mut deadline = pin!(deadline);

        let exited = tokio::select! {
            status = child.wait() => Ok(status),
            _ = cancel.cancelled() => Err(BuildError::Cancelled),
            elapsed = &mut deadline => Err(BuildError::TimedOut(elapsed)),
        };
        let status = match exited {
            Ok(status) => status.map_err(BuildError::Wait)?,
            Err(stopped) => {
                if let Err(e) = child.kill().await {
                    warn!(build_id = %task.id, "Failed to kill build script: {}", e);
                }
                if tokio::time::timeout(KILL_DRAIN_GRACE, &mut pumps)
                    .await
                    .is_err()
                {
                    pumps.abort();
                    debug!(build_id = %task.id, "Output still open after kill");
                }
                return Err(stopped);
            }
        };

        // Processes left behind by the script can hold the pipes open.
        let drained = tokio::select! {
            joined = &mut pumps => Ok(Some(joined)),
            _ = cancel.cancelled() => Err(BuildError::Cancelled),
            elapsed = &mut deadline => Err(BuildError::TimedOut(elapsed)),
            _ = tokio::time::sleep(EXIT_DRAIN_GRACE) => Ok(None),
        };
        let pumped = match drained {
            Ok(Some(joined)) => joined.map_err(|e| BuildError::LogWrite(io::Error::other(e)))?,
            Ok(None) => {
                pumps.abort();
                warn!(
                    build_id = %task.id,
                    "Build script exited but its output is still open; detaching log"
                );
                Ok(())
            }
            Err(stopped) => {
                pumps.abort();
                return Err(stopped);
            }
        };

        if !status.success() {
            return Err(BuildError::Failed(status));
        }
        pumped.map_err(BuildError::LogWrite)?;
        Ok(status)
    }
}

/// Copy one output stream into the build log.
async fn pump<R>(reader: Option<R>, log: File) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut writer = SanitizingWriter::new(log);
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await
}
