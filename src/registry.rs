//! Tracking of in-flight and recently finished builds.
//!
//! One record is kept per build ID. A new push for an ID whose build is
//! still running supersedes it: the old script is killed and the new
//! build starts once it has exited, so a log file only ever has one
//! writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatch::{BuildDispatcher, BuildTask};
use crate::error::BuildError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

/// Status of one build run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub build_id: String,
    pub run_id: Uuid,
    pub status: BuildStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl BuildRecord {
    fn new(build_id: String) -> Self {
        Self {
            build_id,
            run_id: Uuid::now_v7(),
            status: BuildStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == BuildStatus::Running
    }

    fn mark_finished(&mut self, result: &Result<ExitStatus, BuildError>) {
        self.completed_at = Some(Utc::now());
        self.status = match result {
            Ok(_) => BuildStatus::Succeeded,
            Err(BuildError::Cancelled) => BuildStatus::Cancelled,
            Err(BuildError::TimedOut(_)) => BuildStatus::TimedOut,
            Err(_) => BuildStatus::Failed,
        };
        self.error = result.as_ref().err().map(ToString::to_string);
    }
}

struct Entry {
    record: BuildRecord,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub struct BuildRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    capacity: usize,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl BuildRegistry {
    /// `capacity` bounds the number of finished records kept around.
    /// Running builds are never evicted.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a build in the background and return its initial record.
    pub fn spawn(
        self: &Arc<Self>,
        dispatcher: Arc<BuildDispatcher>,
        task: BuildTask,
    ) -> BuildRecord {
        let build_id = task.id.clone();
        let record = BuildRecord::new(build_id.clone());
        let run_id = record.run_id;
        let cancel = self.shutdown.child_token();

        let mut entries = self.lock();
        let previous = entries.remove(&build_id).and_then(|mut old| {
            if old.record.is_running() {
                warn!(
                    build_id = %build_id,
                    run_id = %old.record.run_id,
                    "Newer push received; cancelling running build"
                );
                old.cancel.cancel();
            }
            old.handle.take()
        });

        let registry = Arc::clone(self);
        let token = cancel.clone();
        let handle = self.tracker.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let result = if token.is_cancelled() {
                Err(BuildError::Cancelled)
            } else {
                dispatcher.run(&task, token).await
            };
            report_outcome(&task.id, &result);
            registry.finish(&task.id, run_id, &result);
        });

        entries.insert(
            build_id,
            Entry {
                record: record.clone(),
                cancel,
                handle: Some(handle),
            },
        );
        self.evict_finished(&mut entries);
        record
    }

    fn finish(&self, build_id: &str, run_id: Uuid, result: &Result<ExitStatus, BuildError>) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(build_id) {
            if entry.record.run_id == run_id {
                entry.record.mark_finished(result);
                entry.handle = None;
            }
        }
        self.evict_finished(&mut entries);
    }

    fn evict_finished(&self, entries: &mut HashMap<String, Entry>) {
        while entries.len() > self.capacity {
            let oldest = entries
                .values()
                .filter(|entry| !entry.record.is_running())
                .min_by_key(|entry| entry.record.started_at)
                .map(|entry| entry.record.build_id.clone());
            match oldest {
                Some(build_id) => {
                    entries.remove(&build_id);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, build_id: &str) -> Option<BuildRecord> {
        self.lock().get(build_id).map(|entry| entry.record.clone())
    }

    /// All tracked builds, newest first.
    pub fn list(&self) -> Vec<BuildRecord> {
        let mut records: Vec<_> = self.lock().values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.run_id.cmp(&a.run_id)));
        records
    }

    pub fn running_count(&self) -> usize {
        self.lock().values().filter(|e| e.record.is_running()).count()
    }

    /// Request cancellation of a running build. Returns false if there is none.
    pub fn cancel(&self, build_id: &str) -> bool {
        match self.lock().get(build_id) {
            Some(entry) if entry.record.is_running() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait for in-flight builds to finish, cancelling whatever is still
    /// running once `grace` has elapsed.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.tracker.len(),
                "Shutdown grace period elapsed; cancelling remaining builds"
            );
            self.shutdown.cancel();
            self.tracker.wait().await;
        }
    }
}

fn report_outcome(build_id: &str, result: &Result<ExitStatus, BuildError>) {
    match result {
        Ok(_) => info!(build_id = %build_id, "Deployment for {} successful", build_id),
        Err(BuildError::Cancelled) => {
            warn!(build_id = %build_id, "Deployment for {} cancelled", build_id)
        }
        Err(e) => error!(build_id = %build_id, "Deployment failed for {}: {}", build_id, e),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::dispatch::tests::{task, write_script};

    const WAIT: Duration = Duration::from_secs(20);

    #[tokio::test]
    async fn finished_build_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "build.sh", "echo built");
        let dispatcher = Arc::new(BuildDispatcher::new(script, dir.path().join("logs")));
        let registry = Arc::new(BuildRegistry::new(8));

        let record = registry.spawn(dispatcher, task(11));
        assert_eq!(record.status, BuildStatus::Running);
        assert_eq!(record.build_id, "11");

        registry.shutdown(WAIT).await;
        let record = registry.get("11").unwrap();
        assert_eq!(record.status, BuildStatus::Succeeded);
        assert!(record.completed_at.is_some());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn failed_build_records_error_and_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        let good = Arc::new(BuildDispatcher::new(
            write_script(dir.path(), "good.sh", "echo ok"),
            dir.path().join("logs"),
        ));
        let bad = Arc::new(BuildDispatcher::new(
            write_script(dir.path(), "bad.sh", "exit 2"),
            dir.path().join("logs"),
        ));
        let registry = Arc::new(BuildRegistry::new(8));

        registry.spawn(bad, task(1));
        registry.spawn(good, task(2));
        registry.shutdown(WAIT).await;

        let failed = registry.get("1").unwrap();
        assert_eq!(failed.status, BuildStatus::Failed);
        assert!(failed.error.unwrap().contains("exited unsuccessfully"));
        assert_eq!(registry.get("2").unwrap().status, BuildStatus::Succeeded);
    }

    #[tokio::test]
    async fn newer_push_supersedes_running_build() {
        let dir = tempfile::tempdir().unwrap();
        let slow = Arc::new(BuildDispatcher::new(
            write_script(dir.path(), "slow.sh", "echo first\nexec sleep 30"),
            dir.path().join("logs"),
        ));
        let fast = Arc::new(BuildDispatcher::new(
            write_script(dir.path(), "fast.sh", "echo second"),
            dir.path().join("logs"),
        ));
        let registry = Arc::new(BuildRegistry::new(8));

        let first = registry.spawn(slow, task(3));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = registry.spawn(fast, task(3));
        assert_ne!(first.run_id, second.run_id);

        registry.shutdown(WAIT).await;
        let record = registry.get("3").unwrap();
        assert_eq!(record.run_id, second.run_id);
        assert_eq!(record.status, BuildStatus::Succeeded);

        let log = std::fs::read_to_string(dir.path().join("logs/log-3.log")).unwrap();
        assert_eq!(log, "second\n");
    }

    #[tokio::test]
    async fn cancel_stops_running_build() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(BuildDispatcher::new(
            write_script(dir.path(), "slow.sh", "exec sleep 30"),
            dir.path(),
        ));
        let registry = Arc::new(BuildRegistry::new(8));

        registry.spawn(dispatcher, task(4));
        assert_eq!(registry.running_count(), 1);
        assert!(registry.cancel("4"));
        assert!(!registry.cancel("unknown"));

        registry.shutdown(WAIT).await;
        assert_eq!(registry.get("4").unwrap().status, BuildStatus::Cancelled);
        assert!(!registry.cancel("4"));
    }

    #[tokio::test]
    async fn cancel_stops_build_whose_output_outlives_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(BuildDispatcher::new(
            write_script(dir.path(), "detach.sh", "sleep 30 &\necho deployed"),
            dir.path(),
        ));
        let registry = Arc::new(BuildRegistry::new(8));

        registry.spawn(dispatcher, task(2));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(registry.cancel("2"));

        let started = std::time::Instant::now();
        registry.shutdown(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(registry.get("2").unwrap().status, BuildStatus::Cancelled);
    }

    #[tokio::test]
    async fn shutdown_cancels_builds_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(BuildDispatcher::new(
            write_script(dir.path(), "slow.sh", "exec sleep 30"),
            dir.path(),
        ));
        let registry = Arc::new(BuildRegistry::new(8));

        registry.spawn(dispatcher, task(6));
        registry.shutdown(Duration::from_millis(200)).await;
        assert_eq!(registry.get("6").unwrap().status, BuildStatus::Cancelled);
        assert_eq!(registry.running_count(), 0);
    }

    #[tokio::test]
    async fn finished_records_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(BuildDispatcher::new(
            write_script(dir.path(), "build.sh", "true"),
            dir.path().join("logs"),
        ));
        let registry = Arc::new(BuildRegistry::new(2));

        for id in 0..5 {
            registry.spawn(Arc::clone(&dispatcher), task(id));
        }
        registry.shutdown(WAIT).await;

        let records = registry.list();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == BuildStatus::Succeeded));
    }
}
