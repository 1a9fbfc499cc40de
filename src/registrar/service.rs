// SPDX-License-Identifier: Apache-2.0

//! The registrar task.
//!
//! All workers share one bounded intake. A single task drains it, applies
//! events to the table in receipt order and persists the table in the
//! background. This task is the table's only writer, so no locking is
//! needed around it.

use std::future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event::RegistrarEvent;
use super::persistence::{PersistedStateV1, SnapshotFile};
use super::state::FileStateTable;
use crate::bounded_channel::{self, BoundedReceiver, BoundedSender};
use crate::error::{Error, Result};
use crate::stream::Stream;

/// Configuration for the registrar
#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    /// Location of the snapshot file
    pub persist_path: PathBuf,
    /// Interval between periodic persists while there are unsaved changes
    pub flush_interval: Duration,
    /// Persist early once this many changes are unsaved
    pub max_pending_changes: usize,
    /// Capacity of the intake channel
    pub intake_queue_size: usize,
    /// Maximum time to wait for workers' final events during shutdown
    pub shutdown_timeout: Duration,
    /// Failures lasting longer than this are logged at error level
    pub max_persist_failure_duration: Duration,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            persist_path: PathBuf::from(".courier"),
            flush_interval: Duration::from_secs(1),
            max_pending_changes: 256,
            intake_queue_size: 1024,
            shutdown_timeout: Duration::from_secs(5),
            max_persist_failure_duration: Duration::from_secs(60),
        }
    }
}

impl RegistrarConfig {
    pub fn with_persist_path(path: impl Into<PathBuf>) -> Self {
        Self {
            persist_path: path.into(),
            ..Default::default()
        }
    }
}

enum Command {
    Apply(Vec<RegistrarEvent>),
    Snapshot(oneshot::Sender<FileStateTable>),
}

impl Command {
    fn into_events(self) -> Vec<RegistrarEvent> {
        match self {
            Command::Apply(events) => events,
            Command::Snapshot(_) => Vec::new(),
        }
    }
}

/// Submission side of the registrar, cloned into every worker.
///
/// The registrar finishes draining once every handle has been dropped, so
/// workers should drop theirs after submitting their final events.
#[derive(Clone)]
pub struct RegistrarHandle {
    tx: BoundedSender<Command>,
}

impl RegistrarHandle {
    /// Submit a batch of events, waiting for capacity if the intake is full.
    pub async fn submit(&self, events: Vec<RegistrarEvent>) -> Result<()> {
        self.submit_or_return(events)
            .await
            .map_err(|_| Error::RegistrarClosed)
    }

    /// Like [`submit`](Self::submit), but hands the batch back if the
    /// registrar has stopped.
    pub async fn submit_or_return(
        &self,
        events: Vec<RegistrarEvent>,
    ) -> std::result::Result<(), Vec<RegistrarEvent>> {
        self.tx
            .send(Command::Apply(events))
            .await
            .map_err(|e| e.into_inner().into_events())
    }

    pub async fn submit_event(&self, event: RegistrarEvent) -> Result<()> {
        self.submit(vec![event]).await
    }

    /// Blocks the calling thread until the batch is accepted.
    pub fn submit_blocking(&self, events: Vec<RegistrarEvent>) -> Result<()> {
        self.submit_blocking_or_return(events)
            .map_err(|_| Error::RegistrarClosed)
    }

    pub fn submit_blocking_or_return(
        &self,
        events: Vec<RegistrarEvent>,
    ) -> std::result::Result<(), Vec<RegistrarEvent>> {
        self.tx
            .send_blocking(Command::Apply(events))
            .map_err(|e| e.into_inner().into_events())
    }

    /// Copy of the table, reflecting every event submitted through this
    /// handle before the call.
    pub async fn snapshot(&self) -> Result<FileStateTable> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply_tx))
            .await
            .map_err(|_| Error::RegistrarClosed)?;
        reply_rx.await.map_err(|_| Error::RegistrarClosed)
    }
}

pub struct Registrar {
    config: RegistrarConfig,
    snapshot_file: SnapshotFile,
    table: FileStateTable,
    intake: BoundedReceiver<Command>,
    /// Changes applied since the last persist was started
    pending_changes: usize,
    /// Table differs from what was last handed to the writer
    dirty: bool,
    in_flight: Option<JoinHandle<Result<()>>>,
    /// When the current run of persist failures started
    first_failure: Option<Instant>,
}

impl Registrar {
    /// Load the last snapshot and create the registrar with its intake.
    ///
    /// An unreadable snapshot is logged and replaced by an empty table.
    pub fn new(config: RegistrarConfig) -> (Self, RegistrarHandle) {
        let snapshot_file = SnapshotFile::new(&config.persist_path);
        let table = snapshot_file.load_table();
        let (tx, intake) = bounded_channel::bounded(config.intake_queue_size.max(1));

        let registrar = Self {
            config,
            snapshot_file,
            table,
            intake,
            pending_changes: 0,
            dirty: false,
            in_flight: None,
            first_failure: None,
        };
        (registrar, RegistrarHandle { tx })
    }

    /// Resume points loaded at startup, to hand to workers before they open
    /// their files.
    pub fn resume_points(&self) -> FileStateTable {
        self.table.clone()
    }

    pub fn resume_offset(&self, stream: &Stream) -> Option<u64> {
        self.table.get(stream).map(|state| state.offset)
    }

    /// Run until cancelled or until every handle is dropped.
    ///
    /// On cancellation the intake keeps being drained until all handles are
    /// dropped or `shutdown_timeout` passes. The table is then persisted one
    /// last time and returned.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<FileStateTable> {
        info!(
            path = %self.snapshot_file.path().display(),
            files = self.table.len(),
            "Registrar started"
        );

        let period = self.config.flush_interval.max(Duration::from_millis(1));
        let mut flush_interval = time::interval_at(time::Instant::now() + period, period);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Registrar cancelled, draining pending events");
                    break;
                }

                result = wait_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.persist_completed(result);
                    if self.should_persist_early() {
                        self.trigger_persist();
                    }
                }

                command = self.intake.next() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("All registrar handles dropped, exiting run loop");
                            break;
                        }
                    }
                }

                _ = flush_interval.tick() => {
                    if self.dirty {
                        self.trigger_persist();
                    }
                }
            }
        }

        self.drain().await;
        self.finish().await
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Apply(events) => {
                for event in events {
                    if event.process(&mut self.table).is_applied() {
                        self.pending_changes += 1;
                        self.dirty = true;
                    }
                }
                if self.should_persist_early() {
                    self.trigger_persist();
                }
            }
            Command::Snapshot(reply) => {
                // The requester may have given up waiting
                let _ = reply.send(self.table.clone());
            }
        }
    }

    fn should_persist_early(&self) -> bool {
        self.dirty && self.pending_changes >= self.config.max_pending_changes.max(1)
    }

    /// Start a background write of the current table. If one is already
    /// running the changes stay pending and are picked up afterwards.
    fn trigger_persist(&mut self) {
        if self.in_flight.is_some() {
            return;
        }

        let state = PersistedStateV1::from_table(&self.table);
        let snapshot_file = self.snapshot_file.clone();
        self.dirty = false;
        self.pending_changes = 0;
        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            snapshot_file.persist(&state)
        }));
    }

    fn persist_completed(&mut self, result: Result<()>) {
        match result {
            Ok(()) => {
                if let Some(first_failure) = self.first_failure.take() {
                    info!(
                        failing_for = ?first_failure.elapsed(),
                        "Registrar persist succeeded after previous failures"
                    );
                } else {
                    debug!(files = self.table.len(), "Registrar state persisted");
                }
            }
            Err(e) => {
                // Changes are still only in memory; write them on the next tick
                self.dirty = true;

                let first_failure = *self.first_failure.get_or_insert_with(Instant::now);
                let failing_for = first_failure.elapsed();
                if failing_for >= self.config.max_persist_failure_duration {
                    error!(
                        error = %e,
                        failing_for = ?failing_for,
                        "Registrar persist has been failing beyond the allowed duration, resume offsets are not being saved"
                    );
                } else {
                    warn!(
                        error = %e,
                        failing_for = ?failing_for,
                        "Registrar persist failed, will retry"
                    );
                }
            }
        }
    }

    async fn drain(&mut self) {
        let deadline = time::Instant::now() + self.config.shutdown_timeout;
        let mut drained = 0usize;

        loop {
            match time::timeout_at(deadline, self.intake.next()).await {
                Ok(Some(command)) => {
                    self.handle_command(command);
                    drained += 1;
                }
                Ok(None) => {
                    debug!(drained, "Registrar intake closed");
                    break;
                }
                Err(_) => {
                    warn!(
                        drained,
                        timeout = ?self.config.shutdown_timeout,
                        "Shutdown timeout reached before all workers finished, persisting last known state"
                    );
                    break;
                }
            }
        }

        if drained > 0 {
            info!(drained, "Drained pending registrar submissions");
        }
    }

    async fn finish(mut self) -> Result<FileStateTable> {
        if let Some(mut in_flight) = self.in_flight.take() {
            let result = wait_in_flight_handle(&mut in_flight).await;
            self.persist_completed(result);
        }

        let state = PersistedStateV1::from_table(&self.table);
        let snapshot_file = self.snapshot_file.clone();
        let mut final_write = tokio::task::spawn_blocking(move || snapshot_file.persist(&state));

        match wait_in_flight_handle(&mut final_write).await {
            Ok(()) => {
                info!(files = self.table.len(), "Registrar final persist completed");
                Ok(self.table)
            }
            Err(e) => {
                error!(error = %e, "Registrar final persist failed");
                Err(e)
            }
        }
    }
}

/// Pending forever when nothing is in flight, so it can sit in `select!`.
async fn wait_in_flight(in_flight: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    match in_flight {
        Some(handle) => wait_in_flight_handle(handle).await,
        None => future::pending().await,
    }
}

async fn wait_in_flight_handle(handle: &mut JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(Error::Persistence(format!("persist task failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::state::FileState;
    use std::path::Path;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    const S1: Stream = Stream::new(1, 100);

    fn discovered(stream: Stream, source: &str) -> RegistrarEvent {
        RegistrarEvent::Discovered {
            stream,
            source: source.to_string(),
            offset: 0,
        }
    }

    fn test_config(dir: &TempDir) -> RegistrarConfig {
        RegistrarConfig {
            persist_path: dir.path().join(".courier"),
            flush_interval: Duration::from_secs(3600),
            max_pending_changes: 1000,
            intake_queue_size: 16,
            shutdown_timeout: Duration::from_secs(2),
            max_persist_failure_duration: Duration::from_secs(60),
        }
    }

    fn persisted_offset(path: &Path, stream: Stream) -> Option<u64> {
        SnapshotFile::new(path)
            .load()
            .ok()
            .flatten()
            .and_then(|state| state.into_table().get(&stream).map(|s| s.offset))
    }

    async fn wait_for_offset(path: &Path, stream: Stream, offset: u64) -> bool {
        for _ in 0..200 {
            if persisted_offset(path, stream) == Some(offset) {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_snapshot_reflects_prior_submissions() {
        let dir = TempDir::new().unwrap();
        let (registrar, handle) = Registrar::new(test_config(&dir));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(registrar.run(cancel.clone()));

        handle.submit_event(discovered(S1, "/var/log/app.log")).await.unwrap();
        handle
            .submit_event(RegistrarEvent::Acknowledged {
                stream: S1,
                offset: 64,
            })
            .await
            .unwrap();

        let table = handle.snapshot().await.unwrap();
        assert_eq!(table.get(&S1), Some(&FileState::new("/var/log/app.log", 64)));

        drop(handle);
        let final_table = task.await.unwrap().unwrap();
        assert_eq!(final_table, table);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_pending_changes_trigger_persist() {
        let dir = TempDir::new().unwrap();
        let config = RegistrarConfig {
            max_pending_changes: 2,
            ..test_config(&dir)
        };
        let path = config.persist_path.clone();
        let (registrar, handle) = Registrar::new(config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(registrar.run(cancel.clone()));

        handle
            .submit(vec![
                discovered(S1, "/var/log/app.log"),
                RegistrarEvent::Acknowledged {
                    stream: S1,
                    offset: 10,
                },
            ])
            .await
            .unwrap();

        // Flush interval is an hour, so only the change threshold can write this
        assert!(wait_for_offset(&path, S1, 10).await);

        cancel.cancel();
        drop(handle);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_flush_interval_persists_dirty_table() {
        let dir = TempDir::new().unwrap();
        let config = RegistrarConfig {
            flush_interval: Duration::from_millis(20),
            ..test_config(&dir)
        };
        let path = config.persist_path.clone();
        let (registrar, handle) = Registrar::new(config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(registrar.run(cancel.clone()));

        handle.submit_event(discovered(S1, "/var/log/app.log")).await.unwrap();
        assert!(wait_for_offset(&path, S1, 0).await);

        handle
            .submit_event(RegistrarEvent::Acknowledged {
                stream: S1,
                offset: 99,
            })
            .await
            .unwrap();
        assert!(wait_for_offset(&path, S1, 99).await);

        cancel.cancel();
        drop(handle);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_final_events() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let path = config.persist_path.clone();
        let (registrar, handle) = Registrar::new(config);
        let cancel = CancellationToken::new();

        handle.submit_event(discovered(S1, "/var/log/app.log")).await.unwrap();
        cancel.cancel();

        // A worker tearing down after cancellation still gets its final offset in
        let worker = {
            let handle = handle.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(50)).await;
                handle
                    .submit_event(RegistrarEvent::Acknowledged {
                        stream: S1,
                        offset: 128,
                    })
                    .await
            })
        };
        drop(handle);

        let table = registrar.run(cancel).await.unwrap();
        worker.await.unwrap().unwrap();

        assert_eq!(table.get(&S1).unwrap().offset, 128);
        assert_eq!(persisted_offset(&path, S1), Some(128));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_shutdown_timeout_bounds_drain() {
        let dir = TempDir::new().unwrap();
        let config = RegistrarConfig {
            shutdown_timeout: Duration::from_millis(100),
            ..test_config(&dir)
        };
        let path = config.persist_path.clone();
        let (registrar, handle) = Registrar::new(config);
        let cancel = CancellationToken::new();

        handle.submit_event(discovered(S1, "/var/log/app.log")).await.unwrap();
        cancel.cancel();

        // The handle is held past the timeout, as a stuck worker would
        let table = time::timeout(Duration::from_secs(5), registrar.run(cancel))
            .await
            .expect("registrar should stop after the shutdown timeout")
            .unwrap();

        assert!(table.contains(&S1));
        assert_eq!(persisted_offset(&path, S1), Some(0));
        assert!(logs_contain("Shutdown timeout reached"));
        drop(handle);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_persist_failure_is_logged_and_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let config = RegistrarConfig {
            persist_path: blocker.join(".courier"),
            flush_interval: Duration::from_millis(10),
            max_persist_failure_duration: Duration::ZERO,
            ..test_config(&dir)
        };
        let (registrar, handle) = Registrar::new(config);
        let cancel = CancellationToken::new();

        let driver_cancel = cancel.clone();
        let driver = async move {
            handle.submit_event(discovered(S1, "/var/log/app.log")).await.unwrap();
            time::sleep(Duration::from_millis(100)).await;

            // Still accepting and applying events after failed writes
            handle
                .submit_event(RegistrarEvent::Acknowledged {
                    stream: S1,
                    offset: 5,
                })
                .await
                .unwrap();
            let table = handle.snapshot().await.unwrap();
            driver_cancel.cancel();
            table
        };

        let (result, table) = tokio::join!(registrar.run(cancel), driver);

        assert_eq!(table.get(&S1).unwrap().offset, 5);
        assert!(matches!(result, Err(Error::Persistence(_))));
        assert!(logs_contain("failing beyond the allowed duration"));
    }

    #[tokio::test]
    async fn test_restart_resumes_from_snapshot() {
        let dir = TempDir::new().unwrap();

        let (registrar, handle) = Registrar::new(test_config(&dir));
        handle.submit_event(discovered(S1, "/var/log/app.log")).await.unwrap();
        handle
            .submit_event(RegistrarEvent::Acknowledged {
                stream: S1,
                offset: 128,
            })
            .await
            .unwrap();
        drop(handle);
        registrar.run(CancellationToken::new()).await.unwrap();

        let (registrar, _handle) = Registrar::new(test_config(&dir));
        assert_eq!(registrar.resume_offset(&S1), Some(128));
        assert_eq!(
            registrar.resume_points().get(&S1).unwrap().source,
            "/var/log/app.log"
        );
    }

    #[tokio::test]
    async fn test_snapshot_served_during_drain() {
        let dir = TempDir::new().unwrap();
        let (registrar, handle) = Registrar::new(test_config(&dir));
        let cancel = CancellationToken::new();
        handle.submit_event(discovered(S1, "/var/log/app.log")).await.unwrap();
        cancel.cancel();

        let run = tokio::spawn(registrar.run(cancel));

        let table = handle.snapshot().await.unwrap();
        assert!(table.contains(&S1));
        drop(handle);
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handle_fails_after_registrar_stops() {
        let dir = TempDir::new().unwrap();
        let config = RegistrarConfig {
            shutdown_timeout: Duration::from_millis(20),
            ..test_config(&dir)
        };
        let (registrar, handle) = Registrar::new(config);
        let cancel = CancellationToken::new();
        cancel.cancel();

        registrar.run(cancel).await.unwrap();

        assert!(matches!(
            handle.submit_event(discovered(S1, "/x")).await,
            Err(Error::RegistrarClosed)
        ));
        assert!(matches!(handle.snapshot().await, Err(Error::RegistrarClosed)));
    }

    fn acknowledged(offset: u64) -> Command {
        Command::Apply(vec![RegistrarEvent::Acknowledged { stream: S1, offset }])
    }

    #[tokio::test]
    async fn test_triggers_during_write_coalesce_into_one_followup() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.max_pending_changes = 1;
        let path = config.persist_path.clone();
        let (mut registrar, _handle) = Registrar::new(config);

        registrar.handle_command(Command::Apply(vec![discovered(S1, "/var/log/app.log")]));
        assert!(registrar.in_flight.is_some());
        assert!(!registrar.dirty);

        // Every batch crosses the threshold, but the first write is still
        // outstanding so none of them may start another
        for offset in 1..=20 {
            registrar.handle_command(acknowledged(offset));
        }
        assert!(registrar.dirty);
        assert_eq!(registrar.pending_changes, 20);

        let result = wait_in_flight(&mut registrar.in_flight).await;
        registrar.in_flight = None;
        registrar.persist_completed(result);
        assert_eq!(persisted_offset(&path, S1), Some(0));

        // One follow-up write covers everything that accumulated
        assert!(registrar.should_persist_early());
        registrar.trigger_persist();
        assert!(registrar.in_flight.is_some());
        assert!(!registrar.dirty);
        assert_eq!(registrar.pending_changes, 0);

        let result = wait_in_flight(&mut registrar.in_flight).await;
        registrar.in_flight = None;
        registrar.persist_completed(result);
        assert!(!registrar.should_persist_early());

        assert_eq!(SnapshotFile::new(&path).load_table(), registrar.table);
        assert_eq!(persisted_offset(&path, S1), Some(20));

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(".courier")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_many_small_batches_persist_last_state() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.max_pending_changes = 1;
        let path = config.persist_path.clone();
        let (registrar, handle) = Registrar::new(config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(registrar.run(cancel.clone()));

        handle.submit_event(discovered(S1, "/var/log/app.log")).await.unwrap();
        for offset in 1..=200 {
            handle
                .submit_event(RegistrarEvent::Acknowledged { stream: S1, offset })
                .await
                .unwrap();
        }
        let live = handle.snapshot().await.unwrap();
        assert_eq!(live.get(&S1).unwrap().offset, 200);

        drop(handle);
        cancel.cancel();
        let table = task.await.unwrap().unwrap();

        assert_eq!(table, live);
        assert_eq!(SnapshotFile::new(&path).load_table(), live);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
