//! Background persistence task.
//!
//! Jobs run strictly in order. A run of queued saves collapses into one
//! write of the newest snapshot; a backup or flush in between breaks the
//! run so ordering is kept.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use tandem_core::ProjectMap;

use super::{PersistenceError, ProjectRepository};

#[derive(Debug)]
pub enum PersistJob {
    Save(ProjectMap),
    Backup { snapshot: ProjectMap, reason: String },
    /// Completes once every earlier job has been processed.
    Flush(oneshot::Sender<()>),
}

/// Counters returned when the persister stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersisterStats {
    pub saves: u64,
    pub coalesced: u64,
    pub backups: u64,
    pub failures: u64,
}

/// Sending side of the job queue. Never blocks.
#[derive(Debug, Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistJob>,
}

impl PersistHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PersistJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn save(&self, snapshot: ProjectMap) {
        self.submit(PersistJob::Save(snapshot));
    }

    pub fn backup(&self, snapshot: ProjectMap, reason: impl Into<String>) {
        self.submit(PersistJob::Backup {
            snapshot,
            reason: reason.into(),
        });
    }

    /// Wait until everything queued so far has been written.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PersistJob::Flush(done_tx)).is_err() {
            return Err(PersistenceError::Task("persister stopped".into()));
        }
        done_rx
            .await
            .map_err(|_| PersistenceError::Task("persister dropped flush".into()))
    }

    fn submit(&self, job: PersistJob) {
        if self.tx.send(job).is_err() {
            log::error!("Persister is not running; change will not be stored");
        }
    }
}

/// Process jobs until every [`PersistHandle`] is dropped.
pub async fn run_persister(
    repo: Arc<dyn ProjectRepository>,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
) -> PersisterStats {
    let mut stats = PersisterStats::default();
    let mut pending: Option<PersistJob> = None;

    loop {
        let job = match pending.take() {
            Some(job) => job,
            None => match rx.recv().await {
                Some(job) => job,
                None => break,
            },
        };

        match job {
            PersistJob::Save(mut snapshot) => {
                while let Ok(next) = rx.try_recv() {
                    match next {
                        PersistJob::Save(newer) => {
                            stats.coalesced += 1;
                            snapshot = newer;
                        }
                        other => {
                            pending = Some(other);
                            break;
                        }
                    }
                }
                let repo = Arc::clone(&repo);
                match blocking(move || repo.save(&snapshot)).await {
                    Ok(()) => stats.saves += 1,
                    Err(e) => {
                        stats.failures += 1;
                        log::error!("Saving projects failed: {e}");
                    }
                }
            }
            PersistJob::Backup { snapshot, reason } => {
                let repo = Arc::clone(&repo);
                match blocking(move || repo.backup(&snapshot, &reason)).await {
                    Ok(()) => stats.backups += 1,
                    Err(e) => {
                        stats.failures += 1;
                        log::error!("Backup failed: {e}");
                    }
                }
            }
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    log::info!(
        "Persister stopped: {} saves ({} coalesced), {} backups, {} failures",
        stats.saves,
        stats.coalesced,
        stats.backups,
        stats.failures
    );
    stats
}

async fn blocking<F>(f: F) -> Result<(), PersistenceError>
where
    F: FnOnce() -> Result<(), PersistenceError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
}
