use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::entry::AuditEntry;

/// Channel buffer size between producers and the writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Idle window after which buffered routine entries are flushed anyway.
const IDLE_FLUSH: Duration = Duration::from_secs(1);

/// Errors that can occur while opening the audit trail.
///
/// Only `start` is fallible: once the file is open, write and serialization
/// failures inside the background task are logged and the entry dropped,
/// because a broken audit disk must not take the gate down with it.
#[derive(Debug, thiserror::Error)]
pub enum AuditStartError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open audit trail file: {0}")]
    OpenFile(std::io::Error),
}

/// A cheap, cloneable handle used to submit [`AuditEntry`] values into the
/// background audit-trail writer.
///
/// `AuditSink` is `Clone + Send + Sync` so it can be shared freely across
/// tasks and components.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// Open (or create) the JSON-lines file at `path` in append mode, spawn
    /// the writer task, and return a `(sink, join_handle)` pair. Parent
    /// directories are created automatically.
    ///
    /// Durability contract: an entry carrying an evaluation record is
    /// flushed before the writer accepts anything else, so a gate verdict
    /// reaches disk even if the process dies right after deciding. Routine
    /// entries are batched and flushed when the channel goes idle for
    /// [`IDLE_FLUSH`], and once more when the last sink clone is dropped.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), AuditStartError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AuditStartError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(AuditStartError::OpenFile)?;

        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);
        let handle = tokio::spawn(write_entries(file, rx));

        Ok((Self { tx }, handle))
    }

    /// Send an audit entry to the background writer.
    ///
    /// If the channel is full this will wait asynchronously until space is
    /// available. If the background task has already exited the entry is
    /// silently dropped and a warning is logged.
    pub async fn log(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.send(entry).await {
            warn!(
                event_type = ?err.0.event_type,
                "audit sink channel closed, entry dropped"
            );
        }
    }
}

/// The writer task: drains the channel, appends one JSON line per entry, and
/// flushes according to the durability contract on [`AuditSink::start`].
async fn write_entries(mut file: tokio::fs::File, mut rx: mpsc::Receiver<AuditEntry>) {
    let mut buffered: usize = 0;

    loop {
        match tokio::time::timeout(IDLE_FLUSH, rx.recv()).await {
            Ok(Some(entry)) => {
                let mut line = match serde_json::to_vec(&entry) {
                    Ok(line) => line,
                    Err(err) => {
                        error!(%err, "failed to serialize audit entry; dropped");
                        continue;
                    }
                };
                line.push(b'\n');

                if let Err(err) = file.write_all(&line).await {
                    error!(%err, "failed to write audit entry");
                    continue;
                }
                buffered += 1;

                // Verdicts must be on disk before anything else happens.
                if entry.evaluation.is_some() {
                    flush(&mut file, &mut buffered).await;
                }
            }
            // Channel closed: final flush, then exit.
            Ok(None) => {
                flush(&mut file, &mut buffered).await;
                debug!("audit writer task shutting down");
                return;
            }
            // Idle: flush whatever routine entries have accumulated.
            Err(_) => flush(&mut file, &mut buffered).await,
        }
    }
}

async fn flush(file: &mut tokio::fs::File, buffered: &mut usize) {
    if *buffered == 0 {
        return;
    }
    match file.flush().await {
        Ok(()) => *buffered = 0,
        Err(err) => error!(%err, "failed to flush audit trail"),
    }
}
