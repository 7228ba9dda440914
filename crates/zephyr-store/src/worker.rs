use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use zephyr_types::models::{MessageRecord, UserRecord};

use crate::Gateway;
use crate::snapshot::Snapshot;

/// Unit of background persistence work. Handlers mutate in-memory state
/// first, then enqueue one of these; the worker absorbs all storage latency
/// and failure so no command handler ever waits on I/O.
#[derive(Debug)]
pub enum PersistJob {
    UpsertUser(UserRecord),
    InsertMessage(MessageRecord),
    Snapshot(Snapshot),
    /// Acknowledged once every previously enqueued job has been applied.
    Flush(oneshot::Sender<()>),
}

/// Cloneable enqueue side of the persistence queue.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistJob>,
    primary: bool,
}

impl PersistHandle {
    pub fn enqueue(&self, job: PersistJob) {
        if self.tx.send(job).is_err() {
            error!("Persistence worker gone; dropping job");
        }
    }

    /// True when row-level writes reach a primary store. Without one,
    /// callers should enqueue full snapshots instead.
    pub fn has_primary(&self) -> bool {
        self.primary
    }

    /// Queue pair with no worker behind it, so tests can inspect the jobs a
    /// handler enqueues.
    pub fn detached(primary: bool) -> (Self, mpsc::UnboundedReceiver<PersistJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, primary }, rx)
    }
}

/// Spawn the persistence worker. Jobs are applied strictly in enqueue
/// order; each blocking store call runs off the async runtime.
pub fn spawn(gateway: Arc<Gateway>) -> PersistHandle {
    let (handle, mut rx) = PersistHandle::detached(gateway.has_primary());

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if let PersistJob::Flush(ack) = job {
                let _ = ack.send(());
                continue;
            }

            let gateway = gateway.clone();
            match tokio::task::spawn_blocking(move || gateway.apply(job)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("Persistence write failed: {err:#}"),
                Err(err) => error!("Persistence task panicked: {err}"),
            }
        }
        debug!("Persistence queue closed");
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flush_acknowledges_after_prior_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let snap_path = dir.path().join("snapshot.json");
        let gateway = Arc::new(Gateway::open(&dir.path().join("relay.db"), &snap_path));
        let handle = spawn(gateway.clone());

        let mut snap = Snapshot::default();
        snap.friendships.insert("alice".into(), vec![]);
        handle.enqueue(PersistJob::Snapshot(snap));

        let (ack_tx, ack_rx) = oneshot::channel();
        handle.enqueue(PersistJob::Flush(ack_tx));
        ack_rx.await.unwrap();

        let state = gateway.load_all();
        assert_eq!(state.users.len(), 1);
    }
}
