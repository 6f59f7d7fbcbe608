//! Single-writer update queue.
//!
//! Workers never touch storage directly. They enqueue `UpdateEvent`s on a
//! bounded FIFO channel and exactly one consumer task applies them in
//! arrival order, so updates from one account land in the order the state
//! machine produced them.

use questline_common::UpdateEvent;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::DbHandle;

/// Counters reported when the broker shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub applied: u64,
    pub failed: u64,
}

/// Producer handle. Cheap to clone; one per worker.
#[derive(Debug, Clone)]
pub struct UpdateSender {
    tx: mpsc::Sender<UpdateEvent>,
}

impl UpdateSender {
    pub(crate) fn new(tx: mpsc::Sender<UpdateEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event, waiting while the queue is full.
    ///
    /// Events sent after the broker closed are logged and discarded.
    pub async fn enqueue(&self, event: UpdateEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event).await {
            error!(
                updates = event.updates.len(),
                "Update enqueued after broker closed, discarding"
            );
        }
    }
}

/// Owns the consumer task that serializes every storage write.
pub struct UpdateBroker {
    sender: UpdateSender,
    shutdown: Option<oneshot::Sender<()>>,
    consumer: JoinHandle<BrokerStats>,
}

impl UpdateBroker {
    /// Start the consumer task with a queue of `capacity` events.
    pub fn spawn(db: DbHandle, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let consumer = tokio::spawn(consume(db, rx, shutdown_rx));
        info!(capacity, "Update broker started");

        Self {
            sender: UpdateSender::new(tx),
            shutdown: Some(shutdown_tx),
            consumer,
        }
    }

    pub fn sender(&self) -> UpdateSender {
        self.sender.clone()
    }

    /// Stop accepting events, drain what is already queued and wait for the
    /// consumer to finish.
    pub async fn close(mut self) -> BrokerStats {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        drop(self.sender);

        match self.consumer.await {
            Ok(stats) => {
                info!(
                    applied = stats.applied,
                    failed = stats.failed,
                    "Update broker closed"
                );
                stats
            }
            Err(e) => {
                error!(error = %e, "Update broker consumer panicked");
                BrokerStats::default()
            }
        }
    }
}

async fn consume(
    db: DbHandle,
    mut rx: mpsc::Receiver<UpdateEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> BrokerStats {
    let mut stats = BrokerStats::default();

    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(event) => apply(&db, event, &mut stats).await,
                None => return stats,
            },
            _ = &mut shutdown => break,
        }
    }

    // Refuse new sends, then drain everything queued before the signal.
    rx.close();
    while let Some(event) = rx.recv().await {
        apply(&db, event, &mut stats).await;
    }
    stats
}

async fn apply(db: &DbHandle, event: UpdateEvent, stats: &mut BrokerStats) {
    let fields: Vec<&'static str> = event.updates.iter().map(|u| u.column()).collect();
    let result = db
        .call(move |db| db.apply_update(&event).map_err(anyhow::Error::from))
        .await;

    match result {
        Ok(()) => {
            stats.applied += 1;
            debug!(?fields, "Applied update");
        }
        Err(e) => {
            stats.failed += 1;
            warn!(?fields, error = %e, "Failed to apply update");
        }
    }
}
