use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::working_memory::{CellPriority, ContextCell};

/// Payload handed to external storage for a high-resonance cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: String,
    pub content: String,
    pub priority: CellPriority,
    pub resonance: f64,
    pub basin_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl From<&ContextCell> for CellRecord {
    fn from(cell: &ContextCell) -> Self {
        Self {
            id: cell.id.clone(),
            content: cell.content.clone(),
            priority: cell.priority,
            resonance: cell.resonance_score,
            basin_id: cell.basin_id.clone(),
            metadata: json!({
                "token_count": cell.token_count,
                "attractor_strength": cell.attractor_strength,
                "access_count": cell.access_count,
                "causal_links": cell.causal_links,
                "derived_cells": cell.derived_cells,
                "created_at": cell.created_at.to_rfc3339(),
            }),
        }
    }
}

/// Destination for persisted cells, typically a graph store.
#[async_trait]
pub trait CellSink: Send + Sync {
    async fn persist(&self, record: &CellRecord) -> anyhow::Result<()>;
}

#[async_trait]
impl<S> CellSink for Arc<S>
where
    S: CellSink + ?Sized,
{
    async fn persist(&self, record: &CellRecord) -> anyhow::Result<()> {
        (**self).persist(record).await
    }
}

/// Sink that keeps records in memory. Useful for tests and for embedding
/// the engine without a store.
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Mutex<Vec<CellRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CellRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CellSink for InMemorySink {
    async fn persist(&self, record: &CellRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory sink poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// Cheap sender side of a [`PersistenceQueue`].
///
/// Sending never blocks. Records are dropped with a warning when the queue is
/// full or the worker is gone.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<CellRecord>,
}

impl PersistenceHandle {
    pub fn send(&self, record: CellRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(r)) => {
                warn!(id = %r.id, "persistence queue full; dropping cell")
            }
            Err(TrySendError::Closed(r)) => {
                warn!(id = %r.id, "persistence queue closed; dropping cell")
            }
        }
    }
}

/// Aborts the worker task when dropped.
struct WorkerGuard {
    handle: Option<JoinHandle<()>>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Bounded queue drained by one background worker that writes to a
/// [`CellSink`].
///
/// Delivery is best-effort: there are no retries, sink failures are logged
/// and dropped, and in-memory state never depends on the outcome. Dropping
/// the queue aborts the worker.
pub struct PersistenceQueue {
    handle: PersistenceHandle,
    _worker: WorkerGuard,
}

impl PersistenceQueue {
    /// Start the worker on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn<S>(sink: S, capacity: usize) -> Self
    where
        S: CellSink + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<CellRecord>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match sink.persist(&record).await {
                    Ok(()) => trace!(id = %record.id, "cell persisted"),
                    Err(e) => warn!(id = %record.id, error = %e, "cell persistence failed; dropping"),
                }
            }
            debug!("persistence queue closed");
        });
        Self {
            handle: PersistenceHandle { tx },
            _worker: WorkerGuard {
                handle: Some(handle),
            },
        }
    }

    pub fn handle(&self) -> PersistenceHandle {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn record(id: &str) -> CellRecord {
        CellRecord::from(&ContextCell::new(id, "remember this", CellPriority::High, 3))
    }

    struct FlakySink {
        calls: AtomicUsize,
        inner: InMemorySink,
    }

    #[async_trait]
    impl CellSink for FlakySink {
        async fn persist(&self, record: &CellRecord) -> anyhow::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("store offline");
            }
            self.inner.persist(record).await
        }
    }

    #[tokio::test]
    async fn worker_drains_queue_into_sink() {
        let sink = Arc::new(InMemorySink::new());
        let queue = PersistenceQueue::spawn(sink.clone(), 4);
        queue.handle().send(record("c1"));
        queue.handle().send(record("c2"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let ids: Vec<String> = sink.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn sink_failure_is_dropped_and_worker_continues() {
        let sink = Arc::new(FlakySink {
            calls: AtomicUsize::new(0),
            inner: InMemorySink::new(),
        });
        let queue = PersistenceQueue::spawn(sink.clone(), 4);
        queue.handle().send(record("lost"));
        queue.handle().send(record("kept"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        let ids: Vec<String> = sink.inner.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["kept"]);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let sink = Arc::new(InMemorySink::new());
        let queue = PersistenceQueue::spawn(sink.clone(), 1);
        for i in 0..10 {
            queue.handle().send(record(&format!("c{i}")));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.len() < 10);
        assert!(!sink.is_empty());
    }

    #[test]
    fn record_carries_cell_metadata() {
        let mut cell = ContextCell::new("c", "text", CellPriority::Low, 7).with_basin("b1");
        cell.causal_links.push("root".into());
        let r = CellRecord::from(&cell);
        assert_eq!(r.basin_id.as_deref(), Some("b1"));
        assert_eq!(r.metadata["token_count"], 7);
        assert_eq!(r.metadata["causal_links"][0], "root");
    }
}
