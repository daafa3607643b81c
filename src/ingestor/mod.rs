//! Ingestor.
//!
//! Consumes CDC events over a bounded channel and derives metric samples
//! into the `Store`. `process()` never blocks: a full queue drops the event
//! and increments a counter, the teacher's "never blocks, drop on full"
//! worker contract (see `pipeline`'s non-blocking sensor ingestion).

use crate::autodiscovery::{classify, FieldKind};
use crate::model::{CdcEvent, CdcOp, Labels};
use crate::store::Store;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct Ingestor {
    sender: mpsc::Sender<CdcEvent>,
    dropped: Arc<AtomicU64>,
    worker: tokio::task::JoinHandle<()>,
}

impl Ingestor {
    /// Spawns the single consumer worker draining the bounded queue.
    pub fn new(store: Arc<Store>, queue_capacity: usize, cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let worker = spawn_worker(store, receiver, cancel);
        Self {
            sender,
            dropped,
            worker,
        }
    }

    /// `process(event)`: enqueues onto a bounded channel; drops
    /// silently on overflow, incrementing a counter — never blocks.
    pub fn process(&self, event: CdcEvent) {
        if self.sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.worker.await;
    }
}

fn spawn_worker(
    store: Arc<Store>,
    mut receiver: mpsc::Receiver<CdcEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => {
                    match event {
                        Some(event) => handle_event(&store, &event),
                        None => break,
                    }
                }
            }
        }
    })
}

/// Base labels attached to every derived metric from one event.
fn base_labels(event: &CdcEvent) -> Labels {
    let mut labels = Labels::new();
    labels.insert("table".to_string(), event.table.clone());
    labels.insert("schema".to_string(), event.schema.clone());
    labels
}

fn op_suffix(op: CdcOp) -> Option<&'static str> {
    match op {
        CdcOp::Insert => Some("inserts_total"),
        CdcOp::Update => Some("updates_total"),
        CdcOp::Delete => Some("deletes_total"),
        CdcOp::Ddl => None,
    }
}

fn op_label(op: CdcOp) -> &'static str {
    match op {
        CdcOp::Insert => "INSERT",
        CdcOp::Update => "UPDATE",
        CdcOp::Delete => "DELETE",
        CdcOp::Ddl => "DDL",
    }
}

/// Derivation steps: event counters, then per-field metrics.
fn handle_event(store: &Store, event: &CdcEvent) {
    let base = base_labels(event);

    // Step 1: operation counters, regardless of op.
    store.record(
        &format!("{}_events_total", event.table),
        1.0,
        base.clone(),
        event.timestamp,
    );

    let mut by_type = base.clone();
    by_type.insert("type".to_string(), op_label(event.op).to_string());
    store.record(
        &format!("{}_events_by_type", event.table),
        1.0,
        by_type,
        event.timestamp,
    );

    if let Some(suffix) = op_suffix(event.op) {
        store.record(
            &format!("{}_{}", event.table, suffix),
            1.0,
            base.clone(),
            event.timestamp,
        );
    }

    // Step 2: per-field derived metrics, skipped for DDL.
    if event.op == CdcOp::Ddl {
        return;
    }
    let row = event.after.as_ref().or(event.before.as_ref());
    let Some(row) = row else { return };

    for (field, value) in row {
        match classify(field, value) {
            FieldKind::Numeric => {
                if let Some(v) = value.as_f64() {
                    store.record(
                        &format!("{}_{}", event.table, field),
                        v,
                        base.clone(),
                        event.timestamp,
                    );
                }
            }
            FieldKind::Status => {
                if let Some(s) = value.as_str() {
                    let mut labels = base.clone();
                    labels.insert(field.clone(), s.to_string());
                    store.record(
                        &format!("{}_by_{}", event.table, field),
                        1.0,
                        labels,
                        event.timestamp,
                    );
                }
            }
            _ => {}
        }
    }
    debug!(table = %event.table, op = ?event.op, "ingested cdc event");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Aggregation, CdcOp};
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    async fn open_test_store() -> (Arc<Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 1000, Duration::from_millis(20)).unwrap());
        (store, dir)
    }

    fn insert_event(amount: f64, status: &str, ts: chrono::DateTime<chrono::Utc>) -> CdcEvent {
        let mut after = serde_json::Map::new();
        after.insert("total_amount".to_string(), json!(amount));
        after.insert("status".to_string(), json!(status));
        CdcEvent {
            id: Uuid::new_v4(),
            op: CdcOp::Insert,
            schema: "public".to_string(),
            table: "orders".to_string(),
            timestamp: ts,
            before: None,
            after: Some(after),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn ingest_five_inserts_derives_metrics() {
        let (store, _dir) = open_test_store().await;
        let cancel = CancellationToken::new();
        let ingestor = Ingestor::new(store.clone(), 10_000, cancel.clone());

        let now = chrono::Utc::now();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            ingestor.process(insert_event(v, "pending", now));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        ingestor.shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let from = now - chrono::Duration::seconds(5);
        let to = now + chrono::Duration::seconds(5);

        let total = store.query("orders_events_total", from, to, Aggregation::Count).await.unwrap();
        assert_eq!(total.series[0].data_points[0].value, 5.0);

        let inserts = store.query("orders_inserts_total", from, to, Aggregation::Count).await.unwrap();
        assert_eq!(inserts.series[0].data_points[0].value, 5.0);

        let avg_amount = store.query("orders_total_amount", from, to, Aggregation::Avg).await.unwrap();
        assert_eq!(avg_amount.series[0].data_points[0].value, 30.0);

        let by_status = store.query("orders_by_status", from, to, Aggregation::Count).await.unwrap();
        assert_eq!(by_status.series.len(), 1);
        assert_eq!(by_status.series[0].labels.get("status").map(String::as_str), Some("pending"));
        assert_eq!(by_status.series[0].data_points[0].value, 5.0);
    }

    #[tokio::test]
    async fn overflow_drops_silently() {
        let (store, _dir) = open_test_store().await;
        let cancel = CancellationToken::new();
        // capacity 1: second `process` before the worker drains will likely drop.
        let ingestor = Ingestor::new(store, 1, cancel.clone());
        let now = chrono::Utc::now();
        for _ in 0..50 {
            ingestor.process(insert_event(1.0, "pending", now));
        }
        // Either all were drained in time, or some were dropped — never panics/blocks.
        cancel.cancel();
        ingestor.shutdown().await;
    }
}
