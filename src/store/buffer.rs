//! The bounded write buffer and its background flusher (write path).

use super::encoding::{encode_sample, sample_key};
use crate::model::Sample;
use sled::Db;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Samples are allowed to grow past the soft capacity up to this multiple
/// before `push` starts dropping: bounded back-pressure, then
/// drop-with-counter.
const HARD_CAP_MULTIPLIER: usize = 2;

pub struct WriteBuffer {
    pending: Mutex<Vec<Sample>>,
    soft_capacity: usize,
    pub dropped: AtomicU64,
}

impl WriteBuffer {
    pub fn new(soft_capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::with_capacity(soft_capacity)),
            soft_capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Never blocks the caller beyond the mutex acquisition itself.
    pub fn push(&self, sample: Sample) {
        let hard_cap = self.soft_capacity * HARD_CAP_MULTIPLIER;
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pending.len() >= hard_cap {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(dropped_total = self.dropped.load(Ordering::Relaxed), "store write buffer full, dropping sample");
            return;
        }
        pending.push(sample);
    }

    fn drain(&self) -> Vec<Sample> {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *pending)
    }

    pub fn len(&self) -> usize {
        match self.pending.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain the buffer into a single sled batch against the samples tree and
/// update per-metric meta, matching the "single transaction" contract and
/// the "do not silently drop meta on cleanup" rule (meta lives separately).
async fn flush_once(db: &Arc<RwLock<Db>>, buffer: &Arc<WriteBuffer>) -> sled::Result<usize> {
    let samples = buffer.drain();
    if samples.is_empty() {
        return Ok(0);
    }
    let count = samples.len();
    let db = db.write().await;
    let samples_tree = db.open_tree("samples")?;
    let meta_tree = db.open_tree("meta")?;

    let mut batch = sled::Batch::default();
    for sample in &samples {
        let key = sample_key(&sample.metric, &sample.labels, sample.ts);
        batch.insert(key, encode_sample(sample));
    }
    samples_tree.apply_batch(batch)?;

    for sample in &samples {
        super::meta::observe(&meta_tree, sample)?;
    }

    debug!(flushed = count, "store flushed write buffer");
    Ok(count)
}

/// Background flusher task, one tick per `interval`, cancellable.
pub fn spawn_flusher(
    db: Arc<RwLock<Db>>,
    buffer: Arc<WriteBuffer>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Final synchronous flush before the worker exits.
                    if let Err(err) = flush_once(&db, &buffer).await {
                        warn!(error = %err, "final flush on shutdown failed");
                    }
                    break;
                }
                _ = ticker.tick() => {
                    // Transient I/O is logged and retried on the next tick.
                    if let Err(err) = flush_once(&db, &buffer).await {
                        warn!(error = %err, "buffer flush failed, will retry next tick");
                    }
                }
            }
        }
    })
}
