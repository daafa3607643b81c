//! Per-metric meta bookkeeping.

use crate::model::{MetricMeta, Sample};
use sled::Tree;

pub fn observe(meta_tree: &Tree, sample: &Sample) -> sled::Result<()> {
    let key = sample.metric.as_bytes();
    let updated = match meta_tree.get(key)? {
        Some(bytes) => {
            let mut meta: MetricMeta =
                serde_json::from_slice(&bytes).unwrap_or_else(|_| MetricMeta::new(sample));
            meta.observe(sample);
            meta
        }
        None => MetricMeta::new(sample),
    };
    let encoded = serde_json::to_vec(&updated).unwrap_or_default();
    meta_tree.insert(key, encoded)?;
    Ok(())
}

pub fn get(meta_tree: &Tree, metric: &str) -> sled::Result<Option<MetricMeta>> {
    Ok(meta_tree
        .get(metric.as_bytes())?
        .and_then(|bytes| serde_json::from_slice(&bytes).ok()))
}

pub fn list_metrics(meta_tree: &Tree) -> sled::Result<Vec<String>> {
    let mut out = Vec::new();
    for item in meta_tree.iter() {
        let (key, _) = item?;
        if let Ok(name) = String::from_utf8(key.to_vec()) {
            out.push(name);
        }
    }
    Ok(out)
}

pub fn delete(meta_tree: &Tree, metric: &str) -> sled::Result<()> {
    meta_tree.remove(metric.as_bytes())?;
    Ok(())
}
