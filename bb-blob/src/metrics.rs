use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bb_core::Digest;
use prometheus::{exponential_buckets, HistogramOpts, HistogramVec, Registry};

use crate::{Blob, BlobAccess, BlobError, BlobResult};

/// Latency histograms shared by every instrumented backend of a process
#[derive(Clone)]
pub struct BlobAccessMetrics {
    operations_duration_seconds: HistogramVec,
}

impl BlobAccessMetrics {
    /// Create the collectors and register them with `registry`.
    pub fn register(registry: &Registry) -> BlobResult<Self> {
        let buckets = exponential_buckets(0.001, 2.0, 16)
            .map_err(|e| BlobError::configuration(e.to_string()))?;
        let operations_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "blob_access_operations_duration_seconds",
                "Amount of time spent per operation on blob access objects, in seconds.",
            )
            .namespace("bb_storage")
            .buckets(buckets),
            &["name", "operation", "code"],
        )
        .map_err(|e| BlobError::configuration(e.to_string()))?;
        registry
            .register(Box::new(operations_duration_seconds.clone()))
            .map_err(|e| BlobError::configuration(e.to_string()))?;
        Ok(Self {
            operations_duration_seconds,
        })
    }

    fn observe<T>(&self, name: &str, operation: &str, started: Instant, result: &BlobResult<T>) {
        let code = match result {
            Ok(_) => "OK".to_string(),
            Err(e) => format!("{:?}", e.code()),
        };
        self.operations_duration_seconds
            .with_label_values(&[name, operation, &code])
            .observe(started.elapsed().as_secs_f64());
    }
}

/// Records per-call latency and outcome of another backend.
pub struct MetricsBlobAccess {
    inner: Arc<dyn BlobAccess>,
    name: String,
    metrics: BlobAccessMetrics,
}

impl MetricsBlobAccess {
    pub fn new<S: Into<String>>(inner: Arc<dyn BlobAccess>, name: S, metrics: BlobAccessMetrics) -> Self {
        Self {
            inner,
            name: name.into(),
            metrics,
        }
    }
}

#[async_trait]
impl BlobAccess for MetricsBlobAccess {
    async fn get(&self, digest: &Digest) -> BlobResult<Blob> {
        let started = Instant::now();
        let result = self.inner.get(digest).await;
        self.metrics.observe(&self.name, "Get", started, &result);
        result
    }

    async fn put(&self, digest: &Digest, blob: Blob) -> BlobResult<()> {
        let started = Instant::now();
        let result = self.inner.put(digest, blob).await;
        self.metrics.observe(&self.name, "Put", started, &result);
        result
    }

    async fn find_missing(&self, digests: &[Digest]) -> BlobResult<Vec<Digest>> {
        let started = Instant::now();
        let result = self.inner.find_missing(digests).await;
        self.metrics.observe(&self.name, "FindMissing", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlobAccess;

    #[tokio::test]
    async fn test_records_outcome_per_operation() {
        let registry = Registry::new();
        let metrics = BlobAccessMetrics::register(&registry).unwrap();
        let store = MetricsBlobAccess::new(Arc::new(MemoryBlobAccess::new()), "cas", metrics);

        let digest = Digest::of_bytes("main", b"x");
        assert!(store.get(&digest).await.is_err());
        store.put(&digest, Blob::from_bytes(&b"x"[..])).await.unwrap();

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        let labels: Vec<Vec<String>> = families[0]
            .get_metric()
            .iter()
            .map(|m| m.get_label().iter().map(|l| l.get_value().to_string()).collect())
            .collect();
        assert!(labels.contains(&vec!["NotFound".into(), "cas".into(), "Get".into()]));
        assert!(labels.contains(&vec!["OK".into(), "cas".into(), "Put".into()]));
    }

    #[test]
    fn test_double_registration_is_an_error() {
        let registry = Registry::new();
        BlobAccessMetrics::register(&registry).unwrap();
        assert!(BlobAccessMetrics::register(&registry).is_err());
    }
}
