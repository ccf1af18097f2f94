use metrics_util::AtomicBucket;
use pdatastructs::tdigest::{TDigest, K1};
use stampede_core::RequestSummary;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::error;

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Per-label request latency and status collection, shared by every clone of an
/// [`HttpClient`](crate::http::HttpClient).
#[derive(Clone, Default)]
pub(crate) struct RequestStats {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    labels: RwLock<HashMap<String, Arc<LabelStats>>>,
    network_errors: AtomicU64,
}

struct LabelStats {
    latency: AtomicBucket<Duration>,
    aggregate: Mutex<Aggregate>,
    statuses: Mutex<BTreeMap<u16, u64>>,
}

/// Running reduction of every latency drained out of a label's bucket.
struct Aggregate {
    digest: TDigest<K1>,
    count: u64,
    total_nanos: u128,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl RequestStats {
    pub fn record(&self, label: &str, status: u16, latency: Duration) {
        let stats = self.label(label);
        stats.latency.push(latency);
        *stats
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(status)
            .or_insert(0) += 1;
    }

    pub fn record_network_error(&self) {
        self.inner.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn network_errors(&self) -> u64 {
        self.inner.network_errors.load(Ordering::Relaxed)
    }

    /// Moves buffered latencies of every label into its running aggregate.
    pub fn flush(&self) {
        for stats in self.labels() {
            stats.flush();
        }
    }

    pub fn summarize(&self) -> BTreeMap<String, RequestSummary> {
        self.inner
            .labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(label, stats)| {
                stats.flush();
                (label.clone(), stats.summarize())
            })
            .collect()
    }

    fn labels(&self) -> Vec<Arc<LabelStats>> {
        self.inner
            .labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn label(&self, label: &str) -> Arc<LabelStats> {
        {
            let read = self
                .inner
                .labels
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(stats) = read.get(label) {
                return stats.clone();
            }
        }

        self.inner
            .labels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(label.to_string())
            .or_insert_with(|| {
                Arc::new(LabelStats {
                    latency: AtomicBucket::new(),
                    aggregate: Mutex::new(Aggregate::new()),
                    statuses: Mutex::new(BTreeMap::new()),
                })
            })
            .clone()
    }
}

impl LabelStats {
    fn flush(&self) {
        let mut aggregate = self
            .aggregate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.latency.clear_with(|latencies| {
            for latency in latencies {
                aggregate.insert(*latency);
            }
        });
    }

    fn summarize(&self) -> RequestSummary {
        let aggregate = self
            .aggregate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let statuses = self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if aggregate.count == 0 {
            return RequestSummary {
                statuses,
                ..Default::default()
            };
        }

        RequestSummary {
            count: aggregate.count,
            min: aggregate.min.unwrap_or_default(),
            max: aggregate.max.unwrap_or_default(),
            mean: aggregate.mean(),
            p50: quantile(&aggregate.digest, 0.5),
            p90: quantile(&aggregate.digest, 0.9),
            p95: quantile(&aggregate.digest, 0.95),
            p99: quantile(&aggregate.digest, 0.99),
            statuses,
        }
    }
}

impl Aggregate {
    fn new() -> Self {
        Self {
            digest: default_tdigest(),
            count: 0,
            total_nanos: 0,
            min: None,
            max: None,
        }
    }

    fn insert(&mut self, latency: Duration) {
        self.digest.insert(latency.as_secs_f64());
        self.count += 1;
        self.total_nanos += latency.as_nanos();
        self.min = Some(self.min.map_or(latency, |min| min.min(latency)));
        self.max = Some(self.max.map_or(latency, |max| max.max(latency)));
    }

    fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_nanos / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

fn quantile(digest: &TDigest<K1>, quantile: f64) -> Duration {
    let secs = digest.quantile(quantile);

    // NOTE: TDigest occasionally returns NaN on sparse data.
    let secs = if secs.is_finite() && secs >= 0. {
        secs
    } else {
        error!("NaN latency calculation for quantile {quantile}.");
        0.
    };

    Duration::from_secs_f64(secs)
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}
