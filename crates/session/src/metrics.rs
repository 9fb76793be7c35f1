use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct Metrics {
    // Counters
    ingests: AtomicUsize,
    failed_ingests: AtomicUsize,
    searches: AtomicUsize,
    failed_searches: AtomicUsize,

    // Timing (in microseconds)
    total_ingest_time_us: AtomicU64,
    total_search_time_us: AtomicU64,

    // Counts
    total_chunks_indexed: AtomicUsize,
    total_chunks_skipped: AtomicUsize,
    total_triples_extracted: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingest(&self, duration: Duration, chunks: usize, skipped: usize, triples: usize) {
        self.ingests.fetch_add(1, Ordering::Relaxed);
        self.total_ingest_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_chunks_indexed.fetch_add(chunks, Ordering::Relaxed);
        self.total_chunks_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.total_triples_extracted.fetch_add(triples, Ordering::Relaxed);
    }

    pub fn record_failed_ingest(&self) {
        self.failed_ingests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search(&self, duration: Duration, success: bool) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.total_search_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if !success {
            self.failed_searches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ingests: self.ingests.load(Ordering::Relaxed),
            failed_ingests: self.failed_ingests.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            failed_searches: self.failed_searches.load(Ordering::Relaxed),
            avg_ingest_time_ms: avg_time_ms(&self.total_ingest_time_us, &self.ingests),
            avg_search_time_ms: avg_time_ms(&self.total_search_time_us, &self.searches),
            total_chunks_indexed: self.total_chunks_indexed.load(Ordering::Relaxed),
            total_chunks_skipped: self.total_chunks_skipped.load(Ordering::Relaxed),
            total_triples_extracted: self.total_triples_extracted.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub ingests: usize,
    pub failed_ingests: usize,
    pub searches: usize,
    pub failed_searches: usize,
    pub avg_ingest_time_ms: f64,
    pub avg_search_time_ms: f64,
    pub total_chunks_indexed: usize,
    pub total_chunks_skipped: usize,
    pub total_triples_extracted: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
