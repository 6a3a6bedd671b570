pub use std::sync::atomic::{AtomicUsize, Ordering};

pub static DEBUG: DebugMetrics = DebugMetrics::new();

pub struct DebugMetrics {
    series_written: AtomicUsize,
    write_count: AtomicUsize,
    write_errors: AtomicUsize,
    write_rejected: AtomicUsize,
    write_bytes: AtomicUsize,
    query_count: AtomicUsize,
    query_errors: AtomicUsize,
}

impl DebugMetrics {
    pub const fn new() -> Self {
        DebugMetrics {
            series_written: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
            write_errors: AtomicUsize::new(0),
            write_rejected: AtomicUsize::new(0),
            write_bytes: AtomicUsize::new(0),
            query_count: AtomicUsize::new(0),
            query_errors: AtomicUsize::new(0),
        }
    }

    pub fn write_succeeded(&self, series: usize, bytes: usize) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.series_written.fetch_add(series, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// The endpoint answered, but with a non-2xx status
    pub fn write_rejected(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.write_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_succeeded(&self) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_failed(&self) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        self.query_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Log the current metrics and reset the counters
    pub fn publish(&self) {
        let series_written = self.series_written.swap(0, Ordering::Relaxed);
        let write_count = self.write_count.swap(0, Ordering::Relaxed);
        let write_errors = self.write_errors.swap(0, Ordering::Relaxed);
        let write_rejected = self.write_rejected.swap(0, Ordering::Relaxed);
        let write_bytes = self.write_bytes.swap(0, Ordering::Relaxed);
        let query_count = self.query_count.swap(0, Ordering::Relaxed);
        let query_errors = self.query_errors.swap(0, Ordering::Relaxed);
        log::info!(
            "Debug: writes {} (errors {}, rejected {}) | series {} ({} bytes) | queries {} (errors {})",
            write_count,
            write_errors,
            write_rejected,
            series_written,
            write_bytes,
            query_count,
            query_errors,
        );
    }
}
