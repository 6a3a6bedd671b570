pub mod debug;
pub mod error;
pub mod parser;
pub mod prometheus_api;
pub mod remote_write;
pub mod run;
pub mod store;

#[cfg(test)]
mod mock;

/// The reserved pseudo-label which holds a series' metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeriesType {
    Counter,
    Gauge,
    Histogram,
}

impl SeriesType {
    pub fn as_str(&self) -> &str {
        match self {
            SeriesType::Counter => "counter",
            SeriesType::Gauge => "gauge",
            SeriesType::Histogram => "histogram",
        }
    }
}

/// Milliseconds since the unix epoch, used as the capture time for a batch of samples
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
