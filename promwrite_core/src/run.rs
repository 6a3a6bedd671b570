//! A single demo run: check the server, write the demo metrics once, query them back.

use anyhow::Result;
use indexmap::IndexMap;
use std::str::FromStr;
use std::time::Duration;

use crate::debug::DEBUG;
use crate::error::debug_error;
use crate::prometheus_api::{self, PrometheusApi, DEFAULT_QUERY_TIMEOUT};
use crate::remote_write::push::{push_simple, Pusher};
use crate::remote_write::{
    generate_and_send, RemoteWriteClient, SampleSource, DEFAULT_WRITE_TIMEOUT,
};
use crate::store::{MetricStore, DEFAULT_BUCKETS};

pub const DEFAULT_PROMETHEUS_URL: &str = "http://localhost:9090";

/// Request durations observed by the demo histogram
const DEMO_DURATIONS: &[f64] = &[0.012, 0.087, 0.25, 0.6, 1.7];

/// Which write paths a run exercises
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WriteMode {
    Full,
    Simple,
    Both,
}

impl WriteMode {
    fn full(self) -> bool {
        matches!(self, WriteMode::Full | WriteMode::Both)
    }

    fn simple(self) -> bool {
        matches!(self, WriteMode::Simple | WriteMode::Both)
    }
}

impl FromStr for WriteMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(WriteMode::Full),
            "simple" => Ok(WriteMode::Simple),
            "both" => Ok(WriteMode::Both),
            _ => Err(anyhow::format_err!("expected one of: full, simple, both")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DemoConfig {
    /// e.g. "http://localhost:9090"
    pub prometheus_url: String,
    pub write_mode: WriteMode,
    pub sample_source: SampleSource,
    /// The value of the `service` label on the demo metrics
    pub service: String,
    pub static_labels: Vec<(String, String)>,
    pub write_timeout: Duration,
    pub query_timeout: Duration,
    /// How long to wait after writing before querying
    pub query_delay: Duration,
    pub queries: Vec<String>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            prometheus_url: DEFAULT_PROMETHEUS_URL.to_owned(),
            write_mode: WriteMode::Both,
            sample_source: SampleSource::Exposition,
            service: "demo-service".to_owned(),
            static_labels: Vec::new(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            query_delay: Duration::from_secs(2),
            queries: vec![
                "demo_counter_total".to_owned(),
                "demo_gauge".to_owned(),
                "demo_request_duration_seconds_count".to_owned(),
                "demo_simple_gauge".to_owned(),
            ],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunStatus {
    Completed,
    /// The health check failed, so nothing was written
    Unhealthy,
}

pub fn populate_demo_metrics(store: &mut MetricStore, service: &str) -> Result<()> {
    let labels = [("service", service)];
    store
        .counter("demo_counter_total", "Total demo events.", &labels)?
        .inc_by(42.0)?;
    store
        .gauge("demo_gauge", "A demo gauge value.", &labels)?
        .set(23.5);
    let mut histogram = store.histogram(
        "demo_request_duration_seconds",
        "Demo request durations in seconds.",
        &labels,
        DEFAULT_BUCKETS,
    )?;
    for duration in DEMO_DURATIONS {
        histogram.observe(*duration);
    }
    Ok(())
}

/// The values sent through the simplified path
pub fn simple_values() -> IndexMap<String, f64> {
    let mut values = IndexMap::new();
    values.insert("demo_simple_gauge".to_owned(), 23.5);
    values.insert("demo_simple_counter_total".to_owned(), 1.0);
    values
}

pub async fn run(config: &DemoConfig) -> Result<RunStatus> {
    let api = PrometheusApi::new(&config.prometheus_url).with_timeout(config.query_timeout);

    // Don't write anything unless the server is up
    log::info!("Checking Prometheus at {}...", api.base_url());
    if let Err(err) = api.healthy().await {
        debug_error(err);
        log::error!(
            "Prometheus is not reachable at {}. Start it with the remote write receiver \
             enabled (e.g. `prometheus --web.enable-remote-write-receiver`) or set PROMETHEUS_URL.",
            api.base_url()
        );
        return Ok(RunStatus::Unhealthy);
    }

    if config.write_mode.full() {
        let mut store = MetricStore::new();
        populate_demo_metrics(&mut store, &config.service)?;
        let client =
            RemoteWriteClient::new(&config.prometheus_url).with_timeout(config.write_timeout);
        generate_and_send(&store, &client, config.sample_source, &config.static_labels).await;
    }

    if config.write_mode.simple() {
        let pusher = Pusher::new(&config.prometheus_url)
            .with_timeout(config.write_timeout)
            .with_static_labels(config.static_labels.clone());
        push_simple(&pusher, &simple_values()).await;
    }

    // Give the server a moment to make the samples queryable
    if !config.queries.is_empty() && config.query_delay > Duration::from_secs(0) {
        async_std::task::sleep(config.query_delay).await;
    }

    for query in &config.queries {
        match api.query(query).await {
            Ok(response) => {
                DEBUG.query_succeeded();
                log::info!("{}: {}", query, prometheus_api::render(&response));
            }
            Err(err) => {
                DEBUG.query_failed();
                debug_error(err.context(format!("query {:?} failed", query)));
            }
        }
    }

    DEBUG.publish();
    Ok(RunStatus::Completed)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{unreachable_url, MockPrometheus};
    use crate::remote_write::{encoder, WRITE_PATH};

    const EMPTY_QUERY: &str = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;

    fn config(url: &str) -> DemoConfig {
        DemoConfig {
            prometheus_url: url.to_owned(),
            query_delay: Duration::from_secs(0),
            write_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(2),
            ..DemoConfig::default()
        }
    }

    #[test]
    fn unhealthy_server_skips_writes() {
        let server = MockPrometheus::start(vec![
            ("/-/healthy", 503, "Service Unavailable".into()),
            (WRITE_PATH, 204, String::new()),
        ]);

        let status = async_std::task::block_on(run(&config(&server.url))).unwrap();
        assert_eq!(status, RunStatus::Unhealthy);

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/-/healthy");
    }

    #[test]
    fn unreachable_server_is_unhealthy() {
        let status = async_std::task::block_on(run(&config(&unreachable_url()))).unwrap();
        assert_eq!(status, RunStatus::Unhealthy);
    }

    #[test]
    fn writes_then_queries() {
        let server = MockPrometheus::start(vec![
            ("/-/healthy", 200, "Prometheus is Healthy.".into()),
            (WRITE_PATH, 204, String::new()),
            ("/api/v1/query", 200, EMPTY_QUERY.into()),
        ]);
        let mut config = config(&server.url);
        config.static_labels = vec![("env".to_owned(), "test".to_owned())];

        let status = async_std::task::block_on(run(&config)).unwrap();
        assert_eq!(status, RunStatus::Completed);

        let requests = server.requests();
        let paths = requests.iter().map(|r| r.path.as_str()).collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "/-/healthy",
                WRITE_PATH,
                WRITE_PATH,
                "/api/v1/query",
                "/api/v1/query",
                "/api/v1/query",
                "/api/v1/query",
            ]
        );

        // Full path: counter + gauge + histogram (14 buckets, +Inf, sum, count)
        let full = encoder::decode(&requests[1].body).unwrap();
        assert_eq!(full.timeseries.len(), 1 + 1 + DEFAULT_BUCKETS.len() + 3);
        let counter = &full.timeseries[0];
        assert_eq!(counter.metric_name(), Some("demo_counter_total"));
        assert_eq!(counter.labels[1].name, "env");
        assert_eq!(counter.labels[2].value, "demo-service");
        assert_eq!(counter.samples[0].value, 42.0);

        // Simplified path
        let simple = encoder::decode(&requests[2].body).unwrap();
        assert_eq!(simple.timeseries.len(), 2);
        assert_eq!(simple.timeseries[0].metric_name(), Some("demo_simple_gauge"));
        assert_eq!(simple.timeseries[0].samples[0].value, 23.5);
    }

    #[test]
    fn write_failures_do_not_stop_the_run() {
        let server = MockPrometheus::start(vec![
            ("/-/healthy", 200, String::new()),
            (WRITE_PATH, 500, "storage unavailable".into()),
            ("/api/v1/query", 200, EMPTY_QUERY.into()),
        ]);
        let mut config = config(&server.url);
        config.write_mode = WriteMode::Full;
        config.queries = vec!["up".to_owned(), "demo_gauge".to_owned()];

        let status = async_std::task::block_on(run(&config)).unwrap();
        assert_eq!(status, RunStatus::Completed);

        let requests = server.requests();
        let writes = requests.iter().filter(|r| r.path == WRITE_PATH).count();
        let queries = requests.iter().filter(|r| r.path == "/api/v1/query").count();
        assert_eq!(writes, 1);
        assert_eq!(queries, 2);
    }

    #[test]
    fn failed_queries_do_not_stop_later_queries() {
        let server = MockPrometheus::start(vec![
            ("/-/healthy", 200, String::new()),
            (WRITE_PATH, 204, String::new()),
            // Not json, so every query fails to decode
            ("/api/v1/query", 200, "<html>".into()),
        ]);
        let mut config = config(&server.url);
        config.write_mode = WriteMode::Simple;
        config.queries = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];

        let status = async_std::task::block_on(run(&config)).unwrap();
        assert_eq!(status, RunStatus::Completed);
        let queries = server
            .requests()
            .iter()
            .filter(|r| r.path == "/api/v1/query")
            .count();
        assert_eq!(queries, 3);
    }

    #[test]
    fn parses_write_modes() {
        assert_eq!("full".parse::<WriteMode>().unwrap(), WriteMode::Full);
        assert_eq!("both".parse::<WriteMode>().unwrap(), WriteMode::Both);
        assert!("all".parse::<WriteMode>().is_err());
        assert!(!WriteMode::Simple.full());
        assert!(WriteMode::Both.simple());
    }
}
