//! # Remote Write
//!
//! Sends samples to a Prometheus compatible endpoint using the remote write protocol.
//!
//! There are two paths:
//!  - the full path renders a [`MetricStore`], scrapes the text back into series,
//!    validates, encodes and compresses them (see [`generate_and_send`])
//!  - the simplified path posts a flat map of values through the [`push`] helper
//!
//! Both make exactly one request per call and never retry.

pub mod encoder;
pub mod proto;
pub mod push;

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::debug::DEBUG;
use crate::error::debug_error;
use crate::parser;
use crate::store::MetricStore;
use crate::METRIC_NAME_LABEL;

use self::proto::{Label, Sample, TimeSeries, WriteRequest};

pub const WRITE_PATH: &str = "/api/v1/write";
pub const CONTENT_TYPE: &str = "application/x-protobuf";
pub const CONTENT_ENCODING: &str = "snappy";
pub const REMOTE_WRITE_VERSION_HEADER: &str = "X-Prometheus-Remote-Write-Version";
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// How long to wait for the endpoint to accept a write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a single-sample series; `__name__` first, then static labels, then `labels`.
///
/// A static label is left out when `labels` has a label with the same name.
pub fn new_series<'a>(
    name: &str,
    static_labels: &[(String, String)],
    labels: impl IntoIterator<Item = (&'a str, &'a str)>,
    value: f64,
    timestamp: i64,
) -> TimeSeries {
    let labels = labels.into_iter().collect::<Vec<_>>();
    let mut out = Vec::with_capacity(1 + static_labels.len() + labels.len());
    out.push(Label::new(METRIC_NAME_LABEL, name));
    for (name, value) in static_labels {
        if labels.iter().all(|(label, _)| label != name) {
            out.push(Label::new(name.as_str(), value.as_str()));
        }
    }
    for (name, value) in labels {
        out.push(Label::new(name, value));
    }
    TimeSeries {
        labels: out,
        samples: vec![Sample { value, timestamp }],
    }
}

/// Where the full path reads its samples from
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SampleSource {
    /// Render the store as text and scrape it back
    Exposition,
    /// Read the store's values directly
    Store,
}

impl FromStr for SampleSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exposition" => Ok(SampleSource::Exposition),
            "store" => Ok(SampleSource::Store),
            _ => Err(anyhow::format_err!("expected one of: exposition, store")),
        }
    }
}

/// The endpoint's answer to a write
#[derive(Clone, Debug, PartialEq)]
pub struct WriteOutcome {
    pub status: u16,
    pub body: String,
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Clone, Debug)]
pub struct RemoteWriteClient {
    write_url: String,
    timeout: Duration,
}

impl RemoteWriteClient {
    /// Create a client for the server at `base_url`, e.g. "http://localhost:9090"
    pub fn new(base_url: &str) -> Self {
        RemoteWriteClient {
            write_url: format!("{}{}", base_url.trim_end_matches('/'), WRITE_PATH),
            timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    /// Post an already compressed write request, once
    pub async fn send(&self, body: Vec<u8>) -> Result<WriteOutcome> {
        let request = surf::post(&self.write_url)
            .body(surf::Body::from_bytes(body))
            .header("Content-Type", CONTENT_TYPE)
            .header("Content-Encoding", CONTENT_ENCODING)
            .header(REMOTE_WRITE_VERSION_HEADER, REMOTE_WRITE_VERSION);
        async_std::future::timeout(self.timeout, async {
            let mut response = request
                .await
                .map_err(|err| anyhow::format_err!("error during remote write: {}", err))?;
            let body = response.body_string().await.unwrap_or_default();
            Ok::<_, anyhow::Error>(WriteOutcome {
                status: response.status().into(),
                body,
            })
        })
        .await
        .map_err(|_| anyhow::format_err!("remote write timed out after {:?}", self.timeout))?
    }
}

/// Validate, encode and send a batch of series, returning how many were written
pub async fn write_samples(client: &RemoteWriteClient, series: Vec<TimeSeries>) -> Result<usize> {
    let out = series.len();
    let request = WriteRequest { timeseries: series };

    let body = encoder::encode(&request).map_err(|err| {
        DEBUG.write_failed();
        anyhow::Error::new(err)
    })?;
    let bytes = body.len();

    let outcome = client.send(body).await.map_err(|err| {
        DEBUG.write_failed();
        err
    })?;
    if !outcome.is_success() {
        DEBUG.write_rejected();
        return Err(anyhow::format_err!(
            "remote write rejected with status {}: {}",
            outcome.status,
            outcome.body.trim()
        ));
    }

    DEBUG.write_succeeded(out, bytes);
    Ok(out)
}

/// Send the store's current values through the full remote write path.
///
/// Failures are logged, never returned.
pub async fn generate_and_send(
    store: &MetricStore,
    client: &RemoteWriteClient,
    source: SampleSource,
    static_labels: &[(String, String)],
) {
    let timestamp = crate::now_millis();
    let series = match source {
        SampleSource::Exposition => {
            let text = store.render();
            parser::to_timeseries(parser::parse(&text), timestamp, static_labels)
        }
        SampleSource::Store => store.collect(timestamp, static_labels),
    };

    match write_samples(client, series)
        .await
        .with_context(|| format!("failed to write samples to {}", client.write_url()))
    {
        Ok(sent) => log::info!("Wrote {} series to {}", sent, client.write_url()),
        Err(err) => debug_error(err),
    }
}
