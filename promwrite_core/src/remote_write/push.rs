//! A small helper for pushing plain `name -> value` pairs.
//!
//! Unlike the full path this doesn't scrape or validate. Every entry becomes a
//! single-sample series named by its key, and the request body is built and
//! compressed by the `prometheus-remote-write` crate.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use prometheus_remote_write::{Label, Sample, TimeSeries, WriteRequest, LABEL_NAME};
use std::time::Duration;

use super::RemoteWriteClient;
use crate::debug::DEBUG;
use crate::error::debug_error;

#[derive(Clone, Debug)]
pub struct Pusher {
    client: RemoteWriteClient,
    static_labels: Vec<(String, String)>,
}

impl Pusher {
    pub fn new(base_url: &str) -> Self {
        Pusher {
            client: RemoteWriteClient::new(base_url),
            static_labels: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    /// Labels added to every pushed series
    pub fn with_static_labels(mut self, labels: Vec<(String, String)>) -> Self {
        self.static_labels = labels;
        self
    }

    pub fn write_url(&self) -> &str {
        self.client.write_url()
    }

    pub fn build_request(&self, values: &IndexMap<String, f64>, timestamp: i64) -> WriteRequest {
        let timeseries = values
            .iter()
            .map(|(name, value)| {
                let mut labels = vec![Label {
                    name: LABEL_NAME.to_owned(),
                    value: name.clone(),
                }];
                labels.extend(self.static_labels.iter().map(|(name, value)| Label {
                    name: name.clone(),
                    value: value.clone(),
                }));
                TimeSeries {
                    labels,
                    samples: vec![Sample {
                        value: *value,
                        timestamp,
                    }],
                }
            })
            .collect();
        WriteRequest { timeseries }
    }

    /// Push the values with a shared "now" timestamp, returning how many series were sent
    pub async fn push(&self, values: &IndexMap<String, f64>) -> Result<usize> {
        let request = self.build_request(values, crate::now_millis());
        let out = request.timeseries.len();

        // Sorts each series' labels, then encodes and compresses
        let body = request
            .encode_compressed()
            .map_err(|err| {
                DEBUG.write_failed();
                err
            })
            .context("failed to compress push body")?;
        let bytes = body.len();

        let outcome = self.client.send(body).await.map_err(|err| {
            DEBUG.write_failed();
            err
        })?;
        if !outcome.is_success() {
            DEBUG.write_rejected();
            return Err(anyhow::format_err!(
                "push rejected with status {}: {}",
                outcome.status,
                outcome.body.trim()
            ));
        }

        DEBUG.write_succeeded(out, bytes);
        Ok(out)
    }
}

/// Push the values once through the simplified path.
///
/// Failures are logged, never returned.
pub async fn push_simple(pusher: &Pusher, values: &IndexMap<String, f64>) {
    match pusher.push(values).await {
        Ok(sent) => log::info!("Pushed {} values to {}", sent, pusher.write_url()),
        Err(err) => debug_error(err.context(format!(
            "failed to push values to {}",
            pusher.write_url()
        ))),
    }
}
