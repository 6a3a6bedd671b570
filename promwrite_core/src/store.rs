//! # Metric Store
//!
//! An in-memory set of counters, gauges and histograms.
//!
//! The store is an explicit object owned by the caller; there is no process-wide registry.
//! It can be read back either as a text exposition (see [`MetricStore::render`]) or as
//! structured remote write series (see [`MetricStore::collect`]).

use indexmap::IndexMap; // hash table w/ fast iter preserving insertion order
use std::fmt::Write;
use thiserror::Error;

use crate::remote_write::{new_series, proto::TimeSeries};
use crate::SeriesType;

/// The bucket upper bounds used by most Prometheus client libraries
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("invalid metric name: {0:?}")]
    InvalidMetricName(String),
    #[error("invalid label name {label:?} for metric {metric}")]
    InvalidLabelName { metric: String, label: String },
    #[error("duplicate label name {label:?} for metric {metric}")]
    DuplicateLabel { metric: String, label: String },
    #[error("metric {name} is already registered as a {existing}")]
    KindMismatch { name: String, existing: &'static str },
    #[error("counter {name} cannot be incremented by {value}")]
    InvalidIncrement { name: String, value: f64 },
    #[error("histogram {0} buckets must be finite and strictly increasing")]
    InvalidBuckets(String),
}

pub type LabelSet = Vec<(String, String)>;

#[derive(Debug, Default)]
pub struct MetricStore {
    families: IndexMap<String, Family>,
}

#[derive(Debug)]
struct Family {
    help: String,
    kind: SeriesType,
    values: FamilyValues,
}

#[derive(Debug)]
enum FamilyValues {
    /// Counters and gauges
    Scalar(IndexMap<LabelSet, f64>),
    Histogram {
        /// Upper bounds, excluding the implicit `+Inf`
        buckets: Vec<f64>,
        series: IndexMap<LabelSet, HistogramState>,
    },
}

#[derive(Debug)]
struct HistogramState {
    /// Cumulative counts, one per bucket bound
    buckets: Vec<u64>,
    sum: f64,
    count: u64,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Get (or register) a counter series
    pub fn counter<'a>(
        &'a mut self,
        name: &'a str,
        help: &str,
        labels: &[(&str, &str)],
    ) -> Result<Counter<'a>, StoreError> {
        let key = label_set(name, labels, false)?;
        let value = self.scalar(name, help, SeriesType::Counter, key)?;
        Ok(Counter { name, value })
    }

    /// Get (or register) a gauge series
    pub fn gauge<'a>(
        &'a mut self,
        name: &'a str,
        help: &str,
        labels: &[(&str, &str)],
    ) -> Result<Gauge<'a>, StoreError> {
        let key = label_set(name, labels, false)?;
        let value = self.scalar(name, help, SeriesType::Gauge, key)?;
        Ok(Gauge { value })
    }

    /// Get (or register) a histogram series.
    ///
    /// The buckets are only used when the histogram is first registered.
    pub fn histogram<'a>(
        &'a mut self,
        name: &'a str,
        help: &str,
        labels: &[(&str, &str)],
        buckets: &[f64],
    ) -> Result<Histogram<'a>, StoreError> {
        let valid = buckets.iter().all(|b| b.is_finite())
            && buckets.windows(2).all(|pair| pair[0] < pair[1]);
        if !valid {
            return Err(StoreError::InvalidBuckets(name.to_owned()));
        }
        let key = label_set(name, labels, true)?;
        let family = self.family(name, help, SeriesType::Histogram, || {
            FamilyValues::Histogram {
                buckets: buckets.to_vec(),
                series: IndexMap::new(),
            }
        })?;
        match &mut family.values {
            FamilyValues::Histogram { buckets, series } => {
                let state = series.entry(key).or_insert_with(|| HistogramState {
                    buckets: vec![0; buckets.len()],
                    sum: 0.0,
                    count: 0,
                });
                Ok(Histogram {
                    bounds: buckets.as_slice(),
                    state,
                })
            }
            FamilyValues::Scalar(_) => Err(kind_mismatch(name, family.kind)),
        }
    }

    fn scalar(
        &mut self,
        name: &str,
        help: &str,
        kind: SeriesType,
        key: LabelSet,
    ) -> Result<&mut f64, StoreError> {
        let family = self.family(name, help, kind, || FamilyValues::Scalar(IndexMap::new()))?;
        match &mut family.values {
            FamilyValues::Scalar(series) => Ok(series.entry(key).or_insert(0.0)),
            FamilyValues::Histogram { .. } => Err(kind_mismatch(name, family.kind)),
        }
    }

    fn family(
        &mut self,
        name: &str,
        help: &str,
        kind: SeriesType,
        values: impl FnOnce() -> FamilyValues,
    ) -> Result<&mut Family, StoreError> {
        if !is_metric_name(name) {
            return Err(StoreError::InvalidMetricName(name.to_owned()));
        }
        let family = self
            .families
            .entry(name.to_owned())
            .or_insert_with(|| Family {
                help: help.to_owned(),
                kind,
                values: values(),
            });
        if family.kind != kind {
            return Err(kind_mismatch(name, family.kind));
        }
        Ok(family)
    }

    /// Write the current values in Prometheus's text exposition format
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, family) in &self.families {
            let _ = writeln!(out, "# HELP {} {}", name, escape_help(&family.help));
            let _ = writeln!(out, "# TYPE {} {}", name, family.kind.as_str());
            match &family.values {
                FamilyValues::Scalar(series) => {
                    for (labels, value) in series {
                        write_line(&mut out, name, "", labels, None, *value);
                    }
                }
                FamilyValues::Histogram { buckets, series } => {
                    for (labels, state) in series {
                        for (bound, count) in buckets.iter().zip(&state.buckets) {
                            let le = format_value(*bound);
                            write_line(&mut out, name, "_bucket", labels, Some(le.as_str()), *count as f64);
                        }
                        write_line(&mut out, name, "_bucket", labels, Some("+Inf"), state.count as f64);
                        write_line(&mut out, name, "_sum", labels, None, state.sum);
                        write_line(&mut out, name, "_count", labels, None, state.count as f64);
                    }
                }
            }
        }
        out
    }

    /// Read the current values as remote write series, skipping the text exposition
    pub fn collect(&self, timestamp: i64, static_labels: &[(String, String)]) -> Vec<TimeSeries> {
        let mut out = Vec::new();
        for (name, family) in &self.families {
            match &family.values {
                FamilyValues::Scalar(series) => {
                    for (labels, value) in series {
                        let labels = labels.iter().map(|(k, v)| (k.as_str(), v.as_str()));
                        out.push(new_series(name, static_labels, labels, *value, timestamp));
                    }
                }
                FamilyValues::Histogram { buckets, series } => {
                    let bucket_name = format!("{}_bucket", name);
                    let bounds = buckets
                        .iter()
                        .map(|bound| format_value(*bound))
                        .chain(std::iter::once("+Inf".to_owned()))
                        .collect::<Vec<_>>();
                    for (labels, state) in series {
                        let labels = labels
                            .iter()
                            .map(|(k, v)| (k.as_str(), v.as_str()))
                            .collect::<Vec<_>>();
                        let counts = state.buckets.iter().chain(std::iter::once(&state.count));
                        for (le, count) in bounds.iter().zip(counts) {
                            let labels = labels
                                .iter()
                                .copied()
                                .chain(std::iter::once(("le", le.as_str())));
                            out.push(new_series(
                                &bucket_name,
                                static_labels,
                                labels,
                                *count as f64,
                                timestamp,
                            ));
                        }
                        out.push(new_series(
                            &format!("{}_sum", name),
                            static_labels,
                            labels.iter().copied(),
                            state.sum,
                            timestamp,
                        ));
                        out.push(new_series(
                            &format!("{}_count", name),
                            static_labels,
                            labels,
                            state.count as f64,
                            timestamp,
                        ));
                    }
                }
            }
        }
        out
    }
}

fn kind_mismatch(name: &str, existing: SeriesType) -> StoreError {
    StoreError::KindMismatch {
        name: name.to_owned(),
        existing: match existing {
            SeriesType::Counter => "counter",
            SeriesType::Gauge => "gauge",
            SeriesType::Histogram => "histogram",
        },
    }
}

pub struct Counter<'a> {
    name: &'a str,
    value: &'a mut f64,
}

impl Counter<'_> {
    pub fn inc(&mut self) {
        *self.value += 1.0;
    }

    pub fn inc_by(&mut self, value: f64) -> Result<(), StoreError> {
        if !value.is_finite() || value < 0.0 {
            return Err(StoreError::InvalidIncrement {
                name: self.name.to_owned(),
                value,
            });
        }
        *self.value += value;
        Ok(())
    }

    pub fn get(&self) -> f64 {
        *self.value
    }
}

pub struct Gauge<'a> {
    value: &'a mut f64,
}

impl Gauge<'_> {
    pub fn set(&mut self, value: f64) {
        *self.value = value;
    }

    pub fn inc_by(&mut self, value: f64) {
        *self.value += value;
    }

    pub fn dec_by(&mut self, value: f64) {
        *self.value -= value;
    }

    pub fn get(&self) -> f64 {
        *self.value
    }
}

pub struct Histogram<'a> {
    bounds: &'a [f64],
    state: &'a mut HistogramState,
}

impl Histogram<'_> {
    pub fn observe(&mut self, value: f64) {
        for (bound, count) in self.bounds.iter().zip(self.state.buckets.iter_mut()) {
            if value <= *bound {
                *count += 1;
            }
        }
        self.state.sum += value;
        self.state.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.state.count
    }

    pub fn sum(&self) -> f64 {
        self.state.sum
    }
}

fn label_set(metric: &str, labels: &[(&str, &str)], histogram: bool) -> Result<LabelSet, StoreError> {
    let mut out: LabelSet = Vec::with_capacity(labels.len());
    for (name, value) in labels {
        if !is_label_name(name) || (histogram && *name == "le") {
            return Err(StoreError::InvalidLabelName {
                metric: metric.to_owned(),
                label: (*name).to_owned(),
            });
        }
        if out.iter().any(|(existing, _)| existing == name) {
            return Err(StoreError::DuplicateLabel {
                metric: metric.to_owned(),
                label: (*name).to_owned(),
            });
        }
        out.push(((*name).to_owned(), (*value).to_owned()));
    }
    Ok(out)
}

/// Matches `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' || ch == ':' => (),
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == ':')
}

/// Matches `[a-zA-Z_][a-zA-Z0-9_]*`, excluding the reserved `__` prefix
pub fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => (),
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn write_line(
    out: &mut String,
    name: &str,
    suffix: &str,
    labels: &[(String, String)],
    le: Option<&str>,
    value: f64,
) {
    out.push_str(name);
    out.push_str(suffix);
    if !labels.is_empty() || le.is_some() {
        out.push('{');
        let le = le.map(|le| ("le", le));
        let pairs = labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).chain(le);
        for (i, (k, v)) in pairs.enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{}=\"{}\"", k, escape_label_value(v));
        }
        out.push('}');
    }
    let _ = writeln!(out, " {}", format_value(value));
}

/// Format a float the way the exposition format expects
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value == f64::INFINITY {
        "+Inf".to_owned()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_owned()
    } else {
        value.to_string()
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
