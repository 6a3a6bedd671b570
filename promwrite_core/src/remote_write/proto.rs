//! The protobuf message structure of a Prometheus remote write request.
//!
//! The fields must be in the same order as the protobuf definition.
//! See the [prost](https://github.com/tokio-rs/prost) docs for more options.

use prost::Message;

use crate::METRIC_NAME_LABEL;

#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Label {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    /// The value of the series' `__name__` label, if it has one
    pub fn metric_name(&self) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.name == METRIC_NAME_LABEL)
            .map(|label| label.value.as_str())
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}
