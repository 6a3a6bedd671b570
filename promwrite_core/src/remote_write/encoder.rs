//! Serializes a [`WriteRequest`] into the (snappy compressed) wire format.

use prost::Message;
use thiserror::Error;

use super::proto::WriteRequest;
use crate::METRIC_NAME_LABEL;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("series {index} has no labels")]
    NoLabels { index: usize },
    #[error("series {index} has {count} `__name__` labels, expected exactly one")]
    NameCount { index: usize, count: usize },
    #[error("series {index} has an empty metric name")]
    EmptyName { index: usize },
    #[error("series {index} has an empty label name")]
    EmptyLabelName { index: usize },
    #[error("series {index} has a duplicate label {name:?}")]
    DuplicateLabel { index: usize, name: String },
    #[error("series {index} ({name}) has no samples")]
    NoSamples { index: usize, name: String },
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("invalid write request: {0}")]
    Invalid(ValidationError),
    #[error("failed to compress write request body")]
    Compress(#[source] snap::Error),
    #[error("failed to decompress write request body")]
    Decompress(#[source] snap::Error),
    #[error("failed to decode write request")]
    Decode(#[from] prost::DecodeError),
}

/// Check every series has the shape the remote write schema requires
pub fn validate(request: &WriteRequest) -> Result<(), ValidationError> {
    for (index, series) in request.timeseries.iter().enumerate() {
        if series.labels.is_empty() {
            return Err(ValidationError::NoLabels { index });
        }

        let count = series
            .labels
            .iter()
            .filter(|label| label.name == METRIC_NAME_LABEL)
            .count();
        if count != 1 {
            return Err(ValidationError::NameCount { index, count });
        }
        let name = series.metric_name().unwrap_or_default();
        if name.is_empty() {
            return Err(ValidationError::EmptyName { index });
        }

        for (i, label) in series.labels.iter().enumerate() {
            if label.name.is_empty() {
                return Err(ValidationError::EmptyLabelName { index });
            }
            if series.labels[..i].iter().any(|prev| prev.name == label.name) {
                return Err(ValidationError::DuplicateLabel {
                    index,
                    name: label.name.clone(),
                });
            }
        }

        if series.samples.is_empty() {
            return Err(ValidationError::NoSamples {
                index,
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}

/// Validate, serialize and compress a write request.
///
/// Series and labels are written in the order given.
pub fn encode(request: &WriteRequest) -> Result<Vec<u8>, EncodeError> {
    validate(request).map_err(EncodeError::Invalid)?;

    // Serialize request
    let bytes = request.encode_to_vec();

    // Compress request body
    let mut encoder = snap::raw::Encoder::new();
    encoder.compress_vec(&bytes).map_err(EncodeError::Compress)
}

/// Decompress and deserialize a write request
pub fn decode(body: &[u8]) -> Result<WriteRequest, EncodeError> {
    let mut decoder = snap::raw::Decoder::new();
    let bytes = decoder.decompress_vec(body).map_err(EncodeError::Decompress)?;
    Ok(WriteRequest::decode(bytes.as_slice())?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::remote_write::proto::{Label, Sample, TimeSeries};

    fn series(name: &str, labels: &[(&str, &str)], value: f64) -> TimeSeries {
        let mut out = vec![Label::new("__name__", name)];
        out.extend(labels.iter().map(|(k, v)| Label::new(*k, *v)));
        TimeSeries {
            labels: out,
            samples: vec![Sample {
                value,
                timestamp: 1_600_000_000_000,
            }],
        }
    }

    #[test]
    fn round_trips_in_order() {
        let request = WriteRequest {
            timeseries: (0..50)
                .map(|i| {
                    let shard = i.to_string();
                    series(
                        &format!("metric_{}", 49 - i),
                        &[("zone", "b"), ("shard", shard.as_str())],
                        i as f64 * 0.5,
                    )
                })
                .collect(),
        };

        let body = encode(&request).unwrap();
        let decoded = decode(&body).unwrap();
        assert_eq!(decoded, request);

        // Labels keep their insertion order; they are not sorted
        assert_eq!(decoded.timeseries[3].labels[1].name, "zone");
        assert_eq!(decoded.timeseries[3].labels[2].value, "3");
        assert_eq!(decoded.timeseries[0].metric_name(), Some("metric_49"));
    }

    #[test]
    fn output_is_snappy_compressed() {
        let request = WriteRequest {
            timeseries: vec![series("demo_gauge", &[], 23.5)],
        };
        let body = encode(&request).unwrap();

        let raw = request.encode_to_vec();
        assert_eq!(snap::raw::decompress_len(&body).unwrap(), raw.len());
        assert_eq!(snap::raw::Decoder::new().decompress_vec(&body).unwrap(), raw);

        // Encoding is deterministic
        assert_eq!(encode(&request).unwrap(), body);
    }

    #[test]
    fn encodes_an_empty_request() {
        let body = encode(&WriteRequest::default()).unwrap();
        assert!(decode(&body).unwrap().timeseries.is_empty());
    }

    #[test]
    fn rejects_series_without_labels_or_samples() {
        let no_labels = WriteRequest {
            timeseries: vec![
                series("ok", &[], 1.0),
                TimeSeries {
                    labels: vec![],
                    samples: vec![Sample {
                        value: 1.0,
                        timestamp: 0,
                    }],
                },
            ],
        };
        assert!(matches!(
            encode(&no_labels),
            Err(EncodeError::Invalid(ValidationError::NoLabels { index: 1 }))
        ));

        let mut no_samples = series("empty", &[], 1.0);
        no_samples.samples.clear();
        assert_eq!(
            validate(&WriteRequest {
                timeseries: vec![no_samples],
            }),
            Err(ValidationError::NoSamples {
                index: 0,
                name: "empty".into(),
            })
        );
    }

    #[test]
    fn rejects_malformed_label_sets() {
        let check = |series: TimeSeries| {
            validate(&WriteRequest {
                timeseries: vec![series],
            })
        };

        let mut unnamed = series("x", &[("a", "1")], 1.0);
        unnamed.labels.remove(0);
        assert_eq!(
            check(unnamed),
            Err(ValidationError::NameCount { index: 0, count: 0 })
        );

        let twice_named = series("x", &[("__name__", "y")], 1.0);
        assert_eq!(
            check(twice_named),
            Err(ValidationError::NameCount { index: 0, count: 2 })
        );

        assert_eq!(
            check(series("", &[], 1.0)),
            Err(ValidationError::EmptyName { index: 0 })
        );
        assert_eq!(
            check(series("x", &[("", "1")], 1.0)),
            Err(ValidationError::EmptyLabelName { index: 0 })
        );
        assert_eq!(
            check(series("x", &[("a", "1"), ("a", "2")], 1.0)),
            Err(ValidationError::DuplicateLabel {
                index: 0,
                name: "a".into(),
            })
        );
    }

    #[test]
    fn rejects_garbage_bodies() {
        assert!(matches!(
            decode(b"definitely not snappy"),
            Err(EncodeError::Decompress(_))
        ));
    }
}
