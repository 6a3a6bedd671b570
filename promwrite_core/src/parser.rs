use std::borrow::Cow;

use crate::remote_write::{new_series, proto::TimeSeries};
use crate::store::is_metric_name;

/// A single measurement scraped from a text exposition
#[derive(Clone, Debug, PartialEq)]
pub struct ScrapedSample<'a> {
    pub name: &'a str,
    pub labels: Vec<(&'a str, Cow<'a, str>)>,
    pub value: f64,
}

/// A lossy parser for Prometheus's text exposition format.
///
/// Only lines of the form `metric_name{label="value",...} value` (label block optional)
/// are kept, where `value` is a non-negative decimal without an exponent.
/// Negative values, exponents, `NaN`/`Inf` and trailing timestamps don't match and
/// the line is skipped, as is any other line that can't be parsed.
pub fn parse(input: &str) -> Vec<ScrapedSample> {
    let mut values = Vec::new();
    let mut continue_help = false;
    for line in input.lines() {
        if continue_help {
            continue_help = ends_with_line_break(line);
            continue;
        }

        let line = line.trim();

        // The line defines a metric's help text
        if line.starts_with("# HELP ") {
            continue_help = ends_with_line_break(line);
        }
        // The line is a comment (including `# TYPE`) or is empty
        else if line.starts_with('#') || line.is_empty() {
        }
        // The line contains data
        else if let Some(value) = parse_value(line) {
            values.push(value);
        }
    }
    values
}

/// Build one remote write series per scraped sample, all sharing the capture `timestamp`
pub fn to_timeseries(
    samples: Vec<ScrapedSample<'_>>,
    timestamp: i64,
    static_labels: &[(String, String)],
) -> Vec<TimeSeries> {
    samples
        .iter()
        .map(|sample| {
            let labels = sample.labels.iter().map(|(name, value)| (*name, &value[..]));
            new_series(sample.name, static_labels, labels, sample.value, timestamp)
        })
        .collect()
}

fn parse_value(line: &str) -> Option<ScrapedSample<'_>> {
    // Split `metric_name{labels} value` into parts
    let (metric_str, value_str) = if line.contains('}') {
        let mut reverse_parts = line.rsplitn(2, '}'); // use rsplit, because labels could contain escaped '}'
        let value_str = reverse_parts.next()?.trim();
        let metric_str = reverse_parts.next()?;
        (metric_str, value_str)
    } else {
        let mut line_parts = line.split_whitespace();
        let metric_str = line_parts.next()?;
        let value_str = line_parts.next()?;
        if line_parts.next().is_some() {
            return None;
        }
        (metric_str, value_str)
    };
    if !is_plain_decimal(value_str) {
        return None;
    }

    // Split `metric_name{label1="value1",label2="value2"}` into parts
    let (name, labels_str) = if line.contains('}') {
        let (name, labels_str) = metric_str.split_once('{')?;
        (name.trim(), Some(labels_str))
    } else {
        (metric_str, None)
    };
    if !is_metric_name(name) {
        return None;
    }

    let mut labels = Vec::new();
    let mut tail = labels_str.unwrap_or("").trim_start();
    while !tail.is_empty() {
        // Split the first label
        let (label, rest) = tail.split_once('=')?;
        let label = label.trim();
        if !is_scraped_label_name(label) {
            return None;
        }

        // Parse the label
        let rest = rest.trim_start();
        let (value, offset) = parse_label_value(rest)?;
        labels.push((label, value));

        // Advance to next label
        tail = rest[offset..].trim_start();
        match tail.strip_prefix(',') {
            Some(next) => tail = next.trim_start(),
            None if tail.is_empty() => break,
            None => return None,
        }
    }

    Some(ScrapedSample {
        name,
        labels,
        value: value_str.parse().ok()?,
    })
}

/// Parses a quoted label value.
///
/// Returns the unescaped value and the number of bytes consumed, including both quotes.
fn parse_label_value(input: &str) -> Option<(Cow<'_, str>, usize)> {
    let body = input.strip_prefix('"')?;
    if !body.contains('\\') {
        let end = body.find('"')?;
        return Some((body[..end].into(), end + 2));
    }

    let mut esc = String::new();
    let mut chars = body.char_indices();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, 'n')) => esc.push('\n'),
                Some((_, ch)) => esc.push(ch),
                None => return None,
            },
            '"' => return Some((esc.into(), i + 2)),
            _ => esc.push(ch),
        }
    }
    None
}

/// A trailing `\` continues the line, unless it is itself escaped (`\\`)
fn ends_with_line_break(line: &str) -> bool {
    line.bytes().rev().take_while(|b| *b == b'\\').count() % 2 == 1
}

/// Matches `[0-9]+(\.[0-9]*)?` or `\.[0-9]+`
fn is_plain_decimal(value: &str) -> bool {
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    match value.split_once('.') {
        Some((int, frac)) => digits(int) && digits(frac) && !(int.is_empty() && frac.is_empty()),
        None => !value.is_empty() && digits(value),
    }
}

/// Matches `[a-zA-Z_][a-zA-Z0-9_]*`; `__name__` is synthesized, so it can't be scraped
fn is_scraped_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => (),
        _ => return false,
    }
    name != crate::METRIC_NAME_LABEL && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
