//! Exposition text parsing
//!
//! Turns the line-oriented `# HELP` / `# TYPE` / sample format into a
//! [`Snapshot`]. Histograms and summaries are expanded into one sample per
//! bucket (or quantile) followed by their `sum` and `count` samples, grouped
//! by label set in first-seen order.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::iter::Peekable;
use std::str::Chars;

use super::model::{MeasureKind, MetricFamily, MetricKind, MetricSample, Snapshot};

/// Structural problems that make a payload unusable
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: invalid metric name")]
    InvalidName { line: usize },
    #[error("line {line}: unterminated label block")]
    UnterminatedLabels { line: usize },
    #[error("line {line}: malformed label set: {reason}")]
    MalformedLabels { line: usize, reason: String },
    #[error("line {line}: missing value")]
    MissingValue { line: usize },
    #[error("line {line}: invalid value {value:?}")]
    InvalidValue { line: usize, value: String },
    #[error("line {line}: {metric} sample has no {label} label")]
    MissingLabel {
        line: usize,
        metric: String,
        label: &'static str,
    },
    #[error("invalid JSON snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a scraped payload
///
/// A payload that decodes as a JSON object is treated as an already-structured
/// snapshot; anything else is parsed as exposition text stamped with the
/// current time.
pub fn parse_payload(raw: &str) -> Result<Snapshot, ParseError> {
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(raw)
    {
        return Ok(serde_json::from_value(value)?);
    }

    parse_text(raw, Utc::now())
}

/// Parse exposition text, stamping the snapshot with `collection_time`
pub fn parse_text(text: &str, collection_time: DateTime<Utc>) -> Result<Snapshot, ParseError> {
    let mut builders: HashMap<String, FamilyBuilder> = HashMap::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            apply_comment(comment, &mut builders);
            continue;
        }

        let sample = parse_sample_line(line, line_no)?;
        let (family, part) = classify(&sample.name, &builders);
        builders
            .entry(family.clone())
            .or_default()
            .push(&family, part, sample, line_no)?;
    }

    let mut snapshot = Snapshot::new(collection_time);
    for (name, builder) in builders {
        if let Some(family) = builder.finish(&name) {
            snapshot.families.insert(name, family);
        }
    }

    Ok(snapshot)
}

/// Render a float the way stored values are compared and displayed
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{:.6}", value)
    }
}

/// Render an observation count as an integer
pub fn format_count(value: f64) -> String {
    if value.is_finite() && value > 0.0 {
        format!("{}", value as u64)
    } else {
        "0".to_string()
    }
}

fn apply_comment(comment: &str, builders: &mut HashMap<String, FamilyBuilder>) {
    let comment = comment.trim_start();
    let (keyword, rest) = match comment.split_once(char::is_whitespace) {
        Some(split) => split,
        None => return,
    };
    let rest = rest.trim_start();
    let (name, tail) = match rest.split_once(char::is_whitespace) {
        Some((name, tail)) => (name, tail.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return;
    }

    match keyword {
        "HELP" => {
            builders.entry(name.to_string()).or_default().help = unescape_help(tail);
        }
        "TYPE" => {
            builders.entry(name.to_string()).or_default().kind = MetricKind::from_type_name(tail);
        }
        _ => {}
    }
}

fn unescape_help(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Which part of a family a sample line contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Plain,
    Bucket,
    Quantile,
    Sum,
    Count,
}

fn classify(name: &str, builders: &HashMap<String, FamilyBuilder>) -> (String, Part) {
    let kind_of = |family: &str| builders.get(family).map(|b| b.kind);

    if let Some(base) = name.strip_suffix("_bucket") {
        if kind_of(base) == Some(MetricKind::Histogram) {
            return (base.to_string(), Part::Bucket);
        }
    }
    if let Some(base) = name.strip_suffix("_sum") {
        if kind_of(base).is_some_and(|k| k.is_composite()) {
            return (base.to_string(), Part::Sum);
        }
    }
    if let Some(base) = name.strip_suffix("_count") {
        if kind_of(base).is_some_and(|k| k.is_composite()) {
            return (base.to_string(), Part::Count);
        }
    }
    if kind_of(name) == Some(MetricKind::Summary) {
        return (name.to_string(), Part::Quantile);
    }

    (name.to_string(), Part::Plain)
}

#[derive(Debug)]
struct RawSample {
    name: String,
    labels: BTreeMap<String, String>,
    value: f64,
}

/// Bucket or quantile series sharing one label set
#[derive(Debug)]
struct CompositeSeries {
    labels: BTreeMap<String, String>,
    parts: Vec<MetricSample>,
    sum: Option<f64>,
    count: Option<f64>,
}

#[derive(Debug)]
struct FamilyBuilder {
    help: String,
    kind: MetricKind,
    samples: Vec<MetricSample>,
    series: Vec<CompositeSeries>,
}

impl Default for FamilyBuilder {
    fn default() -> Self {
        Self {
            help: String::new(),
            kind: MetricKind::Unhandled,
            samples: Vec::new(),
            series: Vec::new(),
        }
    }
}

impl FamilyBuilder {
    fn push(
        &mut self,
        family: &str,
        part: Part,
        sample: RawSample,
        line: usize,
    ) -> Result<(), ParseError> {
        match part {
            Part::Plain => {
                let measure_kind = match self.kind {
                    MetricKind::Counter => MeasureKind::Total,
                    MetricKind::Gauge => MeasureKind::CurrentValue,
                    _ => MeasureKind::Unhandled,
                };
                self.samples.push(MetricSample {
                    label_set: sample.labels,
                    value: format_float(sample.value),
                    measure_kind,
                });
            }
            Part::Bucket | Part::Quantile => {
                let label = if part == Part::Bucket { "le" } else { "quantile" };
                let mut labels = sample.labels;
                let bound = labels
                    .remove(label)
                    .ok_or_else(|| ParseError::MissingLabel {
                        line,
                        metric: family.to_string(),
                        label,
                    })?;
                let bound = parse_float(&bound).ok_or(ParseError::InvalidValue {
                    line,
                    value: bound,
                })?;

                let mut part_labels = labels.clone();
                part_labels.insert(label.to_string(), format_float(bound));
                let part_sample = if part == Part::Bucket {
                    MetricSample {
                        label_set: part_labels,
                        value: format_count(sample.value),
                        measure_kind: MeasureKind::CumulativeCount,
                    }
                } else {
                    MetricSample {
                        label_set: part_labels,
                        value: format_float(sample.value),
                        measure_kind: MeasureKind::Quantile,
                    }
                };
                self.series_for(labels).parts.push(part_sample);
            }
            Part::Sum => self.series_for(sample.labels).sum = Some(sample.value),
            Part::Count => self.series_for(sample.labels).count = Some(sample.value),
        }
        Ok(())
    }

    fn series_for(&mut self, labels: BTreeMap<String, String>) -> &mut CompositeSeries {
        let idx = match self.series.iter().position(|s| s.labels == labels) {
            Some(idx) => idx,
            None => {
                self.series.push(CompositeSeries {
                    labels,
                    parts: Vec::new(),
                    sum: None,
                    count: None,
                });
                self.series.len() - 1
            }
        };
        &mut self.series[idx]
    }

    fn finish(self, name: &str) -> Option<MetricFamily> {
        let mut samples = self.samples;
        for series in self.series {
            samples.extend(series.parts);
            samples.push(MetricSample {
                label_set: series.labels.clone(),
                value: format_float(series.sum.unwrap_or(0.0)),
                measure_kind: MeasureKind::Sum,
            });
            samples.push(MetricSample {
                label_set: series.labels,
                value: format_count(series.count.unwrap_or(0.0)),
                measure_kind: MeasureKind::Count,
            });
        }

        if samples.is_empty() {
            return None;
        }

        Some(MetricFamily {
            name: name.to_string(),
            help: self.help,
            kind: self.kind,
            samples,
        })
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn parse_float(token: &str) -> Option<f64> {
    match token {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => token.parse::<f64>().ok(),
    }
}

fn parse_sample_line(line: &str, line_no: usize) -> Result<RawSample, ParseError> {
    let name_end = line
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ParseError::InvalidName { line: line_no });
    }

    let mut chars = line[name_end..].chars().peekable();
    let labels = if chars.peek() == Some(&'{') {
        chars.next();
        parse_labels(&mut chars, line_no)?
    } else {
        BTreeMap::new()
    };

    let rest: String = chars.collect();
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Err(ParseError::InvalidName { line: line_no });
    }

    let mut tokens = rest.split_whitespace();
    let value_token = tokens.next().ok_or(ParseError::MissingValue { line: line_no })?;
    let value = parse_float(value_token).ok_or_else(|| ParseError::InvalidValue {
        line: line_no,
        value: value_token.to_string(),
    })?;

    // An optional trailing timestamp is accepted and ignored
    if let Some(timestamp) = tokens.next() {
        if timestamp.parse::<i64>().is_err() || tokens.next().is_some() {
            return Err(ParseError::InvalidValue {
                line: line_no,
                value: rest.trim().to_string(),
            });
        }
    }

    Ok(RawSample {
        name: name.to_string(),
        labels,
        value,
    })
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn parse_labels(
    chars: &mut Peekable<Chars<'_>>,
    line: usize,
) -> Result<BTreeMap<String, String>, ParseError> {
    let mut labels = BTreeMap::new();

    loop {
        skip_whitespace(chars);
        match chars.peek() {
            None => return Err(ParseError::UnterminatedLabels { line }),
            Some('}') => {
                chars.next();
                return Ok(labels);
            }
            Some(_) => {}
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                key.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if key.is_empty() {
            return match chars.peek() {
                None => Err(ParseError::UnterminatedLabels { line }),
                Some(c) => Err(ParseError::MalformedLabels {
                    line,
                    reason: format!("unexpected character {:?}", c),
                }),
            };
        }

        skip_whitespace(chars);
        match chars.next() {
            Some('=') => {}
            None => return Err(ParseError::UnterminatedLabels { line }),
            Some(c) => {
                return Err(ParseError::MalformedLabels {
                    line,
                    reason: format!("expected '=' after {}, found {:?}", key, c),
                })
            }
        }

        skip_whitespace(chars);
        match chars.next() {
            Some('"') => {}
            None => return Err(ParseError::UnterminatedLabels { line }),
            Some(c) => {
                return Err(ParseError::MalformedLabels {
                    line,
                    reason: format!("expected quoted value for {}, found {:?}", key, c),
                })
            }
        }

        let mut value = String::new();
        loop {
            match chars.next() {
                None => return Err(ParseError::UnterminatedLabels { line }),
                Some('"') => break,
                Some('\\') => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(ParseError::UnterminatedLabels { line }),
                },
                Some(c) => value.push(c),
            }
        }

        // Duplicate keys are not expected; the last occurrence wins
        labels.insert(key, value);

        skip_whitespace(chars);
        match chars.next() {
            Some(',') => continue,
            Some('}') => return Ok(labels),
            None => return Err(ParseError::UnterminatedLabels { line }),
            Some(c) => {
                return Err(ParseError::MalformedLabels {
                    line,
                    reason: format!("expected ',' or '}}', found {:?}", c),
                })
            }
        }
    }
}
