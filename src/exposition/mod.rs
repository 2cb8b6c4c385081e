//! Exposition format handling
//!
//! Parses scraped metrics text into the structured [`Snapshot`] form that the
//! store persists and the HTTP API returns.

pub mod model;
pub mod parser;

pub use model::{collection_time_key, MeasureKind, MetricFamily, MetricKind, MetricSample, Snapshot};
pub use parser::{parse_payload, parse_text, ParseError};
