use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use crate::errors::SourceError;
use crate::monitoring::metrics::{MetricKind, MetricSnapshot, Sample, Series};

/// Time range and sampling step requested from a metrics source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step_seconds: u64,
}

/// Longest lookback a window may span (one year).
pub const MAX_LOOKBACK_SECONDS: u64 = 365 * 24 * 60 * 60;

impl FetchWindow {
    /// Lookback window ending at `end`, with a step that yields at most
    /// `max_values` points (never below one second).
    pub fn lookback(end: DateTime<Utc>, lookback_seconds: u64, max_values: usize) -> Result<Self, SourceError> {
        let invalid = SourceError::InvalidWindow { lookback_seconds, max: MAX_LOOKBACK_SECONDS };
        if lookback_seconds == 0 || lookback_seconds > MAX_LOOKBACK_SECONDS {
            return Err(invalid);
        }
        let start = end
            .checked_sub_signed(Duration::seconds(lookback_seconds as i64))
            .ok_or(invalid)?;
        let step_seconds = (lookback_seconds / max_values.max(1) as u64).max(1);
        Ok(Self { start, end, step_seconds })
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

/// Supplies metric snapshots. Fetches may fail; callers retry on their own
/// schedule.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, kind: MetricKind, window: FetchWindow) -> Result<MetricSnapshot, SourceError>;
}

/// Provider-shaped metrics payload:
/// `{"time_series": {"cpu": {"values": [[1700000000, "12.5"], ...]}}}`.
#[derive(Debug, Deserialize)]
pub struct MetricsPayload {
    pub time_series: HashMap<String, TimeSeriesValues>,
}

#[derive(Debug, Deserialize)]
pub struct TimeSeriesValues {
    pub values: Vec<(f64, RawValue)>,
}

/// The provider encodes values as strings; plain numbers are accepted as well.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    fn parse(&self) -> Option<f64> {
        match self {
            RawValue::Number(v) => Some(*v),
            RawValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl MetricsPayload {
    /// Converts the payload into a typed snapshot for `kind`.
    pub fn into_snapshot(mut self, kind: MetricKind) -> Result<MetricSnapshot, SourceError> {
        MetricSnapshot::build(kind, |selector| -> Result<Series, SourceError> {
            let key = selector.provider_key();
            let raw = self
                .time_series
                .remove(key)
                .ok_or(SourceError::MissingSeries { kind, key })?;
            raw.values
                .iter()
                .map(|(ts, value)| -> Result<Sample, SourceError> {
                    let timestamp = Utc
                        .timestamp_opt(*ts as i64, 0)
                        .single()
                        .ok_or_else(|| SourceError::Malformed {
                            kind,
                            message: format!("timestamp {} out of range in '{}'", ts, key),
                        })?;
                    let value = value.parse().ok_or_else(|| SourceError::Malformed {
                        kind,
                        message: format!("non-numeric value {:?} in '{}'", value, key),
                    })?;
                    Ok(Sample::new(timestamp, value))
                })
                .collect::<Result<Vec<_>, SourceError>>()
                .map(Series::new)
        })
    }
}

/// Reads provider-shaped dumps from `<dir>/<kind>.json`.
///
/// Dumps are static, so the requested window is applied relative to the
/// newest sample in the file rather than to wall-clock time. Samples closer
/// than `step_seconds` apart are thinned out, walking back from the newest.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: MetricKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.provider_name()))
    }
}

#[async_trait]
impl MetricsSource for JsonFileSource {
    async fn fetch(&self, kind: MetricKind, window: FetchWindow) -> Result<MetricSnapshot, SourceError> {
        let path = self.path_for(kind);
        debug!(path = %path.display(), %kind, "Reading metrics dump");

        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SourceError::Io { kind, source })?;
        let payload: MetricsPayload = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Malformed { kind, message: e.to_string() })?;

        let snapshot = payload.into_snapshot(kind)?;
        let span = window.span();
        let step = Duration::seconds(window.step_seconds.min(MAX_LOOKBACK_SECONDS) as i64);
        MetricSnapshot::build(kind, |selector| -> Result<Series, SourceError> {
            let series = snapshot
                .series(selector)
                .ok_or(SourceError::MissingSeries { kind, key: selector.provider_key() })?;
            let Some(newest) = series.latest().map(|s| s.timestamp) else {
                return Ok(Series::default());
            };
            let since = newest.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);
            Ok(downsample(series, since, step))
        })
    }
}

/// Samples from `since` onwards, at least `step` apart. The newest sample is
/// always kept.
fn downsample(series: &Series, since: DateTime<Utc>, step: Duration) -> Series {
    let mut kept: Vec<Sample> = Vec::new();
    for sample in series.samples().iter().rev() {
        if sample.timestamp < since {
            break;
        }
        match kept.last() {
            Some(last) if last.timestamp - sample.timestamp < step => {}
            _ => kept.push(*sample),
        }
    }
    kept.into_iter().collect()
}
