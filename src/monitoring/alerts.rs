use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::errors::AlertError;
use crate::monitoring::anomaly_detection::{Analysis, AnomalyLabel};
use crate::monitoring::metrics::MetricSelector;

/// Everything a renderer needs to draw the chart and caption for one
/// flagged sub-series.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub selector: MetricSelector,
    pub label: AnomalyLabel,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub z_score: Option<f64>,
    pub analysis: Analysis,
}

impl Alert {
    /// Builds an alert when the latest point of `analysis` is actionable.
    pub fn from_analysis(selector: MetricSelector, analysis: Analysis) -> Option<Self> {
        let latest = *analysis.latest()?;
        let label = latest.label()?;
        Some(Self {
            selector,
            label,
            timestamp: latest.timestamp,
            value: latest.value,
            z_score: latest.z_score,
            analysis,
        })
    }

    pub fn caption(&self) -> String {
        let z = self
            .z_score
            .map(|z| format!(" (z = {:.2})", z))
            .unwrap_or_default();
        format!(
            "Current {} {:.4}{} flagged as {}{}",
            self.selector.label(),
            self.value,
            self.selector.unit(),
            self.label,
            z
        )
    }
}

/// Delivers alerts to wherever people will see them.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the log. Used when no chat channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        warn!(
            metric = %alert.selector,
            label = %alert.label,
            value = alert.value,
            z_score = ?alert.z_score,
            timestamp = %alert.timestamp,
            "{}",
            alert.caption()
        );
        Ok(())
    }
}
