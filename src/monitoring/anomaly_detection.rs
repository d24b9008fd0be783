use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

use crate::errors::AnalysisError;
use crate::monitoring::metrics::{MetricSelector, MetricSnapshot, Series};
use crate::monitoring::rolling::{rolling_mean_defined, rolling_stats};

/// Fewer samples than this and there is nothing to analyze.
pub const MIN_SAMPLES: usize = 2;

/// Window sizes and thresholds for one analysis pass. All five values have
/// been retuned repeatedly, so none of them are baked into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Trailing window W for the rolling mean and std-dev.
    pub window_size: usize,
    /// Trailing window S over |z| for the sustained rule.
    pub sustained_window: usize,
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub sustained_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            sustained_window: 20,
            high_threshold: 3.0,
            low_threshold: -2.0,
            sustained_threshold: 2.0,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.window_size < 2 {
            return Err(AnalysisError::InvalidConfig {
                name: "window_size",
                reason: format!("must be at least 2, got {}", self.window_size),
            });
        }
        if self.sustained_window < 1 {
            return Err(AnalysisError::InvalidConfig {
                name: "sustained_window",
                reason: "must be at least 1".to_string(),
            });
        }
        for (name, value) in [
            ("high_threshold", self.high_threshold),
            ("low_threshold", self.low_threshold),
            ("sustained_threshold", self.sustained_threshold),
        ] {
            if !value.is_finite() {
                return Err(AnalysisError::InvalidConfig {
                    name,
                    reason: format!("must be finite, got {}", value),
                });
            }
        }
        if self.low_threshold >= self.high_threshold {
            return Err(AnalysisError::InvalidConfig {
                name: "low_threshold",
                reason: format!(
                    "must be below high_threshold ({} >= {})",
                    self.low_threshold, self.high_threshold
                ),
            });
        }
        Ok(())
    }

    /// Largest z-score a single outlier can reach inside a window of W samples
    /// that includes the outlier itself: (W - 1) / sqrt(W).
    pub fn max_single_outlier_z(&self) -> f64 {
        let w = self.window_size as f64;
        (w - 1.0) / w.sqrt()
    }
}

/// Which rule flagged the latest point. Variants are declared in reporting
/// precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyLabel {
    HighSpike,
    LowDrop,
    SustainedDeviation,
}

impl fmt::Display for AnomalyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyLabel::HighSpike => write!(f, "high spike"),
            AnomalyLabel::LowDrop => write!(f, "low drop"),
            AnomalyLabel::SustainedDeviation => write!(f, "sustained deviation"),
        }
    }
}

/// A sample together with its trailing statistics and rule outcomes.
/// Statistics are `None` until the trailing windows fill up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub rolling_mean: Option<f64>,
    pub rolling_std: Option<f64>,
    pub z_score: Option<f64>,
    /// Trailing mean of |z| over the sustained window.
    pub sustained_score: Option<f64>,
    pub is_high_anomaly: bool,
    pub is_low_anomaly: bool,
    pub is_anomaly: bool,
    pub is_sustained_anomaly: bool,
}

impl AnalyzedPoint {
    /// True when any of the three rules fired on this point.
    pub fn is_actionable(&self) -> bool {
        self.is_high_anomaly || self.is_low_anomaly || self.is_sustained_anomaly
    }

    /// Single label to report, picked by precedence.
    pub fn label(&self) -> Option<AnomalyLabel> {
        if self.is_high_anomaly {
            Some(AnomalyLabel::HighSpike)
        } else if self.is_low_anomaly {
            Some(AnomalyLabel::LowDrop)
        } else if self.is_sustained_anomaly {
            Some(AnomalyLabel::SustainedDeviation)
        } else {
            None
        }
    }

    /// `mean ± k·std` band, for charting.
    pub fn band(&self, k: f64) -> Option<(f64, f64)> {
        let mean = self.rolling_mean?;
        let std = self.rolling_std?;
        Some((mean - k * std, mean + k * std))
    }

    /// True when the window was full but had no spread.
    pub fn is_degenerate(&self) -> bool {
        self.rolling_std == Some(0.0)
    }
}

/// The outcome of analyzing one series: one point per input sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub config: AnalyzerConfig,
    pub points: Vec<AnalyzedPoint>,
}

impl Analysis {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&AnalyzedPoint> {
        self.points.last()
    }

    /// Classification of the most recent point. Earlier anomalies are kept
    /// for charting but never retrigger.
    pub fn latest_label(&self) -> Option<AnomalyLabel> {
        self.latest().and_then(AnalyzedPoint::label)
    }

    pub fn high_anomalies(&self) -> impl Iterator<Item = &AnalyzedPoint> + '_ {
        self.points.iter().filter(|p| p.is_high_anomaly)
    }

    pub fn low_anomalies(&self) -> impl Iterator<Item = &AnalyzedPoint> + '_ {
        self.points.iter().filter(|p| p.is_low_anomaly)
    }

    pub fn sustained_anomalies(&self) -> impl Iterator<Item = &AnalyzedPoint> + '_ {
        self.points.iter().filter(|p| p.is_sustained_anomaly)
    }

    /// Number of full windows whose std-dev was zero.
    pub fn degenerate_windows(&self) -> usize {
        self.points.iter().filter(|p| p.is_degenerate()).count()
    }
}

/// Stateless anomaly engine. Cheap to copy and safe to share between tasks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalysisError> {
        config.validate()?;

        if config.max_single_outlier_z() <= config.high_threshold {
            warn!(
                window_size = config.window_size,
                high_threshold = config.high_threshold,
                max_z = config.max_single_outlier_z(),
                "High spike rule cannot fire on an isolated outlier at this window size"
            );
        }

        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze one series. Pure: the same series always yields the same points.
    pub fn analyze(&self, series: &Series) -> Result<Analysis, AnalysisError> {
        analyze(series, &self.config)
    }

    pub fn analyze_metric(
        &self,
        snapshot: &MetricSnapshot,
        selector: MetricSelector,
    ) -> Result<Analysis, AnalysisError> {
        analyze_metric(snapshot, selector, &self.config)
    }

    pub fn analyze_snapshot(
        &self,
        snapshot: &MetricSnapshot,
    ) -> HashMap<MetricSelector, Result<Analysis, AnalysisError>> {
        snapshot
            .iter()
            .map(|(selector, series)| (selector, self.analyze(series)))
            .collect()
    }
}

/// Runs the rolling statistics, z-score and classification passes over
/// `series`.
pub fn analyze(series: &Series, config: &AnalyzerConfig) -> Result<Analysis, AnalysisError> {
    config.validate()?;
    if series.len() < MIN_SAMPLES {
        return Err(AnalysisError::InsufficientData {
            required: MIN_SAMPLES,
            actual: series.len(),
        });
    }

    let values: Vec<f64> = series.values().collect();
    let stats = rolling_stats(&values, config.window_size);

    let z_scores: Vec<Option<f64>> = values
        .iter()
        .zip(&stats)
        .map(|(value, stats)| match stats {
            Some(s) if !s.is_degenerate() => Some((value - s.mean) / s.std_dev),
            _ => None,
        })
        // non-finite feed values poison their windows; treat those as undefined too
        .map(|z| z.filter(|z| z.is_finite()))
        .collect();

    let abs_z: Vec<Option<f64>> = z_scores.iter().map(|z| z.map(f64::abs)).collect();
    let sustained = rolling_mean_defined(&abs_z, config.sustained_window);

    let points = series
        .samples()
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let z = z_scores[i];
            let is_high_anomaly = matches!(z, Some(z) if z > config.high_threshold);
            let is_low_anomaly = matches!(z, Some(z) if z < config.low_threshold);
            let is_sustained_anomaly =
                matches!(sustained[i], Some(m) if m > config.sustained_threshold);

            AnalyzedPoint {
                timestamp: sample.timestamp,
                value: sample.value,
                rolling_mean: stats[i].map(|s| s.mean),
                rolling_std: stats[i].map(|s| s.std_dev),
                z_score: z,
                sustained_score: sustained[i],
                is_high_anomaly,
                is_low_anomaly,
                is_anomaly: is_high_anomaly || is_low_anomaly,
                is_sustained_anomaly,
            }
        })
        .collect();

    Ok(Analysis { config: *config, points })
}

/// Analyze one sub-series of a multi-dimensional metric.
pub fn analyze_metric(
    snapshot: &MetricSnapshot,
    selector: MetricSelector,
    config: &AnalyzerConfig,
) -> Result<Analysis, AnalysisError> {
    let series = snapshot
        .series(selector)
        .ok_or(AnalysisError::SelectorMismatch { selector, kind: snapshot.kind() })?;
    analyze(series, config)
}
