use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AnalysisError;

/// A single observation from the metrics feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Samples for one metric, ordered by timestamp ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    samples: Vec<Sample>,
}

impl Series {
    /// Builds a series, sorting the samples by timestamp. The sort is stable so
    /// samples sharing a timestamp keep their feed order.
    pub fn new(mut samples: Vec<Sample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    /// Keeps only the newest `max_len` samples.
    pub fn truncate_front(&mut self, max_len: usize) {
        if self.samples.len() > max_len {
            let excess = self.samples.len() - max_len;
            self.samples.drain(..excess);
        }
    }
}

impl FromIterator<Sample> for Series {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Disk,
    Network,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Cpu, MetricKind::Disk, MetricKind::Network];

    /// Name the metrics provider uses for this kind.
    pub fn provider_name(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Disk => "disk",
            MetricKind::Network => "network",
        }
    }

    pub fn selectors(&self) -> &'static [MetricSelector] {
        use MetricSelector::*;
        match self {
            MetricKind::Cpu => &[CpuLoad],
            MetricKind::Disk => &[DiskReadIops, DiskWriteIops, DiskReadBandwidth, DiskWriteBandwidth],
            MetricKind::Network => &[NetworkInPps, NetworkOutPps, NetworkInBandwidth, NetworkOutBandwidth],
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Cpu => write!(f, "CPU"),
            MetricKind::Disk => write!(f, "Disk"),
            MetricKind::Network => write!(f, "Network"),
        }
    }
}

/// One named numeric sub-series of a metric kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSelector {
    CpuLoad,
    DiskReadIops,
    DiskWriteIops,
    DiskReadBandwidth,
    DiskWriteBandwidth,
    NetworkInPps,
    NetworkOutPps,
    NetworkInBandwidth,
    NetworkOutBandwidth,
}

impl MetricSelector {
    pub fn kind(&self) -> MetricKind {
        use MetricSelector::*;
        match self {
            CpuLoad => MetricKind::Cpu,
            DiskReadIops | DiskWriteIops | DiskReadBandwidth | DiskWriteBandwidth => MetricKind::Disk,
            NetworkInPps | NetworkOutPps | NetworkInBandwidth | NetworkOutBandwidth => {
                MetricKind::Network
            }
        }
    }

    /// Time series key in the provider's metrics response.
    pub fn provider_key(&self) -> &'static str {
        use MetricSelector::*;
        match self {
            CpuLoad => "cpu",
            DiskReadIops => "disk.0.iops.read",
            DiskWriteIops => "disk.0.iops.write",
            DiskReadBandwidth => "disk.0.bandwidth.read",
            DiskWriteBandwidth => "disk.0.bandwidth.write",
            NetworkInPps => "network.0.pps.in",
            NetworkOutPps => "network.0.pps.out",
            NetworkInBandwidth => "network.0.bandwidth.in",
            NetworkOutBandwidth => "network.0.bandwidth.out",
        }
    }

    pub fn label(&self) -> &'static str {
        use MetricSelector::*;
        match self {
            CpuLoad => "CPU load",
            DiskReadIops => "disk read IOPS",
            DiskWriteIops => "disk write IOPS",
            DiskReadBandwidth => "disk read bandwidth",
            DiskWriteBandwidth => "disk write bandwidth",
            NetworkInPps => "network in packets",
            NetworkOutPps => "network out packets",
            NetworkInBandwidth => "network in bandwidth",
            NetworkOutBandwidth => "network out bandwidth",
        }
    }

    /// Short noun for stats rows, e.g. `Load` in `_Load (avg)_`.
    pub fn noun(&self) -> &'static str {
        use MetricSelector::*;
        match self {
            CpuLoad => "Load",
            DiskReadIops | DiskWriteIops => "IOPS",
            NetworkInPps | NetworkOutPps => "Packets",
            DiskReadBandwidth | DiskWriteBandwidth | NetworkInBandwidth | NetworkOutBandwidth => {
                "Bandwidth"
            }
        }
    }

    pub fn unit(&self) -> &'static str {
        use MetricSelector::*;
        match self {
            CpuLoad => "%",
            DiskReadIops | DiskWriteIops => " iops",
            NetworkInPps | NetworkOutPps => " pps",
            DiskReadBandwidth | DiskWriteBandwidth | NetworkInBandwidth | NetworkOutBandwidth => {
                " B/s"
            }
        }
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything fetched for one metric kind in one pass. Each variant carries
/// its fixed set of sub-series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricSnapshot {
    Cpu {
        load: Series,
    },
    Disk {
        read_iops: Series,
        write_iops: Series,
        read_bandwidth: Series,
        write_bandwidth: Series,
    },
    Network {
        in_pps: Series,
        out_pps: Series,
        in_bandwidth: Series,
        out_bandwidth: Series,
    },
}

impl MetricSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSnapshot::Cpu { .. } => MetricKind::Cpu,
            MetricSnapshot::Disk { .. } => MetricKind::Disk,
            MetricSnapshot::Network { .. } => MetricKind::Network,
        }
    }

    /// Returns the sub-series for `selector`, or `None` when the selector
    /// belongs to a different metric kind.
    pub fn series(&self, selector: MetricSelector) -> Option<&Series> {
        use MetricSelector::*;
        match (self, selector) {
            (MetricSnapshot::Cpu { load }, CpuLoad) => Some(load),
            (MetricSnapshot::Disk { read_iops, .. }, DiskReadIops) => Some(read_iops),
            (MetricSnapshot::Disk { write_iops, .. }, DiskWriteIops) => Some(write_iops),
            (MetricSnapshot::Disk { read_bandwidth, .. }, DiskReadBandwidth) => Some(read_bandwidth),
            (MetricSnapshot::Disk { write_bandwidth, .. }, DiskWriteBandwidth) => Some(write_bandwidth),
            (MetricSnapshot::Network { in_pps, .. }, NetworkInPps) => Some(in_pps),
            (MetricSnapshot::Network { out_pps, .. }, NetworkOutPps) => Some(out_pps),
            (MetricSnapshot::Network { in_bandwidth, .. }, NetworkInBandwidth) => Some(in_bandwidth),
            (MetricSnapshot::Network { out_bandwidth, .. }, NetworkOutBandwidth) => Some(out_bandwidth),
            _ => None,
        }
    }

    /// Iterates `(selector, series)` pairs in the kind's fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricSelector, &Series)> + '_ {
        self.kind()
            .selectors()
            .iter()
            .filter_map(move |sel| self.series(*sel).map(|s| (*sel, s)))
    }

    /// Assembles a snapshot for `kind`, asking `lookup` for each sub-series.
    pub fn build<E, F>(kind: MetricKind, mut lookup: F) -> Result<Self, E>
    where
        F: FnMut(MetricSelector) -> Result<Series, E>,
    {
        use MetricSelector::*;
        Ok(match kind {
            MetricKind::Cpu => MetricSnapshot::Cpu { load: lookup(CpuLoad)? },
            MetricKind::Disk => MetricSnapshot::Disk {
                read_iops: lookup(DiskReadIops)?,
                write_iops: lookup(DiskWriteIops)?,
                read_bandwidth: lookup(DiskReadBandwidth)?,
                write_bandwidth: lookup(DiskWriteBandwidth)?,
            },
            MetricKind::Network => MetricSnapshot::Network {
                in_pps: lookup(NetworkInPps)?,
                out_pps: lookup(NetworkOutPps)?,
                in_bandwidth: lookup(NetworkInBandwidth)?,
                out_bandwidth: lookup(NetworkOutBandwidth)?,
            },
        })
    }
}

/// Descriptive statistics over a whole series, used for on-demand snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub count: usize,
    pub current: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample (n-1) standard deviation; `None` for a single sample.
    pub std_dev: Option<f64>,
}

impl SeriesSummary {
    pub fn from_series(series: &Series) -> Result<Self, AnalysisError> {
        let current = series
            .latest()
            .map(|s| s.value)
            .ok_or(AnalysisError::InsufficientData { required: 1, actual: 0 })?;

        let count = series.len();
        let n = count as f64;
        let mean = series.values().sum::<f64>() / n;
        let (min, max) = series
            .values()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let std_dev = (count > 1).then(|| {
            (series.values().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        });

        Ok(Self { count, current, mean, min, max, std_dev })
    }

    /// Chat-formatted stats block, e.g. for a `/stats` reply.
    pub fn render(&self, selector: MetricSelector) -> String {
        let unit = selector.unit();
        let noun = selector.noun();
        let std = self
            .std_dev
            .map(|s| format!("{:.2}{}", s, unit))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "*{} stats:*\n _Data points_: {}\n _{noun} (act)_: {:.2}{unit}\n _{noun} (avg)_: {:.2}{unit}\n _{noun} (min)_: {:.2}{unit}\n _{noun} (max)_: {:.2}{unit}\n _{noun} (std)_: {}",
            capitalize(selector.label()),
            self.count,
            self.current,
            self.mean,
            self.min,
            self.max,
            std,
        )
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
