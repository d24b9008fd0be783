pub mod alerts;
pub mod anomaly_detection;
pub mod metrics;
pub mod monitor;
pub mod rolling;
pub mod source;

pub use alerts::{Alert, AlertSink, LogSink};
pub use anomaly_detection::{analyze, analyze_metric, Analysis, AnalyzedPoint, Analyzer, AnalyzerConfig, AnomalyLabel};
pub use metrics::{MetricKind, MetricSelector, MetricSnapshot, Sample, Series, SeriesSummary};
pub use monitor::{shutdown_channel, CycleReport, Monitor, MonitorSettings, ShutdownToken, ShutdownTrigger};
pub use source::{FetchWindow, JsonFileSource, MetricsSource};
