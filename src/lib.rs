pub mod cli;
pub mod config;
pub mod errors;
pub mod monitoring;

// Re-exports
pub use errors::{AnalysisError, MonitorError, MonitorResult};
pub use monitoring::{analyze, Analysis, AnalyzedPoint, Analyzer, AnalyzerConfig, AnomalyLabel};
pub use monitoring::{Monitor, ShutdownToken};
