// Monitor loop tests against in-memory sources and sinks.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use usage_monitor::errors::{AlertError, SourceError};
use usage_monitor::monitoring::monitor::shutdown_channel;
use usage_monitor::monitoring::source::MAX_LOOKBACK_SECONDS;
use usage_monitor::monitoring::{
    Alert, AlertSink, Analyzer, AnalyzerConfig, AnomalyLabel, FetchWindow, MetricKind, MetricSelector,
    MetricSnapshot, MetricsSource, Monitor, MonitorSettings, Sample, Series,
};

fn series_of(values: &[f64]) -> Series {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Sample::new(start + ChronoDuration::seconds(10 * i as i64), *v))
        .collect()
}

fn spike_series() -> Series {
    let mut values = vec![20.0; 12];
    values.push(99.0);
    series_of(&values)
}

#[derive(Default)]
struct StaticSource {
    snapshots: HashMap<MetricKind, MetricSnapshot>,
    fetches: AtomicUsize,
}

impl StaticSource {
    fn with(mut self, snapshot: MetricSnapshot) -> Self {
        self.snapshots.insert(snapshot.kind(), snapshot);
        self
    }
}

#[async_trait]
impl MetricsSource for StaticSource {
    async fn fetch(&self, kind: MetricKind, _window: FetchWindow) -> Result<MetricSnapshot, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .get(&kind)
            .cloned()
            .ok_or_else(|| SourceError::Unavailable(format!("no {} metrics", kind)))
    }
}

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
    fail: bool,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        if self.fail {
            return Err(AlertError::Delivery {
                selector: alert.selector,
                message: "chat unreachable".to_string(),
            });
        }
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}

fn monitor_with(source: Arc<StaticSource>, sink: Arc<RecordingSink>, metrics: Vec<MetricKind>) -> Monitor {
    let analyzer = Analyzer::new(AnalyzerConfig {
        window_size: 12,
        sustained_window: 5,
        ..AnalyzerConfig::default()
    })
    .unwrap();
    let settings = MonitorSettings {
        interval: Duration::from_millis(10),
        metrics,
        ..MonitorSettings::default()
    };
    Monitor::new(source, sink, analyzer, settings)
}

#[tokio::test]
async fn test_cycle_delivers_alert_for_latest_spike() {
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Cpu { load: spike_series() }));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor_with(source.clone(), sink.clone(), vec![MetricKind::Cpu]);

    let report = monitor.run_cycle(Utc::now()).await;

    assert_eq!(report.fetched, vec![MetricKind::Cpu]);
    assert_eq!(report.analyzed, 1);
    assert_eq!(report.alerts, vec![(MetricSelector::CpuLoad, AnomalyLabel::HighSpike)]);

    let alerts = sink.alerts.lock().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].value, 99.0);
    assert_eq!(alerts[0].analysis.len(), 13);
    assert!(alerts[0].caption().contains("flagged as high spike"));
}

#[tokio::test]
async fn test_fetch_failure_is_swallowed() {
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Cpu { load: spike_series() }));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor_with(source.clone(), sink.clone(), vec![MetricKind::Network, MetricKind::Cpu]);

    let report = monitor.run_cycle(Utc::now()).await;

    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.fetched, vec![MetricKind::Cpu]);
    assert_eq!(report.alerts.len(), 1);
}

#[tokio::test]
async fn test_short_series_are_skipped() {
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Cpu { load: series_of(&[5.0]) }));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor_with(source, sink.clone(), vec![MetricKind::Cpu]);

    let report = monitor.run_cycle(Utc::now()).await;

    assert_eq!(report.skipped, 1);
    assert_eq!(report.analyzed, 0);
    assert!(sink.alerts.lock().await.is_empty());
}

#[tokio::test]
async fn test_delivery_failure_is_counted() {
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Cpu { load: spike_series() }));
    let sink = Arc::new(RecordingSink { fail: true, ..RecordingSink::default() });
    let monitor = monitor_with(source, sink, vec![MetricKind::Cpu]);

    let report = monitor.run_cycle(Utc::now()).await;

    assert_eq!(report.delivery_failures, 1);
    assert!(report.alerts.is_empty());
}

#[tokio::test]
async fn test_only_flagged_sub_series_alert() {
    let flat = series_of(&[300.0; 13]);
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Network {
        in_pps: flat.clone(),
        out_pps: spike_series(),
        in_bandwidth: flat.clone(),
        out_bandwidth: flat,
    }));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor_with(source, sink, vec![MetricKind::Network]);

    let report = monitor.run_cycle(Utc::now()).await;

    assert_eq!(report.analyzed, 4);
    assert_eq!(report.alerts, vec![(MetricSelector::NetworkOutPps, AnomalyLabel::HighSpike)]);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Cpu { load: spike_series() }));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor_with(source.clone(), sink, vec![MetricKind::Cpu]);
    let (trigger, token) = shutdown_channel();

    let handle = tokio::spawn(async move { monitor.run(token).await });
    tokio::time::sleep(Duration::from_millis(60)).await;
    trigger.trigger();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor should exit after shutdown")
        .unwrap();
    assert!(source.fetches.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_already_cancelled_token_skips_cycles() {
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Cpu { load: spike_series() }));
    let monitor = monitor_with(source.clone(), Arc::new(RecordingSink::default()), vec![MetricKind::Cpu]);
    let (trigger, token) = shutdown_channel();
    trigger.trigger();
    assert!(token.is_cancelled());

    monitor.run(token).await;
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_snapshot_reports_summary_and_label() {
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Cpu { load: spike_series() }));
    let monitor = monitor_with(source, Arc::new(RecordingSink::default()), vec![MetricKind::Cpu]);

    let reports = monitor.snapshot(MetricKind::Cpu, Utc::now()).await.unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.selector, MetricSelector::CpuLoad);
    assert_eq!(report.summary.count, 13);
    assert_eq!(report.summary.current, 99.0);
    assert_eq!(report.summary.max, 99.0);
    assert_eq!(report.summary.min, 20.0);
    assert_eq!(report.label, Some(AnomalyLabel::HighSpike));
    assert!(monitor.snapshot(MetricKind::Disk, Utc::now()).await.is_err());
}

#[test]
fn test_lookback_window_step() {
    let end = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let window = FetchWindow::lookback(end, 500, 500).unwrap();
    assert_eq!(window.step_seconds, 1);
    assert_eq!(window.span(), ChronoDuration::seconds(500));
    assert_eq!(FetchWindow::lookback(end, 3600, 500).unwrap().step_seconds, 7);
    assert_eq!(FetchWindow::lookback(end, 10, 500).unwrap().step_seconds, 1);
}

#[test]
fn test_out_of_range_lookback_is_an_error() {
    let end = Utc::now();
    assert!(matches!(
        FetchWindow::lookback(end, 10_000_000_000_000, 500),
        Err(SourceError::InvalidWindow { lookback_seconds: 10_000_000_000_000, .. })
    ));
    assert!(FetchWindow::lookback(end, 0, 500).is_err());
    assert!(FetchWindow::lookback(end, MAX_LOOKBACK_SECONDS, 500).is_ok());
    assert!(FetchWindow::lookback(DateTime::<Utc>::MIN_UTC, 60, 500).is_err());
}

#[tokio::test]
async fn test_cycle_survives_out_of_range_lookback() {
    let source = Arc::new(StaticSource::default().with(MetricSnapshot::Cpu { load: spike_series() }));
    let sink = Arc::new(RecordingSink::default());
    let analyzer = Analyzer::new(AnalyzerConfig { window_size: 12, ..AnalyzerConfig::default() }).unwrap();
    let settings = MonitorSettings {
        lookback_seconds: u64::MAX,
        ..MonitorSettings::default()
    };
    let monitor = Monitor::new(source.clone(), sink.clone(), analyzer, settings);

    let report = monitor.run_cycle(Utc::now()).await;

    assert_eq!(report.fetch_failures, 1);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    assert!(sink.alerts.lock().await.is_empty());
    assert!(monitor.snapshot(MetricKind::Cpu, Utc::now()).await.is_err());
}
