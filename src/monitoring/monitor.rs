/*
* Usage Monitor Loop
* ------------------
* @project: usage-monitor
*
* The periodic half of the service. Every tick we pull a fresh lookback window
* for each configured metric kind, run every sub-series through the analyzer,
* and hand an alert to the sink when the newest point trips a rule.
*
* Things worth knowing before you touch this:
* -----------------------------------------
* 1. Nothing is cached between cycles. Each tick re-fetches the whole lookback
*    window, so a restart loses nothing.
* 2. Fetch failures are logged and swallowed. The next tick is the retry.
* 3. Shutdown is cooperative. The token is only checked between ticks, so a
*    cycle that already started always finishes (they are short anyway).
* 4. Only the latest point alerts. Older anomalies ride along in the analysis
*    for the chart but never page anyone twice.
*/

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::errors::{AnalysisError, MonitorError, MonitorResult, SourceError};
use crate::monitoring::alerts::{Alert, AlertSink};
use crate::monitoring::anomaly_detection::{AnalyzedPoint, Analyzer, AnomalyLabel};
use crate::monitoring::metrics::{MetricKind, MetricSelector, Series, SeriesSummary};
use crate::monitoring::source::{FetchWindow, MetricsSource};

/// Fires the shutdown. Dropping it without firing leaves the loop running.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

/// Observed by long-running loops between iterations.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    receiver: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the trigger fires.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                // trigger dropped, nobody can fire it any more
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownToken) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, ShutdownToken { receiver })
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub lookback_seconds: u64,
    pub max_values: usize,
    pub metrics: Vec<MetricKind>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            lookback_seconds: 500,
            max_values: 500,
            metrics: vec![MetricKind::Cpu],
        }
    }
}

/// What one monitoring cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub fetched: Vec<MetricKind>,
    pub fetch_failures: usize,
    pub analyzed: usize,
    pub skipped: usize,
    pub alerts: Vec<(MetricSelector, AnomalyLabel)>,
    pub delivery_failures: usize,
}

/// On-demand view of one sub-series.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesReport {
    pub selector: MetricSelector,
    pub summary: SeriesSummary,
    pub latest: Option<AnalyzedPoint>,
    pub label: Option<AnomalyLabel>,
}

pub struct Monitor {
    source: Arc<dyn MetricsSource>,
    sink: Arc<dyn AlertSink>,
    analyzer: Analyzer,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        sink: Arc<dyn AlertSink>,
        analyzer: Analyzer,
        settings: MonitorSettings,
    ) -> Self {
        info!(
            "Initializing monitor with {}s interval over {} metric kind(s)",
            settings.interval.as_secs(),
            settings.metrics.len()
        );
        Self { source, sink, analyzer, settings }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Runs cycles on the configured interval until `shutdown` fires.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        let mut timer = time::interval(self.settings.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !shutdown.is_cancelled() {
            tokio::select! {
                _ = timer.tick() => {
                    let report = self.run_cycle(Utc::now()).await;
                    debug!(
                        analyzed = report.analyzed,
                        alerts = report.alerts.len(),
                        fetch_failures = report.fetch_failures,
                        "Monitor cycle complete"
                    );
                }
                _ = shutdown.cancelled() => {}
            }
        }

        info!("Closing usage monitor");
    }

    /// One pass over every configured metric kind, with the window ending at
    /// `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        let window = match self.window(now) {
            Ok(window) => window,
            Err(e) => {
                MonitorError::from(e).log("build fetch window");
                report.fetch_failures = self.settings.metrics.len();
                return report;
            }
        };

        for kind in &self.settings.metrics {
            let snapshot = match self.source.fetch(*kind, window).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    MonitorError::from(e).log("fetch metrics");
                    report.fetch_failures += 1;
                    continue;
                }
            };
            report.fetched.push(*kind);

            for (selector, series) in snapshot.iter() {
                let series = self.bounded(series);
                let analysis = match self.analyzer.analyze(&series) {
                    Ok(analysis) => analysis,
                    Err(AnalysisError::InsufficientData { required, actual }) => {
                        debug!(metric = %selector, required, actual, "Not enough samples yet");
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(metric = %selector, error = %e, "Analysis failed");
                        report.skipped += 1;
                        continue;
                    }
                };
                report.analyzed += 1;
                log_current(selector, &series, analysis.latest());

                let Some(alert) = Alert::from_analysis(selector, analysis) else {
                    continue;
                };
                debug!(metric = %selector, label = %alert.label, "Delivering alert");
                match self.sink.deliver(&alert).await {
                    Ok(()) => report.alerts.push((selector, alert.label)),
                    Err(e) => {
                        error!(metric = %selector, error = %e, "Alert delivery failed");
                        report.delivery_failures += 1;
                    }
                }
            }
        }

        report
    }

    /// Fetches `kind` and reports summary stats plus the latest classification
    /// for each of its sub-series.
    pub async fn snapshot(&self, kind: MetricKind, now: DateTime<Utc>) -> MonitorResult<Vec<SeriesReport>> {
        let snapshot = self.source.fetch(kind, self.window(now)?).await?;

        let mut reports = Vec::new();
        for (selector, series) in snapshot.iter() {
            let series = self.bounded(series);
            let Ok(summary) = SeriesSummary::from_series(&series) else {
                debug!(metric = %selector, "No samples in window");
                continue;
            };
            let (latest, label) = match self.analyzer.analyze(&series) {
                Ok(analysis) => (analysis.latest().copied(), analysis.latest_label()),
                Err(AnalysisError::InsufficientData { .. }) => (None, None),
                Err(e) => return Err(e.into()),
            };
            reports.push(SeriesReport { selector, summary, latest, label });
        }
        Ok(reports)
    }

    fn window(&self, now: DateTime<Utc>) -> Result<FetchWindow, SourceError> {
        FetchWindow::lookback(now, self.settings.lookback_seconds, self.settings.max_values)
    }

    fn bounded(&self, series: &Series) -> Series {
        let mut series = series.clone();
        series.truncate_front(self.settings.max_values);
        series
    }
}

fn log_current(selector: MetricSelector, series: &Series, latest: Option<&AnalyzedPoint>) {
    let Ok(summary) = SeriesSummary::from_series(series) else {
        return;
    };
    let unit = selector.unit();
    let std_dev = summary
        .std_dev
        .map(|s| format!("{:.4}{}", s, unit))
        .unwrap_or_else(|| "n/a".to_string());
    let z = latest
        .and_then(|p| p.z_score)
        .map(|z| format!("{:.2}", z))
        .unwrap_or_else(|| "n/a".to_string());

    info!(
        "{}: current {:.4}{}, average {:.4}{}, std dev {}, z {}",
        selector.label(),
        summary.current,
        unit,
        summary.mean,
        unit,
        std_dev,
        z
    );
}
