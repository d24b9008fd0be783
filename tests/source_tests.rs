use chrono::{TimeZone, Utc};
use usage_monitor::errors::SourceError;
use usage_monitor::monitoring::metrics::SeriesSummary;
use usage_monitor::monitoring::source::MetricsPayload;
use usage_monitor::monitoring::{FetchWindow, JsonFileSource, MetricKind, MetricSelector, MetricSnapshot, MetricsSource};

const CPU_DUMP: &str = r#"{
    "start": "2024-03-01T12:00:00+00:00",
    "end": "2024-03-01T12:30:00+00:00",
    "step": 60,
    "time_series": {
        "cpu": {
            "values": [
                [1709294400, "12.5"],
                [1709294460, "13.0"],
                [1709295000, "14.5"],
                [1709296200, "11.0"]
            ]
        }
    }
}"#;

fn window(lookback_seconds: u64) -> FetchWindow {
    FetchWindow::lookback(Utc::now(), lookback_seconds, 500).unwrap()
}

#[tokio::test]
async fn test_reads_provider_dump() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("cpu.json"), CPU_DUMP)?;
    let source = JsonFileSource::new(dir.path());

    let snapshot = source.fetch(MetricKind::Cpu, window(3600)).await?;
    let load = snapshot.series(MetricSelector::CpuLoad).unwrap();

    assert_eq!(load.len(), 4);
    assert_eq!(load.samples()[0].timestamp, Utc.timestamp_opt(1709294400, 0).unwrap());
    assert_eq!(load.latest().unwrap().value, 11.0);
    Ok(())
}

#[tokio::test]
async fn test_window_is_relative_to_newest_sample() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("cpu.json"), CPU_DUMP)?;
    let source = JsonFileSource::new(dir.path());

    // newest sample is at +1800s, so a 1200s lookback keeps +1800 and +600
    let snapshot = source.fetch(MetricKind::Cpu, window(1200)).await?;
    let values: Vec<f64> = snapshot.series(MetricSelector::CpuLoad).unwrap().values().collect();
    assert_eq!(values, vec![14.5, 11.0]);
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = JsonFileSource::new(dir.path());
    let result = source.fetch(MetricKind::Disk, window(500)).await;
    assert!(matches!(result, Err(SourceError::Io { kind: MetricKind::Disk, .. })));
}

#[test]
fn test_missing_sub_series_is_reported() {
    let payload: MetricsPayload = serde_json::from_str(
        r#"{"time_series": {"disk.0.iops.read": {"values": [[1709294400, "1"]]}}}"#,
    )
    .unwrap();
    let err = payload.into_snapshot(MetricKind::Disk).unwrap_err();
    assert!(matches!(
        err,
        SourceError::MissingSeries { kind: MetricKind::Disk, key: "disk.0.iops.write" }
    ));
}

#[test]
fn test_non_numeric_value_is_malformed() {
    let payload: MetricsPayload =
        serde_json::from_str(r#"{"time_series": {"cpu": {"values": [[1709294400, "lots"]]}}}"#).unwrap();
    assert!(matches!(
        payload.into_snapshot(MetricKind::Cpu),
        Err(SourceError::Malformed { kind: MetricKind::Cpu, .. })
    ));
}

#[test]
fn test_network_payload_maps_every_selector() {
    let payload: MetricsPayload = serde_json::from_str(
        r#"{"time_series": {
            "network.0.pps.in": {"values": [[1709294400, "10"]]},
            "network.0.pps.out": {"values": [[1709294400, "20"]]},
            "network.0.bandwidth.in": {"values": [[1709294400, 30.5]]},
            "network.0.bandwidth.out": {"values": [[1709294400, "40"]]}
        }}"#,
    )
    .unwrap();
    let snapshot = payload.into_snapshot(MetricKind::Network).unwrap();

    assert_eq!(snapshot.kind(), MetricKind::Network);
    let latest: Vec<(MetricSelector, f64)> = snapshot
        .iter()
        .map(|(sel, series)| (sel, series.latest().unwrap().value))
        .collect();
    assert_eq!(
        latest,
        vec![
            (MetricSelector::NetworkInPps, 10.0),
            (MetricSelector::NetworkOutPps, 20.0),
            (MetricSelector::NetworkInBandwidth, 30.5),
            (MetricSelector::NetworkOutBandwidth, 40.0),
        ]
    );
    assert!(snapshot.series(MetricSelector::CpuLoad).is_none());
    assert!(matches!(snapshot, MetricSnapshot::Network { .. }));
}

#[test]
fn test_summary_text() {
    let payload: MetricsPayload = serde_json::from_str(CPU_DUMP).unwrap();
    let snapshot = payload.into_snapshot(MetricKind::Cpu).unwrap();
    let load = snapshot.series(MetricSelector::CpuLoad).unwrap();

    let summary = SeriesSummary::from_series(load).unwrap();
    assert_eq!(summary.count, 4);
    assert_eq!(summary.current, 11.0);
    assert_eq!(summary.mean, 12.75);
    assert_eq!(summary.min, 11.0);
    assert_eq!(summary.max, 14.5);

    let text = summary.render(MetricSelector::CpuLoad);
    assert!(text.starts_with("*CPU load stats:*"));
    assert!(text.contains("_Data points_: 4"));
    assert!(text.contains("_Load (act)_: 11.00%"));
    assert!(text.contains("_Load (avg)_: 12.75%"));
    assert!(text.contains("_Load (min)_: 11.00%"));
    assert!(text.contains("_Load (max)_: 14.50%"));

    let iops = summary.render(MetricSelector::DiskReadIops);
    assert!(iops.contains("_IOPS (act)_: 11.00 iops"));
}

#[tokio::test]
async fn test_dense_dump_is_thinned_to_step() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let values: Vec<String> = (0..20)
        .map(|i| format!("[{}, \"{}\"]", 1709294400 + i, i))
        .collect();
    std::fs::write(
        dir.path().join("cpu.json"),
        format!(r#"{{"time_series": {{"cpu": {{"values": [{}]}}}}}}"#, values.join(",")),
    )?;
    let source = JsonFileSource::new(dir.path());

    // 100s over at most 10 points gives a 10s step, anchored on the newest sample
    let window = FetchWindow::lookback(Utc::now(), 100, 10)?;
    assert_eq!(window.step_seconds, 10);
    let snapshot = source.fetch(MetricKind::Cpu, window).await?;
    let kept: Vec<f64> = snapshot.series(MetricSelector::CpuLoad).unwrap().values().collect();
    assert_eq!(kept, vec![9.0, 19.0]);
    Ok(())
}
