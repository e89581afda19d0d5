//! Integration tests for the concurrent universe scanner.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chartscan::prelude::*;

fn path(start: f64, segments: &[(usize, f64)]) -> Vec<f64> {
    let mut out = Vec::new();
    let mut p = start;
    for &(bars, target) in segments {
        for j in 0..bars {
            out.push(p + (target - p) * (j + 1) as f64 / bars as f64);
        }
        p = target;
    }
    out
}

fn bars(closes: Vec<f64>, volumes: Vec<f64>) -> PriceSeries {
    PriceSeries::new(
        closes.clone(),
        closes.iter().map(|c| c * 1.005).collect(),
        closes.iter().map(|c| c * 0.995).collect(),
        closes,
        volumes,
    )
    .unwrap()
}

/// Scores 8.5 as a VCP without a benchmark, 9.5 against a flat one
fn vcp_series() -> PriceSeries {
    let closes = path(
        50.0,
        &[(230, 100.0), (12, 88.0), (20, 104.0), (8, 97.76), (30, 103.0)],
    );
    let mut volumes = vec![1_000_000.0; 262];
    volumes.extend(vec![400_000.0; closes.len() - 262]);
    bars(closes, volumes)
}

/// Too short for any analysis
fn short_series() -> PriceSeries {
    bars(path(50.0, &[(40, 60.0)]), vec![1_000_000.0; 40])
}

/// In-memory provider with per-ticker latency. Unknown tickers fail.
#[derive(Default)]
struct MemoryProvider {
    series: HashMap<String, PriceSeries>,
    delays: HashMap<String, Duration>,
}

impl MemoryProvider {
    fn with(mut self, ticker: &str, series: PriceSeries) -> Self {
        self.series.insert(ticker.to_string(), series);
        self
    }

    fn delayed(mut self, ticker: &str, millis: u64) -> Self {
        self.delays
            .insert(ticker.to_string(), Duration::from_millis(millis));
        self
    }
}

#[async_trait]
impl MarketDataProvider for MemoryProvider {
    async fn fetch(
        &self,
        ticker: &str,
        _interval: Interval,
        _lookback: usize,
    ) -> chartscan::Result<PriceSeries> {
        if let Some(delay) = self.delays.get(ticker) {
            tokio::time::sleep(*delay).await;
        }
        self.series
            .get(ticker)
            .cloned()
            .ok_or_else(|| chartscan::PatternError::DataUnavailable {
                ticker: ticker.to_string(),
                reason: "unknown ticker".to_string(),
            })
    }
}

fn scanner() -> UniverseScanner {
    let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
    UniverseScanner::new(engine, PatternScorer::new())
}

fn tickers(set: &ScanResultSet) -> Vec<&str> {
    set.results.iter().map(|r| r.ticker.as_str()).collect()
}

#[tokio::test]
async fn test_min_score_excludes_low_scorers() {
    let provider = MemoryProvider::default()
        .with("A", vcp_series())
        .with("B", short_series());
    let options = ScanOptions {
        min_score: Some(8.0),
        ..Default::default()
    };
    let set = scanner()
        .scan(&provider, &["A", "B"], Interval::Daily, &options)
        .await
        .unwrap();

    assert_eq!(tickers(&set), vec!["A"]);
    assert_eq!(set.results[0].rank, 1);
    assert_eq!(set.results[0].pattern, PatternId::VCP);
    assert!(set.errors.is_empty());
    assert_eq!(set.meta.analyzed, 2);
    assert_eq!(set.meta.below_min_score, 1);
    assert_eq!(set.universe_size, 2);
}

#[tokio::test]
async fn test_failures_are_recorded_not_raised() {
    let provider = MemoryProvider::default()
        .with("A", vcp_series())
        .with("SLOW", vcp_series())
        .delayed("SLOW", 500);
    let options = ScanOptions {
        fetch_timeout_ms: Some(20),
        ..Default::default()
    };
    let set = scanner()
        .scan(&provider, &["A", "MISSING", "SLOW"], Interval::Daily, &options)
        .await
        .unwrap();

    assert_eq!(tickers(&set), vec!["A"]);
    assert_eq!(set.errors.len(), 2);
    assert!(set.errors["MISSING"].contains("unknown ticker"));
    assert!(set.errors["SLOW"].contains("timed out"), "{}", set.errors["SLOW"]);
    assert_eq!(set.meta.errored, 2);
}

#[tokio::test]
async fn test_ranking_ignores_concurrency_and_arrival_order() {
    let provider = MemoryProvider::default()
        .with("A", vcp_series())
        .with("B", short_series())
        .with("C", vcp_series())
        .with("D", short_series())
        .delayed("A", 30)
        .delayed("B", 5)
        .delayed("C", 1);
    let universe = ["B", "A", "D", "C", "E"];

    let mut runs = Vec::new();
    for max_concurrent in [1, 2, 8] {
        let options = ScanOptions {
            max_concurrent,
            ..Default::default()
        };
        let set = scanner()
            .scan(&provider, &universe, Interval::Daily, &options)
            .await
            .unwrap();
        runs.push(set);
    }

    // Equal scores keep universe order; the failed ticker is absent
    assert_eq!(tickers(&runs[0]), vec!["A", "C", "B", "D"]);
    let ranks: Vec<usize> = runs[0].results.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    for run in &runs[1..] {
        assert_eq!(run.results, runs[0].results);
        assert_eq!(run.errors, runs[0].errors);
    }

    let scores: Vec<f64> = runs[0].results.iter().filter_map(|r| r.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_benchmark_adds_relative_strength() {
    let provider = MemoryProvider::default()
        .with("A", vcp_series())
        .with("SPY", PriceSeries::from_closes(vec![100.0; 300]));
    let options = ScanOptions {
        benchmark: Some("SPY".to_string()),
        ..Default::default()
    };
    let set = scanner()
        .scan(&provider, &["A"], Interval::Daily, &options)
        .await
        .unwrap();
    assert_eq!(set.results[0].score, Some(9.5));
    assert_eq!(set.meta.benchmark.as_deref(), Some("SPY"));
}

#[tokio::test]
async fn test_missing_benchmark_does_not_block() {
    let provider = MemoryProvider::default().with("A", vcp_series());
    let options = ScanOptions {
        benchmark: Some("NOPE".to_string()),
        ..Default::default()
    };
    let set = scanner()
        .scan(&provider, &["A"], Interval::Daily, &options)
        .await
        .unwrap();
    assert_eq!(set.results[0].score, Some(8.5));
    assert_eq!(set.meta.benchmark, None);
    assert!(set.errors.is_empty());
}

#[tokio::test]
async fn test_padding_with_placeholders() {
    let provider = MemoryProvider::default().with("A", vcp_series());
    let options = ScanOptions {
        pad_to: Some(3),
        ..Default::default()
    };
    let set = scanner()
        .scan(&provider, &["X2", "A", "X1"], Interval::Daily, &options)
        .await
        .unwrap();

    assert_eq!(tickers(&set), vec!["A", "X2", "X1"]);
    let placeholder = &set.results[1];
    assert!(placeholder.is_placeholder());
    assert_eq!(placeholder.rank, 2);
    assert_eq!(placeholder.score, None);
    assert_eq!(placeholder.rule_failures, vec!["missing_ohlcv".to_string()]);
    assert_eq!(set.meta.padded, 2);
    // padding never hides the failures
    assert_eq!(set.errors.len(), 2);
}

#[tokio::test]
async fn test_filters_and_limit() {
    let provider = MemoryProvider::default()
        .with("A", vcp_series())
        .with("B", vcp_series())
        .with("C", short_series());
    let options = ScanOptions {
        apply_filters: true,
        filter_config: FilterConfig {
            min_price: Some(50.0),
            ..Default::default()
        },
        limit: Some(1),
        ..Default::default()
    };
    let set = scanner()
        .scan(&provider, &["A", "B", "C"], Interval::Daily, &options)
        .await
        .unwrap();

    // C has no price and is dropped by the filter; B falls to the limit
    assert_eq!(tickers(&set), vec!["A"]);
    assert_eq!(set.meta.filtered_out, 1);
    assert_eq!(set.meta.truncated, 1);
}

#[tokio::test]
async fn test_pattern_selection_per_scan() {
    let provider = MemoryProvider::default().with("A", vcp_series());
    let options = ScanOptions {
        exclude_patterns: vec!["VCP".to_string()],
        ..Default::default()
    };
    let set = scanner()
        .scan(&provider, &["A"], Interval::Daily, &options)
        .await
        .unwrap();
    assert_ne!(set.results[0].pattern, PatternId::VCP);
}

#[tokio::test]
async fn test_empty_universe_is_an_error() {
    let provider = MemoryProvider::default();
    let empty: [&str; 0] = [];
    let err = scanner()
        .scan(&provider, &empty, Interval::Daily, &ScanOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, chartscan::PatternError::EmptyUniverse));
}

#[tokio::test]
async fn test_result_set_serializes() {
    let provider = MemoryProvider::default().with("A", vcp_series());
    let set = scanner()
        .scan(&provider, &["A", "GONE"], Interval::Weekly, &ScanOptions::default())
        .await
        .unwrap();
    let json = serde_json::to_value(&set).unwrap();
    assert_eq!(json["universe_size"], 2);
    assert_eq!(json["results"][0]["ticker"], "A");
    assert_eq!(json["meta"]["interval"], "weekly");
    assert!(json["errors"]["GONE"].is_string());
    assert!(json["as_of"].is_string());
}
