//! Concurrent universe scan
//!
//! One future per ticker: fetch, analyze, then score. At most `max_concurrent` futures are
//! in flight at once. Completion order does not matter; the final ranking is a pure sort.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::{
    filter::{FilterConfig, PatternFilter},
    finite,
    scorer::PatternScorer,
    PatternEngine, PatternError, PatternId, PatternResult, PatternSelection, PriceSeries, Result,
};

/// Rule failure attached to placeholder rows
pub const MISSING_OHLCV: &str = "missing_ohlcv";

// ============================================================
// PROVIDER
// ============================================================

/// Bar interval requested from the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[default]
    Daily,
    Weekly,
    Hourly,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Hourly => "hourly",
        })
    }
}

/// Source of price series. Caching and provider fallback live behind this seam.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Up to `lookback` most recent bars for `ticker`.
    ///
    /// An empty series is a valid answer and yields a `NONE` result downstream.
    async fn fetch(&self, ticker: &str, interval: Interval, lookback: usize) -> Result<PriceSeries>;
}

// ============================================================
// OPTIONS
// ============================================================

/// Per-scan options, loadable from JSON
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub max_concurrent: usize,
    /// Rows scoring below this are dropped after ranking
    pub min_score: Option<f64>,
    /// Keep at most this many ranked rows
    pub limit: Option<usize>,
    pub pattern_types: Option<Vec<String>>,
    pub exclude_patterns: Vec<String>,
    pub apply_filters: bool,
    pub filter_config: FilterConfig,
    /// Bars requested per ticker
    pub lookback: usize,
    /// Benchmark ticker for relative strength
    pub benchmark: Option<String>,
    /// Per-fetch timeout; `None` waits indefinitely
    pub fetch_timeout_ms: Option<u64>,
    /// Pad the page with placeholder rows for failed tickers up to this count
    pub pad_to: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            min_score: None,
            limit: None,
            pattern_types: None,
            exclude_patterns: Vec::new(),
            apply_filters: false,
            filter_config: FilterConfig::default(),
            lookback: 400,
            benchmark: None,
            fetch_timeout_ms: Some(5_000),
            pad_to: None,
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(PatternError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.lookback == 0 {
            return Err(PatternError::InvalidConfig(
                "lookback must be at least 1".to_string(),
            ));
        }
        if self.min_score.is_some_and(|s| !s.is_finite()) {
            return Err(PatternError::InvalidValue("min_score"));
        }
        self.filter_config.validate()
    }

    fn selection(&self) -> PatternSelection {
        PatternSelection::new(self.pattern_types.clone(), self.exclude_patterns.clone())
    }
}

// ============================================================
// RESULT SET
// ============================================================

/// One ranked row
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScanRow {
    /// 1-based position after sorting
    pub rank: usize,
    pub ticker: String,
    pub pattern: PatternId,
    /// `None` on placeholder rows
    #[serde(serialize_with = "finite::option::serialize")]
    pub score: Option<f64>,
    #[serde(serialize_with = "finite::serialize")]
    pub confidence: f64,
    /// Total from the ten-component scorer
    #[serde(serialize_with = "finite::option::serialize")]
    pub quality_score: Option<f64>,
    pub rule_failures: Vec<String>,
    /// Full engine output; absent on placeholder rows
    pub result: Option<PatternResult>,
}

impl ScanRow {
    fn placeholder(rank: usize, ticker: &str) -> Self {
        Self {
            rank,
            ticker: ticker.to_string(),
            pattern: PatternId::NONE,
            score: None,
            confidence: 0.0,
            quality_score: None,
            rule_failures: vec![MISSING_OHLCV.to_string()],
            result: None,
        }
    }

    #[inline]
    pub fn is_placeholder(&self) -> bool {
        self.result.is_none()
    }
}

/// Counters describing one scan
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ScanMeta {
    pub interval: Interval,
    pub max_concurrent: usize,
    /// Tickers analyzed without error
    pub analyzed: usize,
    pub errored: usize,
    pub filtered_out: usize,
    pub below_min_score: usize,
    pub truncated: usize,
    pub padded: usize,
    /// Benchmark ticker actually used
    pub benchmark: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScanResultSet {
    pub as_of: DateTime<Utc>,
    pub universe_size: usize,
    pub results: Vec<ScanRow>,
    /// Ticker -> error message for fetches that failed or timed out
    pub errors: BTreeMap<String, String>,
    pub meta: ScanMeta,
}

// ============================================================
// SCANNER
// ============================================================

/// Runs the engine across a ticker universe
pub struct UniverseScanner {
    engine: PatternEngine,
    scorer: PatternScorer,
}

impl UniverseScanner {
    pub fn new(engine: PatternEngine, scorer: PatternScorer) -> Self {
        Self { engine, scorer }
    }

    #[inline]
    pub fn engine(&self) -> &PatternEngine {
        &self.engine
    }

    #[inline]
    pub fn scorer(&self) -> &PatternScorer {
        &self.scorer
    }

    /// Scan `tickers` and return a ranked result set.
    ///
    /// Per-ticker fetch failures and timeouts land in `errors` and never abort the scan.
    /// Only an empty universe or invalid options are hard errors.
    pub async fn scan<P, S>(
        &self,
        provider: &P,
        tickers: &[S],
        interval: Interval,
        options: &ScanOptions,
    ) -> Result<ScanResultSet>
    where
        P: MarketDataProvider + ?Sized,
        S: AsRef<str>,
    {
        if tickers.is_empty() {
            return Err(PatternError::EmptyUniverse);
        }
        options.validate()?;
        let filter = PatternFilter::new(options.filter_config.clone())?;
        let started = Instant::now();
        info!(
            universe = tickers.len(),
            max_concurrent = options.max_concurrent,
            %interval,
            "scan started"
        );

        let benchmark = match &options.benchmark {
            Some(symbol) => match fetch_with_timeout(provider, symbol, interval, options).await {
                Ok(series) => Some(series),
                Err(e) => {
                    warn!(
                        benchmark = %symbol,
                        error = %e,
                        "benchmark unavailable, scanning without relative strength"
                    );
                    None
                }
            },
            None => None,
        };
        let selection = options.selection();
        let names: Vec<&str> = tickers.iter().map(|t| t.as_ref()).collect();

        let outcomes: Vec<(usize, &str, Result<PatternResult>)> =
            stream::iter(names.iter().copied().enumerate())
                .map(|(index, ticker)| {
                    let benchmark = benchmark.as_ref();
                    let selection = &selection;
                    async move {
                        let outcome = fetch_with_timeout(provider, ticker, interval, options)
                            .await
                            .map(|series| {
                                self.engine.analyze_with(ticker, &series, benchmark, selection)
                            });
                        (index, ticker, outcome)
                    }
                })
                .buffer_unordered(options.max_concurrent)
                .collect()
                .await;

        let mut meta = ScanMeta {
            interval,
            max_concurrent: options.max_concurrent,
            benchmark: benchmark.as_ref().and(options.benchmark.clone()),
            ..Default::default()
        };
        let mut errors = BTreeMap::new();
        let mut failed: Vec<(usize, &str)> = Vec::new();
        let mut completed: Vec<(usize, PatternResult)> = Vec::with_capacity(outcomes.len());
        for (index, ticker, outcome) in outcomes {
            match outcome {
                Ok(result) => completed.push((index, result)),
                Err(e) => {
                    warn!(ticker, error = %e, "ticker skipped");
                    errors.insert(ticker.to_string(), e.to_string());
                    failed.push((index, ticker));
                }
            }
        }
        meta.analyzed = completed.len();
        meta.errored = errors.len();

        if options.apply_filters {
            let before = completed.len();
            completed = filter.apply_by(completed, |(_, r)| &r.features);
            meta.filtered_out = before - completed.len();
        }

        let mut results = self.rank(completed);

        if let Some(min) = options.min_score {
            let before = results.len();
            results.retain(|row| row.score.is_some_and(|s| s >= min));
            meta.below_min_score = before - results.len();
        }
        if let Some(limit) = options.limit {
            meta.truncated = results.len().saturating_sub(limit);
            results.truncate(limit);
        }
        if let Some(pad_to) = options.pad_to {
            failed.sort_unstable_by_key(|(index, _)| *index);
            let missing = pad_to.saturating_sub(results.len());
            for (_, ticker) in failed.into_iter().take(missing) {
                results.push(ScanRow::placeholder(results.len() + 1, ticker));
                meta.padded += 1;
            }
        }

        meta.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            results = results.len(),
            errors = errors.len(),
            elapsed_ms = meta.elapsed_ms,
            "scan finished"
        );

        Ok(ScanResultSet {
            as_of: Utc::now(),
            universe_size: tickers.len(),
            results,
            errors,
            meta,
        })
    }

    /// Sort by score, then confidence, both descending; input position breaks ties.
    fn rank(&self, mut completed: Vec<(usize, PatternResult)>) -> Vec<ScanRow> {
        completed.sort_by(|(ia, a), (ib, b)| {
            b.score
                .total_cmp(&a.score)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(ia.cmp(ib))
        });

        completed
            .into_iter()
            .enumerate()
            .map(|(position, (_, result))| {
                let quality_score = result
                    .is_hit()
                    .then(|| self.scorer.score(&result.features).total);
                let rule_failures = if result.is_hit() {
                    Vec::new()
                } else {
                    result.reasons.clone()
                };
                ScanRow {
                    rank: position + 1,
                    ticker: result.ticker.clone(),
                    pattern: result.pattern,
                    score: Some(result.score),
                    confidence: result.confidence,
                    quality_score,
                    rule_failures,
                    result: Some(result),
                }
            })
            .collect()
    }
}

/// Fetch one series, bounded by the configured timeout.
async fn fetch_with_timeout<P>(
    provider: &P,
    ticker: &str,
    interval: Interval,
    options: &ScanOptions,
) -> Result<PriceSeries>
where
    P: MarketDataProvider + ?Sized,
{
    let fetch = provider.fetch(ticker, interval, options.lookback);
    match options.fetch_timeout_ms {
        Some(millis) => tokio::time::timeout(Duration::from_millis(millis), fetch)
            .await
            .map_err(|_| PatternError::Timeout {
                ticker: ticker.to_string(),
                millis,
            })?,
        None => fetch.await,
    }
}

// ============================================================
// TESTS
// ============================================================
