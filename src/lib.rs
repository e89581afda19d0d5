//! # chartscan - chart pattern scanning for equity price series
//!
//! Trend qualification, classic chart-pattern detection, scoring and ranking across a
//! ticker universe.
//!
//! ## Quick Start
//!
//! ```rust
//! use chartscan::prelude::*;
//!
//! // 300 daily bars of a steady advance
//! let closes: Vec<f64> = (0..300).map(|i| 40.0 + i as f64 * 0.25).collect();
//! let series = PriceSeries::new(
//!     closes.clone(),
//!     closes.iter().map(|c| c * 1.005).collect(),
//!     closes.iter().map(|c| c * 0.995).collect(),
//!     closes.clone(),
//!     vec![1_000_000.0; 300],
//! )
//! .unwrap();
//!
//! // Create engine with every builtin detector
//! let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
//!
//! let result = engine.analyze("DEMO", &series, None);
//! assert!((0.0..=10.0).contains(&result.score));
//! ```

pub mod detectors;
pub mod filter;
pub mod levels;
pub mod metrics;
pub mod scanner;
pub mod scorer;
pub mod strength;
pub mod trend;

pub mod prelude {
    pub use crate::{
        // Parallel
        analyze_parallel,
        // Detectors
        detectors::*,
        // Filtering and scoring
        filter::{apply_filters, BreakoutDirection, ChartCandidate, FilterConfig, PatternFilter},
        levels::TradeLevels,
        metrics::TechnicalMetrics,
        scanner::{
            Interval, MarketDataProvider, ScanMeta, ScanOptions, ScanResultSet, ScanRow,
            UniverseScanner,
        },
        scorer::{PatternScorer, ScoreBreakdown, ScoredCandidate},
        strength::{relative_strength, RelativeStrength},
        trend::{classify, TrendTemplate, WeinsteinStage},
        // Engine
        BuiltinDetector,
        // Types
        Candidate,
        Direction,
        EngineBuilder,
        EngineConfig,
        Evidence,
        // Core traits
        PatternDetector,
        PatternEngine,
        // Errors
        PatternError,
        PatternId,
        PatternResult,
        PatternSelection,
        PriceSeries,
        Result,
        OHLCV,
    };
}

use levels::TradeLevels;
use metrics::{max_of, min_of, TechnicalMetrics};
use strength::{apply_bonus, relative_strength, RS_CRITERION, RS_RATING_THRESHOLD};
use trend::{weinstein_stage, REQUIRED_CRITERIA};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors that can occur during analysis and scanning
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid series: {0}")]
    InvalidSeries(String),

    #[error("No data for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    #[error("Fetch for {ticker} timed out after {millis}ms")]
    Timeout { ticker: String, millis: u64 },

    #[error("Ticker universe is empty")]
    EmptyUniverse,

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),
}

// ============================================================
// SERIALIZATION HELPERS
// ============================================================

/// Finite-or-null serializers: NaN and infinities leave the engine as `null`.
pub(crate) mod finite {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> std::result::Result<S::Ok, S::Error> {
        if value.is_finite() {
            s.serialize_f64(*value)
        } else {
            s.serialize_none()
        }
    }

    pub mod option {
        use serde::Serializer;

        pub fn serialize<S: Serializer>(
            value: &Option<f64>,
            s: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            match value {
                Some(v) if v.is_finite() => s.serialize_some(v),
                _ => s.serialize_none(),
            }
        }
    }
}

/// Canonical form used for name matching: lowercase, `&` spelled `and`, alphanumerics only.
///
/// `"Cup & Handle"`, `"cup_and_handle"` and `"CupAndHandle"` all normalize to `"cupandhandle"`.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace('&', "and")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

// ============================================================
// OHLCV DATA
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Aligned column store of bars, oldest first.
///
/// OHLC relationships are not enforced; only column lengths are checked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
    timestamp: Option<Vec<i64>>,
}

impl PriceSeries {
    pub fn new(
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
        volume: Vec<f64>,
    ) -> Result<Self> {
        let n = close.len();
        for (column, len) in [
            ("open", open.len()),
            ("high", high.len()),
            ("low", low.len()),
            ("volume", volume.len()),
        ] {
            if len != n {
                return Err(PatternError::InvalidSeries(format!(
                    "{column} has {len} values, close has {n}"
                )));
            }
        }
        Ok(Self {
            open,
            high,
            low,
            close,
            volume,
            timestamp: None,
        })
    }

    /// Attach per-bar timestamps (epoch seconds or any monotonic unit the caller uses)
    pub fn with_timestamps(mut self, timestamps: Vec<i64>) -> Result<Self> {
        if timestamps.len() != self.close.len() {
            return Err(PatternError::InvalidSeries(format!(
                "timestamp has {} values, close has {}",
                timestamps.len(),
                self.close.len()
            )));
        }
        self.timestamp = Some(timestamps);
        Ok(self)
    }

    /// Collect bars into columns. Timestamps are kept only when every bar carries one.
    pub fn from_bars<T: OHLCV>(bars: &[T]) -> Self {
        let timestamp: Option<Vec<i64>> = bars.iter().map(OHLCV::timestamp).collect();
        Self {
            open: bars.iter().map(OHLCV::open).collect(),
            high: bars.iter().map(OHLCV::high).collect(),
            low: bars.iter().map(OHLCV::low).collect(),
            close: bars.iter().map(OHLCV::close).collect(),
            volume: bars.iter().map(OHLCV::volume).collect(),
            timestamp: timestamp.filter(|ts| !ts.is_empty()),
        }
    }

    /// Flat bars (open = high = low = close) with zero volume
    pub fn from_closes(closes: Vec<f64>) -> Self {
        let n = closes.len();
        Self {
            open: closes.clone(),
            high: closes.clone(),
            low: closes.clone(),
            close: closes,
            volume: vec![0.0; n],
            timestamp: None,
        }
    }

    #[inline]
    pub fn open(&self) -> &[f64] {
        &self.open
    }

    #[inline]
    pub fn high(&self) -> &[f64] {
        &self.high
    }

    #[inline]
    pub fn low(&self) -> &[f64] {
        &self.low
    }

    #[inline]
    pub fn close(&self) -> &[f64] {
        &self.close
    }

    #[inline]
    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    #[inline]
    pub fn timestamps(&self) -> Option<&[i64]> {
        self.timestamp.as_deref()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.close.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    #[inline]
    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied()
    }

    #[inline]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamp.as_ref().and_then(|ts| ts.last().copied())
    }
}

// ============================================================
// PATTERN IDS AND CANDIDATES
// ============================================================

/// Unique identifier for a pattern type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternId(pub &'static str);

impl PatternId {
    pub const NONE: PatternId = PatternId("NONE");
    pub const VCP: PatternId = PatternId("VCP");
    pub const CUP_HANDLE: PatternId = PatternId("Cup & Handle");
    pub const FLAT_BASE: PatternId = PatternId("Flat Base");
    pub const BREAKOUT: PatternId = PatternId("Breakout");
    pub const RISING_WEDGE: PatternId = PatternId("Rising Wedge");
    pub const FALLING_WEDGE: PatternId = PatternId("Falling Wedge");
    pub const ASCENDING_TRIANGLE: PatternId = PatternId("Ascending Triangle");
    pub const SYMMETRICAL_TRIANGLE: PatternId = PatternId("Symmetrical Triangle");
    pub const HEAD_SHOULDERS: PatternId = PatternId("Head & Shoulders");
    pub const INVERSE_HEAD_SHOULDERS: PatternId = PatternId("Inverse Head & Shoulders");
    pub const EMA21_PULLBACK: PatternId = PatternId("21 EMA Pullback");
    pub const SMA50_PULLBACK: PatternId = PatternId("50 SMA Pullback");

    /// Returns the string identifier
    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// Case- and punctuation-insensitive name comparison
    pub fn matches(&self, name: &str) -> bool {
        normalize_name(self.0) == normalize_name(name)
    }

    /// Returns the typical direction of this pattern, if known
    pub fn typical_direction(&self) -> Option<Direction> {
        match *self {
            Self::VCP
            | Self::CUP_HANDLE
            | Self::FLAT_BASE
            | Self::BREAKOUT
            | Self::FALLING_WEDGE
            | Self::ASCENDING_TRIANGLE
            | Self::INVERSE_HEAD_SHOULDERS
            | Self::EMA21_PULLBACK
            | Self::SMA50_PULLBACK => Some(Direction::Bullish),
            Self::RISING_WEDGE | Self::HEAD_SHOULDERS => Some(Direction::Bearish),
            Self::SYMMETRICAL_TRIANGLE => Some(Direction::Neutral),
            _ => None,
        }
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl serde::Serialize for PatternId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.0)
    }
}

/// Direction/bias of a pattern
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    #[default]
    Neutral,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }
}

/// Where in the series a pattern sits and the price levels it defines
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct Evidence {
    pub direction: Direction,
    pub start_index: usize,
    pub end_index: usize,
    /// Breakout level (last swing high, rim, neckline, resistance line, moving average)
    #[serde(serialize_with = "finite::option::serialize")]
    pub pivot: Option<f64>,
    /// Lowest point of the structure
    #[serde(serialize_with = "finite::option::serialize")]
    pub floor: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub depth_pct: Option<f64>,
}

impl Evidence {
    pub fn new(direction: Direction, start_index: usize, end_index: usize) -> Self {
        Self {
            direction,
            start_index,
            end_index,
            ..Default::default()
        }
    }

    pub fn pivot(mut self, pivot: f64) -> Self {
        self.pivot = Some(pivot);
        self
    }

    pub fn floor(mut self, floor: f64) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn depth_pct(mut self, depth_pct: f64) -> Self {
        self.depth_pct = Some(depth_pct);
        self
    }

    /// Bars covered by the structure, inclusive
    #[inline]
    pub fn span(&self) -> usize {
        self.end_index.saturating_sub(self.start_index) + 1
    }
}

/// Outcome of one detector on one series
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Candidate {
    pub pattern_id: PatternId,
    pub hit: bool,
    /// 0..=10
    #[serde(serialize_with = "finite::serialize")]
    pub raw_score: f64,
    pub info: String,
    pub evidence: Evidence,
}

impl Candidate {
    pub fn miss(pattern_id: PatternId, info: impl Into<String>) -> Self {
        Self {
            pattern_id,
            hit: false,
            raw_score: 0.0,
            info: info.into(),
            evidence: Evidence::default(),
        }
    }

    pub fn hit(
        pattern_id: PatternId,
        raw_score: f64,
        info: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self {
            pattern_id,
            hit: true,
            raw_score: if raw_score.is_finite() {
                raw_score.clamp(0.0, 10.0)
            } else {
                0.0
            },
            info: info.into(),
            evidence,
        }
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// Pattern detector trait. Object safe so custom detectors can be boxed.
///
/// Detectors are pure: they read the series and the shared metrics and never fail.
/// Below `min_bars` they return a miss explaining what was missing.
pub trait PatternDetector: Send + Sync {
    fn id(&self) -> PatternId;
    fn min_bars(&self) -> usize;
    fn detect(&self, series: &PriceSeries, metrics: &TechnicalMetrics) -> Candidate;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - fast path via enum dispatch
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect(&self, series: &PriceSeries, metrics: &TechnicalMetrics) -> Candidate {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, series, metrics)),*
                }
            }

            #[inline]
            pub fn id(&self) -> PatternId {
                match self {
                    $(Self::$variant(d) => PatternDetector::id(d)),*
                }
            }

            #[inline]
            pub fn min_bars(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::min_bars(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }
        }
    };
}

// Declaration order is the tie-break order for equal raw scores
define_builtin_detectors! {
    // Bases
    Vcp(VcpDetector),
    CupHandle(CupHandleDetector),
    FlatBase(FlatBaseDetector),
    Breakout(BreakoutDetector),

    // Converging lines
    RisingWedge(RisingWedgeDetector),
    FallingWedge(FallingWedgeDetector),
    AscendingTriangle(AscendingTriangleDetector),
    SymmetricalTriangle(SymmetricalTriangleDetector),

    // Reversals
    HeadShoulders(HeadShouldersDetector),
    InverseHeadShoulders(InverseHeadShouldersDetector),

    // Moving-average pullbacks
    Ema21Pullback(Ema21PullbackDetector),
    Sma50Pullback(Sma50PullbackDetector),
}

// ============================================================
// ENGINE CONFIGURATION
// ============================================================

/// Name allow/deny list, matched with [`normalize_name`]
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PatternSelection {
    /// Only these patterns run. `None` or an empty list means all.
    pub include: Option<Vec<String>>,
    /// These patterns never run
    pub exclude: Vec<String>,
}

impl PatternSelection {
    pub fn new(include: Option<Vec<String>>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn allows(&self, id: PatternId) -> bool {
        let included = match &self.include {
            Some(names) if !names.is_empty() => names.iter().any(|n| id.matches(n)),
            _ => true,
        };
        included && !self.exclude.iter().any(|n| id.matches(n))
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bars required before any analysis runs
    pub min_history: usize,
    /// Skip detection unless the stage-2 trend template passes
    pub require_trend_template: bool,
    pub selection: PatternSelection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_history: 60,
            require_trend_template: true,
            selection: PatternSelection::default(),
        }
    }
}

// ============================================================
// PATTERN RESULT
// ============================================================

/// Engine output for one ticker
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PatternResult {
    pub ticker: String,
    /// Best pattern, or `NONE`
    pub pattern: PatternId,
    /// raw_score + RS bonus, held inside [0, 10]
    #[serde(serialize_with = "finite::serialize")]
    pub score: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub raw_score: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub rs_bonus: f64,
    #[serde(serialize_with = "finite::option::serialize")]
    pub entry: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub stop: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub target: Option<f64>,
    #[serde(serialize_with = "finite::serialize")]
    pub risk_reward: f64,
    pub criteria_met: Vec<String>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub rs_rating: Option<f64>,
    /// criteria_met / 8
    #[serde(serialize_with = "finite::serialize")]
    pub confidence: f64,
    #[serde(serialize_with = "finite::option::serialize")]
    pub support_start: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub support_end: Option<f64>,
    pub volume_increasing: bool,
    pub consolidation_days: usize,
    pub stage: Option<trend::WeinsteinStage>,
    pub breakout_direction: filter::BreakoutDirection,
    pub reasons: Vec<String>,
    /// Timestamp of the last bar, when the series carries timestamps
    pub timestamp: Option<i64>,
    /// Flattened view consumed by the filter and scorer
    pub features: filter::ChartCandidate,
}

impl PatternResult {
    fn none(ticker: &str, timestamp: Option<i64>, reasons: Vec<String>) -> Self {
        Self {
            ticker: ticker.to_string(),
            pattern: PatternId::NONE,
            score: 0.0,
            raw_score: 0.0,
            rs_bonus: 0.0,
            entry: None,
            stop: None,
            target: None,
            risk_reward: 0.0,
            criteria_met: Vec::new(),
            rs_rating: None,
            confidence: 0.0,
            support_start: None,
            support_end: None,
            volume_increasing: false,
            consolidation_days: 0,
            stage: None,
            breakout_direction: filter::BreakoutDirection::NotApplicable,
            reasons,
            timestamp,
            features: filter::ChartCandidate {
                ticker: Some(ticker.to_string()),
                ..Default::default()
            },
        }
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        !self.pattern.is_none()
    }
}

/// Total criteria, seven from the template plus the RS rating
pub const TOTAL_CRITERIA: usize = 8;
/// Closes compared when measuring the advance into a pattern
const PRIOR_TREND_BARS: usize = 60;

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Main pattern detection engine
pub struct PatternEngine {
    builtin: Vec<BuiltinDetector>,
    custom: Vec<Box<dyn PatternDetector>>,
    config: EngineConfig,
}

impl PatternEngine {
    pub fn new() -> Self {
        Self {
            builtin: Vec::new(),
            custom: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ids of every registered detector, builtin first
    pub fn pattern_ids(&self) -> Vec<PatternId> {
        self.builtin
            .iter()
            .map(BuiltinDetector::id)
            .chain(self.custom.iter().map(|d| d.id()))
            .collect()
    }

    // ===========================================
    // LOW-LEVEL: Detection
    // ===========================================

    /// Run every selected detector, builtin first, in registration order.
    pub fn detect_all(
        &self,
        series: &PriceSeries,
        metrics: &TechnicalMetrics,
        selection: &PatternSelection,
    ) -> Vec<Candidate> {
        let allowed = |id: PatternId| self.config.selection.allows(id) && selection.allows(id);

        let mut results = Vec::with_capacity(self.builtin.len() + self.custom.len());

        // Fast path: builtin detectors (enum dispatch, no vtable)
        for detector in &self.builtin {
            if allowed(detector.id()) {
                results.push(detector.detect(series, metrics));
            }
        }

        // Slow path: custom detectors (vtable)
        for detector in &self.custom {
            if allowed(detector.id()) {
                results.push(detector.detect(series, metrics));
            }
        }

        results
    }

    /// Highest-scoring hit. Ties keep the earliest candidate.
    pub fn best(candidates: &[Candidate]) -> Option<&Candidate> {
        candidates
            .iter()
            .filter(|c| c.hit)
            .fold(None, |best: Option<&Candidate>, c| match best {
                Some(b) if c.raw_score <= b.raw_score => Some(b),
                _ => Some(c),
            })
    }

    // ===========================================
    // HIGH-LEVEL: Single-ticker analysis
    // ===========================================

    /// Analyze one ticker with the engine-wide pattern selection.
    pub fn analyze(
        &self,
        ticker: &str,
        series: &PriceSeries,
        benchmark: Option<&PriceSeries>,
    ) -> PatternResult {
        self.analyze_with(ticker, series, benchmark, &PatternSelection::default())
    }

    /// Analyze one ticker, additionally narrowed by `selection`.
    ///
    /// Never fails: missing history, a failed trend gate and "no setup" all come back as
    /// a `NONE` result with score 0 and explanatory reasons.
    pub fn analyze_with(
        &self,
        ticker: &str,
        series: &PriceSeries,
        benchmark: Option<&PriceSeries>,
        selection: &PatternSelection,
    ) -> PatternResult {
        let n = series.len();
        let timestamp = series.last_timestamp();
        if n < self.config.min_history {
            return PatternResult::none(
                ticker,
                timestamp,
                vec![format!(
                    "insufficient history: need at least {} candles, got {}",
                    self.config.min_history, n
                )],
            );
        }

        let closes = series.close();
        let rs = benchmark.and_then(|b| relative_strength(closes, b.close()));
        let metrics = TechnicalMetrics::compute(series).with_rs_rating(rs.map(|r| r.rating));
        let template = trend::classify(closes);
        let stage = weinstein_stage(closes);

        let mut criteria_met: Vec<String> = template
            .criteria_met
            .iter()
            .map(|c| c.label().to_string())
            .collect();
        if rs.is_some_and(|r| r.rating >= RS_RATING_THRESHOLD) {
            criteria_met.push(RS_CRITERION.to_string());
        }

        let mut result = PatternResult::none(ticker, timestamp, Vec::new());
        result.confidence = criteria_met.len() as f64 / TOTAL_CRITERIA as f64;
        result.criteria_met = criteria_met;
        result.rs_rating = metrics.rs_rating;
        result.support_start = Some(metrics.support_30);
        result.support_end = Some(metrics.support_5);
        result.volume_increasing = metrics.volume_increasing;
        result.stage = stage;

        if self.config.require_trend_template && result.criteria_met.len() < REQUIRED_CRITERIA {
            let reason = if template.evaluated {
                format!(
                    "trend template failed: {}/{} criteria met",
                    result.criteria_met.len(),
                    TOTAL_CRITERIA
                )
            } else {
                format!(
                    "trend template needs at least {} candles, got {}",
                    trend::TEMPLATE_MIN_BARS,
                    n
                )
            };
            tracing::debug!(ticker, met = result.criteria_met.len(), "trend gate rejected");
            result.reasons.push(reason);
            return result;
        }

        let candidates = self.detect_all(series, &metrics, selection);
        let Some(best) = Self::best(&candidates) else {
            result.reasons = if candidates.is_empty() {
                vec!["no detectors selected".to_string()]
            } else {
                candidates
                    .iter()
                    .map(|c| format!("{}: {}", c.pattern_id, c.info))
                    .collect()
            };
            return result;
        };

        let bonus = rs.map_or(0.0, |r| r.bonus);
        let levels = TradeLevels::derive(closes, series.high(), series.low()).unwrap_or_default();
        let breakout = filter::BreakoutDirection::from_evidence(
            &best.evidence,
            series.last_close().unwrap_or_default(),
        );

        result.pattern = best.pattern_id;
        result.raw_score = best.raw_score;
        result.rs_bonus = bonus;
        result.score = apply_bonus(best.raw_score, bonus);
        result.entry = Some(levels.entry);
        result.stop = Some(levels.stop);
        result.target = Some(levels.target);
        result.risk_reward = levels.risk_reward;
        result.consolidation_days = best.evidence.span();
        result.breakout_direction = breakout;
        result.reasons.push(format!("{}: {}", best.pattern_id, best.info));
        if bonus > 0.0 {
            result
                .reasons
                .push(format!("relative strength bonus +{bonus:.0}"));
        }
        result.features = features(ticker, series, &metrics, best, breakout, stage);
        result
    }

    fn validate(&self) -> Result<()> {
        if self.config.min_history == 0 {
            return Err(PatternError::InvalidConfig(
                "min_history must be at least 1".to_string(),
            ));
        }
        for d in &self.builtin {
            d.validate_config()?;
        }
        for d in &self.custom {
            d.validate_config()?;
        }
        Ok(())
    }
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten a hit into the candidate shape the filter and scorer read.
fn features(
    ticker: &str,
    series: &PriceSeries,
    metrics: &TechnicalMetrics,
    best: &Candidate,
    breakout: filter::BreakoutDirection,
    stage: Option<trend::WeinsteinStage>,
) -> filter::ChartCandidate {
    let n = series.len();
    let closes = series.close();
    let end = best.evidence.end_index.min(n.saturating_sub(1));
    let start = best.evidence.start_index.min(end);
    let high = max_of(&series.high()[start..=end]);
    let low = min_of(&series.low()[start..=end]);
    let close = series.last_close().unwrap_or_default();

    let prior = closes[start.saturating_sub(PRIOR_TREND_BARS)];
    let prior_trend_pct = (prior > 0.0).then(|| (closes[start] / prior - 1.0) * 100.0);
    let volume_ratio = series
        .volume()
        .last()
        .filter(|_| metrics.avg_volume_50 > 0.0)
        .map(|v| v / metrics.avg_volume_50);
    let throwback_pct = (high > 0.0).then(|| ((high - close) / high * 100.0).max(0.0));
    let breakout_gap_pct = best
        .evidence
        .pivot
        .filter(|p| *p > 0.0)
        .map(|p| ((close - p) / p * 100.0).max(0.0));

    filter::ChartCandidate {
        ticker: Some(ticker.to_string()),
        name: Some(best.pattern_id.to_string()),
        price: Some(close),
        width: Some(best.evidence.span()),
        avg_volume: Some(metrics.avg_volume_50),
        height: Some(high - low),
        breakout_direction: Some(breakout),
        stage: stage.map(trend::WeinsteinStage::number),
        prior_trend_pct,
        trend_r2: Some(metrics.trend_r2),
        base_depth_pct: best.evidence.depth_pct,
        high: Some(high),
        low: Some(low),
        close: Some(close),
        year_high: Some(metrics.high_52w),
        year_low: Some(metrics.low_52w),
        volume_ratio,
        throwback_pct,
        breakout_gap_pct,
        market_cap: None,
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
pub struct EngineBuilder {
    builtin: Vec<BuiltinDetector>,
    custom: Vec<Box<dyn PatternDetector>>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate an array of `BuiltinDetector` variants using `Default::default()` for each inner type.
macro_rules! builtin_defaults {
  ($($variant:ident),* $(,)?) => {
    [$(BuiltinDetector::$variant(Default::default())),*]
  };
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            builtin: Vec::new(),
            custom: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Add all builtin patterns with default configurations
    pub fn with_all_defaults(self) -> Self {
        self.with_base_defaults()
            .with_geometry_defaults()
            .with_reversal_defaults()
            .with_pullback_defaults()
    }

    /// VCP, Cup & Handle, Flat Base, Breakout
    pub fn with_base_defaults(mut self) -> Self {
        self.builtin
            .extend(builtin_defaults![Vcp, CupHandle, FlatBase, Breakout]);
        self
    }

    /// Wedges and triangles
    pub fn with_geometry_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            RisingWedge,
            FallingWedge,
            AscendingTriangle,
            SymmetricalTriangle,
        ]);
        self
    }

    /// Head & Shoulders and its inverse
    pub fn with_reversal_defaults(mut self) -> Self {
        self.builtin
            .extend(builtin_defaults![HeadShoulders, InverseHeadShoulders]);
        self
    }

    /// 21-EMA and 50-SMA pullbacks
    pub fn with_pullback_defaults(mut self) -> Self {
        self.builtin
            .extend(builtin_defaults![Ema21Pullback, Sma50Pullback]);
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.builtin.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Add a custom detector (slow path)
    pub fn add_custom<D: PatternDetector + 'static>(mut self, detector: D) -> Self {
        self.custom.push(Box::new(detector));
        self
    }

    /// Bars required before analysis runs (default 60)
    pub fn min_history(mut self, bars: usize) -> Self {
        self.config.min_history = bars;
        self
    }

    /// Enable/disable the trend-template gate
    pub fn require_trend_template(mut self, enable: bool) -> Self {
        self.config.require_trend_template = enable;
        self
    }

    /// Filter to specific patterns only
    pub fn only_patterns<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.config.selection.include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Never run these patterns
    pub fn exclude_patterns<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.config
            .selection
            .exclude
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine> {
        let engine = PatternEngine {
            builtin: self.builtin,
            custom: self.custom,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// PARALLEL ANALYSIS
// ============================================================

use rayon::prelude::*;

/// Analyze many in-memory series in parallel against one optional benchmark.
///
/// Output order follows input order for indexed iterators (`Vec`, slices).
pub fn analyze_parallel<'a, I>(
    engine: &PatternEngine,
    instruments: I,
    benchmark: Option<&PriceSeries>,
) -> Vec<PatternResult>
where
    I: IntoParallelIterator<Item = (&'a str, &'a PriceSeries)>,
{
    instruments
        .into_par_iter()
        .map(|(ticker, series)| engine.analyze(ticker, series, benchmark))
        .collect()
}

// ============================================================
// TESTS
// ============================================================
