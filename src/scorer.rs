//! Ten-component quality scorer
//!
//! Each component reads one or two [`ChartCandidate`] fields and maps them into `[0, 1]`.
//! Missing or non-finite inputs fall back to a fixed neutral value, so every candidate gets a
//! full breakdown. The total is the plain sum, plus a boost for high-value pattern names.

use rayon::prelude::*;
use serde::Deserialize;

use crate::{filter::ChartCandidate, finite, normalize_name, PatternError, Result};

/// Added to the total for names in the priority set
pub const PRIORITY_BOOST: f64 = 1.5;
/// Upper bound of every total
pub const MAX_SCORE: f64 = 10.0;

/// Normalized names that receive the boost
pub const PRIORITY_PATTERNS: [&str; 7] = [
    "vcp",
    "cupandhandle",
    "flag",
    "pennant",
    "flagpennant",
    "ascendingtriangle",
    "fallingwedge",
];

// Neutral fallbacks
const DEFAULT_TREND_START: f64 = 0.5;
const DEFAULT_TREND_QUALITY: f64 = 0.5;
const DEFAULT_FLAT_BASE: f64 = 0.3;
const DEFAULT_HIGH_CLOSE: f64 = 0.5;
const DEFAULT_YEARLY: f64 = 0.5;
const DEFAULT_HEIGHT: f64 = 0.4;
const DEFAULT_VOLUME: f64 = 0.5;
const DEFAULT_THROWBACK: f64 = 0.3;
const DEFAULT_GAP: f64 = 0.0;
const DEFAULT_LIQUIDITY: f64 = 0.5;

// ============================================================
// BREAKDOWN
// ============================================================

/// Per-component sub-scores, each in `[0, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct ScoreBreakdown {
    #[serde(serialize_with = "finite::serialize")]
    pub trend_start: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub trend_quality: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub flat_base: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub high_close: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub yearly_range_position: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub pattern_height: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub volume_trend: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub throwback: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub breakout_gap: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub market_cap_liquidity: f64,
}

impl ScoreBreakdown {
    pub fn components(&self) -> [(&'static str, f64); 10] {
        [
            ("trend_start", self.trend_start),
            ("trend_quality", self.trend_quality),
            ("flat_base", self.flat_base),
            ("high_close", self.high_close),
            ("yearly_range_position", self.yearly_range_position),
            ("pattern_height", self.pattern_height),
            ("volume_trend", self.volume_trend),
            ("throwback", self.throwback),
            ("breakout_gap", self.breakout_gap),
            ("market_cap_liquidity", self.market_cap_liquidity),
        ]
    }

    /// Unweighted sum, at most 10
    pub fn total(&self) -> f64 {
        self.components().iter().map(|(_, v)| v).sum()
    }
}

/// A candidate with its breakdown and final total
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScoredCandidate {
    pub candidate: ChartCandidate,
    pub breakdown: ScoreBreakdown,
    /// Sum of the breakdown before the boost
    #[serde(serialize_with = "finite::serialize")]
    pub base_score: f64,
    #[serde(serialize_with = "finite::serialize")]
    pub priority_boost: f64,
    /// `min(base_score + priority_boost, 10)`
    #[serde(serialize_with = "finite::serialize")]
    pub total: f64,
}

// ============================================================
// SCORER
// ============================================================

/// Stateless scorer. Construct once and share freely.
#[derive(Debug, Clone)]
pub struct PatternScorer {
    boost: f64,
    priority: Vec<String>,
}

impl Default for PatternScorer {
    fn default() -> Self {
        Self {
            boost: PRIORITY_BOOST,
            priority: PRIORITY_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PatternScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the boost amount. Negative values are treated as zero.
    pub fn with_boost(mut self, boost: f64) -> Self {
        self.boost = if boost.is_finite() { boost.max(0.0) } else { 0.0 };
        self
    }

    /// Replace the priority set; names are normalized before matching.
    pub fn with_priority<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.priority = names.into_iter().map(|n| normalize_name(n.as_ref())).collect();
        self
    }

    pub fn is_priority(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.priority.iter().any(|p| *p == name)
    }

    pub fn breakdown(&self, c: &ChartCandidate) -> ScoreBreakdown {
        let close = c.close.or(c.price);
        ScoreBreakdown {
            trend_start: component(c.prior_trend_pct, DEFAULT_TREND_START, |p| p / 30.0),
            trend_quality: component(c.trend_r2, DEFAULT_TREND_QUALITY, |r2| r2),
            flat_base: component(c.base_depth_pct, DEFAULT_FLAT_BASE, |d| {
                if d <= 10.0 {
                    1.0
                } else {
                    (35.0 - d) / 25.0
                }
            }),
            high_close: component(position(close, c.low, c.high), DEFAULT_HIGH_CLOSE, |p| p),
            yearly_range_position: component(
                position(close, c.year_low, c.year_high),
                DEFAULT_YEARLY,
                |p| p,
            ),
            pattern_height: component(c.height_pct(), DEFAULT_HEIGHT, |h| {
                if h < 10.0 {
                    h / 10.0
                } else if h <= 30.0 {
                    1.0
                } else {
                    1.0 - (h - 30.0) / 70.0
                }
            }),
            volume_trend: component(c.volume_ratio, DEFAULT_VOLUME, |r| (r - 0.5) / 1.5),
            throwback: component(c.throwback_pct, DEFAULT_THROWBACK, |t| {
                if t <= 3.0 {
                    1.0
                } else {
                    (15.0 - t) / 12.0
                }
            }),
            breakout_gap: component(c.breakout_gap_pct, DEFAULT_GAP, |g| g / 5.0),
            market_cap_liquidity: component(c.market_cap, DEFAULT_LIQUIDITY, |cap| {
                match cap {
                    cap if cap >= 10e9 => 1.0,
                    cap if cap >= 2e9 => 0.8,
                    cap if cap >= 300e6 => 0.6,
                    _ => 0.3,
                }
            }),
        }
    }

    pub fn score(&self, candidate: &ChartCandidate) -> ScoredCandidate {
        let breakdown = self.breakdown(candidate);
        let base_score = breakdown.total().clamp(0.0, MAX_SCORE);
        let priority_boost = match &candidate.name {
            Some(name) if self.is_priority(name) => self.boost,
            _ => 0.0,
        };
        ScoredCandidate {
            candidate: candidate.clone(),
            breakdown,
            base_score,
            priority_boost,
            total: (base_score + priority_boost).min(MAX_SCORE),
        }
    }

    /// Score in parallel, then sort descending by total. Equal totals keep input order.
    pub fn score_batch(&self, candidates: &[ChartCandidate]) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> =
            candidates.par_iter().map(|c| self.score(c)).collect();
        scored.sort_by(|a, b| b.total.total_cmp(&a.total));
        scored
    }

    /// Score an externally produced candidate dictionary.
    pub fn score_json(&self, value: &serde_json::Value) -> Result<ScoredCandidate> {
        if !value.is_object() {
            return Err(PatternError::InvalidCandidate(format!(
                "expected an object, got {value}"
            )));
        }
        let candidate = ChartCandidate::deserialize(value)
            .map_err(|e| PatternError::InvalidCandidate(e.to_string()))?;
        Ok(self.score(&candidate))
    }
}

/// Where `value` sits between `low` and `high`
fn position(value: Option<f64>, low: Option<f64>, high: Option<f64>) -> Option<f64> {
    let (v, lo, hi) = (value?, low?, high?);
    (hi > lo).then(|| (v - lo) / (hi - lo))
}

/// Map a present, finite input into `[0, 1]`; anything else is `default`.
#[inline]
fn component(input: Option<f64>, default: f64, f: impl FnOnce(f64) -> f64) -> f64 {
    input
        .filter(|v| v.is_finite())
        .map(f)
        .filter(|v| v.is_finite())
        .map_or(default, |v| v.clamp(0.0, 1.0))
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NEUTRAL_TOTAL: f64 = 0.5 + 0.5 + 0.3 + 0.5 + 0.5 + 0.4 + 0.5 + 0.3 + 0.0 + 0.5;

    fn full() -> ChartCandidate {
        ChartCandidate {
            name: Some("Flat Base".into()),
            price: Some(100.0),
            close: Some(100.0),
            high: Some(100.0),
            low: Some(80.0),
            height: Some(20.0),
            year_high: Some(100.0),
            year_low: Some(50.0),
            prior_trend_pct: Some(45.0),
            trend_r2: Some(0.9),
            base_depth_pct: Some(8.0),
            volume_ratio: Some(2.0),
            throwback_pct: Some(0.0),
            breakout_gap_pct: Some(2.5),
            market_cap: Some(50e9),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_candidate_gets_neutral_defaults() {
        let s = PatternScorer::new().score(&ChartCandidate::default());
        assert!((s.total - NEUTRAL_TOTAL).abs() < 1e-12);
        assert_eq!(s.priority_boost, 0.0);
    }

    #[test]
    fn test_full_candidate() {
        let s = PatternScorer::new().score(&full());
        let b = s.breakdown;
        assert_eq!(b.trend_start, 1.0);
        assert_eq!(b.trend_quality, 0.9);
        assert_eq!(b.flat_base, 1.0);
        assert_eq!(b.high_close, 1.0);
        assert_eq!(b.yearly_range_position, 1.0);
        assert_eq!(b.pattern_height, 1.0);
        assert_eq!(b.volume_trend, 1.0);
        assert_eq!(b.throwback, 1.0);
        assert_eq!(b.breakout_gap, 0.5);
        assert_eq!(b.market_cap_liquidity, 1.0);
        assert!((s.total - 9.4).abs() < 1e-12);
    }

    #[test]
    fn test_priority_boost_is_capped() {
        let mut c = full();
        c.name = Some("Cup & Handle".into());
        let s = PatternScorer::new().score(&c);
        assert_eq!(s.priority_boost, PRIORITY_BOOST);
        assert_eq!(s.total, MAX_SCORE);

        c.name = Some("VCP".into());
        c.breakout_gap_pct = None;
        c.market_cap = None;
        let s = PatternScorer::new().score(&c);
        assert!((s.total - (8.4_f64 + 1.5).min(10.0)).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_inputs_fall_back() {
        let c = ChartCandidate {
            trend_r2: Some(f64::NAN),
            volume_ratio: Some(f64::INFINITY),
            ..Default::default()
        };
        let b = PatternScorer::new().breakdown(&c);
        assert_eq!(b.trend_quality, DEFAULT_TREND_QUALITY);
        assert_eq!(b.volume_trend, DEFAULT_VOLUME);
    }

    #[test]
    fn test_batch_sorted_and_stable() {
        let mut a = ChartCandidate::default();
        a.ticker = Some("A".into());
        let mut b = full();
        b.ticker = Some("B".into());
        let mut c = ChartCandidate::default();
        c.ticker = Some("C".into());

        let scored = PatternScorer::new().score_batch(&[a, b, c]);
        let order: Vec<_> = scored
            .iter()
            .filter_map(|s| s.candidate.ticker.as_deref())
            .collect();
        assert_eq!(order, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_score_json() {
        let scorer = PatternScorer::new();
        let s = scorer
            .score_json(&serde_json::json!({"pattern": "ascending triangle", "price": 10.0}))
            .unwrap();
        assert_eq!(s.priority_boost, PRIORITY_BOOST);
        assert!(scorer.score_json(&serde_json::json!([1, 2])).is_err());
        assert!(scorer
            .score_json(&serde_json::json!({"price": "ten"}))
            .is_err());
    }
}
