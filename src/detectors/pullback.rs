//! Moving-average pullbacks inside an established advance

use super::helpers::{argmax, at_back, check_range, insufficient};
use crate::{
    metrics::{min_of, TechnicalMetrics},
    Candidate, Direction, Evidence, PatternDetector, PatternId, PriceSeries, Result,
};

impl_with_defaults!(Ema21PullbackDetector, Sma50PullbackDetector);

/// Which average the close pulls back to and which slower average guards the trend
#[derive(Debug, Clone, Copy)]
struct PullbackRules {
    period: usize,
    tolerance_pct: f64,
    guard_bars: usize,
}

/// Close within tolerance of `average`, up on the day, with `average` above `guard`
/// and rising over `guard_bars`.
fn detect_pullback(
    id: PatternId,
    rules: PullbackRules,
    series: &PriceSeries,
    average: &[f64],
    guard: &[f64],
) -> Candidate {
    let n = series.len();
    let closes = series.close();
    let (Some(ma), Some(ma_before), Some(guard_now)) = (
        at_back(average, 0),
        at_back(average, rules.guard_bars),
        at_back(guard, 0),
    ) else {
        return Candidate::miss(id, "moving averages unavailable");
    };
    if average.len() != n || ma <= 0.0 {
        return Candidate::miss(id, "moving averages unavailable");
    }

    let close = closes[n - 1];
    let distance = (close - ma) / ma * 100.0;
    if distance.is_nan() || distance.abs() > rules.tolerance_pct {
        return Candidate::miss(
            id,
            format!("close {distance:+.2}% from average, outside ±{}%", rules.tolerance_pct),
        );
    }
    if close <= closes[n - 2] {
        return Candidate::miss(id, "close not up on the day");
    }
    if !(ma > guard_now && ma > ma_before) {
        return Candidate::miss(id, "average not above a rising trend");
    }

    let score = (6.5 + (1.0 - distance.abs() / rules.tolerance_pct) * 2.5).min(9.0);

    // Pullback runs from the highest high of the last `period` bars
    let start = n - rules.period;
    let peak = argmax(series.high(), start..n).unwrap_or(start);
    let peak_high = series.high()[peak];
    let low = min_of(&series.low()[peak..]);
    Candidate::hit(
        id,
        score,
        format!("close {distance:+.2}% from average, trend intact"),
        Evidence::new(Direction::Bullish, peak, n - 1)
            .pivot(peak_high)
            .floor(low)
            .depth_pct((peak_high - low) / peak_high * 100.0),
    )
}

// ============================================================
// 21 EMA
// ============================================================

/// Pullback to the 21-bar EMA while it sits above a rising 50-bar SMA
#[derive(Debug, Clone)]
pub struct Ema21PullbackDetector {
    pub tolerance_pct: f64,
    /// The EMA must be higher than this many bars ago
    pub guard_bars: usize,
}

impl Default for Ema21PullbackDetector {
    fn default() -> Self {
        Self {
            tolerance_pct: 1.5,
            guard_bars: 5,
        }
    }
}

impl PatternDetector for Ema21PullbackDetector {
    fn id(&self) -> PatternId {
        PatternId::EMA21_PULLBACK
    }

    fn min_bars(&self) -> usize {
        21 + 10
    }

    fn detect(&self, series: &PriceSeries, metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        let rules = PullbackRules {
            period: 21,
            tolerance_pct: self.tolerance_pct,
            guard_bars: self.guard_bars,
        };
        detect_pullback(self.id(), rules, series, &metrics.ema_21, &metrics.sma_50)
    }

    fn validate_config(&self) -> Result<()> {
        check_range("tolerance_pct", self.tolerance_pct, f64::EPSILON, 100.0)
    }
}

// ============================================================
// 50 SMA
// ============================================================

/// Pullback to the 50-bar SMA while it sits above a rising 200-bar SMA
#[derive(Debug, Clone)]
pub struct Sma50PullbackDetector {
    pub tolerance_pct: f64,
    /// The SMA must be higher than this many bars ago
    pub guard_bars: usize,
}

impl Default for Sma50PullbackDetector {
    fn default() -> Self {
        Self {
            tolerance_pct: 3.0,
            guard_bars: 10,
        }
    }
}

impl PatternDetector for Sma50PullbackDetector {
    fn id(&self) -> PatternId {
        PatternId::SMA50_PULLBACK
    }

    fn min_bars(&self) -> usize {
        50 + 10
    }

    fn detect(&self, series: &PriceSeries, metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        let rules = PullbackRules {
            period: 50,
            tolerance_pct: self.tolerance_pct,
            guard_bars: self.guard_bars,
        };
        detect_pullback(self.id(), rules, series, &metrics.sma_50, &metrics.sma_200)
    }

    fn validate_config(&self) -> Result<()> {
        check_range("tolerance_pct", self.tolerance_pct, f64::EPSILON, 100.0)
    }
}

// ============================================================
// TESTS
// ============================================================
