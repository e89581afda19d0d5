//! Stage-2 trend template and Weinstein stage classification
//!
//! The template evaluates seven of the eight classic stage-2 rules from closes alone.
//! The eighth (RS rating >= 70) needs a benchmark and is appended by the engine.

use std::fmt;

use crate::metrics::{ema_series, max_of, min_of, sma_series, tail, BARS_PER_YEAR};

// ============================================================
// TREND TEMPLATE
// ============================================================

/// Bars required before the template is evaluated
pub const TEMPLATE_MIN_BARS: usize = 260;
/// Criteria that must hold for a pass (7 of 8, the 8th lives elsewhere)
pub const REQUIRED_CRITERIA: usize = 7;
/// ~1 month of trading bars
const MONTH_BARS: usize = 21;
/// ~4 months of trading bars
const FOUR_MONTH_BARS: usize = 84;

/// One rule of the stage-2 template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendCriterion {
    PriceAboveLongAverages,
    MediumAboveLongAverage,
    LongAverageRising,
    AveragesStacked,
    PriceAboveEma50,
    NearYearHigh,
    AboveYearLow,
}

impl TrendCriterion {
    pub const ALL: [TrendCriterion; 7] = [
        TrendCriterion::PriceAboveLongAverages,
        TrendCriterion::MediumAboveLongAverage,
        TrendCriterion::LongAverageRising,
        TrendCriterion::AveragesStacked,
        TrendCriterion::PriceAboveEma50,
        TrendCriterion::NearYearHigh,
        TrendCriterion::AboveYearLow,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TrendCriterion::PriceAboveLongAverages => "Price above 150 & 200 SMA",
            TrendCriterion::MediumAboveLongAverage => "150 SMA above 200 SMA",
            TrendCriterion::LongAverageRising => "200 SMA rising (1 & 4 months)",
            TrendCriterion::AveragesStacked => "50 EMA > 150 SMA > 200 SMA",
            TrendCriterion::PriceAboveEma50 => "Price above 50 EMA",
            TrendCriterion::NearYearHigh => "Within 25% of 52-week high",
            TrendCriterion::AboveYearLow => "At least 30% above 52-week low",
        }
    }
}

impl fmt::Display for TrendCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of [`classify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrendTemplate {
    pub pass: bool,
    pub criteria_met: Vec<TrendCriterion>,
    /// False when there were fewer than [`TEMPLATE_MIN_BARS`] closes
    pub evaluated: bool,
}

impl TrendTemplate {
    #[inline]
    pub fn met(&self) -> usize {
        self.criteria_met.len()
    }
}

/// Evaluate the stage-2 template against a close series (oldest first).
pub fn classify(closes: &[f64]) -> TrendTemplate {
    let n = closes.len();
    if n < TEMPLATE_MIN_BARS {
        return TrendTemplate::default();
    }

    let sma_150 = sma_series(closes, 150);
    let sma_200 = sma_series(closes, 200);
    let ema_50 = ema_series(closes, 50);
    let year = tail(closes, BARS_PER_YEAR);
    let year_high = max_of(year);
    let year_low = min_of(year);

    let price = closes[n - 1];
    let s150 = sma_150[n - 1];
    let s200 = sma_200[n - 1];
    let e50 = ema_50[n - 1];

    let checks = [
        (
            TrendCriterion::PriceAboveLongAverages,
            price > s150 && price > s200,
        ),
        (TrendCriterion::MediumAboveLongAverage, s150 > s200),
        (
            TrendCriterion::LongAverageRising,
            s200 > sma_200[n - 1 - MONTH_BARS] && s200 > sma_200[n - 1 - FOUR_MONTH_BARS],
        ),
        (TrendCriterion::AveragesStacked, e50 > s150 && s150 > s200),
        (TrendCriterion::PriceAboveEma50, price > e50),
        (TrendCriterion::NearYearHigh, price >= year_high * 0.75),
        (TrendCriterion::AboveYearLow, price >= year_low * 1.3),
    ];

    let criteria_met: Vec<TrendCriterion> = checks
        .iter()
        .filter(|(_, ok)| *ok)
        .map(|(criterion, _)| *criterion)
        .collect();

    TrendTemplate {
        pass: criteria_met.len() >= REQUIRED_CRITERIA,
        criteria_met,
        evaluated: true,
    }
}

// ============================================================
// WEINSTEIN STAGE
// ============================================================

/// Four-stage market cycle, judged against the 30-week (150-bar) average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeinsteinStage {
    Basing = 1,
    Advancing = 2,
    Topping = 3,
    Declining = 4,
}

impl WeinsteinStage {
    #[inline]
    pub fn number(self) -> u8 {
        self as u8
    }
}

const STAGE_AVERAGE: usize = 150;
const STAGE_SLOPE_BARS: usize = 20;
const STAGE_FLAT_BAND: f64 = 0.005;

/// Classify the current Weinstein stage. `None` until 170 bars are available.
pub fn weinstein_stage(closes: &[f64]) -> Option<WeinsteinStage> {
    let n = closes.len();
    if n < STAGE_AVERAGE + STAGE_SLOPE_BARS {
        return None;
    }
    let ma = sma_series(closes, STAGE_AVERAGE);
    let now = ma[n - 1];
    let before = ma[n - 1 - STAGE_SLOPE_BARS];
    if before <= 0.0 {
        return None;
    }
    let slope = now / before - 1.0;
    let price = closes[n - 1];

    let stage = if slope > STAGE_FLAT_BAND {
        if price > now {
            WeinsteinStage::Advancing
        } else {
            WeinsteinStage::Topping
        }
    } else if slope < -STAGE_FLAT_BAND {
        if price < now {
            WeinsteinStage::Declining
        } else {
            WeinsteinStage::Basing
        }
    } else {
        // flat average: judge by where it came from
        let earlier = ma[n.saturating_sub(1 + 3 * STAGE_SLOPE_BARS)];
        if now > earlier {
            WeinsteinStage::Topping
        } else {
            WeinsteinStage::Basing
        }
    };
    Some(stage)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, from: f64, to: f64) -> Vec<f64> {
        (0..n)
            .map(|i| from + (to - from) * (i + 1) as f64 / n as f64)
            .collect()
    }

    #[test]
    fn test_insufficient_history() {
        let template = classify(&ramp(259, 50.0, 100.0));
        assert!(!template.pass);
        assert!(!template.evaluated);
        assert!(template.criteria_met.is_empty());
    }

    #[test]
    fn test_steady_uptrend_passes() {
        let template = classify(&ramp(300, 40.0, 120.0));
        assert!(template.evaluated);
        assert!(template.pass);
        assert_eq!(template.met(), 7);
    }

    #[test]
    fn test_downtrend_fails() {
        let template = classify(&ramp(300, 150.0, 60.0));
        assert!(template.evaluated);
        assert!(!template.pass);
        assert!(!template
            .criteria_met
            .contains(&TrendCriterion::PriceAboveLongAverages));
    }

    #[test]
    fn test_weinstein_stages() {
        assert_eq!(weinstein_stage(&ramp(100, 1.0, 2.0)), None);
        assert_eq!(
            weinstein_stage(&ramp(300, 40.0, 120.0)),
            Some(WeinsteinStage::Advancing)
        );
        assert_eq!(
            weinstein_stage(&ramp(300, 120.0, 40.0)),
            Some(WeinsteinStage::Declining)
        );
    }

    #[test]
    fn test_weinstein_counter_trend_stages() {
        // rising average, price collapses under it
        let mut topping = ramp(295, 40.0, 120.0);
        topping.extend(ramp(5, 120.0, 70.0));
        assert_eq!(weinstein_stage(&topping), Some(WeinsteinStage::Topping));

        // falling average, price jumps above it
        let mut basing = ramp(295, 120.0, 40.0);
        basing.extend(ramp(5, 40.0, 90.0));
        assert_eq!(weinstein_stage(&basing), Some(WeinsteinStage::Basing));
    }

    #[test]
    fn test_weinstein_flat_average() {
        // average flattened after an advance
        let mut after_advance = ramp(150, 50.0, 100.0);
        after_advance.extend(vec![100.0; 150]);
        assert_eq!(
            weinstein_stage(&after_advance),
            Some(WeinsteinStage::Topping)
        );

        assert_eq!(
            weinstein_stage(&[100.0; 200]),
            Some(WeinsteinStage::Basing)
        );
    }

    #[test]
    fn test_criterion_labels() {
        assert_eq!(TrendCriterion::ALL.len(), REQUIRED_CRITERIA);
        assert_eq!(
            TrendCriterion::NearYearHigh.to_string(),
            "Within 25% of 52-week high"
        );
    }
}
