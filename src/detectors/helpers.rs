//! Shared helpers for chart pattern detection
//!
//! Extremum search over index ranges and the swing-point channel used by the wedge and
//! triangle detectors.

use std::ops::Range;

use crate::{
    metrics::{linear_fit, local_highs, local_lows, mean, tail, LinearFit, SWING_HALF_WINDOW},
    Candidate, PatternError, PatternId, PriceSeries, Result,
};

// ============================================================
// EXTREMUM SEARCH
// ============================================================

/// Index of the first maximum of `values[range]`. `None` for an empty range.
pub fn argmax(values: &[f64], range: Range<usize>) -> Option<usize> {
    let range = range.start..range.end.min(values.len());
    range.reduce(|best, i| if values[i] > values[best] { i } else { best })
}

/// Index of the first minimum of `values[range]`. `None` for an empty range.
pub fn argmin(values: &[f64], range: Range<usize>) -> Option<usize> {
    let range = range.start..range.end.min(values.len());
    range.reduce(|best, i| if values[i] < values[best] { i } else { best })
}

/// Value `back` bars before the last one
#[inline]
pub fn at_back(values: &[f64], back: usize) -> Option<f64> {
    values
        .len()
        .checked_sub(1 + back)
        .map(|i| values[i])
}

/// Percentage change from `from` to `to`
#[inline]
pub fn pct_change(from: f64, to: f64) -> f64 {
    (to - from) / from * 100.0
}

/// Miss explaining that the series is too short
pub fn insufficient(id: PatternId, need: usize, got: usize) -> Candidate {
    Candidate::miss(id, format!("need {need} bars, got {got}"))
}

/// `InvalidConfig` unless `value` is finite and inside `min..=max`
pub fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PatternError::InvalidConfig(format!(
            "{field} = {value} out of range [{min}, {max}]"
        )))
    }
}

// ============================================================
// SWING CHANNEL
// ============================================================

/// Resistance and support lines fitted through the swing points of a trailing window.
///
/// Resistance regresses local highs of the high column, support regresses local lows of
/// the low column, both on bar index relative to the window start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingChannel {
    /// Absolute index of the first bar in the window
    pub start: usize,
    pub window: usize,
    pub resistance: LinearFit,
    pub support: LinearFit,
    /// Resistance slope in percent of the window's mean close per bar
    pub resistance_slope_pct: f64,
    /// Support slope in percent of the window's mean close per bar
    pub support_slope_pct: f64,
    /// Channel width at the midpoint of the first half
    pub width_early: f64,
    /// Channel width at the midpoint of the second half
    pub width_late: f64,
}

impl SwingChannel {
    /// Fit over the last `window` bars. `None` when either side has fewer than two
    /// swing points or the mean close is not positive.
    pub fn fit(series: &PriceSeries, window: usize) -> Option<Self> {
        let highs = tail(series.high(), window);
        let lows = tail(series.low(), window);
        let w = highs.len();
        let start = series.len() - w;

        let swing_highs = local_highs(highs, SWING_HALF_WINDOW);
        let swing_lows = local_lows(lows, SWING_HALF_WINDOW);
        if swing_highs.len() < 2 || swing_lows.len() < 2 {
            return None;
        }

        let resistance = fit_points(&swing_highs, highs)?;
        let support = fit_points(&swing_lows, lows)?;
        let mean_close = mean(tail(series.close(), window));
        if mean_close <= 0.0 {
            return None;
        }

        let width = |x: f64| resistance.at(x) - support.at(x);
        Some(Self {
            start,
            window: w,
            resistance,
            support,
            resistance_slope_pct: resistance.slope / mean_close * 100.0,
            support_slope_pct: support.slope / mean_close * 100.0,
            width_early: width(w as f64 / 4.0),
            width_late: width(3.0 * w as f64 / 4.0),
        })
    }

    /// Late width over early width
    #[inline]
    pub fn width_ratio(&self) -> f64 {
        self.width_late / self.width_early
    }

    /// True when the early width is positive and the late width is at most
    /// `max_ratio` of it
    #[inline]
    pub fn contracting(&self, max_ratio: f64) -> bool {
        self.width_early > 0.0 && self.width_late <= max_ratio * self.width_early
    }

    /// 1 - late/early width
    #[inline]
    pub fn shrink(&self) -> f64 {
        1.0 - self.width_ratio()
    }

    /// Resistance line value at the last bar
    #[inline]
    pub fn resistance_now(&self) -> f64 {
        self.resistance.at((self.window - 1) as f64)
    }

    /// Support line value at the last bar
    #[inline]
    pub fn support_now(&self) -> f64 {
        self.support.at((self.window - 1) as f64)
    }
}

fn fit_points(indices: &[usize], values: &[f64]) -> Option<LinearFit> {
    let xs: Vec<f64> = indices.iter().map(|&i| i as f64).collect();
    let ys: Vec<f64> = indices.iter().map(|&i| values[i]).collect();
    linear_fit(&xs, &ys)
}

// ============================================================
// TEST FIXTURES
// ============================================================


// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_first_of_ties() {
        let v = [1.0, 3.0, 2.0, 3.0, 0.0];
        assert_eq!(argmax(&v, 0..5), Some(1));
        assert_eq!(argmax(&v, 2..5), Some(3));
        assert_eq!(argmin(&v, 0..4), Some(0));
        assert_eq!(argmax(&v, 3..3), None);
        assert_eq!(argmax(&v, 4..10), Some(4));
    }

    #[test]
    fn test_check_range() {
        assert!(check_range("x", 0.5, 0.0, 1.0).is_ok());
        assert!(check_range("x", 1.5, 0.0, 1.0).is_err());
        assert!(check_range("x", f64::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_swing_channel_needs_swings() {
        let series = PriceSeries::from_closes((0..40).map(|i| i as f64).collect());
        assert!(SwingChannel::fit(&series, 40).is_none());
    }

    #[test]
    fn test_swing_channel_converging() {
        // triangle wave between a falling upper and a rising lower bound
        let closes = fixtures::zigzag(50, |x| 100.0 - 0.1 * x, |x| 90.0 + 0.1 * x);
        let series = PriceSeries::from_closes(closes);
        let channel = SwingChannel::fit(&series, 50).unwrap();
        assert!(channel.resistance_slope_pct < 0.0);
        assert!(channel.support_slope_pct > 0.0);
        assert!(channel.contracting(0.85));
        assert!(channel.shrink() > 0.0);
        assert!(channel.resistance_now() > channel.support_now());
    }
}
