//! Base-building patterns: VCP, Cup & Handle, Flat Base, 52-week-high Breakout

use super::helpers::{argmax, argmin, check_range, insufficient, pct_change};
use crate::{
    metrics::{max_of, mean, min_of, pstdev, tail, TechnicalMetrics, BARS_PER_YEAR},
    Candidate, Direction, Evidence, PatternDetector, PatternId, PriceSeries, Result,
};

impl_with_defaults!(
    VcpDetector,
    CupHandleDetector,
    FlatBaseDetector,
    BreakoutDetector,
);

/// Score at or above which a scored base counts as a hit
pub const DEFAULT_MIN_SCORE: f64 = 6.0;

// ============================================================
// VCP
// ============================================================

/// Volatility Contraction Pattern: successive pullbacks shrinking in depth
#[derive(Debug, Clone)]
pub struct VcpDetector {
    /// Each contraction must be at most this fraction of the one before
    pub max_contraction_ratio: f64,
    pub min_contractions: usize,
    pub min_score: f64,
}

impl Default for VcpDetector {
    fn default() -> Self {
        Self {
            max_contraction_ratio: 0.8,
            min_contractions: 2,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl PatternDetector for VcpDetector {
    fn id(&self) -> PatternId {
        PatternId::VCP
    }

    fn min_bars(&self) -> usize {
        120
    }

    fn detect(&self, series: &PriceSeries, metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }

        let contractions = &metrics.contractions;
        let (Some(first), Some(last)) = (contractions.first(), contractions.last()) else {
            return Candidate::miss(self.id(), "no contractions found");
        };
        if contractions.len() < self.min_contractions {
            return Candidate::miss(
                self.id(),
                format!(
                    "need {} contractions, got {}",
                    self.min_contractions,
                    contractions.len()
                ),
            );
        }
        for pair in contractions.windows(2) {
            if pair[1].depth_pct > self.max_contraction_ratio * pair[0].depth_pct {
                return Candidate::miss(
                    self.id(),
                    format!(
                        "contraction {:.1}% did not shrink from {:.1}%",
                        pair[1].depth_pct, pair[0].depth_pct
                    ),
                );
            }
        }

        let ratio = last.depth_pct / first.depth_pct;
        let shrink_bonus = if ratio <= 0.6 {
            3.0
        } else if ratio <= 0.7 {
            2.0
        } else {
            1.0
        };

        let mut score: f64 = 4.0 + shrink_bonus;
        if metrics.volume_dry_up {
            score += 1.5;
        }
        if contractions.len() >= 3 {
            score += 1.0;
        }
        if metrics.volume_increasing {
            score += 0.5;
        }
        let score = score.min(10.0);

        let depths: Vec<String> = contractions
            .iter()
            .map(|c| format!("{:.1}%", c.depth_pct))
            .collect();
        if score < self.min_score {
            return Candidate::miss(
                self.id(),
                format!("contractions {} scored {score:.1}", depths.join(" > ")),
            );
        }

        let floor = contractions
            .iter()
            .map(|c| c.low)
            .fold(f64::INFINITY, f64::min);
        Candidate::hit(
            self.id(),
            score,
            format!(
                "{} contractions {}{}",
                contractions.len(),
                depths.join(" > "),
                if metrics.volume_dry_up { ", volume dry-up" } else { "" }
            ),
            Evidence::new(Direction::Bullish, first.high_index, n - 1)
                .pivot(last.high)
                .floor(floor)
                .depth_pct(first.depth_pct),
        )
    }

    fn validate_config(&self) -> Result<()> {
        check_range("max_contraction_ratio", self.max_contraction_ratio, 0.0, 1.0)?;
        check_range("min_score", self.min_score, 0.0, 10.0)?;
        if self.min_contractions < 2 {
            return Err(crate::PatternError::InvalidConfig(
                "min_contractions must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// CUP & HANDLE
// ============================================================

/// Rounded cup with a shallow handle near the right rim
#[derive(Debug, Clone)]
pub struct CupHandleDetector {
    /// Trailing bars examined
    pub window: usize,
    /// Left rim is searched for in the first `rim_search` bars of the window
    pub rim_search: usize,
    pub min_depth_pct: f64,
    pub max_depth_pct: f64,
    pub max_rim_diff_pct: f64,
    pub min_handle_pct: f64,
    pub max_handle_pct: f64,
    /// Close must be at least this fraction of the handle high
    pub handle_proximity: f64,
}

impl Default for CupHandleDetector {
    fn default() -> Self {
        Self {
            window: 150,
            rim_search: 60,
            min_depth_pct: 12.0,
            max_depth_pct: 45.0,
            max_rim_diff_pct: 12.0,
            min_handle_pct: 2.0,
            max_handle_pct: 15.0,
            handle_proximity: 0.97,
        }
    }
}

/// Bars kept free at the end of the series for the right side and handle
const CUP_BOTTOM_GAP: usize = 10;
const CUP_RIGHT_RIM_GAP: usize = 5;

impl PatternDetector for CupHandleDetector {
    fn id(&self) -> PatternId {
        PatternId::CUP_HANDLE
    }

    fn min_bars(&self) -> usize {
        self.window
    }

    fn detect(&self, series: &PriceSeries, _metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        let highs = series.high();
        let lows = series.low();
        let closes = series.close();
        let volumes = series.volume();

        let base = n - self.window;
        let Some(li) = argmax(highs, base..base + self.rim_search) else {
            return Candidate::miss(self.id(), "no left rim");
        };
        if li + 1 >= n - CUP_BOTTOM_GAP {
            return Candidate::miss(self.id(), "cup incomplete: no room for a bottom");
        }
        let Some(bi) = argmin(lows, li + 1..n - CUP_BOTTOM_GAP) else {
            return Candidate::miss(self.id(), "no cup bottom");
        };
        if bi + 1 >= n - CUP_RIGHT_RIM_GAP {
            return Candidate::miss(self.id(), "cup incomplete: no room for a right rim");
        }
        let Some(ri) = argmax(highs, bi + 1..n - CUP_RIGHT_RIM_GAP) else {
            return Candidate::miss(self.id(), "no right rim");
        };

        let left = highs[li];
        let bottom = lows[bi];
        let right = highs[ri];
        let depth = (left - bottom) / left * 100.0;
        if !(self.min_depth_pct..=self.max_depth_pct).contains(&depth) {
            return Candidate::miss(
                self.id(),
                format!(
                    "cup depth {depth:.1}% outside {}-{}% range",
                    self.min_depth_pct, self.max_depth_pct
                ),
            );
        }

        let rim_diff = (left - right).abs() / left * 100.0;
        if rim_diff > self.max_rim_diff_pct {
            return Candidate::miss(self.id(), format!("rims differ by {rim_diff:.1}%"));
        }

        let handle_high = max_of(&highs[ri..]);
        let handle_low = min_of(&lows[ri + 1..]);
        let handle_depth = (right - handle_low) / right * 100.0;
        if !(self.min_handle_pct..=self.max_handle_pct).contains(&handle_depth)
            || handle_low <= bottom
        {
            return Candidate::miss(self.id(), format!("handle depth {handle_depth:.1}%"));
        }

        let close = closes[n - 1];
        if close < handle_high * self.handle_proximity {
            return Candidate::miss(self.id(), "close not near handle high");
        }

        let mut score: f64 = 7.5;
        if rim_diff <= 3.0 {
            score += 0.5;
        } else if rim_diff > 8.0 {
            score -= 0.5;
        }
        if mean(&volumes[ri + 1..]) < mean(&volumes[li..=ri]) {
            score += 0.5;
        } else {
            score -= 0.5;
        }
        if (15.0..=33.0).contains(&depth) {
            score += 0.5;
        } else if depth > 40.0 {
            score -= 0.5;
        }

        Candidate::hit(
            self.id(),
            score.clamp(6.0, 9.5),
            format!(
                "cup depth {depth:.1}%, rims {rim_diff:.1}% apart, handle {handle_depth:.1}%"
            ),
            Evidence::new(Direction::Bullish, li, n - 1)
                .pivot(handle_high)
                .floor(bottom)
                .depth_pct(depth),
        )
    }

    fn validate_config(&self) -> Result<()> {
        if self.rim_search == 0 || self.rim_search + CUP_BOTTOM_GAP >= self.window {
            return Err(crate::PatternError::InvalidConfig(format!(
                "rim_search {} does not fit a {}-bar window",
                self.rim_search, self.window
            )));
        }
        check_range("min_depth_pct", self.min_depth_pct, 0.0, self.max_depth_pct)?;
        check_range("max_depth_pct", self.max_depth_pct, 0.0, 100.0)?;
        check_range("handle_proximity", self.handle_proximity, 0.0, 1.0)
    }
}

// ============================================================
// FLAT BASE
// ============================================================

/// Shallow sideways consolidation
#[derive(Debug, Clone)]
pub struct FlatBaseDetector {
    pub window: usize,
    pub max_depth_pct: f64,
    /// Allowed depth when the last `tight_bars` closes are tight
    pub tight_max_depth_pct: f64,
    pub tight_bars: usize,
    /// Coefficient of variation (stdev/mean, %) below which closes count as tight
    pub tight_cv_pct: f64,
}

impl Default for FlatBaseDetector {
    fn default() -> Self {
        Self {
            window: 35,
            max_depth_pct: 12.0,
            tight_max_depth_pct: 15.0,
            tight_bars: 12,
            tight_cv_pct: 1.5,
        }
    }
}

impl PatternDetector for FlatBaseDetector {
    fn id(&self) -> PatternId {
        PatternId::FLAT_BASE
    }

    fn min_bars(&self) -> usize {
        50
    }

    fn detect(&self, series: &PriceSeries, _metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }

        let high = max_of(tail(series.high(), self.window));
        let low = min_of(tail(series.low(), self.window));
        let depth = (high - low) / high * 100.0;

        let recent = tail(series.close(), self.tight_bars);
        let tight = pstdev(recent) / mean(recent) * 100.0 < self.tight_cv_pct;

        if !(depth <= self.max_depth_pct || (tight && depth <= self.tight_max_depth_pct)) {
            return Candidate::miss(self.id(), format!("base depth {depth:.1}% too deep"));
        }

        let mut score = 6.0 + (self.max_depth_pct - depth).max(0.0) / self.max_depth_pct * 1.5;
        if tight {
            score += 0.5;
        }

        Candidate::hit(
            self.id(),
            score,
            format!(
                "{}-bar base {depth:.1}% deep{}",
                self.window,
                if tight { ", tight closes" } else { "" }
            ),
            Evidence::new(Direction::Bullish, n.saturating_sub(self.window), n - 1)
                .pivot(high)
                .floor(low)
                .depth_pct(depth),
        )
    }

    fn validate_config(&self) -> Result<()> {
        if self.window == 0 || self.tight_bars == 0 {
            return Err(crate::PatternError::InvalidConfig(
                "flat base windows must be non-zero".to_string(),
            ));
        }
        check_range("max_depth_pct", self.max_depth_pct, f64::EPSILON, 100.0)?;
        check_range(
            "tight_max_depth_pct",
            self.tight_max_depth_pct,
            0.0,
            100.0,
        )
    }
}

// ============================================================
// BREAKOUT
// ============================================================

/// Close at or just under the 52-week high, scored on volume, momentum and RS
#[derive(Debug, Clone)]
pub struct BreakoutDetector {
    /// Farthest the close may sit below the 52-week high
    pub max_distance_pct: f64,
    /// Distance that earns the full proximity score
    pub strong_distance_pct: f64,
    /// Bars in the volume baseline, excluding the last bar
    pub volume_bars: usize,
    pub min_rs_rating: f64,
    pub min_score: f64,
}

impl Default for BreakoutDetector {
    fn default() -> Self {
        Self {
            max_distance_pct: 0.5,
            strong_distance_pct: 0.1,
            volume_bars: 50,
            min_rs_rating: 60.0,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl PatternDetector for BreakoutDetector {
    fn id(&self) -> PatternId {
        PatternId::BREAKOUT
    }

    fn min_bars(&self) -> usize {
        160
    }

    fn detect(&self, series: &PriceSeries, metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        let closes = series.close();
        let volumes = series.volume();

        let year_high = metrics.high_52w;
        let close = closes[n - 1];
        let distance = (year_high - close) / year_high * 100.0;
        if distance.is_nan() || distance > self.max_distance_pct {
            return Candidate::miss(
                self.id(),
                format!("{distance:.2}% below 52-week high"),
            );
        }

        let mut score: f64 = 2.0
            + if distance <= self.strong_distance_pct {
                2.0
            } else {
                1.0
            };

        let baseline = mean(&volumes[n - 1 - self.volume_bars.min(n - 1)..n - 1]);
        let volume_ratio = if baseline > 0.0 {
            volumes[n - 1] / baseline
        } else {
            0.0
        };
        score += if volume_ratio >= 2.0 {
            2.0
        } else if volume_ratio >= 1.5 {
            1.0
        } else {
            0.0
        };

        let momentum = pct_change(closes[n - 2], close);
        if momentum >= 2.0 {
            score += 1.5;
        }
        if metrics.rs_rating.is_some_and(|r| r >= self.min_rs_rating) {
            score += 1.5;
        }

        let info = format!(
            "{distance:.2}% from 52-week high, volume {volume_ratio:.1}x, day {momentum:+.1}%"
        );
        if score < self.min_score {
            return Candidate::miss(self.id(), format!("{info}, scored {score:.1}"));
        }

        // The prior high being cleared
        let year_start = n.saturating_sub(BARS_PER_YEAR);
        let prior = argmax(series.high(), year_start..n - 1).unwrap_or(year_start);
        Candidate::hit(
            self.id(),
            score,
            info,
            Evidence::new(Direction::Bullish, prior, n - 1).pivot(series.high()[prior]),
        )
    }

    fn validate_config(&self) -> Result<()> {
        check_range("max_distance_pct", self.max_distance_pct, 0.0, 100.0)?;
        check_range(
            "strong_distance_pct",
            self.strong_distance_pct,
            0.0,
            self.max_distance_pct,
        )?;
        if self.volume_bars == 0 {
            return Err(crate::PatternError::InvalidConfig(
                "volume_bars must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::super::helpers::fixtures::{metrics, path, series, series_with};
    use super::*;

    fn scenario_vcp() -> PriceSeries {
        let closes = path(
            50.0,
            &[(230, 100.0), (12, 88.0), (20, 104.0), (8, 97.76), (30, 103.0)],
        );
        let mut volumes = vec![1_000_000.0; 262];
        volumes.extend(vec![400_000.0; closes.len() - 262]);
        series_with(closes, volumes, 1.005, 0.995)
    }

    #[test]
    fn test_vcp_two_shrinking_contractions() {
        let s = scenario_vcp();
        let m = metrics(&s);
        assert_eq!(m.contractions.len(), 2);
        assert!((m.contractions[0].depth_pct - 12.8756).abs() < 1e-3);
        assert!((m.contractions[1].depth_pct - 6.9353).abs() < 1e-3);
        assert!(m.volume_dry_up);

        let c = VcpDetector::default().detect(&s, &m);
        assert!(c.hit, "{}", c.info);
        // 4 + 3 (ratio 0.54) + 1.5 dry-up
        assert!((c.raw_score - 8.5).abs() < 1e-9);
        assert_eq!(c.evidence.pivot, Some(m.contractions[1].high));
    }

    #[test]
    fn test_vcp_insufficient_bars() {
        let s = series(path(50.0, &[(100, 100.0)]));
        let c = VcpDetector::default().detect(&s, &metrics(&s));
        assert!(!c.hit);
        assert_eq!(c.info, "need 120 bars, got 100");
    }

    #[test]
    fn test_vcp_expanding_pullbacks_miss() {
        let closes = path(
            50.0,
            &[(230, 100.0), (8, 95.0), (20, 104.0), (12, 90.0), (30, 103.0)],
        );
        let s = series(closes);
        let c = VcpDetector::default().detect(&s, &metrics(&s));
        assert!(!c.hit);
    }

    #[test]
    fn test_vcp_config_validation() {
        assert!(VcpDetector::with_defaults().validate_config().is_ok());
        let bad = VcpDetector {
            min_contractions: 1,
            ..Default::default()
        };
        assert!(bad.validate_config().is_err());
    }

    #[test]
    fn test_cup_and_handle() {
        let closes = path(
            70.0,
            &[(40, 100.0), (40, 78.0), (50, 99.0), (10, 93.0), (20, 98.5)],
        );
        let mut volumes = vec![1_000_000.0; 130];
        volumes.extend(vec![500_000.0; 30]);
        let s = series_with(closes, volumes, 1.005, 0.995);
        let c = CupHandleDetector::default().detect(&s, &metrics(&s));
        assert!(c.hit, "{}", c.info);
        // 7.5 + rims within 3% + quiet handle + depth in 15-33%
        assert!((c.raw_score - 9.0).abs() < 1e-9);
        assert!((c.evidence.depth_pct.unwrap() - 22.8).abs() < 0.1);
    }

    #[test]
    fn test_cup_too_deep() {
        let closes = path(
            70.0,
            &[(40, 100.0), (40, 40.0), (50, 99.0), (10, 93.0), (20, 98.5)],
        );
        let s = series(closes);
        let c = CupHandleDetector::default().detect(&s, &metrics(&s));
        assert!(!c.hit);
        assert_eq!(c.info, "cup depth 60.4% outside 12-45% range");
    }

    #[test]
    fn test_flat_base() {
        let s = series(path(80.0, &[(25, 100.0), (10, 96.0), (10, 99.0), (15, 100.0)]));
        let c = FlatBaseDetector::default().detect(&s, &metrics(&s));
        assert!(c.hit, "{}", c.info);
        assert!((c.raw_score - 7.3806).abs() < 1e-3);
        assert_eq!(c.evidence.span(), 35);
    }

    #[test]
    fn test_flat_base_too_deep() {
        let s = series(path(80.0, &[(25, 100.0), (10, 80.0), (25, 100.0)]));
        let c = FlatBaseDetector::default().detect(&s, &metrics(&s));
        assert!(!c.hit);
        assert!(c.info.contains("20.8%"), "{}", c.info);
    }

    #[test]
    fn test_breakout_on_volume() {
        let closes = path(50.0, &[(190, 99.0), (9, 99.5), (1, 101.5)]);
        let mut volumes = vec![1_000_000.0; 199];
        volumes.push(3_000_000.0);
        let mut highs: Vec<f64> = closes.iter().map(|c| c * 1.005).collect();
        highs[199] = closes[199];
        let lows: Vec<f64> = closes.iter().map(|c| c * 0.995).collect();
        let s = PriceSeries::new(closes.clone(), highs, lows, closes, volumes).unwrap();
        let c = BreakoutDetector::default().detect(&s, &metrics(&s));
        assert!(c.hit, "{}", c.info);
        // 2 + 2 (at the high) + 2 (3x volume) + 1.5 (day +2%)
        assert!((c.raw_score - 7.5).abs() < 1e-9);
        assert_eq!(c.evidence.start_index, 198);
    }

    #[test]
    fn test_breakout_too_far_from_high() {
        let s = series(path(50.0, &[(190, 99.0), (10, 95.0)]));
        let c = BreakoutDetector::default().detect(&s, &metrics(&s));
        assert!(!c.hit);
        assert!(c.info.contains("below 52-week high"));
    }
}
