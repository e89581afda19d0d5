//! Converging-line patterns: rising/falling wedges and ascending/symmetrical triangles
//!
//! All four read a [`SwingChannel`]: resistance fitted through swing highs, support
//! through swing lows, slopes in percent of the mean close per bar.

use super::helpers::{check_range, insufficient, SwingChannel};
use crate::{
    metrics::TechnicalMetrics, Candidate, Direction, Evidence, PatternDetector, PatternId,
    PriceSeries, Result,
};

impl_with_defaults!(
    RisingWedgeDetector,
    FallingWedgeDetector,
    AscendingTriangleDetector,
    SymmetricalTriangleDetector,
);

/// Late channel width must be at most this fraction of the early width
pub const DEFAULT_MAX_WIDTH_RATIO: f64 = 0.85;

fn few_swings(id: PatternId, window: usize) -> Candidate {
    Candidate::miss(id, format!("fewer than two swing highs and lows in {window} bars"))
}

fn slopes_info(channel: &SwingChannel) -> String {
    format!(
        "resistance {:+.3}%/bar, support {:+.3}%/bar",
        channel.resistance_slope_pct, channel.support_slope_pct
    )
}

fn validate_channel(window: usize, max_width_ratio: f64) -> Result<()> {
    if window < 10 {
        return Err(crate::PatternError::InvalidConfig(format!(
            "channel window {window} too short for swing points"
        )));
    }
    check_range("max_width_ratio", max_width_ratio, 0.0, 1.0)
}

// ============================================================
// WEDGES
// ============================================================

#[derive(Debug, Clone, Copy)]
struct WedgeRules {
    window: usize,
    min_slope_pct: f64,
    min_slope_ratio: f64,
    max_width_ratio: f64,
}

/// Both lines slope the same way; the trailing line is steeper and catches up.
///
/// Rising: support steeper than resistance. Falling: resistance steeper than support.
fn detect_wedge(
    id: PatternId,
    rising: bool,
    rules: WedgeRules,
    series: &PriceSeries,
) -> Candidate {
    let Some(channel) = SwingChannel::fit(series, rules.window) else {
        return few_swings(id, rules.window);
    };
    let sh = channel.resistance_slope_pct;
    let sl = channel.support_slope_pct;

    let (same_sign, converging) = if rising {
        (
            sh >= rules.min_slope_pct && sl >= rules.min_slope_pct,
            sl > sh && sh / sl > rules.min_slope_ratio,
        )
    } else {
        (
            sh <= -rules.min_slope_pct && sl <= -rules.min_slope_pct,
            sh < sl && sl / sh > rules.min_slope_ratio,
        )
    };
    if !same_sign {
        return Candidate::miss(id, format!("slopes not aligned: {}", slopes_info(&channel)));
    }
    if !converging {
        return Candidate::miss(id, format!("lines not converging: {}", slopes_info(&channel)));
    }
    if !channel.contracting(rules.max_width_ratio) {
        return Candidate::miss(
            id,
            format!("range not contracting: width ratio {:.2}", channel.width_ratio()),
        );
    }

    let score = (6.0 + (channel.shrink() * 10.0).min(3.5)).min(9.5);
    let n = series.len();
    let (direction, pivot) = if rising {
        (Direction::Bearish, channel.support_now())
    } else {
        (Direction::Bullish, channel.resistance_now())
    };
    Candidate::hit(
        id,
        score,
        format!(
            "{}, width ratio {:.2}",
            slopes_info(&channel),
            channel.width_ratio()
        ),
        Evidence::new(direction, channel.start, n - 1)
            .pivot(pivot)
            .floor(channel.support_now()),
    )
}

/// Rising wedge: both lines up, support steeper. Bearish.
#[derive(Debug, Clone)]
pub struct RisingWedgeDetector {
    pub window: usize,
    /// Minimum slope magnitude of either line, %/bar
    pub min_slope_pct: f64,
    /// Flatter slope over steeper slope must exceed this
    pub min_slope_ratio: f64,
    pub max_width_ratio: f64,
}

impl Default for RisingWedgeDetector {
    fn default() -> Self {
        Self {
            window: 40,
            min_slope_pct: 0.1,
            min_slope_ratio: 0.8,
            max_width_ratio: DEFAULT_MAX_WIDTH_RATIO,
        }
    }
}

impl RisingWedgeDetector {
    fn rules(&self) -> WedgeRules {
        WedgeRules {
            window: self.window,
            min_slope_pct: self.min_slope_pct,
            min_slope_ratio: self.min_slope_ratio,
            max_width_ratio: self.max_width_ratio,
        }
    }
}

impl PatternDetector for RisingWedgeDetector {
    fn id(&self) -> PatternId {
        PatternId::RISING_WEDGE
    }

    fn min_bars(&self) -> usize {
        60
    }

    fn detect(&self, series: &PriceSeries, _metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        detect_wedge(self.id(), true, self.rules(), series)
    }

    fn validate_config(&self) -> Result<()> {
        validate_channel(self.window, self.max_width_ratio)?;
        check_range("min_slope_ratio", self.min_slope_ratio, 0.0, 1.0)
    }
}

/// Falling wedge: both lines down, resistance steeper. Bullish.
#[derive(Debug, Clone)]
pub struct FallingWedgeDetector {
    pub window: usize,
    pub min_slope_pct: f64,
    pub min_slope_ratio: f64,
    pub max_width_ratio: f64,
}

impl Default for FallingWedgeDetector {
    fn default() -> Self {
        Self {
            window: 40,
            min_slope_pct: 0.1,
            min_slope_ratio: 0.8,
            max_width_ratio: DEFAULT_MAX_WIDTH_RATIO,
        }
    }
}

impl FallingWedgeDetector {
    fn rules(&self) -> WedgeRules {
        WedgeRules {
            window: self.window,
            min_slope_pct: self.min_slope_pct,
            min_slope_ratio: self.min_slope_ratio,
            max_width_ratio: self.max_width_ratio,
        }
    }
}

impl PatternDetector for FallingWedgeDetector {
    fn id(&self) -> PatternId {
        PatternId::FALLING_WEDGE
    }

    fn min_bars(&self) -> usize {
        60
    }

    fn detect(&self, series: &PriceSeries, _metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        detect_wedge(self.id(), false, self.rules(), series)
    }

    fn validate_config(&self) -> Result<()> {
        validate_channel(self.window, self.max_width_ratio)?;
        check_range("min_slope_ratio", self.min_slope_ratio, 0.0, 1.0)
    }
}

// ============================================================
// TRIANGLES
// ============================================================

/// Flat resistance over rising support
#[derive(Debug, Clone)]
pub struct AscendingTriangleDetector {
    pub window: usize,
    /// Largest resistance slope magnitude that still counts as flat, %/bar
    pub flat_tolerance_pct: f64,
    pub min_support_slope_pct: f64,
    pub max_width_ratio: f64,
}

impl Default for AscendingTriangleDetector {
    fn default() -> Self {
        Self {
            window: 50,
            flat_tolerance_pct: 0.03,
            min_support_slope_pct: 0.05,
            max_width_ratio: DEFAULT_MAX_WIDTH_RATIO,
        }
    }
}

impl PatternDetector for AscendingTriangleDetector {
    fn id(&self) -> PatternId {
        PatternId::ASCENDING_TRIANGLE
    }

    fn min_bars(&self) -> usize {
        70
    }

    fn detect(&self, series: &PriceSeries, _metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        let Some(channel) = SwingChannel::fit(series, self.window) else {
            return few_swings(self.id(), self.window);
        };
        if !(channel.resistance_slope_pct.abs() <= self.flat_tolerance_pct
            && channel.support_slope_pct >= self.min_support_slope_pct)
        {
            return Candidate::miss(
                self.id(),
                format!("not flat over rising: {}", slopes_info(&channel)),
            );
        }
        if !channel.contracting(self.max_width_ratio) {
            return Candidate::miss(
                self.id(),
                format!("range not contracting: width ratio {:.2}", channel.width_ratio()),
            );
        }

        let score = (6.5 + (channel.shrink() * 8.0).min(2.7)).min(9.2);
        Candidate::hit(
            self.id(),
            score,
            format!(
                "{}, width ratio {:.2}",
                slopes_info(&channel),
                channel.width_ratio()
            ),
            Evidence::new(Direction::Bullish, channel.start, n - 1)
                .pivot(channel.resistance_now())
                .floor(channel.support_now()),
        )
    }

    fn validate_config(&self) -> Result<()> {
        validate_channel(self.window, self.max_width_ratio)
    }
}

/// Falling resistance over rising support
#[derive(Debug, Clone)]
pub struct SymmetricalTriangleDetector {
    pub window: usize,
    /// Minimum slope magnitude of either line, %/bar
    pub min_slope_pct: f64,
    pub max_width_ratio: f64,
}

impl Default for SymmetricalTriangleDetector {
    fn default() -> Self {
        Self {
            window: 50,
            min_slope_pct: 0.03,
            max_width_ratio: DEFAULT_MAX_WIDTH_RATIO,
        }
    }
}

impl PatternDetector for SymmetricalTriangleDetector {
    fn id(&self) -> PatternId {
        PatternId::SYMMETRICAL_TRIANGLE
    }

    fn min_bars(&self) -> usize {
        70
    }

    fn detect(&self, series: &PriceSeries, _metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        let Some(channel) = SwingChannel::fit(series, self.window) else {
            return few_swings(self.id(), self.window);
        };
        if !(channel.resistance_slope_pct <= -self.min_slope_pct
            && channel.support_slope_pct >= self.min_slope_pct)
        {
            return Candidate::miss(
                self.id(),
                format!("lines not converging: {}", slopes_info(&channel)),
            );
        }
        if !channel.contracting(self.max_width_ratio) {
            return Candidate::miss(
                self.id(),
                format!("range not contracting: width ratio {:.2}", channel.width_ratio()),
            );
        }

        let score = (6.0 + (channel.shrink() * 8.0).min(3.0)).min(9.0);
        Candidate::hit(
            self.id(),
            score,
            format!(
                "{}, width ratio {:.2}",
                slopes_info(&channel),
                channel.width_ratio()
            ),
            Evidence::new(Direction::Neutral, channel.start, n - 1)
                .pivot(channel.resistance_now())
                .floor(channel.support_now()),
        )
    }

    fn validate_config(&self) -> Result<()> {
        validate_channel(self.window, self.max_width_ratio)
    }
}

// ============================================================
// TESTS
// ============================================================
