//! Head & Shoulders reversal patterns

use super::helpers::{check_range, insufficient};
use crate::{
    metrics::{local_highs, local_lows, max_of, min_of, tail, TechnicalMetrics, SWING_HALF_WINDOW},
    Candidate, Direction, Evidence, PatternDetector, PatternId, PriceSeries, Result,
};

impl_with_defaults!(HeadShouldersDetector, InverseHeadShouldersDetector);

/// Three consecutive swing points forming left shoulder, head, right shoulder
#[derive(Debug, Clone, Copy)]
struct Formation {
    left: usize,
    head: usize,
    right: usize,
}

#[derive(Debug, Clone, Copy)]
struct ShoulderRules {
    window: usize,
    min_head_excess: f64,
    max_shoulder_diff: f64,
    min_leg_bars: usize,
}

/// Newest qualifying triple among the swing points of `values`.
///
/// `inverted` looks for a head below the shoulders.
fn find_formation(values: &[f64], rules: ShoulderRules, inverted: bool) -> Option<Formation> {
    let swings = if inverted {
        local_lows(values, SWING_HALF_WINDOW)
    } else {
        local_highs(values, SWING_HALF_WINDOW)
    };

    swings.windows(3).rev().find_map(|w| {
        let (a, b, c) = (w[0], w[1], w[2]);
        let (l, h, r) = (values[a], values[b], values[c]);
        let shaped = if inverted {
            h <= (1.0 - rules.min_head_excess) * l.min(r)
                && (l - r).abs() / l.min(r) <= rules.max_shoulder_diff
        } else {
            h >= (1.0 + rules.min_head_excess) * l.max(r)
                && (l - r).abs() / l.max(r) <= rules.max_shoulder_diff
        };
        let legs = b - a >= rules.min_leg_bars && c - b >= rules.min_leg_bars;
        (shaped && legs).then_some(Formation {
            left: a,
            head: b,
            right: c,
        })
    })
}

fn formation_score(f: Formation) -> f64 {
    (6.5 + ((f.right - f.left) as f64 / 20.0).min(2.5)).min(9.0)
}

fn validate_rules(rules: ShoulderRules) -> Result<()> {
    check_range("min_head_excess", rules.min_head_excess, 0.0, 1.0)?;
    check_range("max_shoulder_diff", rules.max_shoulder_diff, 0.0, 1.0)?;
    if rules.window < 3 * (2 * SWING_HALF_WINDOW + 1) {
        return Err(crate::PatternError::InvalidConfig(format!(
            "window {} too short for three swing points",
            rules.window
        )));
    }
    Ok(())
}

// ============================================================
// HEAD & SHOULDERS
// ============================================================

/// Three swing highs, the middle one highest. Bearish; pivot is the neckline.
#[derive(Debug, Clone)]
pub struct HeadShouldersDetector {
    pub window: usize,
    /// Head must exceed the higher shoulder by this fraction
    pub min_head_excess: f64,
    /// Shoulders may differ by at most this fraction
    pub max_shoulder_diff: f64,
    pub min_leg_bars: usize,
}

impl Default for HeadShouldersDetector {
    fn default() -> Self {
        Self {
            window: 100,
            min_head_excess: 0.02,
            max_shoulder_diff: 0.05,
            min_leg_bars: 5,
        }
    }
}

impl HeadShouldersDetector {
    fn rules(&self) -> ShoulderRules {
        ShoulderRules {
            window: self.window,
            min_head_excess: self.min_head_excess,
            max_shoulder_diff: self.max_shoulder_diff,
            min_leg_bars: self.min_leg_bars,
        }
    }
}

impl PatternDetector for HeadShouldersDetector {
    fn id(&self) -> PatternId {
        PatternId::HEAD_SHOULDERS
    }

    fn min_bars(&self) -> usize {
        110
    }

    fn detect(&self, series: &PriceSeries, _metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        let highs = tail(series.high(), self.window);
        let base = n - highs.len();
        let Some(f) = find_formation(highs, self.rules(), false) else {
            return Candidate::miss(self.id(), "no head above two matching shoulders");
        };

        let lows = &series.low()[base + f.left..=base + f.right];
        let neckline = min_of(lows);
        let head = highs[f.head];
        Candidate::hit(
            self.id(),
            formation_score(f),
            format!(
                "shoulders {:.2}/{:.2}, head {head:.2}, neckline {neckline:.2}",
                highs[f.left], highs[f.right]
            ),
            Evidence::new(Direction::Bearish, base + f.left, n - 1)
                .pivot(neckline)
                .floor(neckline)
                .depth_pct((head - neckline) / head * 100.0),
        )
    }

    fn validate_config(&self) -> Result<()> {
        validate_rules(self.rules())
    }
}

// ============================================================
// INVERSE HEAD & SHOULDERS
// ============================================================

/// Three swing lows, the middle one lowest. Bullish; pivot is the neckline.
#[derive(Debug, Clone)]
pub struct InverseHeadShouldersDetector {
    pub window: usize,
    /// Head must undercut the lower shoulder by this fraction
    pub min_head_excess: f64,
    pub max_shoulder_diff: f64,
    pub min_leg_bars: usize,
}

impl Default for InverseHeadShouldersDetector {
    fn default() -> Self {
        Self {
            window: 100,
            min_head_excess: 0.02,
            max_shoulder_diff: 0.05,
            min_leg_bars: 5,
        }
    }
}

impl InverseHeadShouldersDetector {
    fn rules(&self) -> ShoulderRules {
        ShoulderRules {
            window: self.window,
            min_head_excess: self.min_head_excess,
            max_shoulder_diff: self.max_shoulder_diff,
            min_leg_bars: self.min_leg_bars,
        }
    }
}

impl PatternDetector for InverseHeadShouldersDetector {
    fn id(&self) -> PatternId {
        PatternId::INVERSE_HEAD_SHOULDERS
    }

    fn min_bars(&self) -> usize {
        110
    }

    fn detect(&self, series: &PriceSeries, _metrics: &TechnicalMetrics) -> Candidate {
        let n = series.len();
        if n < self.min_bars() {
            return insufficient(self.id(), self.min_bars(), n);
        }
        let lows = tail(series.low(), self.window);
        let base = n - lows.len();
        let Some(f) = find_formation(lows, self.rules(), true) else {
            return Candidate::miss(self.id(), "no head below two matching shoulders");
        };

        let highs = &series.high()[base + f.left..=base + f.right];
        let neckline = max_of(highs);
        let head = lows[f.head];
        Candidate::hit(
            self.id(),
            formation_score(f),
            format!(
                "shoulders {:.2}/{:.2}, head {head:.2}, neckline {neckline:.2}",
                lows[f.left], lows[f.right]
            ),
            Evidence::new(Direction::Bullish, base + f.left, n - 1)
                .pivot(neckline)
                .floor(head)
                .depth_pct((neckline - head) / neckline * 100.0),
        )
    }

    fn validate_config(&self) -> Result<()> {
        validate_rules(self.rules())
    }
}

// ============================================================
// TESTS
// ============================================================
