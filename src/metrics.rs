//! Shared derived series consumed by every detector
//!
//! Everything here is recomputed per call and never cached. Moving averages degrade
//! below their period instead of failing: an SMA over fewer bars than its period is
//! the mean of the bars available, and an EMA is seeded with the first value.

use crate::PriceSeries;

// ============================================================
// CONSTANTS
// ============================================================

/// Trading bars in a calendar year (52-week window)
pub const BARS_PER_YEAR: usize = 252;
/// Trailing window scanned for the contraction sequence
pub const CONTRACTION_LOOKBACK: usize = 80;
/// Bars on each side of a local extremum (5-bar symmetric window)
pub const SWING_HALF_WINDOW: usize = 2;
/// Recent volume must fall below this share of the 50-bar mean to count as dry-up
pub const DRY_UP_RATIO: f64 = 0.8;
/// Closes used for the trend-quality fit
pub const TREND_FIT_BARS: usize = 60;

// ============================================================
// SLICE HELPERS
// ============================================================

/// Last `len` elements (or the whole slice when shorter)
#[inline]
pub fn tail(values: &[f64], len: usize) -> &[f64] {
    &values[values.len().saturating_sub(len)..]
}

/// Arithmetic mean, 0.0 for an empty slice
#[inline]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn pstdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

#[inline]
pub fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

#[inline]
pub fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

#[inline]
fn last(values: &[f64]) -> f64 {
    values.last().copied().unwrap_or(0.0)
}

// ============================================================
// MOVING AVERAGES
// ============================================================

/// Simple moving average aligned with `values`.
///
/// Index `i` holds the mean of `values[i + 1 - period..=i]`, or of every bar up to
/// `i` while fewer than `period` bars exist.
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    (0..values.len())
        .map(|i| {
            let window = &values[(i + 1).saturating_sub(period)..=i];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

/// Exponential moving average aligned with `values`, seeded with the first value.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        let next = match out.last() {
            Some(&prev) => v * alpha + prev * (1.0 - alpha),
            None => v,
        };
        out.push(next);
    }
    out
}

// ============================================================
// SWING POINTS AND REGRESSION
// ============================================================

/// Indices strictly greater than every other bar within `half_window` on each side.
pub fn local_highs(values: &[f64], half_window: usize) -> Vec<usize> {
    local_extrema(values, half_window, |center, other| center > other)
}

/// Indices strictly lower than every other bar within `half_window` on each side.
pub fn local_lows(values: &[f64], half_window: usize) -> Vec<usize> {
    local_extrema(values, half_window, |center, other| center < other)
}

fn local_extrema<F>(values: &[f64], half_window: usize, beats: F) -> Vec<usize>
where
    F: Fn(f64, f64) -> bool,
{
    let n = values.len();
    if n < 2 * half_window + 1 {
        return Vec::new();
    }
    (half_window..n - half_window)
        .filter(|&i| {
            (i - half_window..=i + half_window)
                .filter(|&j| j != i)
                .all(|j| beats(values[i], values[j]))
        })
        .collect()
}

/// Ordinary least-squares line `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    #[inline]
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// OLS fit over `(x, y)` points. `None` when x has no spread.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let x_mean = mean(xs);
    let y_mean = mean(ys);
    let den: f64 = xs.iter().map(|x| (x - x_mean) * (x - x_mean)).sum();
    if den == 0.0 {
        return None;
    }
    let num: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();
    let slope = num / den;
    Some(LinearFit {
        slope,
        intercept: y_mean - slope * x_mean,
    })
}

/// Coefficient of determination of `values` regressed on bar index.
pub fn r_squared(values: &[f64]) -> f64 {
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let Some(fit) = linear_fit(&xs, values) else {
        return 0.0;
    };
    let y_mean = mean(values);
    let ss_tot: f64 = values.iter().map(|y| (y - y_mean) * (y - y_mean)).sum();
    if ss_tot <= f64::EPSILON {
        return 0.0;
    }
    let ss_res: f64 = xs
        .iter()
        .zip(values)
        .map(|(x, y)| {
            let e = y - fit.at(*x);
            e * e
        })
        .sum();
    (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
}

// ============================================================
// CONTRACTION SEQUENCE
// ============================================================

/// One swing-high to swing-low pullback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contraction {
    /// Absolute bar index of the swing high
    pub high_index: usize,
    /// Absolute bar index of the swing low
    pub low_index: usize,
    pub high: f64,
    pub low: f64,
    /// Pullback depth in percent of the swing high
    pub depth_pct: f64,
}

/// Percentage pullbacks between successive swing highs and lows, oldest first.
///
/// Each swing high is paired with the lowest swing low that follows it before the
/// next swing high.
pub fn contraction_sequence(highs: &[f64], lows: &[f64], lookback: usize) -> Vec<Contraction> {
    let n = highs.len().min(lows.len());
    let start = n.saturating_sub(lookback);
    let window_highs = &highs[start..n];
    let window_lows = &lows[start..n];

    let swing_highs = local_highs(window_highs, SWING_HALF_WINDOW);
    let swing_lows = local_lows(window_lows, SWING_HALF_WINDOW);

    let mut out = Vec::new();
    for (k, &hi) in swing_highs.iter().enumerate() {
        let next_high = swing_highs.get(k + 1).copied().unwrap_or(window_highs.len());
        let mut lowest: Option<usize> = None;
        for &lo in swing_lows.iter().filter(|&&lo| lo > hi && lo < next_high) {
            if lowest.map_or(true, |best| window_lows[lo] < window_lows[best]) {
                lowest = Some(lo);
            }
        }
        let Some(lo) = lowest else { continue };
        let high = window_highs[hi];
        if high <= 0.0 {
            continue;
        }
        let low = window_lows[lo];
        out.push(Contraction {
            high_index: start + hi,
            low_index: start + lo,
            high,
            low,
            depth_pct: (high - low) / high * 100.0,
        });
    }
    out
}

// ============================================================
// TECHNICAL METRICS BUNDLE
// ============================================================

/// Read-only bundle of derived series shared by all detectors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechnicalMetrics {
    pub sma_50: Vec<f64>,
    pub sma_150: Vec<f64>,
    pub sma_200: Vec<f64>,
    pub ema_21: Vec<f64>,
    pub ema_50: Vec<f64>,
    pub above_sma_50: bool,
    pub above_sma_200: bool,
    pub high_52w: f64,
    pub low_52w: f64,
    /// Mean volume over the last 50 bars
    pub avg_volume_50: f64,
    /// 5-bar mean volume above the 20-bar mean
    pub volume_increasing: bool,
    /// 10-bar mean volume below 80% of the 50-bar mean
    pub volume_dry_up: bool,
    pub contractions: Vec<Contraction>,
    /// Lowest low of the last 30 bars
    pub support_30: f64,
    /// Lowest low of the last 5 bars
    pub support_5: f64,
    /// R² of the last 60 closes against bar index
    pub trend_r2: f64,
    /// Relative-strength rating (1..=99), present only when a benchmark was supplied
    pub rs_rating: Option<f64>,
}

impl TechnicalMetrics {
    pub fn compute(series: &PriceSeries) -> Self {
        if series.is_empty() {
            return Self::default();
        }
        let closes = series.close();
        let highs = series.high();
        let lows = series.low();
        let volumes = series.volume();
        let price = last(closes);

        let sma_50 = sma_series(closes, 50);
        let sma_200 = sma_series(closes, 200);
        let avg_volume_50 = mean(tail(volumes, 50));

        Self {
            above_sma_50: price > last(&sma_50),
            above_sma_200: price > last(&sma_200),
            sma_150: sma_series(closes, 150),
            ema_21: ema_series(closes, 21),
            ema_50: ema_series(closes, 50),
            high_52w: max_of(tail(highs, BARS_PER_YEAR)),
            low_52w: min_of(tail(lows, BARS_PER_YEAR)),
            avg_volume_50,
            volume_increasing: mean(tail(volumes, 5)) > mean(tail(volumes, 20)),
            volume_dry_up: mean(tail(volumes, 10)) < DRY_UP_RATIO * avg_volume_50,
            contractions: contraction_sequence(highs, lows, CONTRACTION_LOOKBACK),
            support_30: min_of(tail(lows, 30)),
            support_5: min_of(tail(lows, 5)),
            trend_r2: r_squared(tail(closes, TREND_FIT_BARS)),
            rs_rating: None,
            sma_50,
            sma_200,
        }
    }

    /// Attach a benchmark-derived RS rating
    pub fn with_rs_rating(mut self, rating: Option<f64>) -> Self {
        self.rs_rating = rating;
        self
    }
}

// ============================================================
// TESTS
// ============================================================
