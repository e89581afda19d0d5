//! Relative strength against a benchmark series

/// Bars required in both series
pub const RS_MIN_BARS: usize = 61;
/// Trailing window for the return comparison
pub const RS_LOOKBACK: usize = 60;
/// Rating that satisfies the eighth trend-template criterion
pub const RS_RATING_THRESHOLD: f64 = 70.0;
/// Label appended to `criteria_met` when the rating clears the threshold
pub const RS_CRITERION: &str = "RS rating >= 70";

/// Trailing-return outperformance of a ticker over its benchmark
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct RelativeStrength {
    /// (stock return - benchmark return) over the lookback, in percentage points
    pub rs: f64,
    /// Score bonus earned by the outperformance
    pub bonus: f64,
    /// `rs` mapped onto a 1..=99 rating centred on 50
    pub rating: f64,
}

/// Compare the 60-bar trailing return of `stock` against `benchmark`.
///
/// Returns `None` when either series has fewer than 61 bars or a base price is zero.
pub fn relative_strength(stock: &[f64], benchmark: &[f64]) -> Option<RelativeStrength> {
    if stock.len() < RS_MIN_BARS || benchmark.len() < RS_MIN_BARS {
        return None;
    }
    let rs = (trailing_return(stock)? - trailing_return(benchmark)?) * 100.0;
    if !rs.is_finite() {
        return None;
    }
    Some(RelativeStrength {
        rs,
        bonus: rs_bonus(rs),
        rating: (50.0 + rs).clamp(1.0, 99.0),
    })
}

fn trailing_return(closes: &[f64]) -> Option<f64> {
    let n = closes.len();
    let base = closes[n - 1 - RS_LOOKBACK];
    (base != 0.0).then(|| closes[n - 1] / base - 1.0)
}

/// +2 above 15 points of outperformance, +1 above 5, otherwise nothing.
#[inline]
pub fn rs_bonus(rs: f64) -> f64 {
    if rs > 15.0 {
        2.0
    } else if rs > 5.0 {
        1.0
    } else {
        0.0
    }
}

/// Final score = raw + bonus, held inside [0, 10]. Non-finite input scores 0.
#[inline]
pub fn apply_bonus(raw: f64, bonus: f64) -> f64 {
    let total = raw + bonus;
    if total.is_finite() {
        total.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_61_bars() {
        assert!(relative_strength(&[1.0; 60], &[1.0; 61]).is_none());
        assert!(relative_strength(&[1.0; 61], &[1.0; 60]).is_none());
        assert!(relative_strength(&[1.0; 61], &[1.0; 61]).is_some());
    }

    #[test]
    fn test_bonus_tiers() {
        let mut stock = vec![100.0; 61];
        let bench = vec![100.0; 61];

        stock[60] = 120.0;
        let rs = relative_strength(&stock, &bench).unwrap();
        assert!((rs.rs - 20.0).abs() < 1e-9);
        assert_eq!(rs.bonus, 2.0);
        assert!((rs.rating - 70.0).abs() < 1e-9);

        stock[60] = 110.0;
        assert_eq!(relative_strength(&stock, &bench).unwrap().bonus, 1.0);

        stock[60] = 104.0;
        assert_eq!(relative_strength(&stock, &bench).unwrap().bonus, 0.0);
    }

    #[test]
    fn test_zero_base_is_none() {
        let mut stock = vec![100.0; 61];
        stock[0] = 0.0;
        assert!(relative_strength(&stock, &[1.0; 61]).is_none());
    }

    #[test]
    fn test_apply_bonus_caps_at_ten() {
        assert_eq!(apply_bonus(9.5, 2.0), 10.0);
        assert_eq!(apply_bonus(6.0, 1.0), 7.0);
        assert_eq!(apply_bonus(f64::NAN, 1.0), 0.0);
    }
}
