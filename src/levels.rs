//! Entry, stop and target levels for a detected setup

use crate::metrics::{max_of, min_of, tail};

/// Bars scanned for the entry high
pub const ENTRY_LOOKBACK: usize = 10;
/// Bars scanned for the protective low
pub const STOP_LOOKBACK: usize = 20;
/// Stop floor as a fraction of entry (7% below)
pub const STOP_FRACTION: f64 = 0.93;
/// Target as a multiple of entry (15% above)
pub const TARGET_MULTIPLE: f64 = 1.15;

/// Price levels derived from the trailing bars
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct TradeLevels {
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub risk_reward: f64,
}

impl TradeLevels {
    /// Derive levels from aligned closes/highs/lows. `None` for an empty series.
    ///
    /// - entry: max(10-bar high, last close)
    /// - stop: the 20-bar low when it sits below `entry * 0.93`, else `entry * 0.93`
    /// - target: `entry * 1.15`
    pub fn derive(closes: &[f64], highs: &[f64], lows: &[f64]) -> Option<Self> {
        let price = *closes.last()?;
        let entry = max_of(tail(highs, ENTRY_LOOKBACK)).max(price);
        let recent_low = min_of(tail(lows, STOP_LOOKBACK));
        let floor = entry * STOP_FRACTION;
        let stop = if recent_low < floor { recent_low } else { floor };
        let target = entry * TARGET_MULTIPLE;
        Some(Self {
            entry,
            stop,
            target,
            risk_reward: risk_reward(entry, stop, target),
        })
    }
}

/// (target - entry) / (entry - stop), or 0 when the risk leg is empty or non-finite.
pub fn risk_reward(entry: f64, stop: f64, target: f64) -> f64 {
    let risk = entry - stop;
    if !risk.is_finite() || risk.abs() <= f64::EPSILON {
        return 0.0;
    }
    let ratio = (target - entry) / risk;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_is_trailing_high() {
        let closes = vec![100.0; 30];
        let mut highs = vec![101.0; 30];
        highs[25] = 108.0;
        let lows = vec![102.0; 30];
        let levels = TradeLevels::derive(&closes, &highs, &lows).unwrap();
        assert_eq!(levels.entry, 108.0);
        // 20-bar low sits above the 7% floor, so the floor is the stop
        assert!((levels.stop - 108.0 * 0.93).abs() < 1e-9);
        assert!((levels.target - 108.0 * 1.15).abs() < 1e-9);
        assert!((levels.risk_reward - 0.15 / 0.07).abs() < 1e-9);
    }

    #[test]
    fn test_recent_low_below_floor_is_stop() {
        let closes = vec![100.0; 30];
        let mut highs = vec![101.0; 30];
        highs[25] = 108.0;
        let lows = vec![99.0; 30];
        let levels = TradeLevels::derive(&closes, &highs, &lows).unwrap();
        assert_eq!(levels.stop, 99.0);
        assert!((levels.risk_reward - (108.0 * 1.15 - 108.0) / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_deep_recent_low_becomes_stop() {
        let closes = vec![100.0; 30];
        let highs = vec![101.0; 30];
        let mut lows = vec![99.0; 30];
        lows[15] = 80.0;
        let levels = TradeLevels::derive(&closes, &highs, &lows).unwrap();
        assert_eq!(levels.stop, 80.0);
    }

    #[test]
    fn test_risk_reward_guard() {
        assert_eq!(risk_reward(100.0, 100.0, 115.0), 0.0);
        assert_eq!(risk_reward(f64::NAN, 90.0, 115.0), 0.0);
        assert!(TradeLevels::derive(&[], &[], &[]).is_none());
    }
}
