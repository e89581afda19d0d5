//! Post-detection filter pipeline
//!
//! Six predicates run in a fixed order: width, price, volume, height, breakout direction,
//! Weinstein stage. A stage whose config keys are all absent passes everything through.
//! A candidate missing the field a stage needs is dropped and logged, never errored.

use crate::{finite, Evidence, PatternError, Result};

// ============================================================
// CANDIDATE VIEW
// ============================================================

/// Which side of its pivot a pattern has resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakoutDirection {
    Up,
    Down,
    Pending,
    /// No pattern, or a pattern without a pivot
    #[serde(rename = "none")]
    NotApplicable,
}

impl BreakoutDirection {
    /// Bullish and neutral patterns break up through the pivot, bearish ones break down
    /// through it. Neutral patterns also break down below their floor.
    pub fn from_evidence(evidence: &Evidence, close: f64) -> Self {
        let Some(pivot) = evidence.pivot else {
            return BreakoutDirection::NotApplicable;
        };
        match evidence.direction {
            crate::Direction::Bullish if close > pivot => BreakoutDirection::Up,
            crate::Direction::Bearish if close < pivot => BreakoutDirection::Down,
            crate::Direction::Neutral if close > pivot => BreakoutDirection::Up,
            crate::Direction::Neutral if evidence.floor.is_some_and(|f| close < f) => {
                BreakoutDirection::Down
            }
            _ => BreakoutDirection::Pending,
        }
    }

    #[inline]
    pub fn is_resolved(self) -> bool {
        matches!(self, BreakoutDirection::Up | BreakoutDirection::Down)
    }
}

/// Flat, optional-field view of a detected pattern.
///
/// Built by the engine for every hit, or deserialized from an external dictionary.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ChartCandidate {
    pub ticker: Option<String>,
    /// Pattern name
    #[serde(alias = "pattern", alias = "pattern_name")]
    pub name: Option<String>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub price: Option<f64>,
    /// Pattern width in bars
    #[serde(alias = "width_days")]
    pub width: Option<usize>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub avg_volume: Option<f64>,
    /// Pattern height in price units
    #[serde(serialize_with = "finite::option::serialize")]
    pub height: Option<f64>,
    pub breakout_direction: Option<BreakoutDirection>,
    /// Weinstein stage 1..=4
    pub stage: Option<u8>,
    /// Advance into the pattern, %
    #[serde(serialize_with = "finite::option::serialize")]
    pub prior_trend_pct: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub trend_r2: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub base_depth_pct: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub high: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub low: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub close: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub year_high: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub year_low: Option<f64>,
    /// Last volume over the 50-bar mean
    #[serde(serialize_with = "finite::option::serialize")]
    pub volume_ratio: Option<f64>,
    /// Close below the pattern high, %
    #[serde(serialize_with = "finite::option::serialize")]
    pub throwback_pct: Option<f64>,
    /// Close above the pivot, %
    #[serde(serialize_with = "finite::option::serialize")]
    pub breakout_gap_pct: Option<f64>,
    #[serde(serialize_with = "finite::option::serialize")]
    pub market_cap: Option<f64>,
}

impl ChartCandidate {
    /// Height as a percentage of price
    pub fn height_pct(&self) -> Option<f64> {
        let (height, price) = (self.height?, self.price?);
        (price > 0.0).then(|| height / price * 100.0)
    }
}

// ============================================================
// CONFIG
// ============================================================

/// Per-stage thresholds. Every key is optional; an absent key disables its check.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_width: Option<usize>,
    pub max_width: Option<usize>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_avg_volume: Option<f64>,
    pub min_height_pct: Option<f64>,
    pub max_height_pct: Option<f64>,
    /// Required breakout direction
    pub breakout_direction: Option<BreakoutDirection>,
    /// With `breakout_direction` set, also keep pending and not-applicable candidates
    pub include_pending: bool,
    /// Allowed Weinstein stages
    pub stages: Option<Vec<u8>>,
}

impl FilterConfig {
    /// True when no stage is active
    pub fn is_empty(&self) -> bool {
        self.min_width.is_none()
            && self.max_width.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
            && self.min_avg_volume.is_none()
            && self.min_height_pct.is_none()
            && self.max_height_pct.is_none()
            && self.breakout_direction.is_none()
            && self.stages.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        fn ordered<T: PartialOrd + std::fmt::Display>(
            name: &str,
            min: Option<T>,
            max: Option<T>,
        ) -> Result<()> {
            match (min, max) {
                (Some(lo), Some(hi)) if lo > hi => Err(PatternError::InvalidConfig(format!(
                    "min_{name} {lo} exceeds max_{name} {hi}"
                ))),
                _ => Ok(()),
            }
        }
        ordered("width", self.min_width, self.max_width)?;
        ordered("price", self.min_price, self.max_price)?;
        ordered("height_pct", self.min_height_pct, self.max_height_pct)?;
        if let Some(stages) = &self.stages {
            if let Some(bad) = stages.iter().find(|s| !(1..=4).contains(*s)) {
                return Err(PatternError::InvalidConfig(format!(
                    "stage {bad} outside 1..=4"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================
// FILTER
// ============================================================

/// Stateless filter over a validated config
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    config: FilterConfig,
}

impl PatternFilter {
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn apply(&self, candidates: Vec<ChartCandidate>) -> Vec<ChartCandidate> {
        self.apply_by(candidates, |c| c)
    }

    /// Filter any items that expose a [`ChartCandidate`]; survivors keep their order.
    pub fn apply_by<T, F>(&self, mut items: Vec<T>, view: F) -> Vec<T>
    where
        F: Fn(&T) -> &ChartCandidate,
    {
        let cfg = &self.config;

        if cfg.min_width.is_some() || cfg.max_width.is_some() {
            retain_stage(&mut items, &view, "width", "width", |c| {
                let w = c.width?;
                Some(within(w, cfg.min_width, cfg.max_width))
            });
        }

        if cfg.min_price.is_some() || cfg.max_price.is_some() {
            retain_stage(&mut items, &view, "price", "price", |c| {
                let p = c.price.filter(|p| p.is_finite())?;
                Some(within(p, cfg.min_price, cfg.max_price))
            });
        }

        if let Some(min) = cfg.min_avg_volume {
            retain_stage(&mut items, &view, "volume", "avg_volume", |c| {
                let v = c.avg_volume.filter(|v| v.is_finite())?;
                Some(v >= min)
            });
        }

        if cfg.min_height_pct.is_some() || cfg.max_height_pct.is_some() {
            retain_stage(&mut items, &view, "height", "height", |c| {
                let h = c.height_pct().filter(|h| h.is_finite())?;
                Some(within(h, cfg.min_height_pct, cfg.max_height_pct))
            });
        }

        if let Some(wanted) = cfg.breakout_direction {
            retain_stage(
                &mut items,
                &view,
                "direction",
                "breakout_direction",
                |c| {
                    let d = c.breakout_direction?;
                    Some(d == wanted || (cfg.include_pending && !d.is_resolved()))
                },
            );
        }

        if let Some(stages) = &cfg.stages {
            retain_stage(&mut items, &view, "stage", "stage", |c| {
                let s = c.stage?;
                Some(stages.contains(&s))
            });
        }

        items
    }
}

/// Filter with an explicit config, skipping validation
pub fn apply_filters(
    candidates: Vec<ChartCandidate>,
    config: &FilterConfig,
) -> Vec<ChartCandidate> {
    PatternFilter {
        config: config.clone(),
    }
    .apply(candidates)
}

#[inline]
fn within<T: PartialOrd>(value: T, min: Option<T>, max: Option<T>) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

/// Keep items whose predicate holds. `None` means the field was missing: drop and log.
fn retain_stage<T, V, P>(
    items: &mut Vec<T>,
    view: &V,
    stage: &'static str,
    field: &'static str,
    predicate: P,
) where
    V: Fn(&T) -> &ChartCandidate,
    P: Fn(&ChartCandidate) -> Option<bool>,
{
    items.retain(|item| {
        let candidate = view(item);
        match predicate(candidate) {
            Some(keep) => keep,
            None => {
                tracing::debug!(
                    stage,
                    field,
                    ticker = candidate.ticker.as_deref().unwrap_or("?"),
                    "candidate missing field, dropped"
                );
                false
            }
        }
    });
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Direction;

    fn priced(ticker: &str, price: f64) -> ChartCandidate {
        ChartCandidate {
            ticker: Some(ticker.into()),
            price: Some(price),
            ..Default::default()
        }
    }

    #[test]
    fn test_min_price_from_json() {
        let config: FilterConfig = serde_json::from_str(r#"{"min_price": 30}"#).unwrap();
        let kept = apply_filters(vec![priced("A", 150.0), priced("B", 20.0)], &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ticker.as_deref(), Some("A"));
    }

    #[test]
    fn test_empty_config_passes_everything() {
        let config = FilterConfig::default();
        assert!(config.is_empty());
        let input = vec![ChartCandidate::default(), priced("A", 1.0)];
        assert_eq!(apply_filters(input.clone(), &config), input);
    }

    #[test]
    fn test_missing_field_is_dropped() {
        let config = FilterConfig {
            min_width: Some(10),
            ..Default::default()
        };
        let mut wide = priced("W", 10.0);
        wide.width = Some(30);
        let kept = apply_filters(vec![wide, priced("NOWIDTH", 10.0)], &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ticker.as_deref(), Some("W"));
    }

    #[test]
    fn test_height_pct_stage() {
        let config = FilterConfig {
            min_height_pct: Some(10.0),
            max_height_pct: Some(40.0),
            ..Default::default()
        };
        let mut a = priced("A", 100.0);
        a.height = Some(20.0);
        let mut b = priced("B", 100.0);
        b.height = Some(5.0);
        let kept = apply_filters(vec![a, b], &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].height_pct(), Some(20.0));
    }

    #[test]
    fn test_direction_with_pending_toggle() {
        let with = |t: &str, d| ChartCandidate {
            ticker: Some(t.into()),
            breakout_direction: Some(d),
            ..Default::default()
        };
        let input = vec![
            with("UP", BreakoutDirection::Up),
            with("PENDING", BreakoutDirection::Pending),
            with("DOWN", BreakoutDirection::Down),
            with("NA", BreakoutDirection::NotApplicable),
        ];
        let mut config = FilterConfig {
            breakout_direction: Some(BreakoutDirection::Up),
            ..Default::default()
        };
        assert_eq!(apply_filters(input.clone(), &config).len(), 1);
        config.include_pending = true;
        let kept = apply_filters(input, &config);
        let tickers: Vec<_> = kept.iter().filter_map(|c| c.ticker.as_deref()).collect();
        assert_eq!(tickers, vec!["UP", "PENDING", "NA"]);
    }

    #[test]
    fn test_stage_filter_and_validation() {
        let config: FilterConfig = serde_json::from_str(r#"{"stages": [2]}"#).unwrap();
        let mut a = priced("A", 1.0);
        a.stage = Some(2);
        let mut b = priced("B", 1.0);
        b.stage = Some(4);
        assert_eq!(apply_filters(vec![a, b], &config).len(), 1);

        assert!(PatternFilter::new(FilterConfig {
            stages: Some(vec![5]),
            ..Default::default()
        })
        .is_err());
        assert!(PatternFilter::new(FilterConfig {
            min_price: Some(50.0),
            max_price: Some(10.0),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_breakout_direction_from_evidence() {
        let bull = Evidence::new(Direction::Bullish, 0, 10).pivot(100.0);
        assert_eq!(BreakoutDirection::from_evidence(&bull, 101.0), BreakoutDirection::Up);
        assert_eq!(BreakoutDirection::from_evidence(&bull, 99.0), BreakoutDirection::Pending);

        let bear = Evidence::new(Direction::Bearish, 0, 10).pivot(100.0);
        assert_eq!(BreakoutDirection::from_evidence(&bear, 99.0), BreakoutDirection::Down);

        let neutral = Evidence::new(Direction::Neutral, 0, 10).pivot(100.0).floor(90.0);
        assert_eq!(BreakoutDirection::from_evidence(&neutral, 89.0), BreakoutDirection::Down);
        assert_eq!(BreakoutDirection::from_evidence(&neutral, 95.0), BreakoutDirection::Pending);

        let bare = Evidence::new(Direction::Bullish, 0, 10);
        assert_eq!(
            BreakoutDirection::from_evidence(&bare, 1.0),
            BreakoutDirection::NotApplicable
        );
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&BreakoutDirection::NotApplicable).unwrap(),
            "\"none\""
        );
        let c: ChartCandidate =
            serde_json::from_str(r#"{"pattern": "VCP", "price": 12.5}"#).unwrap();
        assert_eq!(c.name.as_deref(), Some("VCP"));
    }
}
