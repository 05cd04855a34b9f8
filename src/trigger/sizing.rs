//! Buy size, hold duration and slippage heuristics

use std::time::Duration;

/// Amount of SOL at which the hold curves reach their extremes
const REFERENCE_SOL: f64 = 2.0;

/// Dev-buy discount applied to the maximum buy
const DEV_BUY_WEIGHT: f64 = 0.4;

/// How the hold duration reacts to the size of the trade that fired the trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldCurve {
    /// Smaller trades hold longer
    Negative,
    /// Larger trades hold longer
    Positive,
}

impl HoldCurve {
    fn factor(self, sol: f64) -> f64 {
        let ratio = sol / REFERENCE_SOL;
        match self {
            Self::Negative => 1.0 - ratio,
            Self::Positive => ratio,
        }
    }
}

/// `min + (max - min)·factor`, clamped to `[min, max]`. Zero for `sol <= 0`.
pub fn hold_duration(sol: f64, min: Duration, max: Duration, curve: HoldCurve) -> Duration {
    if !(sol > 0.0) {
        return Duration::ZERO;
    }
    if max <= min {
        return min;
    }
    let span = (max - min).as_nanos() as f64;
    let offset = (span * curve.factor(sol) + 0.5).max(0.0);
    let hold = min.saturating_add(Duration::from_nanos(offset.min(u64::MAX as f64) as u64));
    hold.clamp(min, max)
}

/// Buy less the more the dev bought: `max(max_sol - 0.4·dev_sol, min_sol)`
pub fn dynamic_buy_amount(dev_buy_sol: f64, min_sol: f64, max_sol: f64) -> f64 {
    (max_sol - DEV_BUY_WEIGHT * dev_buy_sol).max(min_sol)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicSlippageInput {
    /// Bots seen on recent launches
    pub bot_count: u32,
    /// Quote-side liquidity of the pool, SOL
    pub liquidity_sol: f64,
    /// Share of the creator's previous launches that rugged, 0..1
    pub creator_rug_rate: f64,
    /// Local hour 0..23
    pub hour: u32,
    /// Market heat score, 0..1
    pub trend_score: f64,
}

const BASE_SLIPPAGE: f64 = 0.005;
const MIN_SLIPPAGE: f64 = 0.001;
const MAX_SLIPPAGE: f64 = 0.2;

/// Recommended slippage as a fraction (0.12 = 12%)
pub fn dynamic_slippage(input: &DynamicSlippageInput) -> f64 {
    let mut slippage = BASE_SLIPPAGE;

    if input.bot_count > 4 {
        slippage += 0.05;
    }
    if input.liquidity_sol < 10.0 {
        slippage += 0.05;
    }
    if input.creator_rug_rate < 0.2 {
        slippage += 0.02;
    } else if input.creator_rug_rate > 0.6 {
        slippage -= 0.02;
    }
    if input.hour <= 6 {
        slippage -= 0.01;
    }
    if input.trend_score > 0.8 {
        slippage += 0.05;
    } else if input.trend_score < 0.2 {
        slippage -= 0.02;
    }

    slippage.clamp(MIN_SLIPPAGE, MAX_SLIPPAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_millis(500);
    const MAX: Duration = Duration::from_millis(2_500);

    #[test]
    fn test_negative_curve_holds_small_buys_longer() {
        let small = hold_duration(0.5, MIN, MAX, HoldCurve::Negative);
        let large = hold_duration(1.5, MIN, MAX, HoldCurve::Negative);
        assert!(small > large);
        assert_eq!(hold_duration(2.0, MIN, MAX, HoldCurve::Negative), MIN);
        assert_eq!(hold_duration(5.0, MIN, MAX, HoldCurve::Negative), MIN);
        assert_eq!(hold_duration(1.0, MIN, MAX, HoldCurve::Negative), Duration::from_millis(1_500));
    }

    #[test]
    fn test_positive_curve_clamps_at_max() {
        assert_eq!(hold_duration(1.0, MIN, MAX, HoldCurve::Positive), Duration::from_millis(1_500));
        assert_eq!(hold_duration(10.0, MIN, MAX, HoldCurve::Positive), MAX);
    }

    #[test]
    fn test_hold_is_zero_without_size() {
        assert_eq!(hold_duration(0.0, MIN, MAX, HoldCurve::Negative), Duration::ZERO);
        assert_eq!(hold_duration(-1.0, MIN, MAX, HoldCurve::Positive), Duration::ZERO);
        assert_eq!(hold_duration(f64::NAN, MIN, MAX, HoldCurve::Positive), Duration::ZERO);
    }

    #[test]
    fn test_dynamic_buy_amount() {
        assert!((dynamic_buy_amount(1.0, 0.1, 1.0) - 0.6).abs() < 1e-9);
        assert_eq!(dynamic_buy_amount(3.0, 0.1, 1.0), 0.1);
    }

    #[test]
    fn test_dynamic_slippage_bounds() {
        let hot = DynamicSlippageInput {
            bot_count: 10,
            liquidity_sol: 1.0,
            creator_rug_rate: 0.0,
            hour: 12,
            trend_score: 1.0,
        };
        assert!((dynamic_slippage(&hot) - 0.175).abs() < 1e-9);

        let cold = DynamicSlippageInput {
            bot_count: 0,
            liquidity_sol: 100.0,
            creator_rug_rate: 0.9,
            hour: 3,
            trend_score: 0.0,
        };
        assert_eq!(dynamic_slippage(&cold), MIN_SLIPPAGE);
    }
}
