//! Curve quoting engine
//!
//! Pure functions over integer amounts. Every intermediate runs in `U256` so
//! products of two `u64` reserves never overflow, and every division floors.
//! Degenerate inputs (a zero amount or reserve) quote zero instead of
//! panicking, and outputs never exceed the reserve they draw from.
//!
//! Prices that appear here as `f64` are display values only; the functions
//! that take them (`break_even_amount`) size an order, they never produce a
//! minimum-out bound.

use ethnum::U256;

/// Basis-point denominator
pub const FEE_DENOMINATOR: u64 = 10_000;

/// Protocol fee the bonding curve charges on both sides
pub const CURVE_FEE_BPS: u64 = 100;

/// Slippage values are doubled before they are applied
const SLIPPAGE_ADJUSTMENT: u64 = 2;

/// Added to every requested slippage, in hundredths of a percent
const SLIPPAGE_PADDING: u64 = 25;

/// Virtual base reserve of the launchpad curve
pub const LAUNCHPAD_VIRTUAL_BASE: u64 = 1_073_025_605_596_382;

/// Virtual quote reserve of the launchpad curve
pub const LAUNCHPAD_VIRTUAL_QUOTE: u64 = 30_000_852_951;

const PRICE_PRECISION: u128 = 1_000_000_000_000_000_000;

#[inline]
fn wide(v: u64) -> U256 {
    U256::from(v)
}

#[inline]
fn narrow(v: U256) -> u64 {
    if v > U256::from(u64::MAX) {
        u64::MAX
    } else {
        v.as_u64()
    }
}

/// Constant-product output with an input-side fee
///
/// `out = in·(10000−fee)·R_out / (R_in·10000 + in·(10000−fee))`
pub fn estimate_swap_out(amount_in: u64, reserve_in: u64, reserve_out: u64, fee_bps: u64) -> u64 {
    if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
        return 0;
    }
    let fee_bps = fee_bps.min(FEE_DENOMINATOR);
    let in_with_fee = wide(amount_in) * wide(FEE_DENOMINATOR - fee_bps);
    let numerator = in_with_fee * wide(reserve_out);
    let denominator = wide(reserve_in) * wide(FEE_DENOMINATOR) + in_with_fee;
    narrow(numerator / denominator).min(reserve_out)
}

/// Plain constant product without fee
pub fn get_amount_out(amount_in: u64, reserve_in: u64, reserve_out: u64) -> u64 {
    if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
        return 0;
    }
    let denominator = wide(reserve_in) + wide(amount_in);
    narrow(wide(amount_in) * wide(reserve_out) / denominator).min(reserve_out)
}

/// Tokens received for `sol_in` on the bonding curve
///
/// The curve keeps `v_sol·v_tok` invariant and rounds the new token reserve
/// up by one unit, so the buyer is never credited a fractional token.
pub fn quote_buy_by_curve(sol_in: u64, virtual_sol: u64, virtual_token: u64) -> u64 {
    if sol_in == 0 || virtual_sol == 0 || virtual_token == 0 {
        return 0;
    }
    let k = wide(virtual_sol) * wide(virtual_token);
    let new_token_reserve = k / (wide(virtual_sol) + wide(sol_in)) + U256::ONE;
    let out = wide(virtual_token).saturating_sub(new_token_reserve);
    narrow(out).min(virtual_token)
}

/// SOL received for `token_in` on the bonding curve, net of the protocol fee
pub fn quote_sell_by_curve(token_in: u64, virtual_sol: u64, virtual_token: u64) -> u64 {
    if token_in == 0 || virtual_sol == 0 || virtual_token == 0 {
        return 0;
    }
    let gross = wide(token_in) * wide(virtual_sol) / (wide(virtual_token) + wide(token_in));
    let fee = gross * wide(CURVE_FEE_BPS) / wide(FEE_DENOMINATOR);
    narrow(gross - fee).min(virtual_sol)
}

/// Deduct a basis-point fee from an input amount
pub fn deduct_fee(amount: u64, fee_bps: u64) -> u64 {
    let fee = wide(amount) * wide(fee_bps.min(FEE_DENOMINATOR)) / wide(FEE_DENOMINATOR);
    amount - narrow(fee)
}

/// Bonding-curve buy as the venue executes it: the curve fee comes out of the
/// input before quoting.
pub fn quote_curve_buy_after_fee(max_sol_in: u64, virtual_sol: u64, virtual_token: u64) -> u64 {
    quote_buy_by_curve(deduct_fee(max_sol_in, CURVE_FEE_BPS), virtual_sol, virtual_token)
}

/// Reserves of a launchpad pool once its real balances are folded into the
/// virtual curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchpadReserves {
    pub base: u64,
    pub quote: u64,
}

impl LaunchpadReserves {
    pub fn from_real(real_base: u64, real_quote: u64) -> Self {
        Self {
            base: LAUNCHPAD_VIRTUAL_BASE.saturating_sub(real_base),
            quote: LAUNCHPAD_VIRTUAL_QUOTE.saturating_add(real_quote),
        }
    }

    /// Base tokens out for a quote input
    pub fn buy_out(&self, quote_in: u64) -> u64 {
        get_amount_out(quote_in, self.quote, self.base)
    }

    /// Quote out for a base input
    pub fn sell_out(&self, base_in: u64) -> u64 {
        get_amount_out(base_in, self.base, self.quote)
    }
}

/// Base tokens out for a quote input on a sqrt-price pool
///
/// The pool price is `sqrt²/1e18`; the result is scaled down by the base
/// token's decimals.
pub fn estimate_out_by_sqrt_price(
    amount_in: u64,
    sqrt_price: u128,
    base_decimals: u32,
    fee_bps: u64,
) -> u64 {
    if amount_in == 0 || sqrt_price == 0 {
        return 0;
    }
    let net = deduct_fee(amount_in, fee_bps);
    let sqrt = U256::from(sqrt_price);
    let price_scaled = sqrt * sqrt;
    let base_scale = U256::from(10u64).pow(base_decimals);
    narrow(wide(net) * U256::from(PRICE_PRECISION) / price_scaled / base_scale)
}

/// Quote out for a base input on a sqrt-price pool, the inverse of
/// `estimate_out_by_sqrt_price` with the fee taken from the output
pub fn estimate_quote_out_by_sqrt_price(
    base_in: u64,
    sqrt_price: u128,
    base_decimals: u32,
    fee_bps: u64,
) -> u64 {
    if base_in == 0 || sqrt_price == 0 {
        return 0;
    }
    let sqrt = U256::from(sqrt_price);
    let base_scale = U256::from(10u64).pow(base_decimals);
    let gross = (sqrt * sqrt)
        .checked_mul(wide(base_in))
        .and_then(|v| v.checked_mul(base_scale))
        .map_or(u64::MAX, |v| narrow(v / U256::from(PRICE_PRECISION)));
    deduct_fee(gross, fee_bps)
}

/// Shrink a quoted output to a guaranteed minimum for a requested slippage
/// percentage `p` in `[0, 100]`.
///
/// The tolerance in basis points is `(⌊100·p⌋ + 25)·2` against a denominator
/// of 20000, so:
/// - `p = 0` keeps 99.75% of the quote,
/// - `p = 50` keeps `⌊a·9950/20000⌋`, just under half,
/// - a tolerance that reaches the denominator (`p ≥ 99.75`) snaps back to
///   10000 and keeps exactly half. The minimum never collapses to zero.
///
/// Non-finite input is treated as 100, negative input as 0.
pub fn apply_slippage(amount: u64, slippage_pct: f64) -> u64 {
    let pct = if slippage_pct.is_finite() {
        slippage_pct.clamp(0.0, 100.0)
    } else {
        100.0
    };
    let max = FEE_DENOMINATOR * SLIPPAGE_ADJUSTMENT;
    let bp = (((pct * 100.0).floor() as u64) + SLIPPAGE_PADDING) * SLIPPAGE_ADJUSTMENT;
    let bp = if bp >= max { FEE_DENOMINATOR } else { bp };
    narrow(wide(amount) * wide(max - bp) / wide(max))
}

/// Tokens to sell at `current_price` to recover the cost of `amount_bought`
/// purchased at `buy_price`. Sells everything when the price has not risen.
///
/// This is the one sizing function that rounds up instead of down: flooring
/// would leave the sale a fraction of a token short of the cost it has to
/// recover. It sizes an order and never produces a minimum-out bound.
pub fn break_even_amount(buy_price: f64, current_price: f64, amount_bought: u64) -> u64 {
    if !(current_price > buy_price) || buy_price <= 0.0 {
        return amount_bought;
    }
    let needed = (amount_bought as f64 * buy_price / current_price).ceil();
    if needed >= amount_bought as f64 {
        amount_bought
    } else {
        needed as u64
    }
}

/// Mirror a tracked wallet's partial exit: sell the same fraction of our
/// holding that they sold of theirs. Selling 90% or more of their position
/// liquidates ours completely.
pub fn sell_proportionally(holding: u64, their_sold: u64, their_remaining: u64) -> u64 {
    let total_before = wide(their_sold) + wide(their_remaining);
    if total_before == U256::ZERO {
        return 0;
    }
    // ratio >= 0.9  <=>  10·sold >= 9·total
    if wide(their_sold) * wide(10) >= total_before * wide(9) {
        return holding;
    }
    narrow(wide(holding) * wide(their_sold) / total_before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_swap_out_degenerate_inputs_quote_zero() {
        assert_eq!(estimate_swap_out(0, 10, 10, 30), 0);
        assert_eq!(estimate_swap_out(10, 0, 10, 30), 0);
        assert_eq!(estimate_swap_out(10, 10, 0, 30), 0);
        assert_eq!(quote_buy_by_curve(0, 10, 10), 0);
        assert_eq!(quote_sell_by_curve(10, 0, 10), 0);
        assert_eq!(estimate_out_by_sqrt_price(10, 0, 6, 100), 0);
        assert_eq!(get_amount_out(100, 0, 1_000), 0);
        assert_eq!(get_amount_out(0, 10, 1_000), 0);
        assert_eq!(get_amount_out(100, 10, 0), 0);
    }

    #[test]
    fn test_exhausted_launchpad_base_quotes_zero() {
        let r = LaunchpadReserves::from_real(LAUNCHPAD_VIRTUAL_BASE + 1, 0);
        assert_eq!(r.base, 0);
        assert_eq!(r.sell_out(1), 0);
        assert_eq!(r.buy_out(1_000_000_000), 0);
    }

    #[test]
    fn test_swap_out_known_value() {
        // 1000 in, 1M/1M reserves, 30 bps
        // in_fee = 1000·9970 = 9_970_000
        // out = 9_970_000·1e6 / (1e6·1e4 + 9_970_000) = 996.00...
        assert_eq!(estimate_swap_out(1_000, 1_000_000, 1_000_000, 30), 996);
    }

    #[test]
    fn test_swap_out_full_fee_quotes_zero() {
        assert_eq!(estimate_swap_out(1_000, 1_000, 1_000, 10_000), 0);
    }

    #[test]
    fn test_curve_buy_known_value() {
        let v_sol = 30_000_000_000u64;
        let v_tok = 1_073_000_000_000_000u64;
        let out = quote_buy_by_curve(1_000_000_000, v_sol, v_tok);
        let k = v_sol as u128 * v_tok as u128;
        let expected = v_tok as u128 - (k / (v_sol as u128 + 1_000_000_000) + 1);
        assert_eq!(out as u128, expected);
    }

    #[test]
    fn test_curve_sell_takes_fee() {
        let gross = 1_000u64 * 1_000_000 / (1_000_000 + 1_000);
        let net = quote_sell_by_curve(1_000, 1_000_000, 1_000_000);
        assert_eq!(net, gross - gross / 100);
    }

    #[test]
    fn test_launchpad_reserves_fold_real_state() {
        let r = LaunchpadReserves::from_real(1_000, 2_000);
        assert_eq!(r.base, LAUNCHPAD_VIRTUAL_BASE - 1_000);
        assert_eq!(r.quote, LAUNCHPAD_VIRTUAL_QUOTE + 2_000);
        assert!(r.buy_out(1_000_000_000) > 0);
        assert!(r.sell_out(1_000_000_000) > 0);
    }

    #[test]
    fn test_sqrt_price_estimate() {
        // sqrt² = 1e18 -> price 1, 6 decimals
        let sqrt = 1_000_000_000u128;
        assert_eq!(estimate_out_by_sqrt_price(2_000_000, sqrt, 6, 0), 2);
        // 1% fee on 2_000_000 leaves 1_980_000
        assert_eq!(estimate_out_by_sqrt_price(2_000_000, sqrt, 0, 100), 1_980_000);
    }

    #[test]
    fn test_sqrt_price_sell_inverts_buy() {
        let sqrt = 1_000_000_000u128;
        assert_eq!(estimate_quote_out_by_sqrt_price(2, sqrt, 6, 0), 2_000_000);
        assert_eq!(estimate_quote_out_by_sqrt_price(2, sqrt, 6, 100), 1_980_000);
        assert_eq!(estimate_quote_out_by_sqrt_price(0, sqrt, 6, 100), 0);
    }

    #[test]
    fn test_sqrt_price_handles_u128_max() {
        assert_eq!(estimate_out_by_sqrt_price(u64::MAX, u128::MAX, 6, 0), 0);
    }

    #[test]
    fn test_apply_slippage_anchor_points() {
        assert_eq!(apply_slippage(20_000, 0.0), 19_950);
        assert_eq!(apply_slippage(20_000, 50.0), 9_950);
        assert_eq!(apply_slippage(20_000, 99.5), 50);
        assert_eq!(apply_slippage(20_000, -5.0), 19_950);
    }

    #[test]
    fn test_apply_slippage_wide_tolerance_keeps_half() {
        for pct in [99.75, 99.8, 100.0, 200.0, f64::NAN, f64::INFINITY] {
            assert_eq!(apply_slippage(20_000, pct), 10_000, "pct {pct}");
        }
        // escalated sell slippage never submits a zero minimum
        assert_eq!(apply_slippage(1_000_001, 100.0), 500_000);
    }

    #[test]
    fn test_break_even_amount() {
        assert_eq!(break_even_amount(1.0, 2.0, 100), 50);
        assert_eq!(break_even_amount(1.0, 0.5, 100), 100);
        assert_eq!(break_even_amount(1.0, 1.0, 100), 100);
        assert_eq!(break_even_amount(1.0, 3.0, 100), 34);
    }

    #[test]
    fn test_sell_proportionally() {
        assert_eq!(sell_proportionally(300, 50, 50), 150);
        assert_eq!(sell_proportionally(300, 90, 10), 300);
        assert_eq!(sell_proportionally(300, 0, 0), 0);
        assert_eq!(sell_proportionally(300, 1, 2), 100);
    }

    proptest! {
        #[test]
        fn prop_swap_out_monotone_and_bounded(
            a in 0u64..u64::MAX / 2,
            delta in 0u64..1_000_000_000_000,
            reserve_in in 0u64..u64::MAX,
            reserve_out in 0u64..u64::MAX,
            fee in 0u64..=10_000,
        ) {
            let lo = estimate_swap_out(a, reserve_in, reserve_out, fee);
            let hi = estimate_swap_out(a + delta, reserve_in, reserve_out, fee);
            prop_assert!(lo <= hi);
            prop_assert!(hi <= reserve_out);
        }

        #[test]
        fn prop_curve_buy_bounded(
            sol_in in 0u64..u64::MAX,
            v_sol in 0u64..u64::MAX,
            v_tok in 0u64..u64::MAX,
        ) {
            prop_assert!(quote_buy_by_curve(sol_in, v_sol, v_tok) <= v_tok);
            prop_assert!(quote_sell_by_curve(sol_in, v_sol, v_tok) <= v_sol);
        }

        #[test]
        fn prop_slippage_never_exceeds_amount(a in 1u64..u64::MAX, p in 0.0f64..=100.0) {
            prop_assert!(apply_slippage(a, p) <= a);
        }

        #[test]
        fn prop_slippage_monotone_in_tolerance(a in 1u64..u64::MAX, p in 0.0f64..98.0) {
            prop_assert!(apply_slippage(a, p + 1.0) <= apply_slippage(a, p));
        }
    }
}
