// crates/woo-core/src/math.rs
//
// Fixed-point helpers for the accrual accumulators.
//
// Amounts are u128; accumulators are U256 scaled by a precision constant.
// Every product is taken in 512 bits before the division so that
// `amount * accumulator` can never wrap, and every division rounds down so
// dust stays with the reserve that emitted it.

pub use primitive_types::{U256, U512};

use crate::error::StakingError;
use crate::types::Amount;

/// Accumulator scale for the simple and MP rewarders.
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

/// Accumulator scale for reward trackers (higher, since tracker supplies
/// can be tiny compared to distributor output).
pub const TRACKER_PRECISION: u128 = 1_000_000_000_000_000_000_000_000_000_000;

/// Basis-point denominator: 10_000 bps = 100%.
pub const BPS_DIVISOR: u128 = 10_000;

/// Seconds in a 365-day year.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// `a * b / denom`, rounded down, computed in 512 bits.
///
/// # Errors
/// `InvalidConfiguration` if `denom` is zero or the quotient does not fit in
/// 256 bits.
pub fn mul_div(a: U256, b: U256, denom: U256) -> Result<U256, StakingError> {
    if denom.is_zero() {
        return Err(StakingError::InvalidConfiguration(
            "division by zero in mul_div".to_string(),
        ));
    }
    let quotient = a.full_mul(b) / U512::from(denom);
    U256::try_from(quotient).map_err(|_| {
        StakingError::InvalidConfiguration("mul_div result exceeds 256 bits".to_string())
    })
}

/// Narrow an accumulator-derived value back to a token amount.
pub fn to_amount(value: U256) -> Result<Amount, StakingError> {
    if value > U256::from(u128::MAX) {
        return Err(StakingError::InvalidConfiguration(format!(
            "value {} exceeds the amount range",
            value
        )));
    }
    Ok(value.low_u128())
}

/// `amount * numerator / denominator` for plain amounts.
pub fn mul_div_amount(amount: Amount, numerator: Amount, denominator: Amount) -> Result<Amount, StakingError> {
    to_amount(mul_div(
        U256::from(amount),
        U256::from(numerator),
        U256::from(denominator),
    )?)
}

/// Share of an accumulator delta owed to `weight`:
/// `weight * (acc_now - acc_paid) / precision`.
///
/// A stale `acc_paid` above `acc_now` yields zero rather than wrapping.
pub fn accrued(weight: Amount, acc_now: U256, acc_paid: U256, precision: u128) -> Result<Amount, StakingError> {
    let delta = acc_now.saturating_sub(acc_paid);
    to_amount(mul_div(U256::from(weight), delta, U256::from(precision))?)
}

/// Apply a basis-point ratio to an amount: `amount * bps / 10_000`.
pub fn apply_bps(amount: Amount, bps: u32) -> Result<Amount, StakingError> {
    mul_div_amount(amount, bps as Amount, BPS_DIVISOR)
}
