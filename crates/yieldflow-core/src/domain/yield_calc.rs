//! Daily yield calculation.
//!
//! `daily = principal * (apr_bps / 10_000) / 365`, truncated to
//! [`YIELD_SCALE`] decimal places so the engine never pays out more than
//! has accrued.

use rust_decimal::{Decimal, RoundingStrategy};

use super::errors::DistributionError;

/// Basis points in one whole unit of rate (100 bps = 1%).
pub const BASIS_POINTS_PER_UNIT: u32 = 10_000;

/// Day count used to derive a daily rate from an annual one.
pub const DAYS_PER_YEAR: u32 = 365;

/// Decimal places kept on a payout amount (token precision).
pub const YIELD_SCALE: u32 = 18;

/// Yield accrued by `principal` over one day at `apr_basis_points`.
///
/// Negative principal is a caller bug and is rejected rather than clamped.
pub fn daily_yield(
    principal: Decimal,
    apr_basis_points: u32,
) -> Result<Decimal, DistributionError> {
    if principal < Decimal::ZERO {
        return Err(DistributionError::InvalidPrincipal(principal));
    }

    // Multiply first: 1/365 does not terminate in decimal.
    let accrued = principal * Decimal::from(apr_basis_points);
    let per_day = Decimal::from(BASIS_POINTS_PER_UNIT) * Decimal::from(DAYS_PER_YEAR);

    Ok((accrued / per_day).round_dp_with_strategy(YIELD_SCALE, RoundingStrategy::ToZero))
}
