//! Decimal quantity and money helpers.
//!
//! Quantities, prices and totals are stored with two decimal places and at
//! most [`MAX_MAGNITUDE`] in absolute value (`NUMERIC(14, 2)`). Arithmetic on
//! caller-supplied values goes through the checked helpers here so oversized
//! input is a `Validation` error rather than an overflow.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

/// Number of decimal places kept for quantities and money.
pub const SCALE: u32 = 2;

/// Largest absolute value a stored quantity or amount may hold: 999999999999.99.
pub const MAX_MAGNITUDE: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, SCALE);

/// Round to the stored scale (half away from zero).
pub fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round, then require the result to fit the stored range.
pub fn ensure_in_range(field: &str, value: Decimal) -> DomainResult<Decimal> {
    let rounded = round(value);
    if rounded.abs() > MAX_MAGNITUDE {
        return Err(out_of_range(field));
    }
    Ok(rounded)
}

/// Require `value >= 0`, naming the field in the error.
pub fn ensure_non_negative(field: &str, value: Decimal) -> DomainResult<Decimal> {
    if value < Decimal::ZERO {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    ensure_in_range(field, value)
}

/// Require `value > 0` after rounding, naming the field in the error.
pub fn ensure_positive(field: &str, value: Decimal) -> DomainResult<Decimal> {
    let rounded = ensure_in_range(field, value)?;
    if rounded <= Decimal::ZERO {
        return Err(DomainError::validation(format!("{field} must be greater than zero")));
    }
    Ok(rounded)
}

/// `a + b`, rounded. Overflow is a `Validation` error; the range is not checked.
pub fn checked_add(field: &str, a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    a.checked_add(b).map(round).ok_or_else(|| out_of_range(field))
}

/// `a * b`, rounded and range-checked.
pub fn checked_mul(field: &str, a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    let product = a.checked_mul(b).ok_or_else(|| out_of_range(field))?;
    ensure_in_range(field, product)
}

/// Sum of `values`, rounded and range-checked.
pub fn checked_sum(
    field: &str,
    values: impl IntoIterator<Item = Decimal>,
) -> DomainResult<Decimal> {
    let total = values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
        .ok_or_else(|| out_of_range(field))?;
    ensure_in_range(field, total)
}

fn out_of_range(field: &str) -> DomainError {
    DomainError::validation(format!("{field} must be at most {MAX_MAGNITUDE} in magnitude"))
}
