//! Client-boundary price parsing
//!
//! Prices enter the ledger as `u64` base units. Anything a client might type
//! (negative amounts, fractions of a base unit, values beyond `u64`) is
//! refused here with [`Rejection::InvalidPrice`] before a transaction can be
//! built. Display conventions embedded in descriptors are never consulted.

use crate::error::Rejection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Convert a decimal amount of base units to an asking price
pub fn asking_price_from_decimal(amount: Decimal) -> Result<u64, Rejection> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(Rejection::InvalidPrice);
    }
    if !amount.fract().is_zero() {
        return Err(Rejection::InvalidPrice);
    }
    amount.trunc().to_u64().ok_or(Rejection::InvalidPrice)
}

/// Parse a textual amount of base units
pub fn parse_asking_price(input: &str) -> Result<u64, Rejection> {
    let amount = Decimal::from_str(input.trim()).map_err(|_| Rejection::InvalidPrice)?;
    asking_price_from_decimal(amount)
}
