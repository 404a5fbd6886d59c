//! Decimal amounts. The pool asset has six decimals; everything below this
//! module works in base units.

use shroud_config::protocol::BASE_UNIT_DECIMALS;
use thiserror::Error;

const SCALE: u64 = 10u64.pow(BASE_UNIT_DECIMALS);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("invalid amount: {0}")]
    Invalid(String),
    #[error("amount has more than {BASE_UNIT_DECIMALS} decimal places")]
    TooPrecise,
    #[error("amount is too large")]
    Overflow,
}

/// Parse "12.5" into base units (12_500_000)
pub fn parse_amount(text: &str) -> Result<u64, AmountError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(AmountError::Invalid(text.to_string()));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(AmountError::Invalid(text.to_string()));
    }
    if frac.len() > BASE_UNIT_DECIMALS as usize {
        return Err(AmountError::TooPrecise);
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| AmountError::Overflow)?
    };
    let frac_units: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = BASE_UNIT_DECIMALS as usize);
        padded
            .parse()
            .map_err(|_| AmountError::Invalid(text.to_string()))?
    };

    whole
        .checked_mul(SCALE)
        .and_then(|units| units.checked_add(frac_units))
        .ok_or(AmountError::Overflow)
}

/// Render base units with trailing zeros trimmed ("12.5", "3")
pub fn format_amount(units: u64) -> String {
    let whole = units / SCALE;
    let frac = units % SCALE;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0width$}", width = BASE_UNIT_DECIMALS as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
