use std::fmt;

use crate::rules::AmountUnit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    Empty,
    Invalid(String),
    /// More fractional digits than the unit allows (would require rounding).
    TooPrecise(String),
    Overflow(String),
}

impl fmt::Display for AmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountError::Empty => write!(f, "amount is empty"),
            AmountError::Invalid(raw) => write!(f, "amount is not a decimal number: '{raw}'"),
            AmountError::TooPrecise(raw) => {
                write!(f, "amount needs rounding to fit micros: '{raw}'")
            }
            AmountError::Overflow(raw) => write!(f, "amount overflows i64 micros: '{raw}'"),
        }
    }
}

impl std::error::Error for AmountError {}

/// Convert a decimal amount string to integer micros.
///
/// `Major` reads `"12.34"` as 12.34 units. `Minor { exponent }` reads an integer count of
/// minor units (`"1234"` with exponent 2 is 12.34 units) and refuses fractional input.
/// No floating point at any stage; anything that would need rounding is an error.
pub fn amount_to_micros(raw: &str, unit: AmountUnit, minor_exponent: u32) -> Result<i64, AmountError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(AmountError::Invalid(s.to_string()));
    }

    // Scale: how many decimal places of the input fit into micros.
    let places: u32 = match unit {
        AmountUnit::Major => 6,
        AmountUnit::Minor => {
            if !frac_part.is_empty() || minor_exponent > 6 {
                return Err(AmountError::TooPrecise(s.to_string()));
            }
            6 - minor_exponent
        }
    };
    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.len() > places as usize {
        return Err(AmountError::TooPrecise(s.to_string()));
    }

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse::<i64>()
            .map_err(|_| AmountError::Overflow(s.to_string()))?
    };

    let mut frac_padded = frac_trimmed.to_string();
    while frac_padded.len() < places as usize {
        frac_padded.push('0');
    }
    let frac_val: i64 = if frac_padded.is_empty() {
        0
    } else {
        frac_padded
            .parse::<i64>()
            .map_err(|_| AmountError::Invalid(s.to_string()))?
    };

    let micros = int_val
        .checked_mul(10_i64.pow(places))
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| AmountError::Overflow(s.to_string()))?;

    Ok(if negative { -micros } else { micros })
}

/// ISO-4217 shaped currency code: three ASCII letters, upper-cased. Anything else is None.
pub fn currency_code(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.len() == 3 && t.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(t.to_ascii_uppercase())
    } else {
        None
    }
}
