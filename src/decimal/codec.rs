//! Encoding of decimal values as `(ipart, frac, lz)` register triples.
//!
//! `1.005` is stored as `(1, 5, 2)`: the fractional text run is `005`, the
//! digits `5` go in `frac` and the two stripped zeros are counted in `lz`.
//! The width of `frac` itself recovers the remaining positions, so the value
//! is rebuilt as `1 + 5 / 10^(1 + 2)`.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Fractional digits kept when a value is encoded (fixed-point text width).
pub const FRACTION_DIGITS: usize = 6;

/// A decimal value spread over three integer registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DecimalTriple {
    /// Signed integer part.
    pub ipart: i64,
    /// Fractional digits without leading zeros.
    ///
    /// Negative only when `ipart == 0` and the value lies in (-1, 0), since
    /// the integer part cannot carry the sign there.
    pub frac: i64,
    /// Number of leading zeros stripped from the fractional run.
    pub lz: i64,
}

impl DecimalTriple {
    /// Create a triple from its raw register values.
    pub const fn new(ipart: i64, frac: i64, lz: i64) -> Self {
        Self { ipart, frac, lz }
    }

    /// Encode a floating value.
    pub fn from_f64(value: f64) -> Result<Self, DecimalError> {
        parse_f64(value)
    }

    /// Rebuild the floating value.
    pub fn to_f64(&self) -> f64 {
        build_f64(self.ipart, self.frac, self.lz)
    }

    /// Register layout: `[ipart, frac, lz]`.
    pub const fn to_registers(self) -> [i64; 3] {
        [self.ipart, self.frac, self.lz]
    }
}

/// Number of decimal digits in `|n|`; zero has none.
pub fn digit_count(n: i64) -> u32 {
    match n.unsigned_abs() {
        0 => 0,
        magnitude => magnitude.ilog10() + 1,
    }
}

/// Rebuild a floating value from its register triple.
///
/// Never fails: any three integers describe some value. Absurd leading-zero
/// counts just push the fraction towards zero.
pub fn build_f64(ipart: i64, frac: i64, leading_zeros: i64) -> f64 {
    let negative = ipart < 0 || (ipart == 0 && frac < 0);

    let mut exp = digit_count(frac) as i32;
    if leading_zeros > 0 {
        let extra = i32::try_from(leading_zeros).unwrap_or(i32::MAX);
        exp = exp.saturating_add(extra);
    }

    let magnitude = ipart.unsigned_abs() as f64 + frac.unsigned_abs() as f64 / 10f64.powi(exp);
    if negative { -magnitude } else { magnitude }
}

/// Encode a floating value as a register triple.
///
/// The value is first rendered with [`FRACTION_DIGITS`] fixed decimals, so
/// the round trip is exact up to that precision. Trailing zeros of the
/// fractional run carry no information and are dropped; a zero fraction
/// always encodes as `frac == 0, lz == 0`.
pub fn parse_f64(value: f64) -> Result<DecimalTriple, DecimalError> {
    if !value.is_finite() {
        return Err(DecimalError::NotFinite(value));
    }

    let text = format!("{:.*}", FRACTION_DIGITS, value);
    let (int_text, frac_text) = text
        .split_once('.')
        .ok_or_else(|| DecimalError::Malformed(text.clone()))?;

    let ipart: i64 = int_text
        .parse()
        .map_err(|_| DecimalError::OutOfRange(value))?;

    let run = frac_text.trim_end_matches('0');
    let digits = run.trim_start_matches('0');
    let lz = (run.len() - digits.len()) as i64;

    let mut frac: i64 = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| DecimalError::Malformed(text.clone()))?
    };

    if ipart == 0 && int_text.starts_with('-') {
        frac = -frac;
    }

    Ok(DecimalTriple { ipart, frac, lz })
}

/// Errors from encoding a value into registers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecimalError {
    #[error("cannot encode non-finite value {0}")]
    NotFinite(f64),

    #[error("integer part of {0} does not fit in a register")]
    OutOfRange(f64),

    #[error("malformed fixed-point text: {0}")]
    Malformed(String),
}
