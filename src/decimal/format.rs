//! General-format rendering of decimal values.
//!
//! Matches the classic `%g` conversion: a fixed number of significant
//! digits, scientific notation for very small or very large exponents,
//! trailing zeros removed.

/// Significant digits used by `PRNT`.
pub const GENERAL_PRECISION: usize = 6;

/// Render `value` with [`GENERAL_PRECISION`] significant digits.
pub fn format_general(value: f64) -> String {
    format_general_with(value, GENERAL_PRECISION)
}

/// Render `value` with `precision` significant digits (at least one).
pub fn format_general_with(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = precision.max(1);

    // Scientific rendering gives the exponent after rounding to `precision`
    // digits, which is what decides the style.
    let scientific = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some(parts) => parts,
        None => return scientific,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= precision as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_trailing_zeros(mantissa), sign, exponent.unsigned_abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent) as usize;
        let fixed = format!("{:.*}", decimals, value);
        strip_trailing_zeros(&fixed).to_string()
    }
}

fn strip_trailing_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
