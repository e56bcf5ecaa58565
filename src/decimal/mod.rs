//! Decimal values in an integer register file.
//!
//! The VM only has 64-bit integer registers. Decimal ("float") values are
//! carried as three consecutive registers:
//! - integer part (signed)
//! - fractional digit run with leading zeros stripped
//! - count of the stripped leading zeros
//!
//! `codec` converts between that triple and `f64`, `format` renders a value
//! the way `PRNT` prints it.

pub mod codec;
pub mod format;

pub use codec::{build_f64, parse_f64, digit_count, DecimalTriple, DecimalError, FRACTION_DIGITS};
pub use format::{format_general, format_general_with, GENERAL_PRECISION};
