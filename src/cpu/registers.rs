//! Register file and condition flags.
//!
//! Sixteen signed 64-bit registers split into two operand groups of eight:
//! - `R0A`..`R7A` (0-7): destination side
//! - `R0B`..`R7B` (8-15): source side
//!
//! The first register of each group holds a type tag telling typed
//! instructions (`CMP`, arithmetic, `PRNT`) how to read the rest.

use std::cmp::Ordering;
use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::decimal::{build_f64, DecimalTriple};

/// Number of general-purpose registers.
pub const NUM_REGISTERS: usize = 16;

pub const R0A: usize = 0;
pub const R1A: usize = 1;
pub const R2A: usize = 2;
pub const R3A: usize = 3;
pub const R4A: usize = 4;
pub const R5A: usize = 5;
pub const R6A: usize = 6;
pub const R7A: usize = 7;
pub const R0B: usize = 8;
pub const R1B: usize = 9;
pub const R2B: usize = 10;
pub const R3B: usize = 11;
pub const R4B: usize = 12;
pub const R5B: usize = 13;
pub const R6B: usize = 14;
pub const R7B: usize = 15;

/// Symbolic register names, indexed by register number.
pub static REGISTER_NAMES: [&str; NUM_REGISTERS] = [
    "R0A", "R1A", "R2A", "R3A", "R4A", "R5A", "R6A", "R7A",
    "R0B", "R1B", "R2B", "R3B", "R4B", "R5B", "R6B", "R7B",
];

/// Name of register `index`, if it exists.
pub fn register_name(index: i64) -> Option<&'static str> {
    usize::try_from(index)
        .ok()
        .and_then(|i| REGISTER_NAMES.get(i).copied())
}

/// Register number for a symbolic name (case-insensitive).
pub fn register_index(name: &str) -> Option<usize> {
    REGISTER_NAMES
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(name))
}

/// Value type stored in the first register of an operand group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum TypeTag {
    Bool = 0,
    Int = 1,
    /// Decimal value in a three-register triple.
    Float = 2,
    /// Digit string on the stack; the next register holds its length.
    String = 3,
}

impl TypeTag {
    /// Decode a raw tag register value.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(TypeTag::Bool),
            1 => Some(TypeTag::Int),
            2 => Some(TypeTag::Float),
            3 => Some(TypeTag::String),
            _ => None,
        }
    }

    /// Raw register value of this tag.
    pub const fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Condition flags, written by comparisons only.
///
/// After a comparison exactly one flag is set. All three are clear
/// initially and after `CLF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags {
    pub zero: bool,
    pub ltz: bool,
    pub gtz: bool,
}

impl Flags {
    /// Clear all flags.
    pub fn clear(&mut self) {
        *self = Flags::default();
    }

    /// Record a comparison outcome.
    pub fn set_ordering(&mut self, ordering: Ordering) {
        self.zero = ordering == Ordering::Equal;
        self.ltz = ordering == Ordering::Less;
        self.gtz = ordering == Ordering::Greater;
    }

    /// Compare two signed integers.
    pub fn compare_i64(&mut self, a: i64, b: i64) {
        self.set_ordering(a.cmp(&b));
    }

    /// Compare two decimal values. Unordered operands clear every flag.
    pub fn compare_f64(&mut self, a: f64, b: f64) {
        match a.partial_cmp(&b) {
            Some(ordering) => self.set_ordering(ordering),
            None => self.clear(),
        }
    }
}

/// The register file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// Raw register values.
    pub r: [i64; NUM_REGISTERS],
    /// Condition flags.
    pub flags: Flags,
}

impl Registers {
    /// Create a register file with everything zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every register and clear the flags.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Read register `index`.
    pub fn get(&self, index: i64) -> Result<i64, RegisterError> {
        Ok(self.r[Self::slot(index)?])
    }

    /// Write register `index`.
    pub fn set(&mut self, index: i64, value: i64) -> Result<(), RegisterError> {
        self.r[Self::slot(index)?] = value;
        Ok(())
    }

    /// Mutable access to register `index`.
    pub fn get_mut(&mut self, index: i64) -> Result<&mut i64, RegisterError> {
        Ok(&mut self.r[Self::slot(index)?])
    }

    /// Destination-side type tag (`R0A`).
    pub fn tag_a(&self) -> Option<TypeTag> {
        TypeTag::from_i64(self.r[R0A])
    }

    /// Source-side type tag (`R0B`).
    pub fn tag_b(&self) -> Option<TypeTag> {
        TypeTag::from_i64(self.r[R0B])
    }

    /// Rebuild the decimal value stored at `base..base + 3`.
    pub fn read_decimal(&self, base: i64) -> Result<f64, RegisterError> {
        let [ipart, frac, lz] = self.triple_slots(base)?.map(|slot| self.r[slot]);
        Ok(build_f64(ipart, frac, lz))
    }

    /// Store a decimal triple at `base..base + 3`.
    pub fn write_decimal(&mut self, base: i64, triple: DecimalTriple) -> Result<(), RegisterError> {
        let slots = self.triple_slots(base)?;
        for (slot, value) in slots.into_iter().zip(triple.to_registers()) {
            self.r[slot] = value;
        }
        Ok(())
    }

    fn triple_slots(&self, base: i64) -> Result<[usize; 3], RegisterError> {
        let first = Self::slot(base)?;
        Self::slot(base.saturating_add(2))?;
        Ok([first, first + 1, first + 2])
    }

    fn slot(index: i64) -> Result<usize, RegisterError> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < NUM_REGISTERS)
            .ok_or(RegisterError::OutOfRange { index })
    }
}

/// One trace line: `[R0A: 0] [R1A: 0] ... [R7B: 0] `.
impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in REGISTER_NAMES.iter().zip(self.r.iter()) {
            write!(f, "[{}: {}] ", name, value)?;
        }
        Ok(())
    }
}

/// Errors from register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("register index {index} out of range (0-15)")]
    OutOfRange { index: i64 },
}
