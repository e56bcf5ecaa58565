//! # regvm
//!
//! A small register-based virtual machine.
//!
//! Programs live in a flat block of signed 64-bit cells that the caller
//! owns. Sixteen registers are split into two operand groups whose first
//! register carries a type tag, so the same `ADD` or `PRNT` works on
//! integers, booleans, digit strings and decimals. Decimals are kept in
//! three registers (integer part, fraction digits, leading zeros) and
//! converted through [`decimal`].

pub mod decimal;
pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use decimal::{build_f64, parse_f64, DecimalTriple, DecimalError};
pub use cpu::{Cpu, CpuConfig, CpuState, CpuError, CpuSnapshot, Memory, Registers, Instruction, Opcode};
pub use asm::{assemble, disassemble, AssemblerError, ImageFile, load_image, save_image};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
