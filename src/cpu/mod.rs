//! CPU emulation.
//!
//! This module implements the complete register machine:
//! - a borrowed block of signed 64-bit memory cells (code, data and stack)
//! - 16 registers in two tagged operand groups, plus zero/ltz/gtz flags
//! - a 32-opcode instruction set with 1-, 2- and 3-cell encodings

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod snapshot;

pub use memory::{Memory, MemoryError};
pub use registers::{Registers, Flags, TypeTag, RegisterError, REGISTER_NAMES, NUM_REGISTERS};
pub use decode::{Instruction, Opcode, Form, DecodeError};
pub use execute::{Cpu, CpuConfig, CpuError, CpuState, UnknownOpcodePolicy};
pub use snapshot::CpuSnapshot;
