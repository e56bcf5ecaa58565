//! Assembler and disassembler for register VM programs.
//!
//! This module provides:
//! - A two-pass assembler (text → memory image)
//! - A disassembler (memory image → readable text)
//! - Image files in a plain-text or JSON cell format

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, AssemblerError};
pub use disasm::{disassemble, listing, ListingLine};
pub use image::{ImageFile, ImageError, load_image, save_image};
