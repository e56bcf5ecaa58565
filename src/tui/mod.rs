//! TUI debugger for the register VM.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register file with names and type tags, plus flags and stack pointer
//! - Memory view and disassembly around the next instruction
//! - Captured program output
//! - Step/run/breakpoint controls

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
