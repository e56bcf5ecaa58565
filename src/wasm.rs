//! WebAssembly bindings for the register VM.
//!
//! This module provides JavaScript-friendly wrappers around the core VM.
//! The CPU borrows its memory, so `WasmCpu` keeps the memory block and a
//! [`CpuSnapshot`] and rebuilds the CPU around them on every call.

use wasm_bindgen::prelude::*;
use js_sys::BigInt64Array;
use crate::asm::assembler::assemble;
use crate::asm::disasm::{disassemble, format_instruction};
use crate::cpu::{Cpu, CpuConfig, CpuSnapshot, NUM_REGISTERS};

/// Default memory size in cells.
const DEFAULT_MEMORY: usize = 1024;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    memory: Vec<i64>,
    program: Vec<i64>,
    snapshot: CpuSnapshot,
    output: Vec<u8>,
    config: CpuConfig,
}

impl WasmCpu {
    /// Rebuild the CPU, run `f` on it and keep the resulting state.
    fn with_cpu<R>(&mut self, f: impl FnOnce(&mut Cpu<'_, &mut Vec<u8>>) -> R) -> R {
        let mut cpu = Cpu::restore(&mut self.memory, &self.snapshot, self.config.clone(), &mut self.output);
        let result = f(&mut cpu);
        let snapshot = cpu.snapshot();
        drop(cpu);
        self.snapshot = snapshot;
        result
    }
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance with `memory_size` cells (0 for the default).
    #[wasm_bindgen(constructor)]
    pub fn new(memory_size: usize) -> Self {
        let size = if memory_size == 0 { DEFAULT_MEMORY } else { memory_size };
        Self {
            memory: vec![0; size],
            program: Vec::new(),
            snapshot: CpuSnapshot::initial(size),
            output: Vec::new(),
            config: CpuConfig::default(),
        }
    }

    /// Load a program from assembly source code. Returns its size in cells.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let cells = assemble(source)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.load_image(cells)
    }

    /// Load a raw memory image.
    #[wasm_bindgen]
    pub fn load_image(&mut self, cells: Vec<i64>) -> Result<usize, JsError> {
        if cells.len() > self.memory.len() {
            return Err(JsError::new(&format!(
                "image size {} exceeds memory size {}",
                cells.len(),
                self.memory.len()
            )));
        }

        self.program = cells;
        self.reset();
        Ok(self.program.len())
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        let instr = self.with_cpu(|cpu| cpu.step())
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        Ok(match instr {
            Some(instr) => format_instruction(&instr),
            None => "unknown opcode skipped".to_string(),
        })
    }

    /// Run until halt or max cycles. Returns the total cycle count.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> Result<u64, JsError> {
        self.with_cpu(|cpu| cpu.run_limited(u64::from(max_cycles)))
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        Ok(self.snapshot.cycles)
    }

    /// Reload the program and reset CPU state and output.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.memory.fill(0);
        self.memory[..self.program.len()].copy_from_slice(&self.program);
        self.snapshot = CpuSnapshot::initial(self.memory.len());
        self.output.clear();
    }

    /// Turn the per-instruction register trace on or off.
    #[wasm_bindgen]
    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.snapshot.state == crate::cpu::CpuState::Running
    }

    /// Check if CPU is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.snapshot.state == crate::cpu::CpuState::Halted
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.snapshot.state)
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.snapshot.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> i64 {
        self.snapshot.pc
    }

    /// Get stack pointer.
    #[wasm_bindgen]
    pub fn sp(&self) -> i64 {
        self.snapshot.sp
    }

    /// Get one register, or 0 past the end of the file.
    #[wasm_bindgen]
    pub fn register(&self, index: usize) -> i64 {
        self.snapshot.regs.r.get(index).copied().unwrap_or(0)
    }

    /// Get all registers.
    #[wasm_bindgen]
    pub fn registers(&self) -> BigInt64Array {
        BigInt64Array::from(&self.snapshot.regs.r[..NUM_REGISTERS])
    }

    /// Flags as JSON: `{"zero":..,"ltz":..,"gtz":..}`.
    #[wasm_bindgen]
    pub fn flags_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.snapshot.regs.flags)
            .map_err(|e| JsError::new(&format!("{}", e)))
    }

    /// Get memory cell value, or 0 out of range.
    #[wasm_bindgen]
    pub fn memory_at(&self, index: usize) -> i64 {
        self.memory.get(index).copied().unwrap_or(0)
    }

    /// Get all memory.
    #[wasm_bindgen]
    pub fn memory_all(&self) -> BigInt64Array {
        BigInt64Array::from(&self.memory[..])
    }

    /// Program output captured so far.
    #[wasm_bindgen]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Return and clear the captured output.
    #[wasm_bindgen]
    pub fn take_output(&mut self) -> String {
        let text = self.output();
        self.output.clear();
        text
    }

    /// Full CPU state (registers, flags, pointers) as JSON.
    #[wasm_bindgen]
    pub fn snapshot_json(&self) -> Result<String, JsError> {
        self.snapshot.to_json()
            .map_err(|e| JsError::new(&format!("{}", e)))
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY)
    }
}

/// Assemble source code and return the image size in cells.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<usize, JsError> {
    let cells = assemble(source)
        .map_err(|e| JsError::new(&format!("{}", e)))?;
    Ok(cells.len())
}

/// Disassemble a memory image into a listing.
#[wasm_bindgen]
pub fn wasm_disassemble(cells: Vec<i64>) -> String {
    disassemble(&cells)
}
