//! Serializable CPU state.
//!
//! A snapshot holds everything but memory, so a CPU can be suspended and
//! later resumed over the same block (the WebAssembly wrapper does this on
//! every call) or dumped as JSON from the CLI.

use std::io::Write;
use serde::{Serialize, Deserialize};
use crate::cpu::{Cpu, CpuConfig, CpuState, Instruction, Registers};

/// Register file, pointers and run state of a CPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub regs: Registers,
    pub pc: i64,
    pub sp: i64,
    pub inst: i64,
    pub dest: i64,
    pub src: i64,
    pub state: CpuState,
    pub cycles: u64,
    /// Last executed instruction, if any.
    #[serde(default)]
    pub last_instr: Option<Instruction>,
}

impl CpuSnapshot {
    /// State of a freshly constructed CPU over `max_mem` cells.
    pub fn initial(max_mem: usize) -> Self {
        Self {
            regs: Registers::new(),
            pc: -1,
            sp: max_mem as i64 - 1,
            inst: 0,
            dest: 0,
            src: 0,
            state: CpuState::Running,
            cycles: 0,
            last_instr: None,
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl<'m, W: Write> Cpu<'m, W> {
    /// Capture the current state.
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            regs: self.regs.clone(),
            pc: self.pc,
            sp: self.sp,
            inst: self.inst,
            dest: self.dest,
            src: self.src,
            state: self.state,
            cycles: self.cycles,
            last_instr: self.last_instruction(),
        }
    }

    /// Resume a CPU from `snapshot` over `memory`.
    pub fn restore(memory: &'m mut [i64], snapshot: &CpuSnapshot, config: CpuConfig, out: W) -> Self {
        let mut cpu = Cpu::with_output(memory, config, out);
        cpu.regs = snapshot.regs.clone();
        cpu.pc = snapshot.pc;
        cpu.sp = snapshot.sp;
        cpu.inst = snapshot.inst;
        cpu.dest = snapshot.dest;
        cpu.src = snapshot.src;
        cpu.state = snapshot.state;
        cpu.cycles = snapshot.cycles;
        cpu.last_instr = snapshot.last_instr;
        cpu
    }
}
