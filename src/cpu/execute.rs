//! CPU execution engine.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//!
//! The program counter is pre-incremented: it starts at -1, every cycle
//! moves it forward one cell before fetching, and each instruction then
//! skips its own operand cells. A jump stores its target directly, so
//! execution resumes at `target + 1`.

use std::io::{self, Stdout, Write};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::cpu::{Memory, Registers};
use crate::cpu::decode::{self, DecodeError, Instruction};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::{RegisterError, TypeTag, R0A, R1A, R2A, R3A};
use crate::decimal::{build_f64, format_general, DecimalError, DecimalTriple};

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HLT).
    Halted,
    /// An instruction failed; see the error returned by `step`.
    Faulted,
}

/// What to do when the opcode cell holds no known opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownOpcodePolicy {
    /// Stop with [`CpuError::UnknownOpcode`].
    #[default]
    Fault,
    /// Treat the cell as a one-cell no-op and keep going.
    Ignore,
}

/// CPU configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Dump the register file after every instruction.
    pub debug: bool,
    /// Handling of unknown opcodes.
    pub unknown_opcode: UnknownOpcodePolicy,
}

/// Integer/decimal arithmetic selected by the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn divides(self) -> bool {
        matches!(self, ArithOp::Div | ArithOp::Mod)
    }

    /// Native wraparound semantics.
    fn apply_i64(self, a: i64, b: i64) -> i64 {
        match self {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => a.wrapping_div(b),
            ArithOp::Mod => a.wrapping_rem(b),
        }
    }

    /// `Mod` is the floating remainder, signed like the dividend.
    fn apply_f64(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Mod => a % b,
        }
    }
}

/// Where execution continues after an instruction.
enum Flow {
    /// Skip the instruction's operand cells.
    Next,
    /// Replace the program counter.
    Jump(i64),
}

/// The virtual CPU.
///
/// Borrows its memory block for its whole lifetime. `PRNT` output and the
/// register trace go to `W` (stdout unless built with [`Cpu::with_output`]).
pub struct Cpu<'m, W: Write = Stdout> {
    /// Register file and flags.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory<'m>,
    /// Program counter; -1 before the first fetch.
    pub pc: i64,
    /// Stack pointer; the stack grows down from the top of memory.
    pub sp: i64,
    /// Last fetched opcode cell.
    pub inst: i64,
    /// Last fetched first operand cell.
    pub dest: i64,
    /// Last fetched second operand cell.
    pub src: i64,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count.
    pub cycles: u64,
    config: CpuConfig,
    out: W,
    pub(crate) last_instr: Option<Instruction>,
}

impl<'m> Cpu<'m, Stdout> {
    /// Create a CPU over a populated memory block, printing to stdout.
    pub fn new(memory: &'m mut [i64], debug: bool) -> Self {
        let config = CpuConfig { debug, ..CpuConfig::default() };
        Self::with_output(memory, config, io::stdout())
    }
}

impl<'m, W: Write> Cpu<'m, W> {
    /// Create a CPU with an explicit configuration and output sink.
    pub fn with_output(memory: &'m mut [i64], config: CpuConfig, out: W) -> Self {
        let mem = Memory::new(memory);
        let sp = Self::initial_sp(&mem);
        Self {
            regs: Registers::new(),
            mem,
            pc: -1,
            sp,
            inst: 0,
            dest: 0,
            src: 0,
            state: CpuState::Running,
            cycles: 0,
            config,
            out,
            last_instr: None,
        }
    }

    fn initial_sp(mem: &Memory<'_>) -> i64 {
        mem.len() as i64 - 1
    }

    /// Reset registers, flags, pc and sp. Memory is left as is.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.pc = -1;
        self.sp = Self::initial_sp(&self.mem);
        self.inst = 0;
        self.dest = 0;
        self.src = 0;
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Zero memory, copy `image` to address 0 and reset.
    pub fn reload(&mut self, image: &[i64]) -> Result<(), MemoryError> {
        self.mem.clear();
        self.mem.load_image(0, image)?;
        self.reset();
        Ok(())
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed, or `None` when an unknown
    /// opcode was skipped under [`UnknownOpcodePolicy::Ignore`]. On error the
    /// CPU is left `Faulted` with `pc` on the offending opcode cell.
    pub fn step(&mut self) -> Result<Option<Instruction>, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        self.pc = self.pc.wrapping_add(1);
        let pc = self.pc;

        let result = self
            .fetch()
            .and_then(|instr| match instr {
                Some(instr) => self.execute(instr).map(|_| Some(instr)),
                None => Ok(None),
            })
            .and_then(|instr| {
                if self.config.debug {
                    self.trace_registers()?;
                }
                Ok(instr)
            });

        match result {
            Ok(instr) => {
                self.cycles += 1;
                self.last_instr = instr;
                tracing::trace!(pc, inst = self.inst, sp = self.sp, "step");
                if instr == Some(Instruction::Hlt) {
                    tracing::debug!(pc, cycles = self.cycles, "halted");
                }
                Ok(instr)
            }
            Err(err) => {
                self.pc = pc;
                self.state = CpuState::Faulted;
                tracing::debug!(pc, error = %err, "fault");
                Err(err)
            }
        }
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed. A program that never
    /// halts never returns; use [`Cpu::run_limited`] to bound it.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Read the three-cell window at `pc` and decode it.
    fn fetch(&mut self) -> Result<Option<Instruction>, CpuError> {
        let pc = self.pc;
        self.inst = self.mem.read(pc)?;
        self.dest = self.mem.get(pc.wrapping_add(1)).unwrap_or(0);
        self.src = self.mem.get(pc.wrapping_add(2)).unwrap_or(0);

        match decode::decode(self.mem.window(pc, 3)?) {
            Ok(instr) => Ok(Some(instr)),
            Err(DecodeError::InvalidOpcode(opcode)) => match self.config.unknown_opcode {
                UnknownOpcodePolicy::Fault => Err(CpuError::UnknownOpcode { opcode, pc }),
                UnknownOpcodePolicy::Ignore => {
                    tracing::debug!(pc, opcode, "skipping unknown opcode");
                    Ok(None)
                }
            },
            Err(DecodeError::Truncated { available, .. }) => {
                let addr = pc.wrapping_add(available as i64);
                Err(MemoryError::AddressOutOfRange { addr, size: self.mem.len() }.into())
            }
            Err(DecodeError::Empty) => {
                Err(MemoryError::AddressOutOfRange { addr: pc, size: self.mem.len() }.into())
            }
        }
    }

    /// Execute a decoded instruction and move the program counter.
    fn execute(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let flow = match instr {
            // ==================== Flags ====================

            Instruction::Clf => {
                self.regs.flags.clear();
                Flow::Next
            }

            Instruction::Cmp { dest, src } => {
                if self.regs.tag_a() == Some(TypeTag::Float) {
                    let (f1, f2) = self.get_f64_operands()?;
                    self.regs.flags.compare_f64(f1, f2);
                } else {
                    let a = self.regs.get(dest)?;
                    let b = self.regs.get(src)?;
                    self.regs.flags.compare_i64(a, b);
                }
                Flow::Next
            }

            Instruction::Cmpi { dest, imm } => {
                let a = self.regs.get(dest)?;
                self.regs.flags.compare_i64(a, imm);
                Flow::Next
            }

            // ==================== Data Movement ====================

            Instruction::Mov { dest, src } => {
                let value = self.regs.get(src)?;
                self.regs.set(dest, value)?;
                Flow::Next
            }

            Instruction::Sti { addr, src } => {
                let value = self.regs.get(src)?;
                self.mem.write(addr, value)?;
                Flow::Next
            }

            Instruction::Ldi { dest, addr } => {
                let value = self.mem.read(addr)?;
                self.regs.set(dest, value)?;
                Flow::Next
            }

            Instruction::Lii { dest, imm } => {
                self.regs.set(dest, imm)?;
                Flow::Next
            }

            // ==================== Stack ====================

            Instruction::Push { reg } => {
                let value = self.regs.get(reg)?;
                self.push(value)?;
                Flow::Next
            }

            Instruction::Pop { reg } => {
                // Validate the register before the stack moves.
                self.regs.get(reg)?;
                let value = self.pop()?;
                self.regs.set(reg, value)?;
                Flow::Next
            }

            // ==================== Arithmetic ====================

            Instruction::Inc { dest } => {
                let r = self.regs.get_mut(dest)?;
                *r = r.wrapping_add(1);
                Flow::Next
            }

            Instruction::Dec { dest } => {
                let r = self.regs.get_mut(dest)?;
                *r = r.wrapping_sub(1);
                Flow::Next
            }

            Instruction::Add { dest, src } => self.arithmetic(ArithOp::Add, dest, src)?,
            Instruction::Sub { dest, src } => self.arithmetic(ArithOp::Sub, dest, src)?,
            Instruction::Mul { dest, src } => self.arithmetic(ArithOp::Mul, dest, src)?,
            Instruction::Div { dest, src } => self.arithmetic(ArithOp::Div, dest, src)?,
            Instruction::Mod { dest, src } => self.arithmetic(ArithOp::Mod, dest, src)?,

            // ==================== Control Flow ====================

            Instruction::Jmp { target } => Flow::Jump(target),
            Instruction::Jlz { target } => self.branch(self.regs.flags.ltz, target),
            Instruction::Jgz { target } => self.branch(self.regs.flags.gtz, target),
            Instruction::Jez { target } => self.branch(self.regs.flags.zero, target),
            Instruction::Jnz { target } => self.branch(!self.regs.flags.zero, target),

            // ==================== Bitwise / Logical ====================

            Instruction::Shl { dest, src } => {
                self.binary(dest, src, |a, b| a.wrapping_shl(b as u32))?
            }
            Instruction::Shr { dest, src } => {
                self.binary(dest, src, |a, b| a.wrapping_shr(b as u32))?
            }
            Instruction::Band { dest, src } => self.binary(dest, src, |a, b| a & b)?,
            Instruction::Bor { dest, src } => self.binary(dest, src, |a, b| a | b)?,
            Instruction::Bxor { dest, src } => self.binary(dest, src, |a, b| a ^ b)?,
            Instruction::Land { dest, src } => {
                self.binary(dest, src, |a, b| i64::from(a != 0 && b != 0))?
            }
            Instruction::Lor { dest, src } => {
                self.binary(dest, src, |a, b| i64::from(a != 0 || b != 0))?
            }

            Instruction::Bnot { dest } => {
                let r = self.regs.get_mut(dest)?;
                *r = !*r;
                Flow::Next
            }

            Instruction::Lnot { dest } => {
                let r = self.regs.get_mut(dest)?;
                *r = i64::from(*r == 0);
                Flow::Next
            }

            // ==================== Output / Halt ====================

            Instruction::Prnt => {
                self.print()?;
                Flow::Next
            }

            Instruction::Hlt => {
                self.state = CpuState::Halted;
                Flow::Next
            }
        };

        self.pc = match flow {
            Flow::Next => self.pc.wrapping_add(instr.width() as i64 - 1),
            Flow::Jump(target) => target,
        };

        Ok(())
    }

    /// Conditional jump: taken behaves like `JMP`, otherwise the target cell
    /// is skipped.
    fn branch(&self, taken: bool, target: i64) -> Flow {
        if taken { Flow::Jump(target) } else { Flow::Next }
    }

    /// r[dest] := op(r[dest], r[src]) on raw integers.
    fn binary(&mut self, dest: i64, src: i64, op: impl Fn(i64, i64) -> i64) -> Result<Flow, CpuError> {
        let b = self.regs.get(src)?;
        let a = self.regs.get_mut(dest)?;
        *a = op(*a, b);
        Ok(Flow::Next)
    }

    /// Typed arithmetic. Only the destination-side tag decides between
    /// decimal and integer math.
    fn arithmetic(&mut self, op: ArithOp, dest: i64, src: i64) -> Result<Flow, CpuError> {
        if self.regs.tag_a() == Some(TypeTag::Float) {
            let (f1, f2) = self.get_f64_operands()?;
            if op.divides() && f2 == 0.0 {
                return Err(CpuError::DivisionByZero { pc: self.pc });
            }
            self.load_f64(op.apply_f64(f1, f2))?;
        } else {
            let b = self.regs.get(src)?;
            if op.divides() && b == 0 {
                return Err(CpuError::DivisionByZero { pc: self.pc });
            }
            let a = self.regs.get_mut(dest)?;
            *a = op.apply_i64(*a, b);
        }
        Ok(Flow::Next)
    }

    /// Decimal operands of the current instruction.
    ///
    /// The left operand is always decoded from the `dest` triple. The right
    /// one is the `src` triple when `R0B` is tagged float, otherwise the raw
    /// `src` register promoted to a decimal.
    pub fn get_f64_operands(&self) -> Result<(f64, f64), CpuError> {
        let f1 = self.regs.read_decimal(self.dest)?;
        let f2 = if self.regs.tag_b() == Some(TypeTag::Float) {
            self.regs.read_decimal(self.src)?
        } else {
            self.regs.get(self.src)? as f64
        };
        Ok((f1, f2))
    }

    /// Encode `value` into the `dest` triple of the current instruction.
    pub fn load_f64(&mut self, value: f64) -> Result<(), CpuError> {
        let triple = DecimalTriple::from_f64(value)?;
        self.regs.write_decimal(self.dest, triple)?;
        Ok(())
    }

    fn push(&mut self, value: i64) -> Result<(), CpuError> {
        if self.sp <= 0 {
            return Err(CpuError::StackOverflow { sp: self.sp });
        }
        self.mem.write(self.sp - 1, value)?;
        self.sp -= 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<i64, CpuError> {
        if self.sp < 0 || self.sp as usize >= self.mem.len() {
            return Err(CpuError::StackUnderflow { sp: self.sp });
        }
        let value = self.mem.read(self.sp)?;
        self.sp += 1;
        Ok(value)
    }

    /// `PRNT`: render the value described by the `R0A` tag.
    fn print(&mut self) -> Result<(), CpuError> {
        let r = self.regs.r;
        match self.regs.tag_a() {
            Some(TypeTag::Bool) => {
                writeln!(self.out, "{}", if r[R1A] != 0 { "true" } else { "false" })?;
            }
            Some(TypeTag::Int) => {
                writeln!(self.out, "{}", r[R1A])?;
            }
            Some(TypeTag::Float) => {
                let value = build_f64(r[R1A], r[R2A], r[R3A]);
                writeln!(self.out, "{}", format_general(value))?;
            }
            Some(TypeTag::String) => {
                // Digits only: each stack cell is one decimal digit.
                for _ in 0..r[R1A].max(0) {
                    let digit = self.pop()?;
                    self.regs.r[R1A] = digit;
                    let byte = u8::try_from(digit)
                        .ok()
                        .filter(|d| *d <= 9)
                        .ok_or(CpuError::InvalidDigit { value: digit })?;
                    self.out.write_all(&[b'0' + byte])?;
                }
                writeln!(self.out)?;
            }
            None => {
                tracing::debug!(tag = r[R0A], "PRNT with unknown type tag, nothing printed");
            }
        }
        Ok(())
    }

    /// Trace sink: one line with every register's name and value.
    pub fn trace_registers(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", self.regs)
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Current configuration.
    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    /// Turn the register trace on or off.
    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    /// The output sink.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Mutable access to the output sink.
    pub fn output_mut(&mut self) -> &mut W {
        &mut self.out
    }

    /// Consume the CPU and hand back the output sink.
    pub fn into_output(self) -> W {
        self.out
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl<W: Write> std::fmt::Debug for Cpu<'_, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("pc", &self.pc)
            .field("sp", &self.sp)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("mem", &self.mem)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("unknown opcode {opcode} at {pc}")]
    UnknownOpcode { opcode: i64, pc: i64 },

    #[error("memory fault: {0}")]
    MemoryFault(#[from] MemoryError),

    #[error("{0}")]
    Register(#[from] RegisterError),

    #[error("stack overflow (sp = {sp})")]
    StackOverflow { sp: i64 },

    #[error("stack underflow (sp = {sp})")]
    StackUnderflow { sp: i64 },

    #[error("division by zero at {pc}")]
    DivisionByZero { pc: i64 },

    #[error("string print popped {value}, not a digit")]
    InvalidDigit { value: i64 },

    #[error("decimal encoding failed: {0}")]
    Decimal(#[from] DecimalError),

    #[error("output error: {0}")]
    Output(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::{encode, Opcode};
    use crate::cpu::registers::{Flags, R0B, R1B, R2B, R3B};
    use proptest::prelude::*;

    const MEM: usize = 128;

    fn image(instructions: &[Instruction]) -> Vec<i64> {
        let mut cells: Vec<i64> = instructions.iter().flat_map(encode).collect();
        cells.resize(MEM, 0);
        cells
    }

    fn make_cpu(block: &mut [i64]) -> Cpu<'_, Vec<u8>> {
        Cpu::with_output(block, CpuConfig::default(), Vec::new())
    }

    fn printed(cpu: &Cpu<'_, Vec<u8>>) -> String {
        String::from_utf8(cpu.output().clone()).unwrap()
    }

    fn tag(dest: usize, tag: TypeTag) -> Instruction {
        Instruction::Lii { dest: dest as i64, imm: tag.as_i64() }
    }

    fn lii(dest: usize, imm: i64) -> Instruction {
        Instruction::Lii { dest: dest as i64, imm }
    }

    #[test]
    fn test_initial_state() {
        let mut block = vec![0i64; MEM];
        let cpu = make_cpu(&mut block);

        assert_eq!(cpu.pc, -1);
        assert_eq!(cpu.sp, MEM as i64 - 1);
        assert_eq!(cpu.regs.flags, Flags::default());
        assert!(cpu.is_running());
    }

    #[test]
    fn test_cpu_halt() {
        let mut block = image(&[Instruction::Hlt]);
        let mut cpu = make_cpu(&mut block);

        let executed = cpu.run().unwrap();

        assert_eq!(executed, 1);
        assert!(cpu.is_halted());
        assert_eq!(cpu.pc, 0);
        assert!(matches!(cpu.step(), Err(CpuError::NotRunning(CpuState::Halted))));
    }

    #[test]
    fn test_pc_deltas() {
        let cases = [
            (Instruction::Clf, 0),
            (Instruction::Cmp { dest: 1, src: 2 }, 2),
            (Instruction::Cmpi { dest: 1, imm: 4 }, 2),
            (Instruction::Mov { dest: 1, src: 2 }, 2),
            (Instruction::Sti { addr: 100, src: 1 }, 2),
            (Instruction::Ldi { dest: 1, addr: 100 }, 2),
            (Instruction::Lii { dest: 1, imm: 9 }, 2),
            (Instruction::Push { reg: 1 }, 1),
            (Instruction::Inc { dest: 1 }, 1),
            (Instruction::Dec { dest: 1 }, 1),
            (Instruction::Add { dest: 1, src: 2 }, 2),
            (Instruction::Sub { dest: 1, src: 2 }, 2),
            (Instruction::Mul { dest: 1, src: 2 }, 2),
            (Instruction::Div { dest: 1, src: 2 }, 2),
            (Instruction::Mod { dest: 1, src: 2 }, 2),
            (Instruction::Shl { dest: 1, src: 2 }, 2),
            (Instruction::Shr { dest: 1, src: 2 }, 2),
            (Instruction::Band { dest: 1, src: 2 }, 2),
            (Instruction::Bor { dest: 1, src: 2 }, 2),
            (Instruction::Bnot { dest: 1 }, 1),
            (Instruction::Bxor { dest: 1, src: 2 }, 2),
            (Instruction::Land { dest: 1, src: 2 }, 2),
            (Instruction::Lor { dest: 1, src: 2 }, 2),
            (Instruction::Lnot { dest: 1 }, 1),
            (Instruction::Prnt, 0),
            (Instruction::Hlt, 0),
        ];

        for (instr, delta) in cases {
            let mut block = image(&[instr]);
            let mut cpu = make_cpu(&mut block);
            cpu.regs.r[2] = 3;

            cpu.step().unwrap();

            assert_eq!(cpu.pc, delta, "{:?}", instr);
            assert_eq!(cpu.pc + 1, instr.width() as i64, "{:?}", instr);
        }
    }

    #[test]
    fn test_scenario_integer_add() {
        let mut block = image(&[
            tag(R0A, TypeTag::Int),
            lii(R1A, 7),
            lii(R1B, 3),
            Instruction::Add { dest: R1A as i64, src: R1B as i64 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.r[R1A], 10);
    }

    #[test]
    fn test_integer_arithmetic_wraps() {
        let mut block = image(&[
            lii(1, i64::MAX),
            lii(2, 1),
            Instruction::Add { dest: 1, src: 2 },
            lii(3, i64::MIN),
            lii(4, -1),
            Instruction::Div { dest: 3, src: 4 },
            lii(5, -7),
            lii(6, 2),
            Instruction::Mod { dest: 5, src: 6 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.r[1], i64::MIN);
        assert_eq!(cpu.regs.r[3], i64::MIN);
        assert_eq!(cpu.regs.r[5], -1);
    }

    #[test]
    fn test_integer_division_by_zero() {
        let mut block = image(&[
            lii(1, 10),
            Instruction::Div { dest: 1, src: 2 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        let err = cpu.run().unwrap_err();

        assert!(matches!(err, CpuError::DivisionByZero { pc: 3 }));
        assert_eq!(cpu.state, CpuState::Faulted);
        assert_eq!(cpu.pc, 3);
        assert_eq!(cpu.regs.r[1], 10);
    }

    #[test]
    fn test_decimal_add_both_tagged() {
        let mut block = image(&[
            tag(R0A, TypeTag::Float),
            tag(R0B, TypeTag::Float),
            // 1.05
            lii(R1A, 1), lii(R2A, 5), lii(R3A, 1),
            // 2.25
            lii(R1B, 2), lii(R2B, 25), lii(R3B, 0),
            Instruction::Add { dest: R1A as i64, src: R1B as i64 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(&cpu.regs.r[R1A..=R3A], &[3, 3, 0]);
    }

    #[test]
    fn test_decimal_with_integer_source() {
        let mut block = image(&[
            tag(R0A, TypeTag::Float),
            tag(R0B, TypeTag::Int),
            // 1.5 * 2
            lii(R1A, 1), lii(R2A, 5), lii(R3A, 0),
            lii(R1B, 2),
            Instruction::Mul { dest: R1A as i64, src: R1B as i64 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(&cpu.regs.r[R1A..=R3A], &[3, 0, 0]);
    }

    #[test]
    fn test_decimal_sub_div_mod() {
        let run = |op: fn(i64, i64) -> Instruction, source: i64| {
            // 7.5 op source
            let mut block = image(&[
                tag(R0A, TypeTag::Float),
                lii(R1A, 7), lii(R2A, 5), lii(R3A, 0),
                lii(R1B, source),
                op(R1A as i64, R1B as i64),
                Instruction::Hlt,
            ]);
            let mut cpu = make_cpu(&mut block);
            cpu.run().unwrap();
            [cpu.regs.r[R1A], cpu.regs.r[R2A], cpu.regs.r[R3A]]
        };

        assert_eq!(run(|dest, src| Instruction::Sub { dest, src }, 8), [0, -5, 0]);
        assert_eq!(run(|dest, src| Instruction::Div { dest, src }, 8), [0, 9375, 0]);
        assert_eq!(run(|dest, src| Instruction::Mod { dest, src }, 2), [1, 5, 0]);
        assert_eq!(run(|dest, src| Instruction::Add { dest, src }, -10), [-2, 5, 0]);
    }

    #[test]
    fn test_decimal_division_by_zero() {
        let mut block = image(&[
            tag(R0A, TypeTag::Float),
            lii(R1A, 1),
            Instruction::Div { dest: R1A as i64, src: R1B as i64 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        assert!(matches!(cpu.run(), Err(CpuError::DivisionByZero { .. })));
        assert_eq!(cpu.state, CpuState::Faulted);
    }

    #[test]
    fn test_decimal_triple_must_fit() {
        let mut block = image(&[
            tag(R0A, TypeTag::Float),
            Instruction::Add { dest: 14, src: 1 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        let err = cpu.run().unwrap_err();
        assert!(matches!(err, CpuError::Register(RegisterError::OutOfRange { index: 16 })));
    }

    #[test]
    fn test_cmp_and_clf() {
        let mut block = image(&[
            lii(1, -3),
            lii(2, 8),
            Instruction::Cmp { dest: 1, src: 2 },
            Instruction::Clf,
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.step().unwrap();
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.regs.flags, Flags { zero: false, ltz: true, gtz: false });

        cpu.step().unwrap();
        assert_eq!(cpu.regs.flags, Flags::default());
    }

    #[test]
    fn test_cmpi_immediate() {
        let mut block = image(&[
            lii(4, 10),
            Instruction::Cmpi { dest: 4, imm: 10 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert!(cpu.regs.flags.zero);
        assert!(!cpu.regs.flags.ltz && !cpu.regs.flags.gtz);
    }

    #[test]
    fn test_cmp_decimal() {
        let mut block = image(&[
            tag(R0A, TypeTag::Float),
            tag(R0B, TypeTag::Float),
            // 1.5 vs 1.25
            lii(R1A, 1), lii(R2A, 5), lii(R3A, 0),
            lii(R1B, 1), lii(R2B, 25), lii(R3B, 0),
            Instruction::Cmp { dest: R1A as i64, src: R1B as i64 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.flags, Flags { zero: false, ltz: false, gtz: true });
    }

    #[test]
    fn test_jmp_replaces_pc() {
        // 0: JMP 4 | 2: LII R1A 99 | 5: HLT
        let mut block = image(&[
            Instruction::Jmp { target: 4 },
            lii(1, 99),
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.step().unwrap();
        assert_eq!(cpu.pc, 4);

        cpu.run().unwrap();
        assert_eq!(cpu.regs.r[1], 0);
    }

    #[test]
    fn test_conditional_jumps() {
        // 0: LII | 3: CMPI | 6: Jcc 10 | 8: LII R2A 1 | 11: HLT
        let program = |jump: Instruction| {
            image(&[
                lii(1, 5),
                Instruction::Cmpi { dest: 1, imm: 5 },
                jump,
                lii(2, 1),
                Instruction::Hlt,
            ])
        };

        let mut block = program(Instruction::Jez { target: 10 });
        let mut cpu = make_cpu(&mut block);
        cpu.step().unwrap();
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.pc, 10);
        cpu.run().unwrap();
        assert_eq!(cpu.regs.r[2], 0);

        let mut block = program(Instruction::Jnz { target: 10 });
        let mut cpu = make_cpu(&mut block);
        cpu.step().unwrap();
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.pc, 7);
        cpu.run().unwrap();
        assert_eq!(cpu.regs.r[2], 1);

        for (jump, taken) in [
            (Instruction::Jlz { target: 10 }, false),
            (Instruction::Jgz { target: 10 }, false),
        ] {
            let mut block = program(jump);
            let mut cpu = make_cpu(&mut block);
            cpu.run().unwrap();
            assert_eq!(cpu.regs.r[2] == 0, taken, "{:?}", jump);
        }
    }

    #[test]
    fn test_taken_jlz_and_jgz() {
        // 0: LII R1A | 3: CMPI R1A 5 | 6: Jcc 10 | 8: LII R2A 1 | 11: HLT
        for (value, jump, flags) in [
            (1, Instruction::Jlz { target: 10 }, Flags { zero: false, ltz: true, gtz: false }),
            (9, Instruction::Jgz { target: 10 }, Flags { zero: false, ltz: false, gtz: true }),
        ] {
            let mut block = image(&[
                lii(1, value),
                Instruction::Cmpi { dest: 1, imm: 5 },
                jump,
                lii(2, 1),
                Instruction::Hlt,
            ]);
            let mut cpu = make_cpu(&mut block);

            cpu.step().unwrap();
            cpu.step().unwrap();
            assert_eq!(cpu.regs.flags, flags);
            cpu.step().unwrap();
            assert_eq!(cpu.pc, 10, "{:?}", jump);

            cpu.run().unwrap();
            assert!(cpu.is_halted());
            assert_eq!(cpu.regs.r[2], 0, "{:?}", jump);
        }
    }

    #[test]
    fn test_jlz_and_jgz_read_their_own_flag() {
        // Less-than must not take JGZ, greater-than must not take JLZ.
        for (value, jump) in [
            (1, Instruction::Jgz { target: 10 }),
            (9, Instruction::Jlz { target: 10 }),
        ] {
            let mut block = image(&[
                lii(1, value),
                Instruction::Cmpi { dest: 1, imm: 5 },
                jump,
                lii(2, 1),
                Instruction::Hlt,
            ]);
            let mut cpu = make_cpu(&mut block);

            cpu.run().unwrap();
            assert_eq!(cpu.regs.r[2], 1, "{:?}", jump);
        }
    }

    #[test]
    fn test_untaken_jump_with_clear_flags() {
        let mut block = image(&[
            Instruction::Jlz { target: 50 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.step().unwrap();
        assert_eq!(cpu.pc, 1);
        cpu.step().unwrap();
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_store_and_load_memory() {
        let mut block = image(&[
            lii(1, 1234),
            Instruction::Sti { addr: 100, src: 1 },
            Instruction::Ldi { dest: 9, addr: 100 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.r[9], 1234);
        assert_eq!(cpu.mem.read(100), Ok(1234));
    }

    #[test]
    fn test_memory_fault() {
        let mut block = image(&[
            Instruction::Ldi { dest: 1, addr: MEM as i64 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        let err = cpu.run().unwrap_err();

        assert!(matches!(
            err,
            CpuError::MemoryFault(MemoryError::AddressOutOfRange { addr, .. }) if addr == MEM as i64
        ));
        assert_eq!(cpu.pc, 0);
    }

    #[test]
    fn test_register_out_of_range() {
        let mut block = image(&[Instruction::Mov { dest: 16, src: 0 }, Instruction::Hlt]);
        let mut cpu = make_cpu(&mut block);

        let err = cpu.run().unwrap_err();

        assert!(matches!(err, CpuError::Register(RegisterError::OutOfRange { index: 16 })));
    }

    #[test]
    fn test_truncated_instruction_at_end() {
        let mut block = vec![Opcode::Lii.as_i64(), 1];
        let mut cpu = make_cpu(&mut block);

        let err = cpu.step().unwrap_err();

        assert!(matches!(
            err,
            CpuError::MemoryFault(MemoryError::AddressOutOfRange { addr: 2, size: 2 })
        ));
    }

    #[test]
    fn test_running_off_the_end() {
        let mut block = vec![Opcode::Clf.as_i64()];
        let mut cpu = make_cpu(&mut block);

        cpu.step().unwrap();
        assert!(matches!(cpu.step(), Err(CpuError::MemoryFault(_))));
        assert_eq!(cpu.pc, 1);
    }

    #[test]
    fn test_push_pop() {
        let mut block = image(&[
            lii(1, 11),
            lii(2, 22),
            Instruction::Push { reg: 1 },
            Instruction::Push { reg: 2 },
            Instruction::Pop { reg: 3 },
            Instruction::Pop { reg: 4 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.r[3], 22);
        assert_eq!(cpu.regs.r[4], 11);
        assert_eq!(cpu.sp, MEM as i64 - 1);
        drop(cpu);
        assert_eq!(block[MEM - 2], 11);
        assert_eq!(block[MEM - 3], 22);
    }

    #[test]
    fn test_stack_overflow() {
        let mut block = image(&[Instruction::Push { reg: 1 }, Instruction::Hlt]);
        let mut cpu = make_cpu(&mut block);
        cpu.sp = 0;

        assert!(matches!(cpu.step(), Err(CpuError::StackOverflow { sp: 0 })));
    }

    #[test]
    fn test_stack_underflow() {
        let mut block = image(&[
            Instruction::Pop { reg: 1 },
            Instruction::Pop { reg: 1 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.step().unwrap();
        let err = cpu.step().unwrap_err();

        assert!(matches!(err, CpuError::StackUnderflow { sp } if sp == MEM as i64));
        assert_eq!(cpu.pc, 2);
    }

    #[test]
    fn test_print_bool() {
        let mut block = image(&[
            tag(R0A, TypeTag::Bool),
            lii(R1A, 1),
            Instruction::Prnt,
            lii(R1A, 0),
            Instruction::Prnt,
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(printed(&cpu), "true\nfalse\n");
    }

    #[test]
    fn test_print_int_and_float() {
        let mut block = image(&[
            tag(R0A, TypeTag::Int),
            lii(R1A, -42),
            Instruction::Prnt,
            tag(R0A, TypeTag::Float),
            lii(R1A, 12), lii(R2A, 34), lii(R3A, 1),
            Instruction::Prnt,
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(printed(&cpu), "-42\n12.034\n");
    }

    #[test]
    fn test_print_digit_string() {
        let mut block = image(&[
            lii(5, 3), Instruction::Push { reg: 5 },
            lii(5, 2), Instruction::Push { reg: 5 },
            lii(5, 1), Instruction::Push { reg: 5 },
            tag(R0A, TypeTag::String),
            lii(R1A, 3),
            Instruction::Prnt,
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(printed(&cpu), "123\n");
        assert_eq!(cpu.regs.r[R1A], 3);
        assert_eq!(cpu.sp, MEM as i64 - 1);
    }

    #[test]
    fn test_print_invalid_digit() {
        let mut block = image(&[
            lii(5, 12), Instruction::Push { reg: 5 },
            tag(R0A, TypeTag::String),
            lii(R1A, 1),
            Instruction::Prnt,
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        assert!(matches!(cpu.run(), Err(CpuError::InvalidDigit { value: 12 })));
    }

    #[test]
    fn test_print_unknown_tag_is_silent() {
        let mut block = image(&[lii(R0A, 9), Instruction::Prnt, Instruction::Hlt]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(printed(&cpu), "");
    }

    #[test]
    fn test_unknown_opcode_faults_without_advancing() {
        let mut block = image(&[lii(1, 1)]);
        block[3] = 99;
        let mut cpu = make_cpu(&mut block);

        cpu.step().unwrap();
        let err = cpu.step().unwrap_err();

        assert!(matches!(err, CpuError::UnknownOpcode { opcode: 99, pc: 3 }));
        assert_eq!(cpu.pc, 3);
        assert_eq!(cpu.state, CpuState::Faulted);
        assert!(matches!(cpu.step(), Err(CpuError::NotRunning(CpuState::Faulted))));
    }

    #[test]
    fn test_unknown_opcode_ignored() {
        let mut block = vec![99, Opcode::Hlt.as_i64()];
        let config = CpuConfig { unknown_opcode: UnknownOpcodePolicy::Ignore, ..CpuConfig::default() };
        let mut cpu = Cpu::with_output(&mut block, config, Vec::new());

        assert_eq!(cpu.step().unwrap(), None);
        assert_eq!(cpu.pc, 0);
        assert_eq!(cpu.step().unwrap(), Some(Instruction::Hlt));
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_debug_trace() {
        let mut block = image(&[lii(R1A, 7), Instruction::Hlt]);
        let config = CpuConfig { debug: true, ..CpuConfig::default() };
        let mut cpu = Cpu::with_output(&mut block, config, Vec::new());

        cpu.run().unwrap();

        let out = printed(&cpu);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[R0A: 0] [R1A: 7] "));
        assert!(lines[1].ends_with("[R7B: 0] "));
    }

    #[test]
    fn test_shifts_and_bitwise() {
        let mut block = image(&[
            lii(1, 1), lii(2, 4),
            Instruction::Shl { dest: 1, src: 2 },
            lii(3, -16), lii(4, 2),
            Instruction::Shr { dest: 3, src: 4 },
            lii(5, 1), lii(6, 65),
            Instruction::Shl { dest: 5, src: 6 },
            lii(7, 0b1100), lii(8, 0b1010),
            Instruction::Bxor { dest: 7, src: 8 },
            lii(9, 0b1100),
            Instruction::Band { dest: 9, src: 8 },
            lii(10, 0b1100),
            Instruction::Bor { dest: 10, src: 8 },
            lii(11, 0),
            Instruction::Bnot { dest: 11 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.r[1], 16);
        assert_eq!(cpu.regs.r[3], -4);
        assert_eq!(cpu.regs.r[5], 2);
        assert_eq!(cpu.regs.r[7], 0b0110);
        assert_eq!(cpu.regs.r[9], 0b1000);
        assert_eq!(cpu.regs.r[10], 0b1110);
        assert_eq!(cpu.regs.r[11], -1);
    }

    #[test]
    fn test_logical_ops() {
        let mut block = image(&[
            lii(1, 3), lii(2, 0),
            Instruction::Land { dest: 1, src: 2 },
            lii(3, 3),
            Instruction::Lor { dest: 3, src: 2 },
            lii(4, 0),
            Instruction::Lnot { dest: 4 },
            lii(5, -8),
            Instruction::Lnot { dest: 5 },
            Instruction::Inc { dest: 6 },
            Instruction::Dec { dest: 7 },
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.r[1], 0);
        assert_eq!(cpu.regs.r[3], 1);
        assert_eq!(cpu.regs.r[4], 1);
        assert_eq!(cpu.regs.r[5], 0);
        assert_eq!(cpu.regs.r[6], 1);
        assert_eq!(cpu.regs.r[7], -1);
    }

    #[test]
    fn test_run_limited_bounds_infinite_loop() {
        let mut block = image(&[Instruction::Jmp { target: -1 }]);
        let mut cpu = make_cpu(&mut block);

        let executed = cpu.run_limited(100).unwrap();

        assert_eq!(executed, 100);
        assert!(cpu.is_running());
        assert_eq!(cpu.pc, -1);
    }

    #[test]
    fn test_reload_resets_state() {
        let mut block = image(&[lii(1, 5), Instruction::Hlt]);
        let mut cpu = make_cpu(&mut block);
        cpu.run().unwrap();

        cpu.reload(&encode(&Instruction::Hlt)).unwrap();

        assert!(cpu.is_running());
        assert_eq!(cpu.pc, -1);
        assert_eq!(cpu.regs.r[1], 0);
        assert_eq!(cpu.mem.read(1), Ok(0));
        assert_eq!(cpu.run().unwrap(), 1);
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_trace_write_failure_faults() {
        let mut block = image(&[lii(R1A, 7), Instruction::Hlt]);
        let config = CpuConfig { debug: true, ..CpuConfig::default() };
        let mut cpu = Cpu::with_output(&mut block, config, BrokenSink);

        let err = cpu.step().unwrap_err();

        assert!(matches!(err, CpuError::Output(_)));
        assert_eq!(cpu.state, CpuState::Faulted);
        assert_eq!(cpu.pc, 0);
        assert_eq!(cpu.cycles, 0);
        assert!(matches!(cpu.step(), Err(CpuError::NotRunning(CpuState::Faulted))));
    }

    #[test]
    fn test_last_instruction_and_output_handoff() {
        let mut block = image(&[
            tag(R0A, TypeTag::Int),
            lii(R1A, 5),
            Instruction::Prnt,
            Instruction::Hlt,
        ]);
        let mut cpu = make_cpu(&mut block);
        assert_eq!(cpu.last_instruction(), None);

        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.last_instruction(), Some(lii(R1A, 5)));

        cpu.run().unwrap();
        assert_eq!(cpu.last_instruction(), Some(Instruction::Hlt));
        assert_eq!(cpu.into_output(), b"5\n".to_vec());
    }

    proptest! {
        #[test]
        fn prop_cmp_sets_exactly_one_flag(a in any::<i64>(), b in any::<i64>()) {
            let mut block = image(&[
                lii(1, a),
                lii(9, b),
                Instruction::Cmp { dest: 1, src: 9 },
                Instruction::Hlt,
            ]);
            let mut cpu = make_cpu(&mut block);
            cpu.run().unwrap();

            let flags = cpu.regs.flags;
            let set = [flags.zero, flags.ltz, flags.gtz].iter().filter(|&&f| f).count();
            prop_assert_eq!(set, 1);
            prop_assert_eq!(flags.zero, a == b);
            prop_assert_eq!(flags.ltz, a < b);
            prop_assert_eq!(flags.gtz, a > b);
        }

        #[test]
        fn prop_integer_add_wraps(a in any::<i64>(), b in any::<i64>()) {
            let mut block = image(&[
                tag(R0A, TypeTag::Int),
                lii(1, a),
                lii(2, b),
                Instruction::Add { dest: 1, src: 2 },
                Instruction::Hlt,
            ]);
            let mut cpu = make_cpu(&mut block);
            cpu.run().unwrap();
            prop_assert_eq!(cpu.regs.r[1], a.wrapping_add(b));
        }

        #[test]
        fn prop_stack_is_lifo(values in proptest::collection::vec(any::<i64>(), 1..8)) {
            let n = values.len();
            let mut program = Vec::new();
            for (i, v) in values.iter().enumerate() {
                program.push(lii(i, *v));
                program.push(Instruction::Push { reg: i as i64 });
            }
            for k in 0..n {
                program.push(Instruction::Pop { reg: (8 + k) as i64 });
            }
            program.push(Instruction::Hlt);

            let mut block = image(&program);
            let mut cpu = make_cpu(&mut block);
            let sp_before = cpu.sp;
            cpu.run().unwrap();

            for k in 0..n {
                prop_assert_eq!(cpu.regs.r[8 + k], values[n - 1 - k]);
            }
            prop_assert_eq!(cpu.sp, sp_before);
        }
    }
}
