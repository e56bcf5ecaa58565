//! Instruction decoder.
//!
//! Instructions are laid out in consecutive memory cells in one of four
//! shapes:
//! - bare (1 cell): `opcode`
//! - register / stack / jump (2 cells): `opcode, operand`
//! - binary (3 cells): `opcode, dest, src`
//!
//! The opcode numbering and the cell widths are the contract with whatever
//! produced the memory image and must not change.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Operation selector, the first cell of every instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum Opcode {
    Clf = 0,
    Cmp = 1,
    Cmpi = 2,
    Mov = 3,
    Sti = 4,
    Ldi = 5,
    Lii = 6,
    Push = 7,
    Pop = 8,
    Inc = 9,
    Dec = 10,
    Add = 11,
    Sub = 12,
    Mul = 13,
    Div = 14,
    Mod = 15,
    Jlz = 16,
    Jgz = 17,
    Jez = 18,
    Jnz = 19,
    Jmp = 20,
    Shl = 21,
    Shr = 22,
    Band = 23,
    Bor = 24,
    Bnot = 25,
    Bxor = 26,
    Land = 27,
    Lor = 28,
    Lnot = 29,
    Prnt = 30,
    /// Halt sentinel.
    Hlt = 31,
}

/// Operand shape of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Form {
    /// No operands.
    Bare,
    /// One register operand, modified in place.
    Register,
    /// One register operand moved to or from the stack.
    Stack,
    /// One jump target.
    Jump,
    /// Destination and source.
    Binary,
}

impl Form {
    /// Number of memory cells an instruction of this form occupies.
    pub const fn width(self) -> usize {
        match self {
            Form::Bare => 1,
            Form::Register | Form::Stack | Form::Jump => 2,
            Form::Binary => 3,
        }
    }
}

impl Opcode {
    /// Every opcode in numeric order.
    pub const ALL: [Opcode; 32] = [
        Opcode::Clf, Opcode::Cmp, Opcode::Cmpi, Opcode::Mov,
        Opcode::Sti, Opcode::Ldi, Opcode::Lii, Opcode::Push,
        Opcode::Pop, Opcode::Inc, Opcode::Dec, Opcode::Add,
        Opcode::Sub, Opcode::Mul, Opcode::Div, Opcode::Mod,
        Opcode::Jlz, Opcode::Jgz, Opcode::Jez, Opcode::Jnz,
        Opcode::Jmp, Opcode::Shl, Opcode::Shr, Opcode::Band,
        Opcode::Bor, Opcode::Bnot, Opcode::Bxor, Opcode::Land,
        Opcode::Lor, Opcode::Lnot, Opcode::Prnt, Opcode::Hlt,
    ];

    /// Decode a raw opcode cell.
    pub fn from_i64(value: i64) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Raw cell value.
    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    /// Assembly mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Clf => "CLF",
            Opcode::Cmp => "CMP",
            Opcode::Cmpi => "CMPI",
            Opcode::Mov => "MOV",
            Opcode::Sti => "STI",
            Opcode::Ldi => "LDI",
            Opcode::Lii => "LII",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Inc => "INC",
            Opcode::Dec => "DEC",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Jlz => "JLZ",
            Opcode::Jgz => "JGZ",
            Opcode::Jez => "JEZ",
            Opcode::Jnz => "JNZ",
            Opcode::Jmp => "JMP",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::Band => "BAND",
            Opcode::Bor => "BOR",
            Opcode::Bnot => "BNOT",
            Opcode::Bxor => "BXOR",
            Opcode::Land => "LAND",
            Opcode::Lor => "LOR",
            Opcode::Lnot => "LNOT",
            Opcode::Prnt => "PRNT",
            Opcode::Hlt => "HLT",
        }
    }

    /// Look up an opcode by mnemonic (case-insensitive).
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(mnemonic))
    }

    /// Operand shape.
    pub const fn form(self) -> Form {
        match self {
            Opcode::Clf | Opcode::Prnt | Opcode::Hlt => Form::Bare,
            Opcode::Inc | Opcode::Dec | Opcode::Bnot | Opcode::Lnot => Form::Register,
            Opcode::Push | Opcode::Pop => Form::Stack,
            Opcode::Jlz | Opcode::Jgz | Opcode::Jez | Opcode::Jnz | Opcode::Jmp => Form::Jump,
            _ => Form::Binary,
        }
    }

    /// Number of memory cells the instruction occupies.
    pub const fn width(self) -> usize {
        self.form().width()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Decoded instruction.
///
/// Register operands are raw cell values; they are range-checked when the
/// instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Flags ====================

    /// Clear all flags
    Clf,

    /// Compare registers, typed by the `R0A` tag
    Cmp { dest: i64, src: i64 },

    /// Compare register with an immediate
    Cmpi { dest: i64, imm: i64 },

    // ==================== Data Movement ====================

    /// r[dest] := r[src]
    Mov { dest: i64, src: i64 },

    /// mem[addr] := r[src]
    Sti { addr: i64, src: i64 },

    /// r[dest] := mem[addr]
    Ldi { dest: i64, addr: i64 },

    /// r[dest] := imm
    Lii { dest: i64, imm: i64 },

    // ==================== Stack ====================

    /// mem[--sp] := r[reg]
    Push { reg: i64 },

    /// r[reg] := mem[sp++]
    Pop { reg: i64 },

    // ==================== Arithmetic ====================

    Inc { dest: i64 },
    Dec { dest: i64 },

    /// Typed by the `R0A` tag (decimal or integer)
    Add { dest: i64, src: i64 },
    Sub { dest: i64, src: i64 },
    Mul { dest: i64, src: i64 },
    Div { dest: i64, src: i64 },
    Mod { dest: i64, src: i64 },

    // ==================== Control Flow ====================

    /// Jump if less than
    Jlz { target: i64 },

    /// Jump if greater than
    Jgz { target: i64 },

    /// Jump if equal
    Jez { target: i64 },

    /// Jump if not equal
    Jnz { target: i64 },

    /// Unconditional jump: pc := target
    Jmp { target: i64 },

    // ==================== Bitwise / Logical ====================

    Shl { dest: i64, src: i64 },
    Shr { dest: i64, src: i64 },
    Band { dest: i64, src: i64 },
    Bor { dest: i64, src: i64 },
    Bnot { dest: i64 },
    Bxor { dest: i64, src: i64 },
    Land { dest: i64, src: i64 },
    Lor { dest: i64, src: i64 },
    Lnot { dest: i64 },

    // ==================== Output / Halt ====================

    /// Print the value described by the `R0A` tag
    Prnt,

    /// Halt execution
    Hlt,
}

impl Instruction {
    /// Build an instruction from an opcode and its operand cells.
    ///
    /// Operands the form does not use are ignored.
    pub fn from_parts(opcode: Opcode, a: i64, b: i64) -> Self {
        match opcode {
            Opcode::Clf => Instruction::Clf,
            Opcode::Cmp => Instruction::Cmp { dest: a, src: b },
            Opcode::Cmpi => Instruction::Cmpi { dest: a, imm: b },
            Opcode::Mov => Instruction::Mov { dest: a, src: b },
            Opcode::Sti => Instruction::Sti { addr: a, src: b },
            Opcode::Ldi => Instruction::Ldi { dest: a, addr: b },
            Opcode::Lii => Instruction::Lii { dest: a, imm: b },
            Opcode::Push => Instruction::Push { reg: a },
            Opcode::Pop => Instruction::Pop { reg: a },
            Opcode::Inc => Instruction::Inc { dest: a },
            Opcode::Dec => Instruction::Dec { dest: a },
            Opcode::Add => Instruction::Add { dest: a, src: b },
            Opcode::Sub => Instruction::Sub { dest: a, src: b },
            Opcode::Mul => Instruction::Mul { dest: a, src: b },
            Opcode::Div => Instruction::Div { dest: a, src: b },
            Opcode::Mod => Instruction::Mod { dest: a, src: b },
            Opcode::Jlz => Instruction::Jlz { target: a },
            Opcode::Jgz => Instruction::Jgz { target: a },
            Opcode::Jez => Instruction::Jez { target: a },
            Opcode::Jnz => Instruction::Jnz { target: a },
            Opcode::Jmp => Instruction::Jmp { target: a },
            Opcode::Shl => Instruction::Shl { dest: a, src: b },
            Opcode::Shr => Instruction::Shr { dest: a, src: b },
            Opcode::Band => Instruction::Band { dest: a, src: b },
            Opcode::Bor => Instruction::Bor { dest: a, src: b },
            Opcode::Bnot => Instruction::Bnot { dest: a },
            Opcode::Bxor => Instruction::Bxor { dest: a, src: b },
            Opcode::Land => Instruction::Land { dest: a, src: b },
            Opcode::Lor => Instruction::Lor { dest: a, src: b },
            Opcode::Lnot => Instruction::Lnot { dest: a },
            Opcode::Prnt => Instruction::Prnt,
            Opcode::Hlt => Instruction::Hlt,
        }
    }

    /// The opcode and the operand cells it uses.
    pub fn parts(&self) -> (Opcode, Vec<i64>) {
        use Instruction::*;
        match *self {
            Clf => (Opcode::Clf, vec![]),
            Prnt => (Opcode::Prnt, vec![]),
            Hlt => (Opcode::Hlt, vec![]),

            Cmp { dest, src } => (Opcode::Cmp, vec![dest, src]),
            Cmpi { dest, imm } => (Opcode::Cmpi, vec![dest, imm]),
            Mov { dest, src } => (Opcode::Mov, vec![dest, src]),
            Sti { addr, src } => (Opcode::Sti, vec![addr, src]),
            Ldi { dest, addr } => (Opcode::Ldi, vec![dest, addr]),
            Lii { dest, imm } => (Opcode::Lii, vec![dest, imm]),
            Add { dest, src } => (Opcode::Add, vec![dest, src]),
            Sub { dest, src } => (Opcode::Sub, vec![dest, src]),
            Mul { dest, src } => (Opcode::Mul, vec![dest, src]),
            Div { dest, src } => (Opcode::Div, vec![dest, src]),
            Mod { dest, src } => (Opcode::Mod, vec![dest, src]),
            Shl { dest, src } => (Opcode::Shl, vec![dest, src]),
            Shr { dest, src } => (Opcode::Shr, vec![dest, src]),
            Band { dest, src } => (Opcode::Band, vec![dest, src]),
            Bor { dest, src } => (Opcode::Bor, vec![dest, src]),
            Bxor { dest, src } => (Opcode::Bxor, vec![dest, src]),
            Land { dest, src } => (Opcode::Land, vec![dest, src]),
            Lor { dest, src } => (Opcode::Lor, vec![dest, src]),

            Push { reg } => (Opcode::Push, vec![reg]),
            Pop { reg } => (Opcode::Pop, vec![reg]),
            Inc { dest } => (Opcode::Inc, vec![dest]),
            Dec { dest } => (Opcode::Dec, vec![dest]),
            Bnot { dest } => (Opcode::Bnot, vec![dest]),
            Lnot { dest } => (Opcode::Lnot, vec![dest]),

            Jlz { target } => (Opcode::Jlz, vec![target]),
            Jgz { target } => (Opcode::Jgz, vec![target]),
            Jez { target } => (Opcode::Jez, vec![target]),
            Jnz { target } => (Opcode::Jnz, vec![target]),
            Jmp { target } => (Opcode::Jmp, vec![target]),
        }
    }

    /// The instruction's opcode.
    pub fn opcode(&self) -> Opcode {
        use Instruction::*;
        match self {
            Clf => Opcode::Clf,
            Cmp { .. } => Opcode::Cmp,
            Cmpi { .. } => Opcode::Cmpi,
            Mov { .. } => Opcode::Mov,
            Sti { .. } => Opcode::Sti,
            Ldi { .. } => Opcode::Ldi,
            Lii { .. } => Opcode::Lii,
            Push { .. } => Opcode::Push,
            Pop { .. } => Opcode::Pop,
            Inc { .. } => Opcode::Inc,
            Dec { .. } => Opcode::Dec,
            Add { .. } => Opcode::Add,
            Sub { .. } => Opcode::Sub,
            Mul { .. } => Opcode::Mul,
            Div { .. } => Opcode::Div,
            Mod { .. } => Opcode::Mod,
            Jlz { .. } => Opcode::Jlz,
            Jgz { .. } => Opcode::Jgz,
            Jez { .. } => Opcode::Jez,
            Jnz { .. } => Opcode::Jnz,
            Jmp { .. } => Opcode::Jmp,
            Shl { .. } => Opcode::Shl,
            Shr { .. } => Opcode::Shr,
            Band { .. } => Opcode::Band,
            Bor { .. } => Opcode::Bor,
            Bnot { .. } => Opcode::Bnot,
            Bxor { .. } => Opcode::Bxor,
            Land { .. } => Opcode::Land,
            Lor { .. } => Opcode::Lor,
            Lnot { .. } => Opcode::Lnot,
            Prnt => Opcode::Prnt,
            Hlt => Opcode::Hlt,
        }
    }

    /// Number of memory cells the instruction occupies.
    pub fn width(&self) -> usize {
        self.opcode().width()
    }
}

/// Decode the instruction at the start of `cells`.
///
/// `cells` is the memory window beginning at the program counter; it may be
/// shorter than three cells near the end of memory. Only the cells the
/// opcode's form actually uses must be present.
pub fn decode(cells: &[i64]) -> Result<Instruction, DecodeError> {
    let raw = *cells.first().ok_or(DecodeError::Empty)?;
    let opcode = Opcode::from_i64(raw).ok_or(DecodeError::InvalidOpcode(raw))?;

    let width = opcode.width();
    if cells.len() < width {
        return Err(DecodeError::Truncated {
            opcode,
            needed: width,
            available: cells.len(),
        });
    }

    let a = cells.get(1).copied().unwrap_or(0);
    let b = cells.get(2).copied().unwrap_or(0);
    Ok(Instruction::from_parts(opcode, a, b))
}

/// Encode an instruction into its memory cells.
pub fn encode(instr: &Instruction) -> Vec<i64> {
    let (opcode, operands) = instr.parts();
    let mut cells = Vec::with_capacity(opcode.width());
    cells.push(opcode.as_i64());
    cells.extend(operands);
    cells
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode: {0}")]
    InvalidOpcode(i64),

    #[error("{opcode} needs {needed} cells but only {available} remain")]
    Truncated { opcode: Opcode, needed: usize, available: usize },

    #[error("no cells to decode")]
    Empty,
}
