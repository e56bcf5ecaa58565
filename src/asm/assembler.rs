//! Two-pass assembler for register VM programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//!         LII R0A, 1      ; tag the A group as integer
//!         LII R1A, 10
//! LOOP:   DEC R1A         ; a label may share a line with an instruction
//!         CMPI R1A 0
//!         JNZ LOOP        ; jump to a label
//!         HLT
//!
//!         ORG 64          ; pad with zero cells up to address 64
//! COUNT:  DAT 42          ; raw data cell
//! ```
//!
//! Operands are separated by commas and/or whitespace. Registers are named
//! `R0A`..`R7B` or given as plain integers. Immediates and addresses are
//! decimal or `0x` hex, or a label. A label used as a jump target resolves
//! to one cell before the label, since the program counter is incremented
//! before every fetch.

use std::collections::HashMap;
use thiserror::Error;
use crate::cpu::decode::{encode, Form, Instruction, Opcode};
use crate::cpu::registers::register_index;

/// Largest address `ORG` may move to.
pub const MAX_ORIGIN: i64 = 1 << 24;

/// Assemble source code to a memory image.
pub fn assemble(source: &str) -> Result<Vec<i64>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// How an operand cell is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandKind {
    /// Register name or number.
    Register,
    /// Literal value or label address.
    Immediate,
    /// Jump target; labels land one cell early.
    Target,
}

impl OperandKind {
    fn of(opcode: Opcode) -> &'static [OperandKind] {
        use OperandKind::*;
        match opcode {
            Opcode::Cmpi | Opcode::Lii => &[Register, Immediate],
            Opcode::Sti => &[Immediate, Register],
            Opcode::Ldi => &[Register, Immediate],
            _ => match opcode.form() {
                Form::Bare => &[],
                Form::Register | Form::Stack => &[Register],
                Form::Jump => &[Target],
                Form::Binary => &[Register, Register],
            },
        }
    }
}

/// A label reference waiting for pass 2.
struct Fixup {
    index: usize,
    label: String,
    offset: i64,
    line: usize,
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> address).
    symbols: HashMap<String, i64>,
    /// Pending label references.
    pending: Vec<Fixup>,
    /// Output cells; the current address is its length.
    output: Vec<i64>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<i64>, AssemblerError> {
        // Pass 1: emit code, define labels, record forward references
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: patch label references
        self.resolve_references()?;

        Ok(std::mem::take(&mut self.output))
    }

    fn current_addr(&self) -> i64 {
        self.output.len() as i64
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let mut line = line.trim();

        if let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim();
            self.define_label(label, line_num)?;
            line = line[colon_idx + 1..].trim();
        }

        if line.is_empty() {
            return Ok(());
        }

        self.process_statement(line, line_num)
    }

    fn define_label(&mut self, label: &str, line_num: usize) -> Result<(), AssemblerError> {
        if !is_identifier(label) || register_index(label).is_some() {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("invalid label name '{}'", label),
            });
        }

        let key = label.to_uppercase();
        if self.symbols.contains_key(&key) {
            return Err(AssemblerError::DuplicateLabel { line: line_num, label: key });
        }
        self.symbols.insert(key, self.current_addr());
        Ok(())
    }

    fn process_statement(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let mut parts = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty());
        let Some(mnemonic) = parts.next() else {
            return Ok(());
        };
        let mnemonic = mnemonic.to_uppercase();
        let operands: Vec<&str> = parts.collect();

        match mnemonic.as_str() {
            // Directives
            "ORG" => {
                check_count(&mnemonic, &operands, 1, line_num)?;
                let origin = parse_number(operands[0]).ok_or_else(|| AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("ORG requires a numeric address, got '{}'", operands[0]),
                })?;
                let current = self.current_addr();
                if origin < current {
                    return Err(AssemblerError::OrgBackwards { line: line_num, origin, current });
                }
                if origin > MAX_ORIGIN {
                    return Err(AssemblerError::OrgTooLarge { line: line_num, origin });
                }
                self.output.resize(origin as usize, 0);
            }

            "DAT" | "DATA" => {
                check_count(&mnemonic, &operands, 1, line_num)?;
                let index = self.output.len();
                let value = self.operand(operands[0], OperandKind::Immediate, index, line_num)?;
                self.output.push(value);
            }

            // Instructions
            _ => {
                let opcode = Opcode::from_mnemonic(&mnemonic).ok_or_else(|| {
                    AssemblerError::UnknownMnemonic { line: line_num, mnemonic: mnemonic.clone() }
                })?;
                let kinds = OperandKind::of(opcode);
                check_count(&mnemonic, &operands, kinds.len(), line_num)?;

                let start = self.output.len();
                let mut values = [0i64; 2];
                for (i, (text, kind)) in operands.iter().zip(kinds).enumerate() {
                    values[i] = self.operand(text, *kind, start + 1 + i, line_num)?;
                }

                let instr = Instruction::from_parts(opcode, values[0], values[1]);
                self.output.extend(encode(&instr));
            }
        }

        Ok(())
    }

    /// Parse one operand destined for output cell `index`. Labels yield a
    /// placeholder and a fixup.
    fn operand(&mut self, text: &str, kind: OperandKind, index: usize, line_num: usize)
        -> Result<i64, AssemblerError>
    {
        if kind == OperandKind::Register {
            if let Some(reg) = register_index(text) {
                return Ok(reg as i64);
            }
        }

        if let Some(value) = parse_number(text) {
            return Ok(value);
        }

        if kind == OperandKind::Register || !is_identifier(text) {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("invalid operand '{}'", text),
            });
        }

        let offset = if kind == OperandKind::Target { -1 } else { 0 };
        self.pending.push(Fixup {
            index,
            label: text.to_uppercase(),
            offset,
            line: line_num,
        });
        Ok(0)
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for fixup in &self.pending {
            let addr = self.symbols.get(&fixup.label).ok_or_else(|| AssemblerError::UndefinedLabel {
                line: fixup.line,
                label: fixup.label.clone(),
            })?;
            self.output[fixup.index] = addr + fixup.offset;
        }
        Ok(())
    }
}

fn check_count(mnemonic: &str, operands: &[&str], expected: usize, line_num: usize)
    -> Result<(), AssemblerError>
{
    if operands.len() != expected {
        return Err(AssemblerError::OperandCount {
            line: line_num,
            mnemonic: mnemonic.to_string(),
            expected,
            found: operands.len(),
        });
    }
    Ok(())
}

/// Decimal or `0x` hex, with an optional leading minus.
fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else if digits.chars().all(|c| c.is_ascii_digit()) {
        return text.parse::<i64>().ok();
    } else {
        return None;
    };

    Some(if negative { magnitude.wrapping_neg() } else { magnitude })
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("{mnemonic} on line {line} takes {expected} operand(s), found {found}")]
    OperandCount { line: usize, mnemonic: String, expected: usize, found: usize },

    #[error("ORG {origin} on line {line} is behind the current address {current}")]
    OrgBackwards { line: usize, origin: i64, current: i64 },

    #[error("ORG {origin} on line {line} is beyond the largest image ({})", MAX_ORIGIN)]
    OrgTooLarge { line: usize, origin: i64 },
}
