//! Disassembler for register VM images.
//!
//! Renders memory cells back into assembler syntax. Output reassembles to
//! the same cells; jump targets are printed as raw numbers.

use crate::cpu::decode::{decode, Instruction};
use crate::cpu::registers::register_name;

/// One disassembled instruction or data cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLine {
    /// Address of the first cell.
    pub addr: usize,
    /// Number of cells covered.
    pub width: usize,
    /// Assembly text.
    pub text: String,
}

/// Disassemble the instruction starting at `cells[0]`.
///
/// Returns the text and the number of cells consumed. Cells that do not
/// decode are shown as a single `DAT`.
pub fn disassemble_instruction(cells: &[i64]) -> (String, usize) {
    match decode(cells) {
        Ok(instr) => (format_instruction(&instr), instr.width()),
        Err(_) => (format!("DAT {}", cells.first().copied().unwrap_or(0)), 1),
    }
}

/// Walk an image from address 0.
pub fn listing(cells: &[i64]) -> Vec<ListingLine> {
    let mut lines = Vec::new();
    let mut addr = 0;

    while addr < cells.len() {
        let (text, width) = disassemble_instruction(&cells[addr..]);
        lines.push(ListingLine { addr, width, text });
        addr += width;
    }

    lines
}

/// Disassemble an image into a printable listing.
pub fn disassemble(cells: &[i64]) -> String {
    let mut output = String::new();
    output.push_str("; Disassembly\n");
    output.push_str("; -----------\n\n");

    for line in listing(cells) {
        let raw: Vec<String> = cells[line.addr..line.addr + line.width]
            .iter()
            .map(|cell| cell.to_string())
            .collect();
        output.push_str(&format!("{:04}: {:<20} ; {}\n", line.addr, line.text, raw.join(" ")));
    }

    output
}

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction) -> String {
    let name = instr.opcode().mnemonic();

    match *instr {
        Instruction::Clf | Instruction::Prnt | Instruction::Hlt => name.to_string(),

        Instruction::Cmpi { dest, imm } | Instruction::Lii { dest, imm } => {
            format!("{} {}, {}", name, reg(dest), imm)
        }
        Instruction::Sti { addr, src } => format!("{} {}, {}", name, addr, reg(src)),
        Instruction::Ldi { dest, addr } => format!("{} {}, {}", name, reg(dest), addr),

        Instruction::Push { reg: r } | Instruction::Pop { reg: r } => format!("{} {}", name, reg(r)),

        Instruction::Inc { dest }
        | Instruction::Dec { dest }
        | Instruction::Bnot { dest }
        | Instruction::Lnot { dest } => format!("{} {}", name, reg(dest)),

        Instruction::Jmp { target }
        | Instruction::Jlz { target }
        | Instruction::Jgz { target }
        | Instruction::Jez { target }
        | Instruction::Jnz { target } => format!("{} {}", name, target),

        Instruction::Cmp { dest, src }
        | Instruction::Mov { dest, src }
        | Instruction::Add { dest, src }
        | Instruction::Sub { dest, src }
        | Instruction::Mul { dest, src }
        | Instruction::Div { dest, src }
        | Instruction::Mod { dest, src }
        | Instruction::Shl { dest, src }
        | Instruction::Shr { dest, src }
        | Instruction::Band { dest, src }
        | Instruction::Bor { dest, src }
        | Instruction::Bxor { dest, src }
        | Instruction::Land { dest, src }
        | Instruction::Lor { dest, src } => format!("{} {}, {}", name, reg(dest), reg(src)),
    }
}

/// Register operand: its name, or the raw number if out of range.
fn reg(index: i64) -> String {
    register_name(index)
        .map(str::to_string)
        .unwrap_or_else(|| index.to_string())
}
