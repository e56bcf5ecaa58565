//! Debugger application state and logic.

use std::collections::HashSet;
use crate::asm::disasm::{disassemble_instruction, format_instruction, listing, ListingLine};
use crate::cpu::{Cpu, CpuConfig};

/// Debugger application state.
pub struct DebuggerApp<'m> {
    /// The CPU being debugged. Program output is captured, not printed.
    pub cpu: Cpu<'m, Vec<u8>>,
    /// Original program for reset.
    pub program: Vec<i64>,
    /// Breakpoints (by opcode address).
    pub breakpoints: HashSet<i64>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset.
    pub mem_scroll: usize,
}

impl<'m> DebuggerApp<'m> {
    /// Create a debugger over a memory block already holding `program`.
    pub fn new(memory: &'m mut [i64], program: Vec<i64>, config: CpuConfig) -> Self {
        Self {
            cpu: Cpu::with_output(memory, config, Vec::new()),
            program,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            mem_scroll: 0,
        }
    }

    /// Address of the next opcode to be fetched.
    pub fn next_addr(&self) -> i64 {
        self.cpu.pc.wrapping_add(1)
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let addr = self.next_addr();
        match self.cpu.step() {
            Ok(Some(instr)) => {
                let text = format_instruction(&instr);
                self.status = format!("PC={:04}: {}", addr, text);
            }
            Ok(None) => {
                self.status = format!("PC={:04}: skipped unknown opcode {}", addr, self.cpu.inst);
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or error.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Stopped after {} cycles", self.cpu.cycles);
            return;
        }

        let addr = self.next_addr();
        if self.breakpoints.contains(&addr) {
            self.running = false;
            self.status = format!("Breakpoint at PC={}", addr);
            return;
        }

        self.step();
    }

    /// Toggle breakpoint at the next instruction.
    pub fn toggle_breakpoint(&mut self) {
        let addr = self.next_addr();
        if self.breakpoints.remove(&addr) {
            self.status = format!("Removed breakpoint at PC={}", addr);
        } else {
            self.breakpoints.insert(addr);
            self.status = format!("Set breakpoint at PC={}", addr);
        }
    }

    /// Reload the program and reset the CPU. Captured output is cleared.
    pub fn reset(&mut self) {
        self.running = false;
        self.cpu.output_mut().clear();
        self.status = match self.cpu.reload(&self.program) {
            Ok(()) => "Reset. Ready.".into(),
            Err(e) => format!("Reset failed: {}", e),
        };
    }

    /// Disassembly around the next instruction: `(addr, text, is_next)`.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(i64, String, bool)> {
        let cells = self.cpu.mem.cells();
        let next = self.next_addr();
        let mut decoded = listing(cells);

        // A jump into the middle of an instruction leaves the listing misaligned.
        let current = match decoded.iter().position(|line| line.addr as i64 >= next) {
            Some(i) if decoded[i].addr as i64 == next => i,
            Some(i) => {
                if let Ok(start) = usize::try_from(next) {
                    let (text, width) = disassemble_instruction(&cells[start..]);
                    decoded.insert(i, ListingLine { addr: start, width, text });
                }
                i
            }
            None => decoded.len(),
        };

        let start = current.saturating_sub(lines / 2);
        decoded
            .into_iter()
            .skip(start)
            .take(lines)
            .map(|line| {
                let addr = line.addr as i64;
                (addr, line.text, addr == next)
            })
            .collect()
    }

    /// Program output captured so far.
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(self.cpu.output()).into_owned()
    }
}

/// Run the debugger with a program loaded into `memory_size` cells.
pub fn run_debugger(program: Vec<i64>, memory_size: usize, config: CpuConfig) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    let mut memory = vec![0i64; memory_size.max(program.len())];
    memory[..program.len()].copy_from_slice(&program);

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create app
    let mut app = DebuggerApp::new(&mut memory, program, config);

    // Main loop
    loop {
        // Draw
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => {
                            app.mem_scroll = app.mem_scroll.saturating_sub(1);
                        }
                        KeyCode::Down => {
                            if app.mem_scroll + 1 < app.cpu.mem.len() {
                                app.mem_scroll += 1;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // Tick for continuous running
        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
