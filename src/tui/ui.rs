//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem, Wrap},
    style::{Color, Style, Modifier},
};
use crate::cpu::registers::{Registers, TypeTag, REGISTER_NAMES, R0A, R0B, R1A, R1B};
use crate::decimal::{format_general, DecimalTriple};
use super::app::DebuggerApp;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(60),
            Constraint::Percentage(40),
        ])
        .split(frame.area());

    // Left side: code, registers, output and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(8),
            Constraint::Length(14),
            Constraint::Length(6),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_output(frame, left_chunks[2], app);
    draw_status(frame, left_chunks[3], app);

    // Right side: memory and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_help(frame, right_chunks[1]);
}

/// Draw disassembly around the next instruction.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_next)| {
            let prefix = if *is_next { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:04}: {}", prefix, addr, instr);

            let style = if *is_next {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw the register file, both groups side by side.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = &app.cpu.regs;
    let mut content: Vec<Line> = (0..8)
        .map(|i| {
            Line::from(vec![
                register_span(regs, i),
                Span::raw("   "),
                register_span(regs, i + 8),
            ])
        })
        .collect();

    content.push(Line::from(vec![
        Span::raw("A: "),
        Span::styled(group_value(regs, R0A, R1A), Style::default().fg(Color::Cyan)),
        Span::raw("   B: "),
        Span::styled(group_value(regs, R0B, R1B), Style::default().fg(Color::Cyan)),
    ]));

    let flags = regs.flags;
    content.push(Line::from(vec![
        Span::raw("Flags: "),
        flag_span("Z", flags.zero),
        flag_span("L", flags.ltz),
        flag_span("G", flags.gtz),
        Span::raw("  PC: "),
        Span::styled(format!("{}", app.cpu.pc), Style::default().fg(Color::Yellow)),
        Span::raw("  SP: "),
        Span::styled(format!("{}", app.cpu.sp), Style::default().fg(Color::Magenta)),
    ]));

    content.push(Line::from(vec![
        Span::raw("Cycles: "),
        Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
        Span::raw("   State: "),
        Span::styled(format!("{:?}", app.cpu.state),
            if app.cpu.is_running() {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Red)
            }),
    ]));

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

fn register_span(regs: &Registers, index: usize) -> Span<'static> {
    let value = regs.r[index];
    let mut text = format!("{}: {:>20}", REGISTER_NAMES[index], value);
    if index == R0A || index == R0B {
        let tag = TypeTag::from_i64(value).map_or("?".to_string(), |t| format!("{:?}", t));
        text.push_str(&format!(" ({})", tag));
    }

    let style = if value == 0 {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::White)
    };
    Span::styled(text, style)
}

/// The value a group holds, read through its tag.
fn group_value(regs: &Registers, tag: usize, first: usize) -> String {
    let r = &regs.r;
    match TypeTag::from_i64(r[tag]) {
        Some(TypeTag::Bool) => (r[first] != 0).to_string(),
        Some(TypeTag::Int) => r[first].to_string(),
        Some(TypeTag::Float) => {
            let triple = DecimalTriple::new(r[first], r[first + 1], r[first + 2]);
            format_general(triple.to_f64())
        }
        Some(TypeTag::String) => format!("{} digit(s) on stack", r[first]),
        None => "-".to_string(),
    }
}

fn flag_span(name: &'static str, set: bool) -> Span<'static> {
    if set {
        Span::styled(format!("{} ", name), Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
    } else {
        Span::styled(format!("{} ", name.to_lowercase()), Style::default().fg(Color::DarkGray))
    }
}

/// Draw memory view.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let start = app.mem_scroll;
    let next = app.next_addr();

    let items: Vec<ListItem> = app.cpu.mem
        .dump(start, visible_rows)
        .into_iter()
        .map(|(addr, value)| {
            let addr_i = addr as i64;
            let marker = if addr_i == next {
                "pc"
            } else if addr_i == app.cpu.sp {
                "sp"
            } else {
                "  "
            };
            let text = format!("{} {:04}: {}", marker, addr, value);

            let style = if addr_i == next {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if addr_i >= app.cpu.sp {
                Style::default().fg(Color::Magenta)
            } else if value != 0 {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw captured program output, newest lines last.
fn draw_output(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let text = app.output_text();
    let visible = (area.height as usize).saturating_sub(2);
    let lines: Vec<&str> = text.lines().collect();
    let tail = lines[lines.len().saturating_sub(visible)..].join("\n");

    let output = Paragraph::new(tail)
        .wrap(Wrap { trim: false })
        .block(Block::default()
            .title(" Output ")
            .borders(Borders::ALL));

    frame.render_widget(output, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
