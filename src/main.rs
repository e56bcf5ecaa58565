//! regvm - CLI Entry Point
//!
//! Commands:
//! - `regvm run <program>` - Run an image or ASM file
//! - `regvm debug <program>` - Interactive debugger
//! - `regvm asm <source>` - Assemble to an image file
//! - `regvm disasm <image>` - Disassemble an image file
//! - `regvm test` - Built-in self-test
//!
//! Program output goes to stdout; status messages and logs go to stderr.
//! Set `RUST_LOG=regvm=debug` to see halts and faults, `trace` for every step.

use clap::{Parser, Subcommand};
use regvm::{Cpu, CpuConfig, CpuError};
use regvm::asm::disasm::format_instruction;
use regvm::cpu::UnknownOpcodePolicy;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regvm")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "A register virtual machine with decimal-float registers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the image or ASM file to execute
        program: String,
        /// Maximum number of cycles to run
        #[arg(short, long, default_value = "10000")]
        max_cycles: u64,
        /// Dump every register after each instruction
        #[arg(short, long)]
        trace: bool,
        /// Memory size in cells (at least the image size)
        #[arg(long, default_value = "1024")]
        memory: usize,
        /// CPU configuration file (JSON)
        #[arg(short, long)]
        config: Option<String>,
        /// Treat unknown opcodes as no-ops instead of faulting
        #[arg(long)]
        ignore_unknown: bool,
        /// Print the final CPU state as JSON
        #[arg(long)]
        dump_state: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the image or ASM file to debug
        program: String,
        /// Memory size in cells (at least the image size)
        #[arg(long, default_value = "1024")]
        memory: usize,
    },
    /// Assemble source to an image file
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file (`.json` for JSON)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble an image file to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace, memory, config, ignore_unknown, dump_state }) => {
            let mut cpu_config = load_config(config.as_deref());
            cpu_config.debug |= trace;
            if ignore_unknown {
                cpu_config.unknown_opcode = UnknownOpcodePolicy::Ignore;
            }
            run_program(&program, max_cycles, memory, cpu_config, dump_state);
        }
        Some(Commands::Debug { program, memory }) => {
            debug_program(&program, memory);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("regvm v0.1.0");
            println!("A register virtual machine with decimal-float registers");
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&str>) -> CpuConfig {
    let Some(path) = path else {
        return CpuConfig::default();
    };

    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()));

    match parsed {
        Ok(config) => {
            tracing::debug!(path, ?config, "loaded config");
            config
        }
        Err(e) => {
            eprintln!("❌ Failed to load config {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

/// Load an image file, or assemble an `.asm` source.
fn load_program(path: &str) -> Vec<i64> {
    use regvm::{assemble, load_image};

    let cells = if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match assemble(&source) {
            Ok(cells) => {
                eprintln!("📝 Assembled {} cells", cells.len());
                cells
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_image(path) {
            Ok(image) => {
                eprintln!("📂 Loaded {} cells", image.len());
                image.cells
            }
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                std::process::exit(1);
            }
        }
    };

    if cells.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    cells
}

fn run_program(path: &str, max_cycles: u64, memory_size: usize, config: CpuConfig, dump_state: bool) {
    eprintln!("🔧 Running: {}", path);

    let program = load_program(path);
    let mut memory = vec![0i64; memory_size.max(program.len())];
    memory[..program.len()].copy_from_slice(&program);

    let mut cpu = Cpu::with_output(&mut memory, config, std::io::stdout());
    let result = cpu.run_limited(max_cycles);

    eprintln!();
    eprintln!("━━━ Result ━━━");
    eprintln!("Cycles: {}", cpu.cycles);
    eprintln!("State: {:?}", cpu.state);
    eprintln!("PC: {}  SP: {}", cpu.pc, cpu.sp);
    if let Some(instr) = cpu.last_instruction() {
        eprintln!("Last instruction: {}", format_instruction(&instr));
    }
    eprintln!("Registers: {}", cpu.regs);

    if dump_state {
        match cpu.snapshot().to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("❌ Failed to serialize state: {}", e),
        }
    }

    match result {
        Err(e) => {
            report_error(&e, cpu.pc);
            std::process::exit(1);
        }
        Ok(_) if cpu.is_running() => {
            eprintln!();
            eprintln!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.", max_cycles);
        }
        Ok(_) => {}
    }
}

fn report_error(error: &CpuError, pc: i64) {
    eprintln!("❌ CPU error at PC={}: {}", pc, error);
}

#[cfg(feature = "tui")]
fn debug_program(path: &str, memory_size: usize) {
    use regvm::tui::run_debugger;

    eprintln!("🔍 Loading: {}", path);
    let program = load_program(path);

    eprintln!("🚀 Launching debugger...");

    if let Err(e) = run_debugger(program, memory_size, CpuConfig::default()) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str, _memory_size: usize) {
    eprintln!("❌ Built without the `tui` feature; the debugger is unavailable");
    std::process::exit(1);
}

fn assemble_file(source_path: &str, output: Option<String>) {
    use regvm::{assemble, save_image, ImageFile};

    let out_path = output.unwrap_or_else(|| {
        match source_path.strip_suffix(".asm") {
            Some(stem) => format!("{}.img", stem),
            None => format!("{}.img", source_path),
        }
    });

    eprintln!("📝 Assembling: {} → {}", source_path, out_path);

    // Read source
    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    // Assemble
    let cells = match assemble(&source) {
        Ok(cells) => cells,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    eprintln!("✓ Assembled {} cells", cells.len());

    if let Err(e) = save_image(&out_path, &ImageFile::new(cells)) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    eprintln!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str) {
    use regvm::{disassemble, load_image};

    let image = match load_image(image_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble(&image.cells));
}

/// Run `source` in a 256-cell block, capturing output.
fn run_captured(source: &str, config: CpuConfig) -> Result<(Vec<i64>, String), String> {
    let program = regvm::assemble(source).map_err(|e| e.to_string())?;
    let mut memory = vec![0i64; 256];
    memory[..program.len()].copy_from_slice(&program);

    let mut cpu = Cpu::with_output(&mut memory, config, Vec::new());
    cpu.run_limited(10_000).map_err(|e| e.to_string())?;
    let regs = cpu.regs.r.to_vec();
    let output = String::from_utf8_lossy(&cpu.into_output()).into_owned();
    Ok((regs, output))
}

fn run_self_test() {
    use regvm::{build_f64, parse_f64, DecimalTriple};
    use regvm::cpu::Opcode;

    println!("━━━ regvm Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;
    let mut check = |name: &str, ok: bool, detail: String| {
        if ok {
            println!("{}... ✓", name);
            passed += 1;
        } else {
            println!("{}... ✗ ({})", name, detail);
            failed += 1;
        }
    };

    // Test 1: Decimal encoding
    let encoded = parse_f64(12.034);
    check(
        "Decimal encode 12.034",
        encoded == Ok(DecimalTriple::new(12, 34, 1)),
        format!("got {:?}", encoded),
    );

    // Test 2: Decimal decoding
    let decoded = build_f64(12, 34, 1);
    check(
        "Decimal decode (12, 34, 1)",
        (decoded - 12.034).abs() < 1e-9,
        format!("got {}", decoded),
    );

    // Test 3: Round trip at six fractional digits
    let values = [0.0, 1.5, -2.25, 0.001, -0.5, 123456.789012];
    let bad: Vec<f64> = values
        .iter()
        .copied()
        .filter(|&v| parse_f64(v).map(|t| (t.to_f64() - v).abs() > 1e-6).unwrap_or(true))
        .collect();
    check("Decimal round trip", bad.is_empty(), format!("failed for {:?}", bad));

    // Test 4: Integer arithmetic
    let result = run_captured("LII R0A 1\nLII R1A 7\nLII R1B 3\nADD R1A R1B\nHLT", CpuConfig::default());
    check(
        "Integer ADD 7 + 3",
        matches!(&result, Ok((regs, _)) if regs[1] == 10),
        format!("got {:?}", result),
    );

    // Test 5: Decimal arithmetic and print
    let result = run_captured(
        "LII R0A 2\nLII R1A 1\nLII R2A 5\nLII R3A 0\nLII R1B 2\nMUL R1A R1B\nPRNT\nHLT",
        CpuConfig::default(),
    );
    check(
        "Decimal MUL 1.5 * 2",
        matches!(&result, Ok((_, out)) if out == "3\n"),
        format!("got {:?}", result),
    );

    // Test 6: Typed print
    let result = run_captured(
        "LII R0A 0\nLII R1A 1\nPRNT\nLII R0A 1\nLII R1A -42\nPRNT\nHLT",
        CpuConfig::default(),
    );
    check(
        "PRNT bool and int",
        matches!(&result, Ok((_, out)) if out == "true\n-42\n"),
        format!("got {:?}", result),
    );

    // Test 7: Stack discipline
    let result = run_captured(
        "LII R1A 11\nLII R2A 22\nPUSH R1A\nPUSH R2A\nPOP R3A\nPOP R4A\nHLT",
        CpuConfig::default(),
    );
    check(
        "PUSH/POP LIFO",
        matches!(&result, Ok((regs, _)) if regs[3] == 22 && regs[4] == 11),
        format!("got {:?}", result),
    );

    // Test 8: Unknown opcode
    let mut memory = vec![Opcode::Clf.as_i64(), 99, Opcode::Hlt.as_i64()];
    let mut cpu = Cpu::with_output(&mut memory, CpuConfig::default(), Vec::new());
    let result = cpu.run();
    check(
        "Unknown opcode faults in place",
        matches!(result, Err(CpuError::UnknownOpcode { opcode: 99, pc: 1 })) && cpu.pc == 1,
        format!("got {:?}, pc {}", result, cpu.pc),
    );

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
