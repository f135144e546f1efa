// amiexec: user-mode AmigaOS process host with a snapshot inspector

use std::io;

use amiexec::cpu::asm::Asm;
use amiexec::cpu::subset::SubsetCpu;
use amiexec::cpu::Register;
use amiexec::emulator::{EmuConfig, Emulator, RunOutcome};
use amiexec::memory::alloc::Allocation;
use amiexec::snapshot::{LogBuffer, LogCapture};
use amiexec::ui::App;
use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::LevelFilter;
use ratatui::{backend::CrosstermBackend, Terminal};

/// Tag of the host trap guest code calls to spawn a child process
const SPAWN_TAG: u16 = 1;

#[derive(Parser)]
#[command(name = "amiexec")]
#[command(about = "Run a nested sub-process scenario and inspect every controller event.", long_about = None)]
struct Cli {
    /// Guest RAM in KiB
    #[arg(long, default_value_t = 1024)]
    ram_size_kib: u32,

    /// Default process stack size in bytes
    #[arg(long, default_value_t = 8192)]
    stack_size: u32,

    /// Children spawned by every process above the deepest level
    #[arg(long, default_value_t = 2)]
    children: u32,

    /// Nesting depth of the sub-process tree
    #[arg(long, default_value_t = 2)]
    depth: u32,

    /// Arguments handed to the main process
    #[arg(long, default_value = "")]
    args: String,

    /// Make the deepest processes write into the old-dos guard range
    #[arg(long)]
    fault: bool,

    /// Instructions the CPU may run between two traps
    #[arg(long, default_value_t = 1_000_000)]
    max_steps: u64,

    /// Snapshot history budget in bytes
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    snapshot_limit: usize,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Print the log to stderr instead of opening the inspector
    #[arg(long)]
    no_tui: bool,
}

/// Code for one level of the process tree: spawn `children` times, then
/// return the level as exit code
fn level_code(level: u32, children: u32, spawn_stub: u32, fault_at: Option<u32>) -> Asm {
    let mut asm = Asm::new();
    for _ in 0..children {
        asm.jsr(spawn_stub);
    }
    if let Some(addr) = fault_at {
        asm.move_l_to_abs(Register::D0, addr);
    }
    asm.moveq(Register::D0, level as i8);
    asm.rts();
    asm
}

fn run_scenario(cli: &Cli, log: &LogBuffer) -> Result<Emulator<SubsetCpu>> {
    let config = EmuConfig {
        ram_size_kib: cli.ram_size_kib,
        stack_size: cli.stack_size,
        max_steps: cli.max_steps,
        snapshot_limit: cli.snapshot_limit,
    };
    let mut emu = Emulator::new(SubsetCpu::new(), config).context("emulator setup failed")?;
    emu.attach_log(log.clone());

    let spawn_trap = emu.register_host_trap(SPAWN_TAG, false)?;
    let mut stub = Asm::new();
    stub.aline(spawn_trap);
    let stub_block = emu.load_code("spawn_stub", &stub)?;

    let depth = cli.depth.min(i8::MAX as u32);
    let mut code: Vec<Allocation> = Vec::new();
    for level in 0..=depth {
        let children = if level < depth { cli.children } else { 0 };
        let fault_at = (cli.fault && level == depth && level > 0)
            .then(|| emu.dos_guard_base() + 0x24);
        let asm = level_code(level, children, stub_block.address(), fault_at);
        code.push(emu.load_code(&format!("level{}_code", level), &asm)?);
    }

    let main = emu.create_process("main", code[0].address(), None, cli.args.as_bytes())?;
    emu.launch_main(main)?;

    let mut spawned = 0u32;
    loop {
        match emu.run() {
            Ok(RunOutcome::Exited(ret)) => {
                eprintln!("Main process exited with {}.", ret as i32);
                break;
            }
            Ok(RunOutcome::HostCall(SPAWN_TAG)) => {
                let level = emu.controller().depth();
                match code.get(level) {
                    Some(block) => {
                        spawned += 1;
                        let name = format!("child{}", spawned);
                        let args = format!("level {}", level);
                        let child = emu.create_process(&name, block.address(), None, args.as_bytes())?;
                        emu.start_sub_process(child)?;
                    }
                    None => emu.return_from_host_call()?,
                }
            }
            Ok(RunOutcome::HostCall(_)) => emu.return_from_host_call()?,
            Ok(RunOutcome::BudgetExhausted) => {
                eprintln!("Step budget exhausted, stopping.");
                break;
            }
            Err(e) => {
                eprintln!("Run ended with an error: {}", e);
                break;
            }
        }
    }

    for block in code.iter().chain(std::iter::once(&stub_block)) {
        emu.space_mut().free_labeled(block)?;
    }
    let orphans = emu.cleanup()?;
    eprintln!(
        "{} sub-process(es) finished, {} error(s), {} orphan(s), {} snapshot(s).",
        emu.exits().len(),
        emu.tracker().errors().len(),
        orphans.len(),
        emu.snapshots().len()
    );
    Ok(emu)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log = LogBuffer::new();
    LogCapture::new(log.clone(), cli.log_level, cli.no_tui)
        .install()
        .context("failed to install logger")?;

    let emu = run_scenario(&cli, &log)?;
    if cli.no_tui {
        return Ok(());
    }

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(emu.into_snapshots(), log.lines_until(log.len()));
    let res = app.run(&mut terminal);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.context("inspector failed")
}
