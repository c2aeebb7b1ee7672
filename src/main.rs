//! Command line driver and interactive mode.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use brainlift::io::{BfIo, StdIo};
use brainlift::{fault, interp, io, jit, profile, transpile, with_cell_width};
use brainlift::{Cell, CellWidth, Error, Program, Tape};

const USAGE: &str = "\
usage: brainlift [options] [file]

Runs the brainfuck program in `file`, or starts interactive mode.

options:
  -O<n>        optimization level 0..4 (default 4)
  -i           always interpret
  -j           always jit, fail if the host is unsupported
  -p           interpret with profiling and print a report
  -w <bits>    cell width: 8, 16, 32 or 64 (default 8)
  -c <n>       cell count (default 30000)
  -s <n>       start cell (default 0)
  -b <n>       instruction budget for the interpreter
  -e <n>       EOF byte returned on exhausted input (default 0)
  --emit-c     transpile to C instead of running
  --emit-rust  transpile to Rust instead of running
  -h, --help   this text
";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Auto,
    Interp,
    Jit,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Emit {
    C,
    Rust,
}

struct Config {
    level: u8,
    width: CellWidth,
    cells: usize,
    start: usize,
    budget: Option<u64>,
    eof_byte: u8,
    mode: Mode,
    emit: Option<Emit>,
    profile: bool,
    file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            level: 4,
            width: CellWidth::C8,
            cells: 30_000,
            start: 0,
            budget: None,
            eof_byte: 0,
            mode: Mode::Auto,
            emit: None,
            profile: false,
            file: None,
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = args;

    while let Some(arg) = args.next() {
        let mut take = |flag: &str| -> Result<String> {
            args.next().with_context(|| format!("{flag} expects a value"))
        };
        match arg.as_str() {
            "-h" | "--help" => {
                print!("{USAGE}");
                std::process::exit(0);
            }
            "-i" => cfg.mode = Mode::Interp,
            "-j" => cfg.mode = Mode::Jit,
            "-p" => cfg.profile = true,
            "-w" => {
                let bits: u32 = take("-w")?.parse().context("-w expects a number")?;
                cfg.width = CellWidth::from_bits(bits)
                    .with_context(|| format!("unsupported cell width {bits}"))?;
            }
            "-c" => cfg.cells = take("-c")?.parse().context("-c expects a number")?,
            "-s" => cfg.start = take("-s")?.parse().context("-s expects a number")?,
            "-b" => cfg.budget = Some(take("-b")?.parse().context("-b expects a number")?),
            "-e" => cfg.eof_byte = take("-e")?.parse().context("-e expects a byte")?,
            "--emit-c" => cfg.emit = Some(Emit::C),
            "--emit-rust" => cfg.emit = Some(Emit::Rust),
            _ if arg.starts_with("-O") => {
                let level = arg[2..].parse().context("-O expects a level 0..4")?;
                if level > 4 {
                    bail!("optimization level {level} out of range, expected 0..4");
                }
                cfg.level = level;
            }
            _ if arg.starts_with('-') => bail!("unknown option {arg}\n{USAGE}"),
            _ if cfg.file.is_none() => cfg.file = Some(PathBuf::from(arg)),
            _ => bail!("more than one input file\n{USAGE}"),
        }
    }
    if cfg.start >= cfg.cells {
        bail!("start cell {} outside the tape of {} cells", cfg.start, cfg.cells);
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cfg = parse_args(std::env::args().skip(1))?;
    fault::install();

    match &cfg.file {
        Some(path) => {
            let src = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            run_batch(&cfg, &src)
        }
        None => {
            with_cell_width!(cfg.width, T, { repl::<T>(&cfg) })
        }
    }
}

fn run_batch(cfg: &Config, src: &[u8]) -> Result<()> {
    let prog = Program::compile(src, cfg.level)?;

    if let Some(emit) = cfg.emit {
        let text = match emit {
            Emit::C => transpile::to_c(&prog.insns, cfg.width, cfg.cells, cfg.start, cfg.eof_byte),
            Emit::Rust => {
                transpile::to_rust(&prog.insns, cfg.width, cfg.cells, cfg.start, cfg.eof_byte)
            }
        };
        print!("{text}");
        return Ok(());
    }

    with_cell_width!(cfg.width, T, {
        let mut tape = Tape::<T>::new(cfg.cells, cfg.start)?;
        tape.grow_danger_zone(prog.max_off)?;
        execute(cfg, &prog, &mut tape)
    })
}

/// Run one compiled program against `tape`, honoring the execution mode.
fn execute<T: Cell>(cfg: &Config, prog: &Program, tape: &mut Tape<T>) -> Result<()> {
    let use_jit = match cfg.mode {
        Mode::Jit => true,
        Mode::Interp => false,
        // The interpreter owns profiling and budgets.
        Mode::Auto => !cfg.profile && cfg.budget.is_none(),
    };

    if use_jit {
        io::set_jit_io(Box::new(StdIo::new(cfg.eof_byte)));
        match jit::run(&prog.insns, tape) {
            Ok(()) => {
                io::take_jit_io();
                return Ok(());
            }
            Err(Error::UnsupportedArchitecture) if cfg.mode == Mode::Auto => {
                io::take_jit_io();
                warn!("jit unsupported on this architecture, falling back to the interpreter");
            }
            Err(err) => {
                io::take_jit_io();
                return Err(err.into());
            }
        }
    }

    let mut io = StdIo::new(cfg.eof_byte);
    if cfg.profile {
        let mut profile = profile::Profile::new(prog.insns.len());
        interp::run(&prog.insns, tape, &mut io, cfg.budget, Some(&mut profile));
        io.flush();
        eprint!("{}", profile.report(&prog.insns, 20));
    } else {
        interp::run(&prog.insns, tape, &mut io, cfg.budget, None);
    }
    Ok(())
}

/// Interactive mode: lines accumulate until the brackets balance, then the
/// chunk runs against the persistent tape.
fn repl<T: Cell>(cfg: &Config) -> Result<()> {
    let mut tape = Tape::<T>::new(cfg.cells, cfg.start)?;
    let mut pending = String::new();

    let stdin = std::io::stdin();
    loop {
        eprint!("{}", if pending.is_empty() { "% " } else { ". " });
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        pending.push_str(&line);

        match Program::compile(pending.as_bytes(), cfg.level) {
            Ok(prog) => {
                pending.clear();
                tape.grow_danger_zone(prog.max_off)?;
                execute(cfg, &prog, &mut tape)?;
            }
            // Open loop: keep reading.
            Err(Error::UnmatchedJumpForward(_)) => {}
            Err(err) => {
                pending.clear();
                eprintln!("error: {err}");
            }
        }
    }
}
