//! Lockstep differential testing CLI.
//!
//! This binary is thin glue around `difftest-core`. It performs:
//! 1. **Run:** Load a DUT and a reference, mirror the image, and step both in lockstep until
//!    the first divergence, guest exit, reference end or instruction limit.
//! 2. **Serve:** Expose a shared-library reference over TCP so a DUT in another process
//!    (or on another machine) can drive it with a `tcp://` locator.
//!
//! Exit code 0 means the guest exited, the user stopped the session or it hit its limit;
//! 1 means a divergence, a fault, an early reference end or an error.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use difftest_core::backend::{DylibBackend, server};
use difftest_core::compare::mismatches;
use difftest_core::{
    BackendDut, BackendLocator, DifftestConfig, DifftestError, Dut, FunctionTable, HaltReason,
    Isa, RefBackend, Result, Rv32, Rv64, Session, SessionState,
};

#[derive(Parser, Debug)]
#[command(
    name = "difftest",
    author,
    version,
    about = "Lockstep differential testing of an emulator against a reference",
    long_about = "Run a device under test and a reference emulator side by side and report the first instruction batch after which their registers disagree.\n\nLocators are either a path to a shared library exporting the difftest_* entry points or tcp://host:port.\n\nExamples:\n  difftest run --dut ./libdut.so --ref ./libnemu-ref.so --image prog.bin --elf prog.elf\n  difftest serve --ref ./libnemu-ref.so --port 1234\n  difftest run --dut ./libdut.so --ref tcp://127.0.0.1:1234 --batch 64"
)]
struct Cli {
    /// Also write logs to this file (filter with RUST_LOG).
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IsaArg {
    Rv32,
    Rv64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Step a DUT and a reference in lockstep.
    Run {
        /// Device under test (shared library or tcp://host:port).
        #[arg(long)]
        dut: String,

        /// Reference (shared library or tcp://host:port); overrides the config file.
        #[arg(long = "ref")]
        reference: Option<String>,

        /// Register layout of both machines.
        #[arg(long, value_enum, default_value = "rv64")]
        isa: IsaArg,

        /// Raw image loaded at the memory base; sets the mirrored image size.
        #[arg(long)]
        image: Option<PathBuf>,

        /// ELF file whose function symbols annotate divergence reports.
        #[arg(long)]
        elf: Option<PathBuf>,

        /// JSON configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Instructions per lockstep batch.
        #[arg(long)]
        batch: Option<u64>,

        /// Stop after this many instructions.
        #[arg(long = "max-instr")]
        max_instr: Option<u64>,

        /// Channel port handed to `init` on both sides.
        #[arg(long)]
        port: Option<u16>,

        /// Print the outcome as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Serve a shared-library reference over TCP.
    Serve {
        /// Reference shared library.
        #[arg(long = "ref")]
        reference: PathBuf,

        /// Register layout the reference implements.
        #[arg(long, value_enum, default_value = "rv64")]
        isa: IsaArg,

        /// Listening port on 127.0.0.1 (0 picks a free port).
        #[arg(long, default_value_t = 1234)]
        port: u16,

        /// Exit after serving this many connections.
        #[arg(long)]
        sessions: Option<usize>,

        /// Size of the reference's register record, if larger than the register file.
        #[arg(long = "state-bytes")]
        state_bytes: Option<usize>,
    },
}

/// Options of `run` after the config file and flags are merged.
struct RunArgs {
    config: DifftestConfig,
    dut: BackendLocator,
    reference: BackendLocator,
    image: Option<Vec<u8>>,
    symbols: FunctionTable,
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log.as_deref()) {
        eprintln!("Error: cannot open log file: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run {
            dut,
            reference,
            isa,
            image,
            elf,
            config,
            batch,
            max_instr,
            port,
            json,
        } => prepare_run(
            &dut,
            reference,
            image.as_deref(),
            elf.as_deref(),
            config.as_deref(),
            (batch, max_instr, port),
            json,
        )
        .and_then(|args| match isa {
            IsaArg::Rv32 => cmd_run::<Rv32>(args),
            IsaArg::Rv64 => cmd_run::<Rv64>(args),
        }),
        Commands::Serve {
            reference,
            isa,
            port,
            sessions,
            state_bytes,
        } => match isa {
            IsaArg::Rv32 => cmd_serve::<Rv32>(&reference, port, sessions, state_bytes),
            IsaArg::Rv64 => cmd_serve::<Rv64>(&reference, port, sessions, state_bytes),
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Installs the `RUST_LOG`-filtered subscriber on stderr, or on `log` if given.
fn init_logging(log: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match log {
        Some(path) => {
            let file = File::create(path)?;
            builder.with_ansi(false).with_writer(Arc::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    if let Err(e) = installed {
        eprintln!("Warning: logging not installed: {e}");
    }
    Ok(())
}

/// Merges the config file with command-line overrides and loads the inputs.
fn prepare_run(
    dut: &str,
    reference: Option<String>,
    image: Option<&Path>,
    elf: Option<&Path>,
    config: Option<&Path>,
    (batch, max_instr, port): (Option<u64>, Option<u64>, Option<u16>),
    json: bool,
) -> Result<RunArgs> {
    let mut config = match config {
        Some(path) => DifftestConfig::from_json(&fs::read_to_string(path)?)?,
        None => DifftestConfig::default(),
    };
    if let Some(locator) = reference {
        config.reference.locator = Some(locator);
    }
    if let Some(batch) = batch {
        config.stepping.batch_size = batch;
    }
    if max_instr.is_some() {
        config.stepping.max_instructions = max_instr;
    }
    if let Some(port) = port {
        config.reference.port = port;
    }

    let image = image.map(fs::read).transpose()?;
    if let Some(bytes) = &image {
        config.memory.image_size = bytes.len();
    }
    config.validate()?;

    let reference = config
        .reference_locator()?
        .ok_or_else(|| DifftestError::Config("no reference given (--ref or reference.locator)".into()))?;
    let symbols = match elf {
        Some(path) => FunctionTable::from_elf_file(path)?,
        None => FunctionTable::default(),
    };

    Ok(RunArgs {
        config,
        dut: dut.parse()?,
        reference,
        image,
        symbols,
        json,
    })
}

/// Runs one session to completion and prints its outcome.
fn cmd_run<I: Isa>(args: RunArgs) -> Result<ExitCode> {
    let RunArgs {
        config,
        dut,
        reference,
        image,
        symbols,
        json,
    } = args;

    info!(dut = %dut, reference = %reference, isa = I::NAME, "opening backends");
    let dut_backend = dut.open::<I>(&config)?;
    let dut = BackendDut::new(dut_backend, &config, image.as_deref().unwrap_or_default())?;
    let reference = reference.open::<I>(&config)?;
    let mut session = Session::new(config, dut, reference)?;
    let _ = session.start()?;

    let outcome = session.run(None).map(Clone::clone);
    let state = match outcome {
        Ok(state) => state,
        Err(e) if e.is_reference_ended() => session.state().clone(),
        Err(e) => return Err(e),
    };

    if json {
        print_json(&session, &state, &symbols)?;
    } else {
        print_text(&mut session, &state, &symbols)?;
    }

    let (_, stats) = session.finish();
    info!(instructions = stats.instructions, "run complete");
    Ok(if is_failure(&state) { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Whether a finished run should exit non-zero.
///
/// A reference that ends before the guest exits or the limit is reached leaves the rest of
/// the program unchecked, so it fails the run like a divergence does.
const fn is_failure(state: &SessionState) -> bool {
    matches!(
        state,
        SessionState::Halted(
            HaltReason::Diverged(_) | HaltReason::Faulted { .. } | HaltReason::BackendEnded
        )
    )
}

fn print_json<I, D, B>(
    session: &Session<I, D, B>,
    state: &SessionState,
    symbols: &FunctionTable,
) -> Result<()>
where
    I: Isa,
    D: Dut<I>,
    B: RefBackend<I>,
{
    let location = state
        .divergence()
        .and_then(|report| symbols.lookup(report.pc));
    let out = serde_json::json!({
        "state": state,
        "instructions": session.instructions(),
        "function": location,
        "stats": session.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn print_text<I, D, B>(
    session: &mut Session<I, D, B>,
    state: &SessionState,
    symbols: &FunctionTable,
) -> Result<()>
where
    I: Isa,
    D: Dut<I>,
    B: RefBackend<I>,
{
    match state {
        SessionState::Halted(HaltReason::Diverged(report)) => {
            println!("[!] {}", report.render_with(symbols));
            let dut_state = session.dut_mut().arch_state()?;
            let ref_state = session.reference_state()?;
            for other in mismatches(&dut_state, &ref_state).skip(1) {
                println!("    also: {other}");
            }
            println!("\n--- DUT ---\n{dut_state}");
            println!("--- REF ---\n{ref_state}");
        }
        SessionState::Halted(HaltReason::GuestExit { code }) => {
            println!("[*] Guest exited with code {code}");
        }
        other => println!("[*] Session {other}"),
    }
    println!("\n{}", session.stats());
    Ok(())
}

/// Serves the library at `path` until `sessions` connections were handled.
fn cmd_serve<I: Isa>(
    path: &Path,
    port: u16,
    sessions: Option<usize>,
    state_bytes: Option<usize>,
) -> Result<ExitCode> {
    let mut config = DifftestConfig::default();
    config.reference.state_bytes = state_bytes;
    // Fail before listening if the library is unusable.
    drop(DylibBackend::<I>::load(path, &config)?);

    let listener = server::bind(port)?;
    println!("[*] Serving {} ({}) on {}", path.display(), I::NAME, listener.local_addr()?);
    server::serve::<I, _, _>(&listener, || DylibBackend::<I>::load(path, &config), sessions)?;
    Ok(ExitCode::SUCCESS)
}
