use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};
use memmap2::Mmap;

use rox::error::ExitCode;
use rox::lox::{self, Lox};
use rox::scanner::scan;

#[derive(ClapParser, Debug)]
#[command(
    version,
    about = "Lox language interpreter",
    long_about = None,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Script to run; starts the REPL when omitted
    script: Option<PathBuf>,

    /// Enable logging to rox.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs a file as a Lox program
    Run { filename: PathBuf },

    /// Tokenizes a file, printing each token
    Tokenize {
        filename: PathBuf,

        /// Print the tokens as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Starts an interactive prompt
    Repl,
}

/// Maps a source file into memory.  Missing, unreadable and empty files are
/// all rejected here.
fn read_source(filename: &Path) -> Result<Mmap> {
    info!("Reading file: {:?}", filename);

    let file = File::open(filename).with_context(|| format!("Failed to open file {:?}", filename))?;
    let len = file
        .metadata()
        .with_context(|| format!("Failed to stat file {:?}", filename))?
        .len();

    if len == 0 {
        bail!("File {:?} is empty", filename);
    }

    // SAFETY: the map is read-only and lives only for this process's run.
    let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("Failed to map file {:?}", filename))?;

    info!("Mapped {} bytes from {:?}", mmap.len(), filename);
    Ok(mmap)
}

fn init_logger() -> Result<()> {
    let log_file = File::create("rox.log").context("Failed to create rox.log")?;

    Builder::new()
        .format(|buf, record| {
            let module = record
                .module_path()
                .unwrap_or("<unnamed>")
                .strip_prefix("rox::")
                .unwrap_or(record.module_path().unwrap_or("<unnamed>"));
            writeln!(
                buf,
                "{} {:<5} [{}:{}] - {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Logger initialized, writing to rox.log");
    Ok(())
}

fn exit(code: ExitCode) -> ! {
    debug!("Exiting with code {}", code.code());
    std::process::exit(code.code())
}

/// Loads `filename`, or reports why it can't be read and exits 66.
fn load_or_exit(filename: &Path) -> Mmap {
    match read_source(filename) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{:#}", e);
            exit(ExitCode::NoInput)
        }
    }
}

fn run_file(filename: &Path) {
    info!("Running {:?}", filename);
    let source = load_or_exit(filename);

    let mut session = Lox::new();
    if let Err(errors) = session.run(&source) {
        lox::report(&errors);
        exit(lox::exit_code(&errors));
    }

    info!("Program executed successfully");
}

fn tokenize_file(filename: &Path, json: bool) -> Result<()> {
    info!("Tokenizing {:?}", filename);
    let source = load_or_exit(filename);

    let (tokens, errors) = scan(&source);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &tokens).context("Failed to write tokens")?;
        writeln!(out)?;
    } else {
        for token in &tokens {
            writeln!(out, "{}", token)?;
        }
    }
    out.flush()?;

    if !errors.is_empty() {
        lox::report(&errors);
        exit(ExitCode::DataError);
    }

    info!("Tokenization completed successfully");
    Ok(())
}

fn repl() -> Result<()> {
    let mut session = Lox::new();
    let stdin = io::stdin();

    session
        .repl(stdin.lock(), io::stdout())
        .context("REPL input failed")?;
    Ok(())
}

fn main() -> Result<()> {
    let args: Cli = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let usage = e.use_stderr();
            let _ = e.print();
            exit(if usage { ExitCode::Usage } else { ExitCode::Success });
        }
    };

    if args.log {
        init_logger()?;
    } else {
        Builder::new().filter_level(log::LevelFilter::Off).init();
    }

    info!("CLI arguments: {:?}", args);

    match (args.command, args.script) {
        (Some(Commands::Run { filename }), _) | (None, Some(filename)) => run_file(&filename),
        (Some(Commands::Tokenize { filename, json }), _) => tokenize_file(&filename, json)?,
        (Some(Commands::Repl), _) | (None, None) => repl()?,
    }

    Ok(())
}
