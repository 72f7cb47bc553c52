use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use innull::drivers::{
    GenerationOptions, ProgressBoard, Watcher, WeedOptions, block_signals, generate, weed,
};
use innull::error::Error;
use innull::record::{NULLIF, SetRecord};

/// Driver tools for the innullifiable-set search
#[derive(Parser, Debug)]
#[command(name = "innull")]
#[command(about = "Search for sets of positive integers that cannot be nullified", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty record file
    Create {
        /// Total set size tracked by the record
        size: usize,
        /// Lowest M-value of the variable segment
        min_m: u64,
        /// Highest M-value of the variable segment
        max_m: u64,
        /// Either just the record file, or a fixed-segment length, a
        /// quoted whitespace-separated value list, then the record file
        #[arg(num_args = 1..=3, value_name = "[FIXED_SIZE [\"FIXED_VALS\"]] FILE")]
        rest: Vec<String>,
    },
    /// Count the unmarked sets of a record
    Evaluate {
        /// Also list the unmarked sets, one per line
        #[arg(short = 's')]
        show: bool,
        /// Set size of the record
        size: usize,
        /// Record file
        file: PathBuf,
    },
    /// Expand a record's nullifiable sets into a record one size up
    Generation {
        /// Create the destination record instead of importing it
        #[arg(short = 'c')]
        create: bool,
        /// Debug-level logging
        #[arg(short = 'v')]
        verbose: bool,
        /// Superset phase only
        #[arg(short = 's')]
        supersets_only: bool,
        /// Mutation phase only
        #[arg(short = 'm')]
        mutations_only: bool,
        /// Mutate even sets that were only marked as supersets
        #[arg(short = 't')]
        thorough: bool,
        /// Re-export the destination on every progress signal
        #[arg(short = 'x')]
        export_on_signal: bool,
        /// Include the destination's unmarked count in snapshots
        #[arg(short = 'u')]
        count_unmarked: bool,
        /// Snapshot and exit cleanly on SIGINT
        #[arg(short = 'i')]
        snapshot_on_interrupt: bool,
        /// Set size of the source record
        src_size: usize,
        /// Source record file
        src: PathBuf,
        /// Destination record file
        dest: PathBuf,
        /// Worker thread count
        #[arg(default_value_t = 1)]
        threads: usize,
        /// Progress snapshot file, rewritten on SIGUSR1 (ideally a FIFO)
        progress: Option<PathBuf>,
    },
    /// Exhaustively test a record's unmarked sets and mark the failures
    Weed {
        /// Debug-level logging
        #[arg(short = 'v')]
        verbose: bool,
        /// Re-export the record on every progress signal
        #[arg(short = 'x')]
        export_on_signal: bool,
        /// Snapshot and exit cleanly on SIGINT
        #[arg(short = 'i')]
        snapshot_on_interrupt: bool,
        /// Set size of the record
        size: usize,
        /// Record file
        file: PathBuf,
        /// Only test sets with at least this M-value
        min_m: Option<u64>,
        /// Only test sets with at most this M-value
        max_m: Option<u64>,
        /// Worker thread count
        threads: Option<usize>,
        /// Progress snapshot file, rewritten on SIGUSR1 (ideally a FIFO)
        progress: Option<PathBuf>,
    },
}

/// Leading metadata line kept in the reserved region by the drivers.
const SOURCE_NOTE_PREFIX: &str =
    "Maximum M-value of Contiguous Complete Source (positive for actual number, -1 for weeded): ";

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Command::Generation { verbose, .. } | Command::Weed { verbose, .. } => *verbose,
        _ => false,
    };
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("innull: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Create { size, min_m, max_m, rest } => run_create(size, min_m, max_m, rest),
        Command::Evaluate { show, size, file } => run_evaluate(show, size, &file),
        Command::Generation {
            create,
            verbose: _,
            supersets_only,
            mutations_only,
            thorough,
            export_on_signal,
            count_unmarked,
            snapshot_on_interrupt,
            src_size,
            src,
            dest,
            threads,
            progress,
        } => run_generation(GenerationArgs {
            create,
            supersets_only,
            mutations_only,
            thorough,
            export_on_signal,
            count_unmarked,
            snapshot_on_interrupt,
            src_size,
            src,
            dest,
            threads,
            progress,
        }),
        Command::Weed {
            verbose: _,
            export_on_signal,
            snapshot_on_interrupt,
            size,
            file,
            min_m,
            max_m,
            threads,
            progress,
        } => run_weed(WeedArgs {
            export_on_signal,
            snapshot_on_interrupt,
            size,
            file,
            min_m,
            max_m,
            threads,
            progress,
        }),
    }
}

fn run_create(size: usize, min_m: u64, max_m: u64, rest: Vec<String>) -> Result<(), Error> {
    let (fixed, path) = match rest.as_slice() {
        [file] => (Vec::new(), PathBuf::from(file)),
        [count, values, file] => {
            let count: usize = count
                .parse()
                .map_err(|_| Error::InvalidInput("fixed segment length is not a number"))?;
            let values: Vec<u64> = values
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|_| Error::InvalidInput("fixed values must be positive numbers"))?;
            if values.len() != count {
                return Err(Error::InvalidInput(
                    "fixed value list does not match the length given",
                ));
            }
            (values, PathBuf::from(file))
        }
        _ => {
            return Err(Error::InvalidInput(
                "expected FILE, or FIXED_SIZE \"FIXED_VALS\" FILE",
            ));
        }
    };

    let var_size = size
        .checked_sub(fixed.len())
        .filter(|&v| v >= 1)
        .ok_or(Error::InvalidInput("fixed segment leaves no variable values"))?;
    let mut rec = SetRecord::new(size)?;
    rec.alloc(var_size, min_m, max_m, &fixed)?;
    write_source_note(&rec, 0)?;
    let mut file = File::create(&path)?;
    rec.export(&mut file)?;
    info!(path = %path.display(), total = rec.total(), "record created");
    Ok(())
}

fn run_evaluate(show: bool, size: usize, path: &PathBuf) -> Result<(), Error> {
    let mut rec = SetRecord::new(size)?;
    rec.import(&mut File::open(path)?)?;
    let count = rec.query(NULLIF, 0, None, |set, _| {
        if show {
            let mut line = String::new();
            for v in set {
                line.push_str(&format!("{v:>4}"));
            }
            println!("{line}");
        }
    });
    println!("{count}");
    Ok(())
}

struct GenerationArgs {
    create: bool,
    supersets_only: bool,
    mutations_only: bool,
    thorough: bool,
    export_on_signal: bool,
    count_unmarked: bool,
    snapshot_on_interrupt: bool,
    src_size: usize,
    src: PathBuf,
    dest: PathBuf,
    threads: usize,
    progress: Option<PathBuf>,
}

fn run_generation(args: GenerationArgs) -> Result<(), Error> {
    let mut src = SetRecord::new(args.src_size)?;
    src.import(&mut File::open(&args.src)?)?;

    let dest_size = args.src_size + 1;
    let mut dest = SetRecord::new(dest_size)?;
    if args.create {
        let var_size = dest_size - src.fixed_size();
        dest.alloc(var_size, src.min_m(), src.max_m(), src.fixed())?;
    } else {
        dest.import(&mut File::open(&args.dest)?)?;
    }
    if let Some(note) = read_source_note(&src) {
        write_source_note(&dest, note)?;
    }

    // -s and -m narrow to one phase each; both flags mean both phases
    let (supersets, mutations) = match (args.supersets_only, args.mutations_only) {
        (true, false) => (true, false),
        (false, true) => (false, true),
        _ => (true, true),
    };
    let opts = GenerationOptions {
        supersets,
        mutations,
        thorough: args.thorough,
        threads: args.threads,
    };

    let src = Arc::new(src);
    let dest = Arc::new(dest);
    let board = Arc::new(ProgressBoard::new(args.threads, src.total()));
    if args.progress.is_some() || args.export_on_signal || args.snapshot_on_interrupt {
        block_signals(args.snapshot_on_interrupt)?;
        let third: Box<dyn Fn() -> u64 + Send + Sync> = if args.count_unmarked {
            let dest = Arc::clone(&dest);
            Box::new(move || dest.query(NULLIF, 0, None, |_, _| {}))
        } else {
            Box::new(|| 0)
        };
        Watcher {
            progress_path: args.progress.clone(),
            board: Arc::clone(&board),
            third,
            export: args
                .export_on_signal
                .then(|| (args.dest.clone(), Arc::clone(&dest))),
            handle_interrupt: args.snapshot_on_interrupt,
        }
        .spawn()?;
    }

    let report = generate(&src, &dest, &opts, Some(&board))?;
    info!(
        expanded = report.expanded,
        marked = report.marked,
        "generation pass done"
    );

    let mut file = File::create(&args.dest)?;
    dest.export(&mut file)?;
    Ok(())
}

struct WeedArgs {
    export_on_signal: bool,
    snapshot_on_interrupt: bool,
    size: usize,
    file: PathBuf,
    min_m: Option<u64>,
    max_m: Option<u64>,
    threads: Option<usize>,
    progress: Option<PathBuf>,
}

fn run_weed(args: WeedArgs) -> Result<(), Error> {
    let bounds = match (args.min_m, args.max_m) {
        (Some(lo), Some(hi)) => Some((lo, hi)),
        (None, None) => None,
        _ => {
            return Err(Error::InvalidInput(
                "M-value bounds need both a lower and an upper value",
            ));
        }
    };
    let threads = args.threads.unwrap_or(1);

    let mut rec = SetRecord::new(args.size)?;
    rec.import(&mut File::open(&args.file)?)?;

    let rec = Arc::new(rec);
    let board = Arc::new(ProgressBoard::new(threads, rec.total()));
    if args.progress.is_some() || args.export_on_signal || args.snapshot_on_interrupt {
        block_signals(args.snapshot_on_interrupt)?;
        let passed = Arc::clone(&board);
        Watcher {
            progress_path: args.progress.clone(),
            board: Arc::clone(&board),
            third: Box::new(move || passed.aux().load(std::sync::atomic::Ordering::Relaxed)),
            export: args
                .export_on_signal
                .then(|| (args.file.clone(), Arc::clone(&rec))),
            handle_interrupt: args.snapshot_on_interrupt,
        }
        .spawn()?;
    }

    let opts = WeedOptions { threads, bounds };
    let report = weed(&rec, &opts, Some(&board))?;
    info!(
        tested = report.tested,
        weeded = report.weeded,
        passed = report.passed,
        "weed pass done"
    );

    // a full weed settles the record for good
    if bounds.is_none() {
        write_source_note(&rec, -1)?;
    }
    let mut file = File::create(&args.file)?;
    rec.export(&mut file)?;
    Ok(())
}

fn read_source_note(rec: &SetRecord) -> Option<i64> {
    let meta = rec.metadata();
    let end = meta.iter().position(|&b| b == b'\n')?;
    let line = std::str::from_utf8(&meta[..end]).ok()?;
    line.strip_prefix(SOURCE_NOTE_PREFIX)?.trim().parse().ok()
}

fn write_source_note(rec: &SetRecord, value: i64) -> Result<(), Error> {
    rec.set_metadata(format!("{SOURCE_NOTE_PREFIX}{value}\n").as_bytes())
}
