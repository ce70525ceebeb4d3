mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "oldump",
    about = "Resumable catalog data dumps: history, latest revisions, per-type files, archival",
    version,
    propagate_version = true
)]
struct Cli {
    /// YAML configuration file (default: built-in defaults)
    #[arg(long, global = true, env = "OLDUMP_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every dump stage for a date, resuming from checkpoints
    Run(cmd::run::RunArgs),

    /// Compile a raw data-table extract into history entries
    Cdump {
        /// Raw extract (`-` for stdin, `.gz` decompressed)
        input: PathBuf,
        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Drop revisions modified after this date (yyyy-mm-dd)
        #[arg(long)]
        upto: Option<String>,
        /// Stop after reading this many raw rows
        #[arg(long, env = "OLDUMP_MAX_RECORDS")]
        max_records: Option<u64>,
        /// Drop private, admin and obsolete pages
        #[arg(long)]
        exclude_private: bool,
    },

    /// Sort history entries by key and revision
    Sort {
        /// History entries (`-` for stdin)
        input: PathBuf,
        /// Parent of the scratch directory (default: system temp dir)
        #[arg(long, env = "OLDUMP_SCRATCH_DIR")]
        scratch_dir: Option<PathBuf>,
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// In-memory budget per sorted run
        #[arg(long)]
        buffer_bytes: Option<usize>,
    },

    /// Reduce sorted history entries to the latest live revision per key
    Dump {
        /// Sorted history entries (`-` for stdin)
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Split dump rows into one file per type
    Split {
        /// Dump rows (`-` for stdin)
        input: PathBuf,
        /// File name pattern with one `%s` for the type
        #[arg(long)]
        format: String,
        /// Directory the files are written to
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Show the checkpoint state of every stage for a date
    Status {
        date: String,
        #[arg(long, env = "OLDUMP_WORK_DIR")]
        work_dir: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // stdout carries data for the stream commands; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(config, args, cli.json),
        Commands::Cdump {
            input,
            output,
            upto,
            max_records,
            exclude_private,
        } => cmd::stream::cdump(
            &input,
            output.as_deref(),
            upto.as_deref(),
            max_records,
            exclude_private,
            cli.json,
        ),
        Commands::Sort {
            input,
            scratch_dir,
            output,
            buffer_bytes,
        } => cmd::stream::sort(
            config,
            &input,
            scratch_dir,
            output.as_deref(),
            buffer_bytes,
        ),
        Commands::Dump { input, output } => cmd::stream::dump(&input, output.as_deref(), cli.json),
        Commands::Split { input, format, dir } => {
            cmd::stream::split(&input, &format, &dir, cli.json)
        }
        Commands::Status { date, work_dir } => {
            cmd::status::run(config, &date, work_dir, cli.json)
        }
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
