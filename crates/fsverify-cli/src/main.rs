//! # fsverify CLI
//!
//! Filesystem stress and verify: writes self-verifying files, re-reads them
//! looking for silent corruption, and deletes the clean ones.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use fsverify_config::logging::{init_logging, LogLevel};
use fsverify_config::{log_driver_error, Config};

mod driver;

/// fsverify - filesystem stress and verify
#[derive(Parser)]
#[command(name = "fsverify")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level when neither FSVERIFY_LOG nor RUST_LOG is set
    #[arg(long, global = true, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write, verify and delete test files under a directory
    Run(RunArgs),

    /// Print the effective configuration as TOML
    Config(Overrides),
}

#[derive(Args)]
struct RunArgs {
    /// Directory on the filesystem under test
    #[arg(short, long, value_name = "DIR")]
    dir: PathBuf,

    #[command(flatten)]
    overrides: Overrides,
}

/// Command-line overrides, applied on top of config files and environment
#[derive(Args, Default)]
struct Overrides {
    /// Worker threads (default: number of CPUs, at most 8)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Files created by each worker
    #[arg(short, long)]
    files: Option<usize>,

    /// Verification passes before deletion
    #[arg(short, long)]
    passes: Option<usize>,

    /// Smallest file size exponent (2^N bytes)
    #[arg(long)]
    min_size_bits: Option<u32>,

    /// Largest file size exponent (2^N bytes)
    #[arg(long)]
    max_size_bits: Option<u32>,

    /// Verify each file right after writing it
    #[arg(long)]
    immediate_check: bool,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if self.threads.is_some() {
            config.run.threads = self.threads;
        }
        if let Some(files) = self.files {
            config.run.files_per_worker = files;
        }
        if let Some(passes) = self.passes {
            config.run.passes = passes;
        }
        if let Some(bits) = self.min_size_bits {
            config.files.min_size_bits = bits;
        }
        if let Some(bits) = self.max_size_bits {
            config.files.max_size_bits = bits;
        }
        if self.immediate_check {
            config.files.immediate_check = true;
        }
    }
}

fn load_config(overrides: &Overrides) -> Result<Config> {
    let mut config = Config::load_layers()?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Commands::Run(args) => {
            let config = load_config(&args.overrides)?;
            std::fs::create_dir_all(&args.dir)?;

            let summary = match driver::run(&args.dir, &config) {
                Ok(summary) => summary,
                Err(e) => {
                    log_driver_error!("Fatal error, aborting run", error = display(format!("{:#}", e)));
                    return Err(e);
                }
            };

            println!("{}", summary);
            if !summary.is_clean() {
                eprintln!(
                    "{} corrupted file(s) kept under {}",
                    summary.refused,
                    args.dir.display()
                );
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Config(overrides) => {
            let config = load_config(&overrides)?;
            print!("{}", config.to_toml());
            Ok(())
        }
    }
}
