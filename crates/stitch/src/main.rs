use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug};
use stitch::{
    config::{Config, SplitPolicy},
    orchestrator::{BundleManifest, Bundler},
};

/// Bundle JavaScript and TypeScript modules into a single script with a source map
#[derive(Parser, Debug)]
#[command(name = "stitch", version, about)]
struct Cli {
    /// Entry module, relative to the current directory
    #[arg(value_name = "ENTRY")]
    entry: PathBuf,

    /// Directory the bundle files are written to
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Print a single summary line instead of one line per file; logging is unaffected
    #[arg(short, long)]
    quiet: bool,

    /// How modules are split over output files: single or dynamic
    #[arg(long, value_name = "POLICY")]
    split: Option<SplitPolicy>,

    /// Number of threads loading modules
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Configuration file applied after the project's stitch.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[allow(clippy::print_stderr)]
fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let root = cwd
        .canonicalize()
        .with_context(|| format!("failed to canonicalize {}", cwd.display()))?;

    let mut config = Config::load(&root, cli.config.as_deref())?;
    if let Some(split) = cli.split {
        config.split = split;
    }
    if cli.jobs.is_some() {
        config.jobs = cli.jobs;
    }
    debug!("Effective configuration: {config:?}");

    let bundler = Bundler::new(config);
    let entry_arg = root.join(&cli.entry);
    let entry = bundler
        .get_resolved_entry(&entry_arg.to_string_lossy())
        .with_context(|| format!("failed to resolve entry {}", cli.entry.display()))?;
    let manifest = bundler
        .bundle_manifest(&entry)
        .with_context(|| format!("failed to bundle {}", cli.entry.display()))?;

    write_manifest(&manifest, &cli.output_dir)?;
    report(&manifest, &cli.output_dir, cli.quiet);
    Ok(())
}

fn write_manifest(manifest: &BundleManifest, output_dir: &Path) -> Result<()> {
    for (name, file) in &manifest.files {
        let path = output_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(&path, file.content.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn report(manifest: &BundleManifest, output_dir: &Path, quiet: bool) {
    if quiet {
        println!("Saved to {}", output_dir.display());
        return;
    }
    for (name, file) in &manifest.files {
        println!(
            "{:>10}  {:<10}  {}",
            format_size(file.content.len()),
            file.kind,
            output_dir.join(name).display()
        );
    }
}

fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    }
}
