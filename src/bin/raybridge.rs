// Raybridge CLI
// Checks that a raylib build can be bound, and prints the struct layouts the bridge expects

use clap::{Parser, Subcommand};
use colored::Colorize;
use raybridge::abi::mirror;
use raybridge::{ActiveRaylib, Binding, Bridge, BridgeConfig, BridgeError, BridgeResult};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "raybridge")]
#[command(about = "Raybridge - raylib 5.5 native bridge", long_about = None)]
#[command(version)]
struct Cli {
    /// Show debug logs (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load raylib and run every startup check
    Check {
        /// Config file (defaults to the nearest raybridge.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Open this library file instead of searching by name
        #[arg(short, long)]
        library: Option<PathBuf>,
    },
    /// Verify and print the mirrored struct layouts
    Layouts {
        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },
}

fn print_header() {
    println!();
    println!("{}", "raybridge".green().bold());
}

fn print_info(label: &str, value: &str) {
    println!("{} {:<10} {}", "|".dimmed(), label, value.cyan());
}

fn print_success(msg: &str) {
    println!("{} {}", "Done".green().bold(), msg.dimmed());
}

fn print_error(err: &BridgeError) {
    eprint!("{}", err.format());
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(config: Option<PathBuf>, library: Option<PathBuf>) -> BridgeResult<BridgeConfig> {
    let mut loaded = match config {
        Some(path) => BridgeConfig::load(&path)?,
        None => BridgeConfig::discover(&std::env::current_dir()?)?,
    };
    if library.is_some() {
        loaded.library_path = library;
    }
    Ok(loaded)
}

fn cmd_check(config: Option<PathBuf>, library: Option<PathBuf>) -> BridgeResult<()> {
    let config = load_config(config, library)?;
    let bridge = Bridge::<ActiveRaylib>::open(config)?;

    print_header();
    print_info("library", bridge.library_name().unwrap_or("linked"));
    print_info("version", bridge.version());
    print_info("backend", &bridge.backend().to_string());
    print_info(
        "symbols",
        &<ActiveRaylib as Binding>::SYMBOLS.len().to_string(),
    );
    print_success("raylib is ready");
    Ok(())
}

fn cmd_layouts(json: bool) -> BridgeResult<()> {
    let reports = mirror::verify_all()?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).map_err(|e| BridgeError::Config(e.to_string()))?
        );
        return Ok(());
    }

    print_header();
    for report in &reports {
        let checked = if report.header_checked {
            "header".green()
        } else {
            "local".yellow()
        };
        println!(
            "{:<18} size {:>3}  align {:>2}  {}",
            report.name.bold(),
            report.size,
            report.align,
            checked
        );
        for field in &report.fields {
            println!(
                "  {} {:<16} {:>3}  {}",
                "|".dimmed(),
                field.name,
                field.offset,
                field.ty.dimmed()
            );
        }
    }
    print_success(&format!("{} layouts verified", reports.len()));
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Check { config, library } => cmd_check(config, library),
        Commands::Layouts { json } => cmd_layouts(json),
    };

    if let Err(e) = result {
        print_error(&e);
        process::exit(1);
    }
}
