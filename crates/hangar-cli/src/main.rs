mod commands;
mod config;
mod output;
mod telemetry;

use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hangar",
    version,
    about = "Hanging protocol matching and viewport assignment for imaging studies"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select a protocol for a candidate pool and assign its viewports
    Match {
        /// Path to the candidate pool JSON (studies, series, instances)
        pool_file: PathBuf,

        /// Custom JSON protocol file(s)
        #[arg(short, long = "rules", value_name = "FILE")]
        rules: Vec<PathBuf>,

        /// Predefined protocol(s): default, ct-body, mr-two-by-two (default: all presets if no --rules/--preset given)
        #[arg(short, long = "preset", value_name = "NAME")]
        preset: Vec<String>,

        /// Apply this protocol id instead of the best match
        #[arg(long, value_name = "ID")]
        protocol: Option<String>,

        /// Stage to show, by index or name (default: first stage)
        #[arg(short, long, value_name = "STAGE")]
        stage: Option<String>,

        /// Output format: table (default) or json
        #[arg(short, long, default_value = "table")]
        output: String,

        /// Show per-rule outcomes for every candidate and slot
        #[arg(long)]
        verbose: bool,
    },
    /// Inspect and validate protocols
    Protocols {
        #[command(subcommand)]
        action: ProtocolsAction,
    },
}

#[derive(Subcommand)]
enum ProtocolsAction {
    /// List available protocols
    List,
    /// Explain a protocol in plain language
    Explain {
        /// Protocol id (e.g., "ct-body")
        id: String,
    },
    /// Print the JSON schema with field descriptions and example
    Schema,
    /// Validate a custom protocol file
    Validate {
        /// Path to JSON protocol file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    if let Err(e) = telemetry::init(&config.telemetry) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let result = match cli.command {
        Commands::Match {
            pool_file,
            rules,
            preset,
            protocol,
            stage,
            output,
            verbose,
        } => commands::matching::run(
            &config,
            commands::matching::MatchArgs {
                pool_file,
                rule_files: rules,
                presets: preset,
                protocol,
                stage,
                output_format: output,
                verbose,
            },
        ),
        Commands::Protocols { action } => match action {
            ProtocolsAction::List => commands::protocols::list(&config),
            ProtocolsAction::Explain { id } => commands::protocols::explain(&config, &id),
            ProtocolsAction::Schema => commands::protocols::schema(),
            ProtocolsAction::Validate { file } => commands::protocols::validate(&file),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
