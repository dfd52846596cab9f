//! ShardBridge Command Line Interface

use std::process;

use clap::{Parser, Subcommand};
use console::style;
use shardbridge_cli::*;
use shardbridge_core::Result;

#[derive(Parser)]
#[command(name = "shardbridge")]
#[command(about = "Inspect ShardBridge sharding configuration")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which shards a statement would be dispatched to
    Route {
        /// Configuration file path
        #[arg(short, long, default_value = "shardbridge.toml")]
        config: String,

        /// Namespace-qualified statement name, e.g. orders.create
        #[arg(short, long)]
        statement: String,

        /// Payload as a JSON document
        #[arg(short, long, default_value = "null")]
        payload: String,
    },

    /// Validate a configuration file and compile its rules
    Validate {
        /// Configuration file path
        #[arg(short, long, default_value = "shardbridge.toml")]
        config: String,
    },

    /// Print the effective configuration
    Show {
        /// Configuration file path
        #[arg(short, long, default_value = "shardbridge.toml")]
        config: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: OutputFormat,
    },
}

fn main() {
    shardbridge::logging::init_with_default("warn");

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Route {
            config,
            statement,
            payload,
        } => handle_route(&config, &statement, &payload),
        Commands::Validate { config } => handle_validate(&config),
        Commands::Show { config, format } => handle_show(&config, format),
    };

    if let Err(e) = result {
        print_error(&e.to_string());
        process::exit(1);
    }
}

fn handle_route(config_path: &str, statement: &str, payload: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let report = route(&config, statement, payload)?;

    if report.route.is_empty() {
        print_info(&report.to_string());
    } else {
        let shards: Vec<&str> = report.route.shards().iter().map(|s| s.as_str()).collect();
        println!(
            "{} -> {}",
            style(&report.statement).cyan(),
            style(shards.join(", ")).yellow().bold()
        );
    }
    Ok(())
}

fn handle_validate(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let report = validate(&config)?;

    print_success(&format!("{} is valid", config_path));
    println!("  shards: {}", report.shards);
    println!("  rules: {}", report.rules);
    println!("  functions: {}", report.functions);
    if report.namespaces.is_empty() {
        print_warning("No rules declared, every statement goes to the default data source");
    } else {
        println!("  namespaces: {}", report.namespaces.join(", "));
    }
    Ok(())
}

fn handle_show(config_path: &str, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}", style("Effective configuration:").green().bold());
    println!("{}", render_config(&config, format)?);
    Ok(())
}
