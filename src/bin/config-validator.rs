//! # Deployment Engine Configuration Validator
//!
//! Command-line tool for validating deployment engine configuration files
//! across environments before starting a run.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use deployment_engine::config::{ConfigManager, EnginePolicy};
use deployment_engine::models::format_elapsed;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate deployment engine configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory path (default: $DEPLOY_ENGINE_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate and print the effective policy
    Validate,

    /// Print the merged configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match cli.command {
        Some(Commands::Show) => show_config(&cli),
        Some(Commands::Validate) | None => validate_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("Configuration invalid: {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<std::sync::Arc<ConfigManager>> {
    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);

    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &environment)
        .with_context(|| format!("failed to load configuration for environment '{environment}'"))
}

fn validate_config(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;

    println!("Environment: {}", manager.environment());
    println!("Config directory: {}", manager.config_directory().display());
    println!();
    print_policy(&manager.policy());

    let settings = manager.settings();
    println!("  max concurrent steps:    {}", settings.max_concurrent_steps);
    println!("  priority order:          {:?}", settings.priority_order);
    Ok(())
}

fn show_config(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    let rendered = serde_json::to_string_pretty(&manager.debug_config())
        .context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

fn print_policy(policy: &EnginePolicy) {
    let describe = |value: Option<std::time::Duration>| {
        value.map_or_else(|| "disabled".to_string(), format_elapsed)
    };

    println!("Engine policy:");
    println!("  step restart timeout:    {}", describe(policy.step_restart_timeout()));
    println!("  overall timeout:         {}", describe(policy.overall_timeout()));
    println!("  engine exit delay:       {}", format_elapsed(policy.engine_exit_delay()));
    println!("  auto retry delay:        {}", format_elapsed(policy.auto_retry_delay()));
    println!("  step deployment timeout: {}", describe(policy.step_deployment_timeout()));
    println!("  step max retries:        {}", policy.step_max_retries());
}
