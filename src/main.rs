use actionpipe::cli::commands::{RunCommand, ValidateCommand};
use actionpipe::cli::output::*;
use actionpipe::cli::terminal_output::TerminalProgress;
use actionpipe::cli::{Cli, Command};
use actionpipe::core::config::PipelineConfig;
use actionpipe::{InvokeOptions, StateStore, Store, Value};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let store = Arc::new(Store::with_values(config.initial_store()));
    for (key, value) in &cmd.set {
        store.set(key, Value::Data(value.clone()));
        println!(
            "{} Store override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let pipeline = config.to_pipeline()?;
    let progress = Arc::new(TerminalProgress::new(pipeline.len()));
    if !cmd.json {
        let progress = progress.clone();
        pipeline.add_event_handler(move |event| progress.on_event(&event));
    }

    let invoker = pipeline.bind(InvokeOptions::default().with_store(store.clone()));
    let args = cmd.arg.iter().cloned().map(Value::Data).collect();

    println!();
    let report = match invoker.invoke(args).await {
        Ok(report) => report,
        Err(e) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(pipeline.name()).bold(),
                style("failed").red()
            );
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n{}", format_report(&report));
        println!("\n{} Store:", INFO);
        println!("{}", format_store(&store.snapshot(), 60));
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Store keys: {}", style(config.store.len()).cyan());
            if let Some(handler) = &config.error {
                println!("  Error handler: {}", style(&handler.handler).yellow());
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}
