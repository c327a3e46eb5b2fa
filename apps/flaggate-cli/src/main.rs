mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, CliOverrides};
use flaggate::{
    FeatureFlag, FlagRegistry, FlagState, LoggingMetrics, PolicyEvaluator,
    build_claims_extractor, build_flag_source, build_route_policy,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// flaggate - feature-flag based access control
#[derive(Parser)]
#[command(name = "flaggate")]
#[command(about = "Inspect a flag registry and evaluate identity claims against it")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Registry endpoint override
    #[arg(long)]
    endpoint: Option<String>,

    /// Registry document on disk, replaces the configured source
    #[arg(long)]
    flags_file: Option<PathBuf>,

    /// Print effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration, fetch the registry once and print a summary
    Check,
    /// Fetch the registry once and list its flags
    Flags {
        /// Print the flag definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Evaluate a claims document against a flag; exits 1 on deny
    Eval {
        /// Flag key to evaluate
        #[arg(long)]
        flag: String,

        /// Claims JSON file, or `-` for stdin
        #[arg(long, default_value = "-")]
        claims: String,
    },
    /// Keep the registry warm and report its status until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config
        && !Path::new(path).is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (FLAGGATE__*) -> 4) CLI overrides
    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    config.apply_cli_overrides(&CliOverrides {
        endpoint: cli.endpoint.clone(),
        flags_file: cli.flags_file.clone(),
    });

    logging::init_logging(&config.logging, cli.verbose);

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => check_config(&config).await,
        Commands::Flags { json } => list_flags(&config, json).await,
        Commands::Eval { flag, claims } => eval(&config, &flag, &claims).await,
        Commands::Watch => watch(&config).await,
    }
}

async fn check_config(config: &AppConfig) -> Result<ExitCode> {
    tracing::info!("Checking configuration...");
    let routes = build_route_policy(&config.gate)?;
    let registry = warm_registry(config).await?;
    let status = registry.status();
    println!(
        "Configuration is valid (source: {}, registry version: {}, flags: {}, gated routes: {})",
        status.source,
        status.version.as_deref().unwrap_or("-"),
        status.flag_count,
        routes.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn build_registry(config: &AppConfig) -> Result<Arc<FlagRegistry>> {
    config.gate.validate()?;
    let source = build_flag_source(&config.gate.registry)?;
    Ok(Arc::new(
        FlagRegistry::new(
            source,
            config.gate.registry.clone(),
            config.gate.cache.clone(),
        )
        .with_metrics(Arc::new(LoggingMetrics)),
    ))
}

/// Registry with one successful fetch behind it
async fn warm_registry(config: &AppConfig) -> Result<Arc<FlagRegistry>> {
    let registry = build_registry(config)?;
    registry
        .refresh()
        .await
        .context("failed to fetch flags from the registry")?;
    Ok(registry)
}

async fn list_flags(config: &AppConfig, json: bool) -> Result<ExitCode> {
    let registry = warm_registry(config).await?;
    let snapshot = registry.snapshot()?;
    let flags = snapshot.flags();

    if json {
        let defs: Vec<&FeatureFlag> = flags.iter().map(AsRef::as_ref).collect();
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("registry version {} ({} flags)", snapshot.version(), flags.len());
    for flag in &flags {
        println!("{:<40} v{:<6} {}", flag.key, flag.version, describe(flag));
    }
    Ok(ExitCode::SUCCESS)
}

fn describe(flag: &FeatureFlag) -> String {
    match flag.state {
        FlagState::Enabled => "enabled".to_owned(),
        FlagState::Disabled => "disabled".to_owned(),
        FlagState::PercentageRollout { percentage } => format!("rollout {percentage}%"),
        FlagState::Targeted { fallthrough } => {
            let rules = flag.rules.len();
            match fallthrough {
                Some(effect) if effect.is_allow() => {
                    format!("targeted ({rules} rules, fallthrough allow)")
                }
                Some(_) => format!("targeted ({rules} rules, fallthrough deny)"),
                None => format!("targeted ({rules} rules)"),
            }
        }
    }
}

async fn eval(config: &AppConfig, flag_key: &str, claims_source: &str) -> Result<ExitCode> {
    let assertion = read_claims(claims_source).await?;
    let claims = build_claims_extractor(&config.gate)
        .extract(&assertion)
        .context("malformed claims")?;

    let evaluator = PolicyEvaluator::new(warm_registry(config).await?);
    let decision = evaluator.evaluate(&claims, flag_key)?;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(if decision.is_allowed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn read_claims(source: &str) -> Result<Value> {
    let bytes = if source == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("failed to read claims from stdin")?;
        buf
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("failed to read claims file {source}"))?
    };
    serde_json::from_slice(&bytes).context("claims are not valid JSON")
}

async fn watch(config: &AppConfig) -> Result<ExitCode> {
    let registry = build_registry(config)?;
    let cancel = CancellationToken::new();
    let task = registry.spawn_refresh_task(cancel.clone());
    let report_every = config.gate.registry.refresh_interval();

    tracing::info!("Watching flag registry; press Ctrl-C to stop");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            () = tokio::time::sleep(report_every) => {
                println!("{}", serde_json::to_string(&registry.status())?);
            }
        }
    }

    cancel.cancel();
    task.await.context("refresh task panicked")?;
    Ok(ExitCode::SUCCESS)
}
