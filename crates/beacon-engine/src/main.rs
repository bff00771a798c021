use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use beacon_config::BeaconConfig;
use beacon_lang::compiler::{CompileOptions, compile};
use beacon_lang::dsl::parse_rules;
use beacon_runtime::lifecycle::{Engine, wait_for_signal};
use beacon_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "beacon", about = "Beacon rule engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine against the configured Redis store
    Run {
        /// Path to beacon.toml config file
        #[arg(short, long)]
        config: PathBuf,
        /// Enable the metrics exporter regardless of config
        #[arg(long)]
        metrics: bool,
        /// Override the metrics listen address
        #[arg(long)]
        metrics_listen: Option<String>,
    },
    /// Parse and compile rule files, reporting findings without running
    Check {
        /// Rule file(s) to check
        #[arg(required = true)]
        rules: Vec<PathBuf>,
        /// Cycle period used for buffer sizing, in milliseconds
        #[arg(long, default_value_t = 100)]
        cycle_time_ms: u64,
    },
    /// Print the layered evaluation order of a rule set
    Plan {
        #[arg(required = true)]
        rules: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            metrics,
            metrics_listen,
        } => run(config, metrics, metrics_listen).await,
        Commands::Check {
            rules,
            cycle_time_ms,
        } => check(&rules, cycle_time_ms),
        Commands::Plan { rules } => print_plan(&rules),
    }
}

async fn run(config: PathBuf, metrics: bool, metrics_listen: Option<String>) -> Result<()> {
    let config_path = config
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("config path '{}': {e}", config.display()))?;
    let mut beacon_config = BeaconConfig::load(&config_path)?;
    if metrics || metrics_listen.is_some() {
        beacon_config.metrics.enabled = true;
    }
    if let Some(listen) = metrics_listen {
        beacon_config.metrics.prometheus_listen = listen;
    }
    let base_dir = config_path
        .parent()
        .expect("config path must have a parent directory");

    let _guard = init_tracing(&beacon_config.logging, base_dir)?;

    let engine = Engine::start(beacon_config, base_dir)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    tracing::info!(
        domain = "sys",
        rules = engine.rule_count(),
        layers = engine.layer_count(),
        "beacon engine started"
    );

    wait_for_signal(engine.cancel_token()).await;
    engine.shutdown();
    engine.wait().await.map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(())
}

fn check(rules: &[PathBuf], cycle_time_ms: u64) -> Result<()> {
    let out = compile_files(rules, cycle_time_ms)?;
    for warning in &out.warnings {
        eprintln!("{warning}");
    }
    println!(
        "ok: {} rule(s), {} layer(s), {} warning(s)",
        out.plan.rule_count(),
        out.plan.layers.len(),
        out.warnings.len()
    );
    Ok(())
}

fn print_plan(rules: &[PathBuf]) -> Result<()> {
    let out = compile_files(rules, 100)?;
    for (idx, layer) in out.plan.layers.iter().enumerate() {
        let names: Vec<&str> = layer.rules.iter().map(|r| r.name.as_str()).collect();
        println!("layer {idx}: {}", names.join(", "));
    }
    Ok(())
}

fn compile_files(
    rules: &[PathBuf],
    cycle_time_ms: u64,
) -> Result<beacon_lang::compiler::CompileOutput> {
    let mut files = Vec::with_capacity(rules.len());
    for path in rules {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let file =
            parse_rules(&text).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        files.push(file);
    }
    compile(
        &beacon_lang::ast::RuleFile::merge(files),
        &CompileOptions {
            cycle_time: Duration::from_millis(cycle_time_ms),
            ..CompileOptions::default()
        },
    )
}
