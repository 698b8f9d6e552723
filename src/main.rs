use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratekeeper::config::RatekeeperConfig;
use ratekeeper::ratelimit::{LimiterRegistry, RateLimiter};

#[derive(Debug, Parser)]
#[command(name = "ratekeeper", version, about = "Exercise in-process rate limiters")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a configuration file and list its limiters
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Drive one configured limiter with a synthetic request stream
    Simulate {
        #[arg(short, long)]
        config: PathBuf,
        /// Name of the limiter to exercise
        #[arg(short, long)]
        limiter: String,
        /// Key for keyed limiters
        #[arg(short, long)]
        key: Option<String>,
        #[arg(long, default_value_t = 100)]
        requests: u64,
        /// Pause between requests
        #[arg(long, default_value_t = 10)]
        interval_ms: u64,
        /// Extra random delay added to each pause
        #[arg(long, default_value_t = 0)]
        jitter_ms: u64,
        #[arg(long, default_value_t = 1)]
        cost: u64,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    limiter: String,
    algorithm: String,
    requests: u64,
    admitted: u64,
    denied: u64,
    final_level: u64,
    elapsed_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Command::Check { config } => check(&config),
        Command::Simulate {
            config,
            limiter,
            key,
            requests,
            interval_ms,
            jitter_ms,
            cost,
            json,
        } => {
            let config = load_config(&config)?;
            let registry = LimiterRegistry::from_config(&config)?;

            let result = simulate(
                &registry,
                &limiter,
                key.as_deref(),
                requests,
                Duration::from_millis(interval_ms),
                jitter_ms,
                cost,
            )
            .await;

            registry.shutdown().await;
            let report = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} ({}): {} admitted, {} denied of {} requests in {}ms, final level {}",
                    report.limiter,
                    report.algorithm,
                    report.admitted,
                    report.denied,
                    report.requests,
                    report.elapsed_ms,
                    report.final_level
                );
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<RatekeeperConfig> {
    RatekeeperConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    info!(limiters = config.limiters.len(), "Configuration is valid");

    for (name, policy) in &config.limiters {
        println!("{}\t{}", name, policy.algorithm());
    }
    Ok(())
}

async fn simulate(
    registry: &LimiterRegistry,
    name: &str,
    key: Option<&str>,
    requests: u64,
    interval: Duration,
    jitter_ms: u64,
    cost: u64,
) -> anyhow::Result<SimulationReport> {
    let Some(limiter) = registry.get(name) else {
        bail!(
            "No limiter named '{}' (available: {})",
            name,
            registry.names().collect::<Vec<_>>().join(", ")
        );
    };

    info!(
        limiter = %name,
        algorithm = %limiter.algorithm(),
        requests = requests,
        "Starting simulation"
    );

    let started = tokio::time::Instant::now();
    let mut admitted = 0;
    for _ in 0..requests {
        if limiter.try_acquire(key, cost) {
            admitted += 1;
        }

        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        tokio::time::sleep(interval + Duration::from_millis(jitter)).await;
    }

    Ok(SimulationReport {
        limiter: name.to_string(),
        algorithm: limiter.algorithm().to_string(),
        requests,
        admitted,
        denied: requests - admitted,
        final_level: limiter.current_level(key),
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}
