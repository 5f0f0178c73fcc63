mod cli;
mod compare;
mod probe;
mod report;

use anyhow::{Context, Result};
use bench_core::{run_benchmark, BenchResult};
use clap::Parser;
use cli::Cli;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let configs = cli.to_bench_configs()?;

    // Unreachable targets fail here, before any worker spawns and before
    // any report file is written.
    for config in &configs {
        probe::check_reachable(&config.url, config.timeout).await?;
    }

    let results = if cli.compare {
        compare::run_compare(configs).await?
    } else {
        let config = configs.into_iter().next().expect("validated to one URL");
        let result = tokio::task::spawn_blocking(move || run_benchmark(config))
            .await
            .context("benchmark task panicked")??;
        vec![result]
    };

    let rendered = if results.len() > 1 {
        compare::render(&results, cli.output)?
    } else {
        report::render(&results[0], cli.output)?
    };

    match &cli.output_file {
        Some(path) => {
            report::write_report(path, &rendered)?;
            info!(path = %path.display(), "report written");
        }
        None => print!("{rendered}"),
    }

    Ok(evaluate_thresholds(cli.p99, cli.error_rate, &results))
}

/// CI gate: p99 is checked before the error rate, both strictly greater-than.
/// The first violation decides the exit code.
fn evaluate_thresholds(
    p99_limit: Option<f64>,
    error_rate_limit: Option<f64>,
    results: &[BenchResult],
) -> u8 {
    if let Some(limit) = p99_limit {
        for result in results {
            if result.latency.p99 > limit {
                eprintln!(
                    "threshold exceeded: p99 {:.2}ms > {:.2}ms ({})",
                    result.latency.p99, limit, result.url
                );
                return 1;
            }
        }
    }
    if let Some(limit) = error_rate_limit {
        for result in results {
            if result.error_fraction() > limit {
                eprintln!(
                    "threshold exceeded: error rate {:.4} > {:.4} ({})",
                    result.error_fraction(),
                    limit,
                    result.url
                );
                return 1;
            }
        }
    }
    0
}
