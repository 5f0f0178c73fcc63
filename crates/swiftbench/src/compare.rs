use crate::report::{self, OutputFormat};
use anyhow::{Context, Result};
use bench_core::{run_benchmark, BenchConfig, BenchResult};
use std::fmt::Write as _;
use tracing::info;

/// Benchmark every URL sequentially with the same load shape.
pub async fn run_compare(configs: Vec<BenchConfig>) -> Result<Vec<BenchResult>> {
    let mut results = Vec::with_capacity(configs.len());
    for config in configs {
        info!(url = %config.url, "compare: starting run");
        let result = tokio::task::spawn_blocking(move || run_benchmark(config))
            .await
            .context("benchmark task panicked")??;
        results.push(result);
    }
    Ok(results)
}

pub fn render(results: &[BenchResult], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Console => Ok(comparison_table(results)),
        OutputFormat::Json => {
            serde_json::to_string_pretty(results).context("failed to encode results as JSON")
        }
        OutputFormat::Csv => {
            let mut out = format!("{}\n", report::csv_header());
            for result in results {
                let _ = writeln!(out, "{}", report::csv_row(result));
            }
            Ok(out)
        }
        OutputFormat::Html => Ok(report::html_page(&results.iter().collect::<Vec<_>>())),
    }
}

fn comparison_table(results: &[BenchResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Comparison ({} runs) ===", results.len());
    let _ = writeln!(
        out,
        "{:<48} {:>12} {:>10} {:>10} {:>8}",
        "URL", "Req/sec", "p50", "p99", "Errors"
    );
    for result in results {
        let _ = writeln!(
            out,
            "{:<48} {:>12.2} {:>10} {:>10} {:>7.1}%",
            result.url,
            result.throughput.rps,
            format!("{:.2}ms", result.latency.p50),
            format!("{:.2}ms", result.latency.p99),
            result.error_fraction() * 100.0,
        );
    }
    if let Some(fastest) = results
        .iter()
        .max_by(|a, b| a.throughput.rps.total_cmp(&b.throughput.rps))
    {
        let _ = writeln!(out, "Fastest: {} ({:.2} req/s)", fastest.url, fastest.throughput.rps);
    }
    out
}
