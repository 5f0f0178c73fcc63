use anyhow::{Context, Result};
use bench_core::BenchResult;
use clap::ValueEnum;
use std::fmt::Write as _;
use std::path::Path;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Console,
    Json,
    Html,
    Csv,
}

pub fn render(result: &BenchResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Console => Ok(console_block(result)),
        OutputFormat::Json => serde_json::to_string_pretty(result).context("failed to encode result as JSON"),
        OutputFormat::Csv => Ok(format!("{}\n{}\n", csv_header(), csv_row(result))),
        OutputFormat::Html => Ok(html_page(&[result])),
    }
}

pub fn write_report(path: &Path, rendered: &str) -> Result<()> {
    std::fs::write(path, rendered)
        .with_context(|| format!("failed to write report to {}", path.display()))
}

pub(crate) fn console_block(result: &BenchResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Running {}s test @ {}",
        result.duration, result.url
    );
    let rate = result
        .rate
        .map(|r| format!(", {r} req/s cap"))
        .unwrap_or_default();
    let _ = writeln!(out, "  {} connections ({}){rate}", result.connections, result.method);
    let _ = writeln!(out, "  Latency Distribution");
    for (label, value) in [
        ("50%", result.latency.p50),
        ("75%", result.latency.p75),
        ("90%", result.latency.p90),
        ("95%", result.latency.p95),
        ("99%", result.latency.p99),
        ("99.9%", result.latency.p999),
    ] {
        let _ = writeln!(out, "    {label:>6}  {}", format_ms(value));
    }
    let _ = writeln!(
        out,
        "  Latency min/mean/max/stdev: {} / {} / {} / {}",
        format_ms(result.latency.min),
        format_ms(result.latency.mean),
        format_ms(result.latency.max),
        format_ms(result.latency.stddev),
    );
    let _ = writeln!(
        out,
        "  {} requests in {}s, {} read",
        result.requests.total,
        result.duration,
        format_bytes(result.throughput.total_bytes as f64),
    );
    let _ = writeln!(out, "Requests/sec: {:.2}", result.throughput.rps);
    let _ = writeln!(
        out,
        "Transfer/sec: {}",
        format_bytes(result.throughput.bytes_per_second)
    );
    if result.requests.failed > 0 {
        let _ = writeln!(
            out,
            "Failed: {} ({} timeouts, {} connection errors)",
            result.requests.failed, result.errors.timeouts, result.errors.connection_errors,
        );
        if !result.errors.by_status_code.is_empty() {
            let _ = writeln!(out, "  Non-success responses:");
            for (status, count) in &result.errors.by_status_code {
                let _ = writeln!(out, "    {status}: {count}");
            }
        }
    }
    out
}

pub(crate) fn csv_header() -> &'static str {
    "url,method,duration,connections,rate,requests_total,requests_successful,requests_failed,\
     rps,bytes_per_second,total_bytes,latency_min_ms,latency_mean_ms,latency_max_ms,\
     latency_stddev_ms,p50_ms,p75_ms,p90_ms,p95_ms,p99_ms,p999_ms,timeouts,connection_errors,\
     by_status_code,timestamp"
}

pub(crate) fn csv_row(result: &BenchResult) -> String {
    let statuses = result
        .errors
        .by_status_code
        .iter()
        .map(|(status, count)| format!("{status}:{count}"))
        .collect::<Vec<_>>()
        .join(";");
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        result.url,
        result.method,
        result.duration,
        result.connections,
        result.rate.map(|r| r.to_string()).unwrap_or_default(),
        result.requests.total,
        result.requests.successful,
        result.requests.failed,
        result.throughput.rps,
        result.throughput.bytes_per_second,
        result.throughput.total_bytes,
        result.latency.min,
        result.latency.mean,
        result.latency.max,
        result.latency.stddev,
        result.latency.p50,
        result.latency.p75,
        result.latency.p90,
        result.latency.p95,
        result.latency.p99,
        result.latency.p999,
        result.errors.timeouts,
        result.errors.connection_errors,
        statuses,
        result.timestamp,
    )
}

pub(crate) fn html_page(results: &[&BenchResult]) -> String {
    let mut sections = String::new();
    for result in results {
        let _ = write!(
            sections,
            r#"<section>
<h2>{url}</h2>
<table>
<tr><th>Requests</th><td>{total}</td><th>Successful</th><td>{success}</td><th>Failed</th><td>{failed}</td></tr>
<tr><th>Requests/sec</th><td>{rps:.2}</td><th>Transfer/sec</th><td>{transfer}</td><th>Total bytes</th><td>{bytes}</td></tr>
<tr><th>p50</th><td>{p50:.2} ms</td><th>p90</th><td>{p90:.2} ms</td><th>p99</th><td>{p99:.2} ms</td></tr>
<tr><th>p99.9</th><td>{p999:.2} ms</td><th>Mean</th><td>{mean:.2} ms</td><th>Max</th><td>{max:.2} ms</td></tr>
<tr><th>Timeouts</th><td>{timeouts}</td><th>Connection errors</th><td>{conn_errors}</td><th>Timestamp</th><td>{timestamp}</td></tr>
</table>
</section>
"#,
            url = escape_html(&result.url),
            total = result.requests.total,
            success = result.requests.successful,
            failed = result.requests.failed,
            rps = result.throughput.rps,
            transfer = format_bytes(result.throughput.bytes_per_second),
            bytes = result.throughput.total_bytes,
            p50 = result.latency.p50,
            p90 = result.latency.p90,
            p99 = result.latency.p99,
            p999 = result.latency.p999,
            mean = result.latency.mean,
            max = result.latency.max,
            timeouts = result.errors.timeouts,
            conn_errors = result.errors.connection_errors,
            timestamp = escape_html(&result.timestamp),
        );
    }
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>swiftbench report</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
table {{ border-collapse: collapse; margin-bottom: 2em; }}
th, td {{ border: 1px solid #ccc; padding: 0.4em 0.8em; text-align: left; }}
th {{ background: #f5f5f5; }}
</style>
</head>
<body>
<h1>swiftbench report</h1>
{sections}</body>
</html>
"#
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Adaptive latency unit: microseconds below 1 ms, seconds above 1 s.
pub(crate) fn format_ms(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.0}us", ms * 1_000.0)
    } else if ms < 1_000.0 {
        format!("{ms:.2}ms")
    } else {
        format!("{:.2}s", ms / 1_000.0)
    }
}

pub(crate) fn format_bytes(bytes: f64) -> String {
    if bytes < 1024.0 {
        format!("{bytes:.0}B")
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2}KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2}MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2}GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}
