use crate::report::OutputFormat;
use anyhow::{bail, Context, Result};
use bench_core::BenchConfig;
use clap::{ArgAction, Parser};
use reqwest::Method;
use std::path::PathBuf;
use std::time::Duration;

const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

#[derive(Parser, Debug)]
#[command(name = "swiftbench", version)]
#[command(about = "Closed-loop HTTP load generator with latency percentiles and CI thresholds")]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Target URL (two or more with --compare)
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Aggregate concurrency across all workers
    #[arg(short, long, default_value_t = 50)]
    pub connections: u32,

    /// Test duration in seconds
    #[arg(short, long, default_value_t = 10)]
    pub duration: u64,

    /// Aggregate request rate cap in req/s (unlimited when omitted)
    #[arg(long)]
    pub rate: Option<u32>,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout: u64,

    /// Ramp load linearly from zero over this many seconds
    #[arg(long, default_value_t = 0)]
    pub ramp_up: u64,

    /// Warmup seconds before the measured window (metrics are included)
    #[arg(long, default_value_t = 0)]
    pub warmup: u64,

    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    pub method: String,

    /// Add a request header ("Name: Value"); repeatable
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Raw request body
    #[arg(long, conflicts_with = "json")]
    pub body: Option<String>,

    /// JSON request body (sets Content-Type: application/json)
    #[arg(long)]
    pub json: Option<String>,

    /// Prefer HTTP/2
    #[arg(long)]
    pub http2: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Console)]
    pub output: OutputFormat,

    /// Write the rendered report to a file
    #[arg(short = 'o', value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Fail (exit 1) if p99 latency in ms exceeds this value
    #[arg(long)]
    pub p99: Option<f64>,

    /// Fail (exit 1) if the failed fraction exceeds this value in [0, 1]
    #[arg(long)]
    pub error_rate: Option<f64>,

    /// Benchmark every URL sequentially and compare
    #[arg(long)]
    pub compare: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

impl Cli {
    /// Translate the flag surface into per-URL benchmark configurations,
    /// rejecting anything a run must not start with.
    pub fn to_bench_configs(&self) -> Result<Vec<BenchConfig>> {
        if self.compare {
            if self.urls.len() < 2 {
                bail!("--compare requires at least two URLs");
            }
        } else if self.urls.len() != 1 {
            bail!("exactly one URL expected (use --compare for multiple)");
        }

        if let Some(fraction) = self.error_rate {
            if !(0.0..=1.0).contains(&fraction) {
                bail!("--error-rate must be within [0, 1], got {fraction}");
            }
        }

        let method = parse_method(&self.method)?;
        let headers = self
            .headers
            .iter()
            .map(|raw| parse_header(raw))
            .collect::<Result<Vec<_>>>()?;

        let (body, json_body) = match (&self.json, &self.body) {
            (Some(json), _) => (Some(json.clone().into_bytes()), true),
            (None, Some(body)) => (Some(body.clone().into_bytes()), false),
            (None, None) => (None, false),
        };

        let mut configs = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            let mut config = BenchConfig::new(url.clone());
            config.method = method.clone();
            config.headers = headers.clone();
            config.body = body.clone();
            config.json_body = json_body;
            config.connections = self.connections;
            config.duration = Duration::from_secs(self.duration);
            config.rate = self.rate;
            config.timeout = Duration::from_millis(self.timeout);
            config.warmup = Duration::from_secs(self.warmup);
            config.ramp_up = Duration::from_secs(self.ramp_up);
            config.http2 = self.http2;
            config.validate()?;
            configs.push(config);
        }
        Ok(configs)
    }
}

fn parse_method(token: &str) -> Result<Method> {
    let upper = token.to_ascii_uppercase();
    if !ALLOWED_METHODS.contains(&upper.as_str()) {
        bail!(
            "unsupported method '{token}' (expected one of {})",
            ALLOWED_METHODS.join(", ")
        );
    }
    Method::from_bytes(upper.as_bytes()).context("invalid HTTP method")
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("invalid header '{raw}' (expected \"Name: Value\")"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("invalid header '{raw}': empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}
