use crate::config::WorkerPlan;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use std::time::{Duration, Instant};
use thiserror::Error;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Transport-level request failure. HTTP responses with non-success status
/// codes are not errors at this layer; they come back as a normal
/// [`ResponseSample`] and are classified by the request loop.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One completed request as observed by the client.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSample {
    pub status: u16,
    pub body_bytes: u64,
    pub latency_us: u64,
}

/// Keep-alive connection pool against a single origin, owned by one worker.
///
/// The measured latency spans from immediately before dispatch to after the
/// response body is fully consumed: end-to-end client-observable time.
pub struct HttpClient {
    client: reqwest::Client,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl HttpClient {
    pub fn build(plan: &WorkerPlan) -> Result<Self> {
        let bench = &plan.bench;
        let url = Url::parse(&bench.url).with_context(|| format!("invalid URL {}", bench.url))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &bench.headers {
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value.trim())
                .with_context(|| format!("invalid header value for '{name}'"))?;
            headers.append(name, value);
        }
        if bench.json_body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut builder = reqwest::Client::builder()
            .timeout(bench.timeout)
            .pool_max_idle_per_host(plan.connections as usize)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            // 301/302/304 are terminal outcomes here, not hops to follow.
            .redirect(reqwest::redirect::Policy::none());
        if bench.http2 {
            builder = builder.http2_prior_knowledge();
        }
        let client = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            client,
            method: bench.method.clone(),
            url,
            headers,
            body: bench.body.clone(),
        })
    }

    pub async fn execute(&self) -> std::result::Result<ResponseSample, RequestError> {
        let mut request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        let latency_us = start.elapsed().as_micros().min(u64::MAX as u128) as u64;

        Ok(ResponseSample {
            status,
            body_bytes: body.len() as u64,
            latency_us,
        })
    }
}

fn classify(err: reqwest::Error) -> RequestError {
    if err.is_timeout() {
        return RequestError::Timeout;
    }
    if err.is_connect() {
        return RequestError::Connect(err.to_string());
    }
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    // DNS and TLS failures surface as generic request errors in reqwest.
    if lowered.contains("dns")
        || lowered.contains("failed to lookup address")
        || lowered.contains("tls")
        || lowered.contains("certificate")
    {
        return RequestError::Connect(message);
    }
    RequestError::Protocol(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;

    fn plan_for(cfg: BenchConfig) -> WorkerPlan {
        WorkerPlan {
            id: 0,
            connections: 4,
            rate: None,
            bench: cfg,
        }
    }

    #[test]
    fn build_collects_headers_case_insensitively() {
        let mut cfg = BenchConfig::new("http://127.0.0.1:9/");
        cfg.headers = vec![
            ("X-Custom".to_string(), "one".to_string()),
            ("AUTHORIZATION".to_string(), "Bearer t".to_string()),
        ];
        let client = HttpClient::build(&plan_for(cfg)).unwrap();

        assert_eq!(client.headers.get("x-custom").unwrap(), "one");
        assert_eq!(client.headers.get("authorization").unwrap(), "Bearer t");
    }

    #[test]
    fn json_body_sets_content_type() {
        let mut cfg = BenchConfig::new("http://127.0.0.1:9/");
        cfg.json_body = true;
        cfg.body = Some(b"{\"a\":1}".to_vec());
        let client = HttpClient::build(&plan_for(cfg)).unwrap();

        assert_eq!(
            client.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(client.body.as_deref(), Some(b"{\"a\":1}".as_slice()));
    }

    #[test]
    fn build_rejects_malformed_headers() {
        let mut cfg = BenchConfig::new("http://127.0.0.1:9/");
        cfg.headers = vec![("bad header\n".to_string(), "v".to_string())];
        assert!(HttpClient::build(&plan_for(cfg)).is_err());
    }

    #[tokio::test]
    async fn refused_connection_classifies_as_connect_error() {
        // Port 1 is essentially never listening on loopback.
        let mut cfg = BenchConfig::new("http://127.0.0.1:1/");
        cfg.timeout = Duration::from_millis(1500);
        let client = HttpClient::build(&plan_for(cfg)).unwrap();

        match client.execute().await {
            Err(RequestError::Connect(_)) | Err(RequestError::Timeout) => {}
            other => panic!("expected connect error, got {other:?}"),
        }
    }
}
