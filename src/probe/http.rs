//! HTTP probe implementation.

use super::{finish, Driver, ProbeError, Probed};
use crate::db::{CheckStatus, HttpParams, Measurements, ProbeOutcome, Target, TargetParams};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::{redirect, Client, Method};
use std::time::{Duration, Instant};

const MAX_REDIRECTS: usize = 5;

/// Issues one request per probe and compares status and body.
///
/// Holds one client per certificate-verification mode so connections are reused
/// across probes.
#[derive(Debug)]
pub struct HttpDriver {
    verified: Option<Client>,
    unverified: Option<Client>,
}

impl HttpDriver {
    pub fn new() -> Self {
        let build = |verify_tls| {
            probe_client(verify_tls)
                .map_err(|e| tracing::error!("HTTP probe: failed to build client (verify_tls={}): {}", verify_tls, e))
                .ok()
        };
        Self {
            verified: build(true),
            unverified: build(false),
        }
    }

    fn client(&self, verify_tls: bool) -> Option<&Client> {
        if verify_tls {
            self.verified.as_ref()
        } else {
            self.unverified.as_ref()
        }
    }
}

impl Default for HttpDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Client shared by every probe with the same `verify_tls` setting.
pub fn probe_client(verify_tls: bool) -> Result<Client, reqwest::Error> {
    Client::builder()
        .redirect(redirect::Policy::limited(MAX_REDIRECTS))
        .danger_accept_invalid_certs(!verify_tls)
        .build()
}

#[async_trait]
impl Driver for HttpDriver {
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let result = match &target.params {
            TargetParams::Http(params) => match self.client(params.verify_tls) {
                Some(client) => run_http_probe(client, params, deadline).await,
                None => Err(ProbeError::Config("HTTP client unavailable".to_string())),
            },
            _ => Err(ProbeError::Config("expected HTTP parameters".to_string())),
        };

        finish(target, started_at, start, result, CheckStatus::Down)
    }
}

/// Build the request URL from the target parameters.
pub fn build_url(params: &HttpParams) -> Result<String, ProbeError> {
    let scheme = params.scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(ProbeError::Config(format!("unsupported scheme: {}", params.scheme)));
    }
    if params.host.is_empty() {
        return Err(ProbeError::Config("missing host".to_string()));
    }

    let mut url = format!("{}://{}", scheme, params.host);
    if let Some(port) = params.port {
        url.push_str(&format!(":{}", port));
    }
    if !params.path.starts_with('/') {
        url.push('/');
    }
    url.push_str(&params.path);
    Ok(url)
}

/// Run an HTTP probe.
///
/// Response time is measured once the full body has been read.
pub async fn run_http_probe(client: &Client, params: &HttpParams, timeout: Duration) -> Result<Probed, ProbeError> {
    let url = build_url(params)?;
    let method = Method::from_bytes(params.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ProbeError::Config(format!("invalid method: {}", params.method)))?;
    let body_regex = params
        .body_regex
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| ProbeError::Config(format!("invalid body regex: {}", e)))?;

    let start = Instant::now();

    let response = client
        .request(method, &url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;
    let status = response.status().as_u16();

    // Read the full body to measure complete transfer time
    let body = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;

    let measurements = Measurements {
        response_time_ms: Some(start.elapsed().as_millis() as u64),
        status_code: Some(status),
        ..Default::default()
    };

    let mismatch = if status != params.expected_status {
        Some(format!("expected status {}, got {}", params.expected_status, status))
    } else if let Some(re) = &body_regex {
        let text = String::from_utf8_lossy(&body);
        (!re.is_match(&text)).then(|| format!("response body does not match /{}/", re.as_str()))
    } else {
        None
    };

    Ok(match mismatch {
        Some(msg) => Probed {
            status: CheckStatus::Down,
            measurements,
            error: Some(msg),
        },
        None => Probed::healthy(CheckStatus::Up, measurements),
    })
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else if e.is_builder() {
        ProbeError::Config(e.to_string())
    } else {
        ProbeError::Network(e.to_string())
    }
}
