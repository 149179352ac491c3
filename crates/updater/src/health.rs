use std::future::Future;
use std::time::Duration;

use avatar_core::api::HealthResponse;
use reqwest::{Client, Url};
use tracing::debug;

use crate::client::xrpc_url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy { version: Option<String> },
    Unhealthy(String),
}

pub trait HealthCheck {
    fn check(&self) -> impl Future<Output = Health>;
}

/// Probes `GET /xrpc/_health` once, bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct HttpHealthChecker {
    endpoint: Url,
    timeout: Duration,
    http: Client,
}

impl HttpHealthChecker {
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        Self::with_http(endpoint, timeout, Client::new())
    }

    pub fn with_http(endpoint: Url, timeout: Duration, http: Client) -> Self {
        Self {
            endpoint,
            timeout,
            http,
        }
    }
}

impl HealthCheck for HttpHealthChecker {
    async fn check(&self) -> Health {
        let url = match xrpc_url(&self.endpoint, "_health") {
            Ok(u) => u,
            Err(e) => return Health::Unhealthy(e.to_string()),
        };
        debug!("probing {url}");

        let resp = match self.http.get(url).timeout(self.timeout).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Health::Unhealthy(format!("no answer within {:?}", self.timeout))
            }
            Err(e) => return Health::Unhealthy(format!("unreachable: {e}")),
        };

        let status = resp.status();
        if !status.is_success() {
            return Health::Unhealthy(format!("status {status}"));
        }
        // Some deployments answer with an empty body; that still counts.
        let version = resp
            .json::<HealthResponse>()
            .await
            .ok()
            .and_then(|h| h.version);
        Health::Healthy { version }
    }
}
