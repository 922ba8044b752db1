//! ---
//! vk_section: "02-readiness-probing"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "External readiness probing and health debouncing."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use vipkeep_common::config::K8sConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Two-stage readiness checker against an external API endpoint.
///
/// Stage one is a bare TCP connect proving reachability; stage two asks
/// `/readyz`, which is the authoritative signal. Any failure anywhere maps
/// to an unhealthy sample; the checker itself never fails the process.
#[derive(Debug)]
pub struct ReadyzChecker {
    base_url: String,
    connect_addr: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl ReadyzChecker {
    pub fn from_config(config: &K8sConfig) -> Result<Self> {
        let (base_url, token, ca_pem) = if config.in_cluster {
            let host = std::env::var("KUBERNETES_SERVICE_HOST")
                .context("in_cluster probe requires KUBERNETES_SERVICE_HOST")?;
            let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
            let token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN)
                .context("unable to read service-account token")?;
            let ca = std::fs::read(SERVICE_ACCOUNT_CA)
                .context("unable to read service-account CA bundle")?;
            (
                format!("https://{}:{}", host, port),
                Some(token.trim().to_owned()),
                Some(ca),
            )
        } else {
            let token = if config.token.is_empty() {
                None
            } else {
                Some(config.token.clone())
            };
            let ca = match &config.ca_cert {
                Some(path) => Some(std::fs::read(path).with_context(|| {
                    format!("unable to read probe CA certificate {}", path.display())
                })?),
                None => None,
            };
            (config.api_server.clone(), token, ca)
        };

        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        match ca_pem {
            Some(pem) => {
                let cert = reqwest::Certificate::from_pem(&pem)
                    .context("probe CA certificate is not valid PEM")?;
                builder = builder.add_root_certificate(cert);
            }
            None => {
                // No trust anchor configured; the original deployment model
                // accepts the endpoint certificate as-is in that case.
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        let client = builder.build().context("failed to build probe client")?;

        let base_url = base_url.trim_end_matches('/').to_owned();
        let connect_addr = connect_endpoint(&base_url)?;

        Ok(Self {
            base_url,
            connect_addr,
            bearer_token: token,
            client,
        })
    }

    /// Run one probe cycle. Returns the raw health sample.
    pub async fn probe_once(&self) -> bool {
        if !self.check_reachability().await {
            debug!(endpoint = %self.connect_addr, "probe endpoint unreachable");
            return false;
        }
        self.check_readyz().await
    }

    async fn check_reachability(&self) -> bool {
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.connect_addr)).await,
            Ok(Ok(_))
        )
    }

    async fn check_readyz(&self) -> bool {
        let url = format!("{}/readyz", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %url, error = %err, "readyz request failed");
                return false;
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                debug!(url = %url, error = %err, "readyz body read failed");
                return false;
            }
        };

        if status.as_u16() == 200 && body.trim() == "ok" {
            return true;
        }

        let failed = failed_checks(&body);
        if failed.is_empty() {
            debug!(url = %url, status = status.as_u16(), "endpoint not ready");
        } else {
            warn!(url = %url, status = status.as_u16(), checks = ?failed, "endpoint reports failed readiness checks");
        }
        false
    }
}

/// Derive the `host:port` used for the reachability stage from the probe
/// base URL.
fn connect_endpoint(base_url: &str) -> Result<String> {
    let (scheme, rest) = base_url
        .split_once("://")
        .ok_or_else(|| anyhow!("probe URL '{}' has no scheme", base_url))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(anyhow!("probe URL '{}' has no host", base_url));
    }
    if authority.contains(':') {
        Ok(authority.to_owned())
    } else {
        let port = match scheme {
            "http" => 80,
            _ => 443,
        };
        Ok(format!("{}:{}", authority, port))
    }
}

/// Extract the `[-]`-prefixed lines an aggregated readiness body uses to
/// name its failing checks.
fn failed_checks(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("[-]"))
        .map(|check| check.trim().to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_endpoint_keeps_explicit_port() {
        assert_eq!(
            connect_endpoint("https://10.0.0.10:6443").unwrap(),
            "10.0.0.10:6443"
        );
    }

    #[test]
    fn connect_endpoint_defaults_by_scheme() {
        assert_eq!(
            connect_endpoint("https://api.example.internal").unwrap(),
            "api.example.internal:443"
        );
        assert_eq!(
            connect_endpoint("http://api.example.internal").unwrap(),
            "api.example.internal:80"
        );
    }

    #[test]
    fn connect_endpoint_rejects_bare_host() {
        assert!(connect_endpoint("10.0.0.10:6443").is_err());
    }

    #[test]
    fn failed_checks_are_extracted() {
        let body = "[+]ping ok\n[-]etcd failed: reason withheld\n[-]poststarthook/crd ok\nreadyz check failed";
        let failed = failed_checks(body);
        assert_eq!(
            failed,
            vec![
                "etcd failed: reason withheld".to_owned(),
                "poststarthook/crd ok".to_owned()
            ]
        );
    }
}
