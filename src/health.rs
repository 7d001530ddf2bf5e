//! Dependency health aggregation.
//!
//! Probes run one after another in a fixed order. A probe failure is recorded
//! in the report and never aborts the remaining probes. There are no probe
//! timeouts: a hung dependency delays the whole report.

use crate::config::Config;
use crate::{storage, AppError, AppState, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
    /// The check exists for dashboard parity but nothing is wired up behind it.
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    pub message: String,
    pub status: CheckStatus,
}

impl CheckResult {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            status: CheckStatus::Healthy,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            status: CheckStatus::Unhealthy,
        }
    }

    pub fn not_applicable(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            status: CheckStatus::NotApplicable,
        }
    }

    fn from_probe(ok: bool, message: String) -> Self {
        if ok {
            Self::healthy(message)
        } else {
            Self::unhealthy(message)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub checks: BTreeMap<String, CheckResult>,
}

impl HealthReport {
    pub fn new() -> Self {
        Self {
            ok: true,
            checks: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, name: &str, result: CheckResult) {
        if !result.ok {
            self.ok = false;
        }
        if self.checks.insert(name.to_string(), result).is_some() {
            tracing::warn!("Health check {} reported twice", name);
        }
    }
}

#[derive(Debug, Clone)]
pub enum Probe {
    /// `SELECT 1` against the pool.
    Database,
    /// Bucket exists (created if missing) and accepts a tiny write.
    ObjectStoreWrite,
    /// Plain `HEAD` of the object store endpoint.
    ObjectStoreHead { endpoint: String },
    /// `GET base + path`; healthy on 2xx. The message names the full URL.
    Http { base: String, path: String },
    /// IPv4 lookup of the public domain.
    Dns { domain: Option<String> },
    Placeholder { note: &'static str },
}

#[derive(Debug, Clone)]
pub struct NamedProbe {
    pub name: &'static str,
    pub probe: Probe,
}

impl NamedProbe {
    pub fn new(name: &'static str, probe: Probe) -> Self {
        Self { name, probe }
    }
}

/// The deployment's probes, in the order they run.
///
/// The object store is probed twice, once through the S3 API and once with a
/// raw HEAD of the endpoint, each under its own name.
pub fn default_probes(config: &Config) -> Vec<NamedProbe> {
    vec![
        NamedProbe::new("database", Probe::Database),
        NamedProbe::new("object_store", Probe::ObjectStoreWrite),
        NamedProbe::new(
            "object_store_http",
            Probe::ObjectStoreHead {
                endpoint: config.s3_endpoint.clone(),
            },
        ),
        NamedProbe::new(
            "redis",
            Probe::Placeholder {
                note: "no redis dependency configured",
            },
        ),
        NamedProbe::new(
            "openwebui",
            Probe::Http {
                base: config.openwebui_base.clone(),
                path: "/health".to_string(),
            },
        ),
        NamedProbe::new(
            "ollama",
            Probe::Http {
                base: config.ollama_base.clone(),
                path: "/api/tags".to_string(),
            },
        ),
        NamedProbe::new(
            "tts",
            Probe::Http {
                base: config.tts_http.clone(),
                path: "/".to_string(),
            },
        ),
        NamedProbe::new(
            "chat",
            Probe::Http {
                base: config.chat_relay_base.clone(),
                path: "/".to_string(),
            },
        ),
        NamedProbe::new(
            "proxy",
            Probe::Placeholder {
                note: "reverse proxy self-check not wired up",
            },
        ),
        NamedProbe::new(
            "https",
            Probe::Dns {
                domain: config.app_domain.clone(),
            },
        ),
    ]
}

pub async fn check_all(state: &Arc<AppState>) -> HealthReport {
    run_probes(state, &default_probes(&state.config)).await
}

pub async fn run_probes(state: &Arc<AppState>, probes: &[NamedProbe]) -> HealthReport {
    let mut report = HealthReport::new();

    for named in probes {
        let result = match run_probe(state, &named.probe).await {
            Ok(result) => result,
            Err(e) => CheckResult::unhealthy(e.to_string()),
        };

        if !result.ok {
            tracing::warn!("Health check {} failed: {}", named.name, result.message);
        }
        report.push(named.name, result);
    }

    report
}

async fn run_probe(state: &Arc<AppState>, probe: &Probe) -> Result<CheckResult> {
    match probe {
        Probe::Database => {
            sqlx::query("SELECT 1").execute(&state.db).await?;
            Ok(CheckResult::healthy(""))
        }
        Probe::ObjectStoreWrite => {
            let bucket = &state.config.s3_bucket;
            storage::ensure_bucket_writable(&state.s3_client, bucket).await?;
            Ok(CheckResult::healthy(format!("bucket ready: {}", bucket)))
        }
        Probe::ObjectStoreHead { endpoint } => {
            let response = state
                .http
                .head(endpoint)
                .send()
                .await
                .map_err(|e| AppError::Upstream(e.to_string()))?;
            let status = response.status();
            Ok(CheckResult::from_probe(
                status.is_success(),
                format!("HEAD {} => {}", endpoint, status.as_u16()),
            ))
        }
        Probe::Http { base, path } => {
            let url = join_url(base, path);
            let response = state
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| AppError::Upstream(e.to_string()))?;
            let status = response.status();
            Ok(CheckResult::from_probe(
                status.is_success(),
                format!("GET {} => {}", url, status.as_u16()),
            ))
        }
        Probe::Dns { domain } => resolve_domain(domain.as_deref()).await,
        Probe::Placeholder { note } => Ok(CheckResult::not_applicable(*note)),
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn resolve_domain(domain: Option<&str>) -> Result<CheckResult> {
    let Some(domain) = domain.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(CheckResult::unhealthy("APP_DOMAIN not configured"));
    };

    let addrs = tokio::net::lookup_host((domain, 443))
        .await
        .map_err(|e| AppError::Upstream(format!("DNS lookup for {} failed: {}", domain, e)))?;

    let mut ips: Vec<String> = addrs
        .filter(|addr| addr.is_ipv4())
        .map(|addr| addr.ip().to_string())
        .collect();
    ips.sort_unstable();
    ips.dedup();

    if ips.is_empty() {
        Ok(CheckResult::unhealthy("No A record for domain"))
    } else {
        Ok(CheckResult::healthy(format!("DNS OK: {}", ips.join(","))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;

    #[test]
    fn test_report_ok_is_and_of_checks() {
        let mut report = HealthReport::new();
        report.push("a", CheckResult::healthy(""));
        report.push("b", CheckResult::not_applicable("placeholder"));
        assert!(report.ok);

        report.push("c", CheckResult::unhealthy("down"));
        report.push("d", CheckResult::healthy(""));
        assert!(!report.ok);
        assert_eq!(report.checks.len(), 4);
    }

    #[test]
    fn test_report_serializes_status() {
        let mut report = HealthReport::new();
        report.push("redis", CheckResult::not_applicable("n/a"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["checks"]["redis"]["status"], "not_applicable");
        assert_eq!(json["checks"]["redis"]["ok"], true);
    }

    #[test]
    fn test_default_probe_names_are_unique_and_ordered() {
        let config = test_support::config(&[]);
        let names: Vec<&str> = default_probes(&config).iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                "database",
                "object_store",
                "object_store_http",
                "redis",
                "openwebui",
                "ollama",
                "tts",
                "chat",
                "proxy",
                "https"
            ]
        );
    }

    #[tokio::test]
    async fn test_http_probes_report_status_without_short_circuit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/health");
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tags");
                then.status(500);
            })
            .await;

        let state = test_support::state(&[]).await;
        let probes = vec![
            NamedProbe::new(
                "ollama",
                Probe::Http {
                    base: server.base_url(),
                    path: "/api/tags".to_string(),
                },
            ),
            NamedProbe::new(
                "openwebui",
                Probe::Http {
                    base: server.base_url(),
                    path: "/health".to_string(),
                },
            ),
            NamedProbe::new("database", Probe::Database),
        ];

        let report = run_probes(&state, &probes).await;
        assert!(!report.ok);
        assert_eq!(
            report.checks["ollama"],
            CheckResult::unhealthy(format!("GET {}/api/tags => 500", server.base_url()))
        );
        assert_eq!(
            report.checks["openwebui"],
            CheckResult::healthy(format!("GET {}/health => 200", server.base_url()))
        );
        assert!(report.checks["database"].ok);
    }

    #[tokio::test]
    async fn test_unreachable_dependency_is_captured_not_propagated() {
        let state = test_support::state(&[]).await;
        let probes = vec![
            NamedProbe::new(
                "tts",
                Probe::Http {
                    base: test_support::UNREACHABLE.to_string(),
                    path: "/".to_string(),
                },
            ),
            NamedProbe::new(
                "proxy",
                Probe::Placeholder {
                    note: "not wired up",
                },
            ),
        ];

        let report = run_probes(&state, &probes).await;
        assert!(!report.ok);
        let tts = &report.checks["tts"];
        assert!(!tts.ok);
        assert_eq!(tts.status, CheckStatus::Unhealthy);
        assert!(!tts.message.is_empty());
        assert_eq!(report.checks["proxy"].status, CheckStatus::NotApplicable);
    }

    #[tokio::test]
    async fn test_all_passing_probes_report_ok() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200);
            })
            .await;

        let state = test_support::state(&[]).await;
        let probes = vec![
            NamedProbe::new("database", Probe::Database),
            NamedProbe::new(
                "chat",
                Probe::Http {
                    base: server.base_url(),
                    path: "/".to_string(),
                },
            ),
            NamedProbe::new("redis", Probe::Placeholder { note: "n/a" }),
        ];

        let report = run_probes(&state, &probes).await;
        assert!(report.ok);
        assert_eq!(report.checks.len(), 3);
        assert_eq!(
            report.checks["chat"].message,
            format!("GET {}/ => 200", server.base_url())
        );
    }

    #[tokio::test]
    async fn test_dns_lists_ipv4_addresses() {
        assert_eq!(
            resolve_domain(Some("localhost")).await.unwrap(),
            CheckResult::healthy("DNS OK: 127.0.0.1")
        );
    }

    #[tokio::test]
    async fn test_dns_without_ipv4_is_unhealthy() {
        assert_eq!(
            resolve_domain(Some("::1")).await.unwrap(),
            CheckResult::unhealthy("No A record for domain")
        );
    }

    #[tokio::test]
    async fn test_object_store_ready_when_bucket_accepts_writes() {
        let server = MockServer::start_async().await;
        let head = server
            .mock_async(|when, then| {
                when.method(HEAD).path("/uiw-media");
                then.status(200);
            })
            .await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT).path("/uiw-media/healthcheck.txt");
                then.status(200);
            })
            .await;

        let base = server.base_url();
        let state = test_support::state(&[("S3_ENDPOINT", base.as_str())]).await;
        let report = run_probes(
            &state,
            &[NamedProbe::new("object_store", Probe::ObjectStoreWrite)],
        )
        .await;

        head.assert_async().await;
        put.assert_async().await;
        assert_eq!(
            report.checks["object_store"],
            CheckResult::healthy("bucket ready: uiw-media")
        );
    }

    #[tokio::test]
    async fn test_full_default_run_reports_every_check_once() {
        // Every external dependency points at a closed port.
        let state = test_support::state(&[]).await;
        let report = check_all(&state).await;

        assert!(!report.ok);
        assert_eq!(report.checks.len(), 10);
        assert!(report.checks["database"].ok);
        assert!(!report.checks["object_store"].ok);
        assert!(!report.checks["object_store_http"].ok);
        assert_eq!(report.checks["redis"].status, CheckStatus::NotApplicable);
        assert_eq!(
            report.checks["https"],
            CheckResult::unhealthy("APP_DOMAIN not configured")
        );
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://tts:5000/", "/"), "http://tts:5000/");
        assert_eq!(join_url("http://ollama:11434", "/api/tags"), "http://ollama:11434/api/tags");
    }
}
