//! Scheduled health check with e-mail alerting.
//!
//! Runs the health aggregator on a cron schedule (daily at 02:00 UTC by
//! default). When the admin has enabled notifications and the deployment is
//! unhealthy, the report is mailed to `notify_email`. Failures never stop the
//! loop; they are logged and counted in [`WatchStats`].

use crate::health::{self, NamedProbe};
use crate::settings::SmtpSettings;
use crate::{mailer, AppError, AppState, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const ALERT_SUBJECT: &str = "Health issue detected";

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where unhealthy reports are delivered.
pub trait AlertSink: Send + Sync + 'static {
    fn deliver(
        &self,
        smtp: &SmtpSettings,
        subject: &str,
        body: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub struct SmtpAlerts;

impl AlertSink for SmtpAlerts {
    fn deliver(
        &self,
        smtp: &SmtpSettings,
        subject: &str,
        body: &str,
    ) -> impl Future<Output = Result<()>> + Send {
        mailer::send(smtp, subject, body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// `health_notifications` is off.
    Disabled,
    Healthy,
    Alerted,
    /// Unhealthy, but SMTP settings are incomplete so nothing was sent.
    Unconfigured,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct WatchStats {
    runs: AtomicU64,
    healthy: AtomicU64,
    alerts: AtomicU64,
    disabled: AtomicU64,
    unconfigured: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WatchStatsSnapshot {
    pub runs: u64,
    pub healthy: u64,
    pub alerts: u64,
    pub disabled: u64,
    pub unconfigured: u64,
    pub failures: u64,
}

impl WatchStats {
    fn record(&self, outcome: &WatchOutcome) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            WatchOutcome::Disabled => &self.disabled,
            WatchOutcome::Healthy => &self.healthy,
            WatchOutcome::Alerted => &self.alerts,
            WatchOutcome::Unconfigured => &self.unconfigured,
            WatchOutcome::Failed(_) => &self.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            healthy: self.healthy.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            disabled: self.disabled.load(Ordering::Relaxed),
            unconfigured: self.unconfigured.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression).map_err(|e| {
        AppError::Internal(format!("Invalid health check schedule '{}': {}", expression, e))
    })
}

pub struct HealthWatch<C, A> {
    state: Arc<AppState>,
    schedule: Schedule,
    probes: Vec<NamedProbe>,
    clock: C,
    alerts: A,
}

impl HealthWatch<SystemClock, SmtpAlerts> {
    /// Production wiring: configured schedule, every probe, real clock and SMTP.
    pub fn from_state(state: Arc<AppState>) -> Result<Self> {
        let schedule = parse_schedule(&state.config.health_check_cron)?;
        let probes = health::default_probes(&state.config);
        Ok(Self::new(state, schedule, probes, SystemClock, SmtpAlerts))
    }
}

impl<C: Clock, A: AlertSink> HealthWatch<C, A> {
    pub fn new(
        state: Arc<AppState>,
        schedule: Schedule,
        probes: Vec<NamedProbe>,
        clock: C,
        alerts: A,
    ) -> Self {
        Self {
            state,
            schedule,
            probes,
            clock,
            alerts,
        }
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.schedule.after(&self.clock.now()).next()
    }

    /// One scheduled tick. Never fails; the outcome is also counted in the
    /// shared stats.
    pub async fn run_once(&self) -> WatchOutcome {
        let outcome = match self.check().await {
            Ok(outcome) => outcome,
            Err(e) => WatchOutcome::Failed(e.to_string()),
        };

        match &outcome {
            WatchOutcome::Failed(reason) => tracing::error!("Health watch failed: {}", reason),
            WatchOutcome::Unconfigured => {
                tracing::warn!("Deployment unhealthy but SMTP settings are incomplete")
            }
            other => tracing::info!("Health watch finished: {:?}", other),
        }

        self.state.watch_stats.record(&outcome);
        outcome
    }

    async fn check(&self) -> Result<WatchOutcome> {
        let settings = self.state.settings.app_settings().await?;
        if !settings.notifications_enabled() {
            return Ok(WatchOutcome::Disabled);
        }

        let report = health::run_probes(&self.state, &self.probes).await;
        if report.ok {
            return Ok(WatchOutcome::Healthy);
        }

        let Some(smtp) = settings.smtp() else {
            return Ok(WatchOutcome::Unconfigured);
        };

        let body = serde_json::to_string_pretty(&report)
            .map_err(|e| AppError::Internal(format!("Failed to render report: {}", e)))?;
        self.alerts.deliver(&smtp, ALERT_SUBJECT, &body).await?;

        Ok(WatchOutcome::Alerted)
    }

    /// Sleep until each scheduled time and run. Returns only if the schedule
    /// has no future occurrences.
    pub async fn run(self) {
        loop {
            let Some(next) = self.next_run() else {
                tracing::warn!("Health watch schedule has no upcoming runs, stopping");
                return;
            };

            let wait = (next - self.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tracing::debug!("Next health watch run at {}", next);
            tokio::time::sleep(wait).await;

            self.run_once().await;
        }
    }
}

pub fn spawn<C: Clock, A: AlertSink>(watch: HealthWatch<C, A>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(watch.run())
}
