use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::HealthPolicy;
use crate::models::ApiStatus;
use crate::state::ConversationState;

/// Where the probe is in its life: retrying quickly while the server may
/// still be booting, or polling at the relaxed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    ColdStart { attempts: u32 },
    Steady,
}

/// "Server inactive" banner with an estimate of how long until it wakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InactiveNotice {
    pub countdown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthReport {
    pub status: ApiStatus,
    pub inactive: Option<InactiveNotice>,
}

impl HealthReport {
    /// The banner is only worth showing before the user has chatted.
    pub fn visible_notice(&self, state: &ConversationState) -> Option<InactiveNotice> {
        self.inactive
            .filter(|_| self.status == ApiStatus::Error && !state.has_user_turns())
    }
}

/// Shared connection status. Written by the probe and by chat turns, read
/// by whoever renders the indicator.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<HealthReport>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(HealthReport::default());
        Self { tx: Arc::new(tx) }
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> HealthReport {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthReport> {
        self.tx.subscribe()
    }

    pub fn publish(&self, report: HealthReport) {
        self.tx.send_replace(report);
    }

    /// Update the status only, keeping any inactive notice.
    pub fn set_status(&self, status: ApiStatus) {
        self.tx.send_if_modified(|report| {
            let changed = report.status != status;
            report.status = status;
            changed
        });
    }
}

pub struct HealthProbe {
    api: ApiClient,
    policy: HealthPolicy,
    phase: ProbePhase,
    inactive_since: Option<Instant>,
    board: StatusBoard,
}

impl HealthProbe {
    pub fn new(api: ApiClient, board: StatusBoard) -> Self {
        let policy = api.config().health.clone();
        Self {
            api,
            policy,
            phase: ProbePhase::ColdStart { attempts: 0 },
            inactive_since: None,
            board,
        }
    }

    pub fn phase(&self) -> ProbePhase {
        self.phase
    }

    pub fn next_delay(&self) -> Duration {
        match self.phase {
            ProbePhase::ColdStart { .. } => self.policy.cold_start_interval,
            ProbePhase::Steady => self.policy.steady_interval,
        }
    }

    fn timeout(&self) -> Duration {
        match self.phase {
            ProbePhase::ColdStart { .. } => self.policy.cold_start_timeout,
            ProbePhase::Steady => self.policy.steady_timeout,
        }
    }

    /// One probe: hit `/health`, advance the state machine, publish.
    pub async fn poll_health(&mut self) -> ApiStatus {
        let healthy = match self.api.check_health(self.timeout()).await {
            Ok(healthy) => healthy,
            Err(e) => {
                debug!("Backend not available: {e}");
                false
            }
        };
        let report = self.record(healthy, Instant::now());
        self.board.publish(report);
        report.status
    }

    /// Advance the state machine with one probe result.
    ///
    /// - `ColdStart(n)` + success → `Steady`, connected.
    /// - `ColdStart(n)` + failure → `ColdStart(n + 1)`, still checking, until
    ///   the attempt budget runs out; then `Steady`, error, inactive notice.
    /// - `Steady` + success → connected, notice cleared.
    /// - `Steady` + failure → error.
    pub fn record(&mut self, healthy: bool, now: Instant) -> HealthReport {
        let status = match (self.phase, healthy) {
            (phase, true) => {
                if phase != ProbePhase::Steady || self.inactive_since.is_some() {
                    info!("Backend is up");
                }
                self.phase = ProbePhase::Steady;
                self.inactive_since = None;
                ApiStatus::Connected
            }
            (ProbePhase::ColdStart { attempts }, false) => {
                let attempts = attempts + 1;
                if attempts >= self.policy.cold_start_attempts {
                    warn!("Backend still down after {attempts} attempts; switching to steady polling");
                    self.phase = ProbePhase::Steady;
                    self.inactive_since = Some(now);
                    ApiStatus::Error
                } else {
                    self.phase = ProbePhase::ColdStart { attempts };
                    ApiStatus::Checking
                }
            }
            (ProbePhase::Steady, false) => ApiStatus::Error,
        };

        HealthReport { status, inactive: self.inactive_notice(now) }
    }

    fn inactive_notice(&self, now: Instant) -> Option<InactiveNotice> {
        self.inactive_since.map(|since| InactiveNotice {
            countdown: self
                .policy
                .wake_estimate
                .saturating_sub(now.saturating_duration_since(since)),
        })
    }

    pub async fn run(mut self) {
        loop {
            self.poll_health().await;
            tokio::time::sleep(self.next_delay()).await;
        }
    }

    /// Run in the background. Abort the handle to stop probing.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
