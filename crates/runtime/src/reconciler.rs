//! One resident's upload → verify → compare cycle and its mismatch counter.

use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use vigil_config::{MonitorConfig, ResidentConfig};
use vigil_core::{Status, extract_from_api_payload};
use vigil_store::StatusStore;

use crate::error::{CycleError, ErrorKind};
use crate::notifier::AlertNotifier;
use crate::portal::SensorPortal;
use crate::snapshot;
use crate::transfer::{FileTransfer, TransferError};

/// Collaborators lent to a reconciler for the duration of one cycle.
pub struct CycleContext<'a> {
    pub transfer: &'a dyn FileTransfer,
    /// `None` when no portal session could be established.
    pub portal: Option<&'a dyn SensorPortal>,
    pub store: &'a mut dyn StatusStore,
    pub notifier: &'a dyn AlertNotifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    /// No confirmed status has been stored for this resident yet.
    AwaitingBaseline,
    Synced,
    /// Consecutive mismatches so far, below the alert threshold.
    Mismatched(u32),
    /// The last cycle fired an alert and reset the counter.
    Alerted,
}

/// What one cycle learned before any counter update.
#[derive(Debug)]
struct Observation {
    api: Status,
    /// Stored status to compare against; `None` means the resident had no
    /// record when the cycle started.
    confirmed: Option<Status>,
}

#[derive(Debug)]
pub struct ResidentReconciler {
    config: ResidentConfig,
    remote_path: String,
    alert_threshold: u32,
    settle_delay: Duration,
    simulate_local_updates: bool,
    mismatch_count: u32,
    state: ReconcilerState,
}

impl ResidentReconciler {
    pub fn new(config: ResidentConfig, monitor: &MonitorConfig) -> Self {
        Self {
            remote_path: monitor.remote_path_for(&config.id),
            alert_threshold: monitor.alert_threshold.max(1),
            settle_delay: monitor.settle_delay(),
            simulate_local_updates: monitor.simulate_local_updates,
            mismatch_count: 0,
            state: ReconcilerState::AwaitingBaseline,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ResidentConfig {
        &self.config
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn mismatch_count(&self) -> u32 {
        self.mismatch_count
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    /// Run one cycle.  Returns whether the checks could be completed; a
    /// detected mismatch is still a completed cycle.
    ///
    /// Every failure is absorbed here and counted like a mismatch, since an
    /// unverifiable status is not a verified one.
    #[instrument(skip_all, fields(resident = %self.config.id))]
    pub async fn sync_once(&mut self, ctx: &mut CycleContext<'_>) -> bool {
        match self.observe(ctx).await {
            Ok(observation) => {
                self.reconcile(observation, ctx).await;
                true
            }
            Err(err) => {
                match err.kind() {
                    ErrorKind::Authentication => {
                        error!(error = %err, "portal authentication failed");
                    }
                    ErrorKind::Extraction => {
                        warn!(error = %err, "could not determine resident status");
                    }
                    ErrorKind::TransientIo => {
                        warn!(error = %err, "sync transfer failed");
                    }
                }
                self.record_mismatch(ctx.notifier).await;
                false
            }
        }
    }

    async fn observe(&self, ctx: &mut CycleContext<'_>) -> Result<Observation, CycleError> {
        let portal = ctx.portal.ok_or(CycleError::MissingSession)?;
        let id = self.config.id.as_str();

        if self.simulate_local_updates {
            let generated = snapshot::regenerate(&self.config.upload_path)?;
            debug!(status = %generated, "regenerated local snapshot");
        }

        // Decided before the provisional write below, which always creates
        // a record.
        let had_record = ctx.store.get(id).is_some();

        info!(remote = %self.remote_path, "uploading local snapshot");
        ctx.transfer
            .upload(&self.config.upload_path, &self.remote_path)
            .await?;

        let local = snapshot::read_local_status(&self.config.upload_path)?;
        persist(ctx.store, id, local);

        debug!(delay_ms = self.settle_delay.as_millis() as u64, "waiting for remote to settle");
        tokio::time::sleep(self.settle_delay).await;

        match ctx
            .transfer
            .download(&self.remote_path, &self.config.download_path)
            .await
        {
            Ok(()) => {}
            Err(TransferError::NotFound(path)) => return Err(CycleError::RemoteFileMissing(path)),
            Err(err) => return Err(err.into()),
        }

        let payload = portal.fetch_sensor_payload().await?;
        let api = extract_from_api_payload(&payload, id)?;

        let confirmed = if had_record {
            ctx.store.get(id).map(|record| record.status)
        } else {
            None
        };
        info!(portal = %api, stored = ?confirmed.map(Status::label), "statuses fetched");
        Ok(Observation { api, confirmed })
    }

    async fn reconcile(&mut self, observation: Observation, ctx: &mut CycleContext<'_>) {
        let Observation { api, confirmed } = observation;
        match confirmed {
            None => {
                info!(status = %api, "no confirmed status yet, adopting portal status as baseline");
                persist(ctx.store, &self.config.id, api);
                self.mismatch_count = 0;
                self.state = ReconcilerState::Synced;
            }
            Some(stored) if stored == api => {
                info!(status = %api, "status verified, match confirmed");
                persist(ctx.store, &self.config.id, api);
                self.mismatch_count = 0;
                self.state = ReconcilerState::Synced;
            }
            Some(stored) => {
                // The stored status is deliberately left alone so later cycles
                // keep comparing against the last confirmed value.
                warn!(
                    portal = %api,
                    stored = %stored,
                    count = self.mismatch_count + 1,
                    threshold = self.alert_threshold,
                    "status mismatch"
                );
                self.record_mismatch(ctx.notifier).await;
            }
        }
    }

    /// Count one mismatch; at the threshold send the alert and reset,
    /// whatever the notifier reports.
    async fn record_mismatch(&mut self, notifier: &dyn AlertNotifier) {
        self.mismatch_count = (self.mismatch_count + 1).min(self.alert_threshold);
        if self.mismatch_count < self.alert_threshold {
            self.state = ReconcilerState::Mismatched(self.mismatch_count);
            return;
        }

        error!(
            resident = %self.config.id,
            count = self.mismatch_count,
            "mismatch threshold reached, sending alert"
        );
        if notifier
            .notify(&self.config.id, self.mismatch_count)
            .await
            .is_err()
        {
            warn!(resident = %self.config.id, "alert not delivered, resetting counter anyway");
        }
        self.mismatch_count = 0;
        self.state = ReconcilerState::Alerted;
    }
}

/// A failed write leaves the in-memory value authoritative.
fn persist(store: &mut dyn StatusStore, resident_id: &str, status: Status) {
    if let Err(err) = store.put(resident_id, status) {
        warn!(resident = resident_id, error = %err, "state not persisted, keeping in-memory value");
    }
}
