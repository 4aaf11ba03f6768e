//! Monitor service: owns every resident reconciler and drives them on a
//! fixed tick until shutdown is signalled.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, warn};
use vigil_config::AppConfig;
use vigil_store::StatusStore;

use crate::notifier::AlertNotifier;
use crate::portal::SensorPortal;
use crate::reconciler::{CycleContext, ResidentReconciler};
use crate::transfer::FileTransfer;

/// Tick used when no resident is configured.
const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Collaborators shared by every reconciler.
pub struct MonitorDeps {
    pub store: Box<dyn StatusStore>,
    pub transfer: Arc<dyn FileTransfer>,
    /// `None` when the portal login failed at startup.
    pub portal: Option<Arc<dyn SensorPortal>>,
    pub notifier: Arc<dyn AlertNotifier>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
}

pub struct MonitorService {
    reconcilers: BTreeMap<String, ResidentReconciler>,
    deps: MonitorDeps,
    tick_interval: Duration,
    error_backoff: Duration,
}

impl MonitorService {
    pub fn new(config: &AppConfig, deps: MonitorDeps) -> Self {
        let reconcilers: BTreeMap<String, ResidentReconciler> = config
            .resident_configs()
            .into_iter()
            .map(|resident| {
                (
                    resident.id.clone(),
                    ResidentReconciler::new(resident, &config.monitor),
                )
            })
            .collect();

        let tick_interval = reconcilers
            .values()
            .map(ResidentReconciler::poll_interval)
            .min()
            .unwrap_or(DEFAULT_TICK);

        Self {
            reconcilers,
            deps,
            tick_interval,
            error_backoff: config.monitor.error_backoff(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn has_session(&self) -> bool {
        self.deps.portal.is_some()
    }

    pub fn reconciler(&self, resident_id: &str) -> Option<&ResidentReconciler> {
        self.reconcilers.get(resident_id)
    }

    pub fn resident_ids(&self) -> impl Iterator<Item = &str> {
        self.reconcilers.keys().map(String::as_str)
    }

    pub fn store(&self) -> &dyn StatusStore {
        self.deps.store.as_ref()
    }

    /// Run one cycle for every resident, in id order.  A panicking cycle is
    /// contained and reported; the remaining residents still run.
    pub async fn run_tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let Self {
            reconcilers, deps, ..
        } = self;

        for (id, reconciler) in reconcilers.iter_mut() {
            let mut ctx = CycleContext {
                transfer: deps.transfer.as_ref(),
                portal: deps.portal.as_deref(),
                store: deps.store.as_mut(),
                notifier: deps.notifier.as_ref(),
            };
            match AssertUnwindSafe(reconciler.sync_once(&mut ctx))
                .catch_unwind()
                .await
            {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(payload) => {
                    error!(
                        resident = %id,
                        panic = %panic_payload_to_string(payload.as_ref()),
                        "reconciler panicked"
                    );
                    report.panicked += 1;
                }
            }
        }
        report
    }

    /// Tick until `shutdown` turns `true` or its sender is dropped.  An
    /// in-flight tick always runs to completion.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            residents = self.reconcilers.len(),
            tick_secs = self.tick_interval.as_secs(),
            session = self.has_session(),
            "monitor started"
        );

        while !*shutdown.borrow() {
            let report = self.run_tick().await;
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                panicked = report.panicked,
                "tick complete"
            );

            let pause = if report.panicked > 0 {
                warn!(backoff_secs = self.error_backoff.as_secs(), "backing off after panic");
                self.error_backoff
            } else {
                self.tick_interval
            };

            let sleep = tokio::time::sleep(pause);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("monitor stopping");
                            return;
                        }
                    }
                }
            }
        }
        info!("monitor stopping");
    }
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
