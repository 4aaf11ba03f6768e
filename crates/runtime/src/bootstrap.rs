//! Wires the production adapters described by an [`AppConfig`] into a
//! ready-to-run [`MonitorService`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use vigil_config::AppConfig;
use vigil_store::{FileStatusStore, StatusStore};

use crate::monitor::{MonitorDeps, MonitorService};
use crate::notifier::{MismatchNotifier, SmtpMailer};
use crate::portal::{PortalSession, SensorPortal};
use crate::transfer::WebDavClient;

/// Build the monitor.  The portal login happens here, once; if it fails the
/// monitor still starts and every cycle counts the missing session.
pub async fn build_monitor(config: &AppConfig) -> Result<MonitorService> {
    let store = FileStatusStore::open(config.monitor.state_file.as_str());
    info!(
        path = %store.path().display(),
        residents = store.snapshot().len(),
        "status store loaded"
    );

    let transfer = WebDavClient::new(&config.webdav).context("failed to build WebDAV client")?;

    let portal: Option<Arc<dyn SensorPortal>> = match PortalSession::login(&config.portal).await {
        Ok(session) => {
            info!(base_url = %config.portal.base_url, "portal session established");
            Some(Arc::new(session))
        }
        Err(err) => {
            warn!(error = %err, "portal login failed, every cycle will count as a mismatch");
            None
        }
    };

    if !config.email.is_complete() {
        warn!("email settings incomplete, alerts will be logged but not delivered");
    }
    let notifier = MismatchNotifier::new(
        SmtpMailer::new(config.email.clone()),
        config.email.recipients.clone(),
    );

    Ok(MonitorService::new(
        config,
        MonitorDeps {
            store: Box::new(store),
            transfer: Arc::new(transfer),
            portal,
            notifier: Arc::new(notifier),
        },
    ))
}
