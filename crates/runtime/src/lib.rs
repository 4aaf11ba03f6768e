pub mod bootstrap;
pub mod error;
pub mod monitor;
pub mod notifier;
pub mod portal;
pub mod reconciler;
pub mod snapshot;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

pub use bootstrap::build_monitor;
pub use error::{CycleError, ErrorKind};
pub use monitor::{MonitorDeps, MonitorService, TickReport};
pub use notifier::{AlertMessage, AlertNotifier, AlertTransport, MismatchNotifier, NotificationError, SmtpMailer};
pub use portal::{PortalError, PortalSession, SensorPortal};
pub use reconciler::{CycleContext, ReconcilerState, ResidentReconciler};
pub use snapshot::SnapshotError;
pub use transfer::{FileTransfer, TransferError, WebDavClient};
