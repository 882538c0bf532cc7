use tokio::sync::watch;

pub use controller::{Controller, ControllerSettings};
pub use error::Error;
pub use error_policy::RetryPolicy;
pub use reconcile::Reconcile;

mod controller;
mod error;
mod error_policy;
mod feed;
mod informer;
mod queue;
mod rate_limiter;
mod reconcile;
mod reconciler;
mod resync;
mod worker;

/// Resolves once `true` is broadcast or the sender is gone.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
