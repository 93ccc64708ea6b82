//! Cloud reconciler trait
//!
//! One capability set (discover identity, ensure the route table object,
//! sync, clean up) with three concrete variants: Azure, AWS, GCP. The
//! per-provider state shapes diverge too much to share a base structure, so
//! the variants stay independent behind this trait and the daemon selects
//! one with a plain `match`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::RouteTable;
use crate::trigger::SyncTrigger;

/// A provider-specific reconciliation engine.
///
/// Implementations own their cloud client, discovered identity, and any
/// caches (e.g. the AWS private-IP to NIC-ID memo). Those are only touched
/// from the single reconciler task, hence `&mut self` and no internal
/// locking.
#[async_trait]
pub trait CloudReconciler: Send {
    /// Provider name for logging ("azure", "aws", "gcp").
    fn provider_name(&self) -> &'static str;

    /// Run the full lifecycle: identity discovery, route-table ensure, then
    /// the sync loop paced by `trigger`.
    ///
    /// Does not return under normal operation. An `Err` means an
    /// unrecoverable init/discovery failure; per-sync errors are logged and
    /// retried by the next cycle instead.
    async fn reconcile(&mut self, store: Arc<RouteTable>, trigger: SyncTrigger) -> Result<()>;

    /// Best-effort deletion of owned cloud resources. Idempotent.
    async fn cleanup(&mut self) -> Result<()>;
}
