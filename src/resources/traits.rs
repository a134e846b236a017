//! Resource sync service trait

use async_trait::async_trait;

use super::PageSync;
use crate::error::AppError;
use crate::models::{ResourceSyncResult, ResourceType};
use crate::upstream::SyncFilter;

/// Reconciles one upstream resource collection against local snapshots
///
/// One implementation per resource type. Per-record failures are reported in
/// the result's `errors`; an `Err` means the page itself could not be fetched.
#[async_trait]
pub trait ResourceSyncService: Send + Sync {
    /// Resource type this service owns
    fn resource(&self) -> ResourceType;

    /// Fetch and reconcile one page, returning the upstream cursor too
    async fn sync_page(&self, filter: &SyncFilter) -> Result<PageSync, AppError>;

    /// Fetch and reconcile one page
    async fn sync(&self, filter: &SyncFilter) -> Result<ResourceSyncResult, AppError> {
        Ok(self.sync_page(filter).await?.result)
    }

    /// Refresh watch-listed records individually; `None` if the resource has no watch list
    async fn refresh_priority(&self) -> Result<Option<ResourceSyncResult>, AppError> {
        Ok(None)
    }
}
