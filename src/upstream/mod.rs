//! Upstream Congress.gov API contract
//!
//! Resource sync services only see the [`CongressApi`] trait: fetch one page
//! of a resource collection, or one enriched bill record.

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::models::ResourceType;

pub use client::CongressClient;

/// Filter for one page fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncFilter {
    /// Scope the collection to one congress
    pub congress: Option<u32>,
    /// Only records updated at or after this instant
    pub from_date_time: Option<DateTime<Utc>>,
    pub to_date_time: Option<DateTime<Utc>>,
    /// Page size
    pub limit: u32,
    pub offset: u32,
    /// Bill type (`hr`, `s`, ...), requires `congress`
    pub bill_type: Option<String>,
    /// Chamber (`house`, `senate`), hearings only, requires `congress`
    pub chamber: Option<String>,
}

impl SyncFilter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_congress(mut self, congress: u32) -> Self {
        self.congress = Some(congress);
        self
    }

    pub fn with_from(mut self, from: DateTime<Utc>) -> Self {
        self.from_date_time = Some(from);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// Pagination cursor as returned by the upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

impl Pagination {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// One page of raw upstream records, in upstream order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub pagination: Pagination,
}

/// Paginated access to upstream collections
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CongressApi: Send + Sync {
    /// Fetch one page of a resource collection
    async fn fetch_page(&self, resource: ResourceType, filter: &SyncFilter) -> Result<Page, SyncError>;

    /// Fetch one enriched bill record; `Ok(None)` when the upstream has no such bill
    async fn fetch_bill_detail(
        &self,
        congress: u32,
        bill_type: &str,
        number: &str,
    ) -> Result<Option<Value>, SyncError>;
}
