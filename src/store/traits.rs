//! Collaborator interfaces consumed by the parsing engine.
//!
//! Email retrieval, transaction storage, attempt logging and status tracking
//! are external systems; the engine sees them only through these traits.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::parsing::types::{
    EmailStatus, ExtractionCandidate, ParsingAttemptRecord, PendingEmail,
};

/// Restricts which pending items a batch run picks up.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Explicit item ids to parse. `None` means all pending.
    pub ids: Option<Vec<String>>,
    /// Substring match on the sender address.
    pub sender_contains: Option<String>,
}

impl ItemFilter {
    pub fn matches(&self, email: &PendingEmail) -> bool {
        if let Some(ids) = &self.ids
            && !ids.iter().any(|id| id == &email.id)
        {
            return false;
        }
        if let Some(fragment) = &self.sender_contains
            && !email.sender.to_lowercase().contains(&fragment.to_lowercase())
        {
            return false;
        }
        true
    }
}

/// Source of raw emails awaiting extraction.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetch up to `max_items` pending items matching the filter.
    async fn fetch_pending(
        &self,
        filter: &ItemFilter,
        max_items: usize,
    ) -> Result<Vec<PendingEmail>, StoreError>;

    /// Look up a single item by id, whatever its status.
    async fn get(&self, item_id: &str) -> Result<Option<PendingEmail>, StoreError>;
}

/// Destination for extracted transactions.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    /// Persist a candidate for the given source item.
    async fn persist(
        &self,
        candidate: &ExtractionCandidate,
        item_id: &str,
    ) -> Result<(), StoreError>;

    /// Previously stored candidate for an item, if any.
    async fn find_for_item(
        &self,
        item_id: &str,
    ) -> Result<Option<ExtractionCandidate>, StoreError>;
}

/// Destination for parsing attempt records.
#[async_trait]
pub trait AttemptLogSink: Send + Sync {
    async fn persist(&self, record: &ParsingAttemptRecord) -> Result<(), StoreError>;
}

/// Updates the processing status of source items.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn mark(&self, item_id: &str, status: EmailStatus) -> Result<(), StoreError>;
}
