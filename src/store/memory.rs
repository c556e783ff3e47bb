//! In-memory reference implementation of the collaborator interfaces.
//!
//! Backs the demo binary and the test suite. Not a persistence engine:
//! everything lives in `RwLock`ed maps and dies with the process. Supports
//! targeted write-failure injection so persistence-isolation behavior can be
//! exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::parsing::types::{
    EmailStatus, ExtractionCandidate, ParsingAttemptRecord, PendingEmail,
};
use crate::store::traits::{
    AttemptLogSink, ItemFilter, ItemSource, StatusSink, TransactionSink,
};

/// In-memory store implementing all four collaborator interfaces.
#[derive(Default)]
pub struct MemoryStore {
    emails: RwLock<HashMap<String, PendingEmail>>,
    transactions: RwLock<HashMap<String, ExtractionCandidate>>,
    attempts: RwLock<Vec<ParsingAttemptRecord>>,
    fail_all_transaction_writes: AtomicBool,
    failing_items: RwLock<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load emails into the store, keyed by id.
    pub async fn seed(&self, emails: Vec<PendingEmail>) {
        let mut map = self.emails.write().await;
        for email in emails {
            map.insert(email.id.clone(), email);
        }
    }

    /// Current status of an item, if present.
    pub async fn status_of(&self, item_id: &str) -> Option<EmailStatus> {
        self.emails.read().await.get(item_id).map(|e| e.status)
    }

    /// Stored transaction candidate for an item, if any.
    pub async fn transaction_for(&self, item_id: &str) -> Option<ExtractionCandidate> {
        self.transactions.read().await.get(item_id).cloned()
    }

    /// All attempt records logged for an item.
    pub async fn attempts_for(&self, item_id: &str) -> Vec<ParsingAttemptRecord> {
        self.attempts
            .read()
            .await
            .iter()
            .filter(|a| a.item_id == item_id)
            .cloned()
            .collect()
    }

    /// Make every transaction write fail.
    pub fn fail_transaction_writes(&self, fail: bool) {
        self.fail_all_transaction_writes
            .store(fail, Ordering::SeqCst);
    }

    /// Make transaction writes fail for one specific item.
    pub fn fail_transaction_writes_for(&self, item_id: &str) {
        self.failing_items
            .try_write()
            .expect("fault list lock contended during setup")
            .push(item_id.to_string());
    }
}

#[async_trait]
impl ItemSource for MemoryStore {
    async fn fetch_pending(
        &self,
        filter: &ItemFilter,
        max_items: usize,
    ) -> Result<Vec<PendingEmail>, StoreError> {
        let emails = self.emails.read().await;
        let mut pending: Vec<PendingEmail> = emails
            .values()
            .filter(|e| e.status == EmailStatus::Pending && filter.matches(e))
            .cloned()
            .collect();
        // Deterministic order for callers and tests.
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        pending.truncate(max_items);
        Ok(pending)
    }

    async fn get(&self, item_id: &str) -> Result<Option<PendingEmail>, StoreError> {
        Ok(self.emails.read().await.get(item_id).cloned())
    }
}

#[async_trait]
impl TransactionSink for MemoryStore {
    async fn persist(
        &self,
        candidate: &ExtractionCandidate,
        item_id: &str,
    ) -> Result<(), StoreError> {
        if self.fail_all_transaction_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write("transaction sink unavailable".to_string()));
        }
        if self
            .failing_items
            .read()
            .await
            .iter()
            .any(|id| id == item_id)
        {
            return Err(StoreError::Write(format!(
                "transaction write rejected for {item_id}"
            )));
        }
        self.transactions
            .write()
            .await
            .insert(item_id.to_string(), candidate.clone());
        Ok(())
    }

    async fn find_for_item(
        &self,
        item_id: &str,
    ) -> Result<Option<ExtractionCandidate>, StoreError> {
        Ok(self.transactions.read().await.get(item_id).cloned())
    }
}

#[async_trait]
impl AttemptLogSink for MemoryStore {
    async fn persist(&self, record: &ParsingAttemptRecord) -> Result<(), StoreError> {
        self.attempts.write().await.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl StatusSink for MemoryStore {
    async fn mark(&self, item_id: &str, status: EmailStatus) -> Result<(), StoreError> {
        let mut emails = self.emails.write().await;
        match emails.get_mut(item_id) {
            Some(email) => {
                email.status = status;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "email".to_string(),
                id: item_id.to_string(),
            }),
        }
    }
}
