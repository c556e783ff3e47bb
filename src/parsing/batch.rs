//! Batch execution over pending items.
//!
//! Fans per-item orchestrations out on tokio, admission-bounded by the
//! engine's shared semaphore. A failing item is counted and logged, never
//! fatal to the run; the caller gets aggregated statistics only (per-item
//! results live in the attempt log).

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::parsing::engine::{ParsingEngine, record_outcome};
use crate::parsing::types::BatchStats;
use crate::store::traits::ItemFilter;

impl ParsingEngine {
    /// Parse up to `max_items` pending items matching `filter`.
    ///
    /// Returns statistics for this run; `fetched == processed() + errors`
    /// holds for the returned value. Items not admitted because the
    /// shutdown flag was raised are excluded from `fetched` — they remain
    /// pending at the source.
    pub async fn parse_batch(
        self: &Arc<Self>,
        filter: &ItemFilter,
        max_items: usize,
        confidence_threshold_override: Option<f32>,
    ) -> Result<BatchStats> {
        let emails = self
            .items
            .fetch_pending(filter, max_items)
            .await
            .map_err(Error::Store)?;

        let mut stats = BatchStats {
            fetched: emails.len() as u64,
            ..Default::default()
        };

        if emails.is_empty() {
            return Ok(stats);
        }

        info!(
            count = emails.len(),
            concurrency = self.config.batch_concurrency_limit,
            "Starting batch parse"
        );

        // Worker admission shares one gate per run; provider calls are
        // additionally paced by the engine-wide semaphore inside
        // parse_email, so no worker throttles on its own.
        let admission = Arc::new(Semaphore::new(self.config.batch_concurrency_limit.max(1)));
        let mut tasks: JoinSet<(String, Result<crate::parsing::engine::ParseOutcome>)> =
            JoinSet::new();
        let mut skipped: u64 = 0;

        for email in emails {
            if self.shutdown.load(Ordering::Relaxed) {
                skipped += 1;
                continue;
            }

            let permit = admission
                .clone()
                .acquire_owned()
                .await
                .expect("admission gate is never closed");
            let engine = Arc::clone(self);

            tasks.spawn(async move {
                let _permit = permit;
                let id = email.id.clone();
                let outcome = engine
                    .parse_email(&email, confidence_threshold_override)
                    .await;
                (id, outcome)
            });
        }

        if skipped > 0 {
            warn!(skipped, "Shutdown requested — admission stopped");
            stats.fetched -= skipped;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => record_outcome(&mut stats, &outcome),
                Ok((id, Err(e))) => {
                    error!(item_id = %id, error = %e, "Item failed in batch");
                    stats.errors += 1;
                }
                Err(join_err) => {
                    error!(error = %join_err, "Batch worker panicked");
                    stats.errors += 1;
                }
            }
        }

        info!(
            fetched = stats.fetched,
            generative = stats.generative_used,
            rule = stats.rule_used,
            unparseable = stats.unparseable,
            errors = stats.errors,
            "Batch parse complete"
        );

        self.merge_totals(&stats);
        Ok(stats)
    }
}
