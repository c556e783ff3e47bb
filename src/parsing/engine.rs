//! Per-item orchestration of the two extraction paths.
//!
//! Flow per item:
//! 1. Generative attempt (always first — test/offline mode routes through
//!    the mock client rather than skipping the step)
//! 2. Accept when it decodes cleanly at or above the confidence threshold
//! 3. Otherwise rule fallback, then select the higher-confidence candidate
//! 4. Persist + log + status update, exactly once, at the end
//!
//! Every internal branch terminates with a candidate (possibly
//! `is_transaction=false`); only collaborator write failures and a
//! misconfigured provider are surfaced to the caller.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ParseConfig;
use crate::error::{Error, Result};
use crate::llm::{GenerationClient, GenerationOptions};
use crate::parsing::codec::decode_response;
use crate::parsing::prompts::build_extraction_prompt;
use crate::parsing::rules::RuleExtractor;
use crate::parsing::types::{
    BatchStats, EmailStatus, ExtractionCandidate, ExtractionMethod, ParsingAttemptRecord,
    PendingEmail,
};
use crate::store::traits::{AttemptLogSink, ItemSource, StatusSink, TransactionSink};

/// Temperature for extraction calls (deterministic-ish).
const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Max tokens for the extraction call (a single JSON object).
const EXTRACTION_MAX_TOKENS: u32 = 512;

/// Result of one orchestration run.
#[derive(Debug)]
pub struct ParseOutcome {
    /// The selected candidate.
    pub candidate: ExtractionCandidate,
    /// The attempt record handed to the log sink.
    pub attempt: ParsingAttemptRecord,
    /// Whether the rule extractor was invoked.
    pub fallback_ran: bool,
}

/// Orchestration states. `run_extraction` steps through these until `Done`;
/// the terminal state always carries a candidate.
enum ExtractionState {
    Start,
    GenerativeAttempt,
    Accept {
        candidate: ExtractionCandidate,
    },
    Fallback {
        generative: Option<ExtractionCandidate>,
        error_kind: Option<&'static str>,
    },
    Select {
        generative: Option<ExtractionCandidate>,
        rule: ExtractionCandidate,
        error_kind: Option<&'static str>,
    },
    Done {
        candidate: ExtractionCandidate,
        error_kind: Option<&'static str>,
        fallback_ran: bool,
    },
}

/// The parsing engine: coordinates provider, codec, rule extractor and the
/// collaborator sinks for single items and batches.
pub struct ParsingEngine {
    pub(crate) config: ParseConfig,
    provider: Arc<dyn GenerationClient>,
    rules: RuleExtractor,
    pub(crate) items: Arc<dyn ItemSource>,
    transactions: Arc<dyn TransactionSink>,
    attempts: Arc<dyn AttemptLogSink>,
    statuses: Arc<dyn StatusSink>,
    /// Single shared admission gate for provider calls, sized to the batch
    /// concurrency limit. Shared across all batch workers — never
    /// per-worker throttling.
    pub(crate) provider_gate: Arc<Semaphore>,
    /// Set to stop admission of new batch items.
    pub(crate) shutdown: Arc<AtomicBool>,
    /// Process-lifetime totals, merged after each run.
    pub(crate) totals: Mutex<BatchStats>,
}

impl ParsingEngine {
    pub fn new(
        config: ParseConfig,
        provider: Arc<dyn GenerationClient>,
        items: Arc<dyn ItemSource>,
        transactions: Arc<dyn TransactionSink>,
        attempts: Arc<dyn AttemptLogSink>,
        statuses: Arc<dyn StatusSink>,
    ) -> Self {
        let permits = config.batch_concurrency_limit.max(1);
        Self {
            config,
            provider,
            rules: RuleExtractor::new(),
            items,
            transactions,
            attempts,
            statuses,
            provider_gate: Arc::new(Semaphore::new(permits)),
            shutdown: Arc::new(AtomicBool::new(false)),
            totals: Mutex::new(BatchStats::default()),
        }
    }

    /// Flag checked by batch runs before admitting each item.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Cumulative statistics across the engine's lifetime.
    pub fn stats(&self) -> BatchStats {
        *self.totals.lock().expect("stats lock poisoned")
    }

    /// Parse a single item by id.
    ///
    /// Idempotent unless `force_reparse`: a previously parsed item returns
    /// its stored candidate, and a previously unparseable item a synthesized
    /// non-transaction candidate, without invoking any provider.
    pub async fn parse_one(
        &self,
        item_id: &str,
        force_reparse: bool,
    ) -> Result<ExtractionCandidate> {
        let email = self
            .items
            .get(item_id)
            .await
            .map_err(Error::Store)?
            .ok_or_else(|| Error::ItemNotFound(item_id.to_string()))?;

        if !force_reparse {
            match email.status {
                EmailStatus::Parsed => {
                    if let Some(stored) = self
                        .transactions
                        .find_for_item(item_id)
                        .await
                        .map_err(Error::Store)?
                    {
                        debug!(item_id, "Returning stored candidate");
                        return Ok(stored);
                    }
                }
                EmailStatus::Unparseable => {
                    debug!(item_id, "Previously unparseable, not re-extracting");
                    return Ok(ExtractionCandidate::non_transaction(
                        ExtractionMethod::None,
                        0.0,
                    ));
                }
                EmailStatus::Pending | EmailStatus::Failed => {}
            }
        }

        let outcome = self.parse_email(&email, None).await?;

        let mut run = BatchStats {
            fetched: 1,
            ..Default::default()
        };
        record_outcome(&mut run, &outcome);
        self.merge_totals(&run);

        Ok(outcome.candidate)
    }

    /// Run the full orchestration for one email: extraction, persistence,
    /// attempt log, status update.
    pub async fn parse_email(
        &self,
        email: &PendingEmail,
        confidence_threshold_override: Option<f32>,
    ) -> Result<ParseOutcome> {
        let threshold =
            confidence_threshold_override.unwrap_or(self.config.confidence_threshold);

        info!(
            item_id = %email.id,
            sender = %email.sender,
            threshold,
            "Parsing email"
        );

        let (candidate, error_kind, raw_payload, fallback_ran) =
            self.run_extraction(email, threshold).await?;

        let mut attempt = ParsingAttemptRecord {
            id: uuid::Uuid::new_v4(),
            item_id: email.id.clone(),
            method_used: candidate.method,
            confidence: candidate.confidence,
            succeeded: true,
            error_kind: error_kind.map(String::from),
            timestamp: Utc::now(),
            raw_provider_payload: raw_payload,
        };

        let persist_result = if candidate.is_transaction {
            self.transactions.persist(&candidate, &email.id).await
        } else {
            Ok(())
        };

        let status = match &persist_result {
            Ok(()) if candidate.is_transaction => EmailStatus::Parsed,
            Ok(()) => EmailStatus::Unparseable,
            Err(_) => EmailStatus::Failed,
        };

        if persist_result.is_err() {
            attempt.succeeded = false;
            attempt.error_kind = Some("persistence_failed".to_string());
        }

        self.attempts.persist(&attempt).await.map_err(Error::Store)?;
        self.statuses
            .mark(&email.id, status)
            .await
            .map_err(Error::Store)?;

        persist_result.map_err(Error::Store)?;

        info!(
            item_id = %email.id,
            method = candidate.method.label(),
            confidence = candidate.confidence,
            status = status.label(),
            "Parse complete"
        );

        Ok(ParseOutcome {
            candidate,
            attempt,
            fallback_ran,
        })
    }

    /// Drive the extraction state machine to `Done`.
    ///
    /// Returns the candidate, the generative failure kind (if fallback was
    /// error-triggered), the raw provider payload, and whether fallback ran.
    async fn run_extraction(
        &self,
        email: &PendingEmail,
        threshold: f32,
    ) -> Result<(
        ExtractionCandidate,
        Option<&'static str>,
        Option<String>,
        bool,
    )> {
        let mut raw_payload: Option<String> = None;
        let mut state = ExtractionState::Start;

        loop {
            state = match state {
                ExtractionState::Start => ExtractionState::GenerativeAttempt,

                ExtractionState::GenerativeAttempt => {
                    self.generative_attempt(email, threshold, &mut raw_payload)
                        .await?
                }

                // The deterministic extractor never runs on this path.
                ExtractionState::Accept { candidate } => ExtractionState::Done {
                    candidate,
                    error_kind: None,
                    fallback_ran: false,
                },

                ExtractionState::Fallback {
                    generative,
                    error_kind,
                } => {
                    let rule = self.rules.extract(email);
                    debug!(
                        item_id = %email.id,
                        rule_confidence = rule.confidence,
                        "Rule fallback complete"
                    );
                    ExtractionState::Select {
                        generative,
                        rule,
                        error_kind,
                    }
                }

                ExtractionState::Select {
                    generative,
                    rule,
                    error_kind,
                } => {
                    // Higher confidence wins; an exact tie goes to the
                    // generative result for its richer structured fields.
                    let candidate = match generative {
                        Some(generative) if generative.confidence >= rule.confidence => generative,
                        _ => rule,
                    };
                    ExtractionState::Done {
                        candidate,
                        error_kind,
                        fallback_ran: true,
                    }
                }

                ExtractionState::Done {
                    candidate,
                    error_kind,
                    fallback_ran,
                } => {
                    return Ok((candidate, error_kind, raw_payload, fallback_ran));
                }
            };
        }
    }

    /// The generative step: prompt, provider call behind the shared gate,
    /// decode, threshold check.
    async fn generative_attempt(
        &self,
        email: &PendingEmail,
        threshold: f32,
        raw_payload: &mut Option<String>,
    ) -> Result<ExtractionState> {
        let prompt = build_extraction_prompt(email, self.config.use_few_shot);
        let opts = GenerationOptions {
            temperature: EXTRACTION_TEMPERATURE,
            max_tokens: EXTRACTION_MAX_TOKENS,
        };

        let generation = {
            let _permit = self
                .provider_gate
                .acquire()
                .await
                .expect("provider gate is never closed");
            self.provider.generate(&prompt, &opts).await
        };

        match generation {
            Ok(result) => {
                *raw_payload = Some(result.content.clone());
                match decode_response(&result.content) {
                    Ok(candidate) if candidate.confidence >= threshold => {
                        debug!(
                            item_id = %email.id,
                            confidence = candidate.confidence,
                            "Generative result accepted, rule path skipped"
                        );
                        Ok(ExtractionState::Accept { candidate })
                    }
                    Ok(candidate) => {
                        debug!(
                            item_id = %email.id,
                            confidence = candidate.confidence,
                            threshold,
                            "Generative confidence below threshold, falling back"
                        );
                        Ok(ExtractionState::Fallback {
                            generative: Some(candidate),
                            error_kind: None,
                        })
                    }
                    Err(decode_err) => {
                        warn!(
                            item_id = %email.id,
                            error = %decode_err,
                            "Provider response undecodable, falling back"
                        );
                        Ok(ExtractionState::Fallback {
                            generative: None,
                            error_kind: Some(decode_err.kind()),
                        })
                    }
                }
            }
            Err(provider_err) if provider_err.is_recoverable() => {
                warn!(
                    item_id = %email.id,
                    provider = self.provider.name(),
                    error = %provider_err,
                    "Generative call failed, falling back"
                );
                Ok(ExtractionState::Fallback {
                    generative: None,
                    error_kind: Some(provider_err.kind()),
                })
            }
            // Misconfiguration is fatal — never silently replaced by the
            // rule path outside an explicit mock configuration.
            Err(provider_err) => Err(provider_err.into()),
        }
    }

    pub(crate) fn merge_totals(&self, run: &BatchStats) {
        self.totals.lock().expect("stats lock poisoned").merge(run);
    }
}

/// Fold one successful outcome into run statistics.
pub(crate) fn record_outcome(stats: &mut BatchStats, outcome: &ParseOutcome) {
    if !outcome.candidate.is_transaction {
        stats.unparseable += 1;
        return;
    }
    match outcome.candidate.method {
        ExtractionMethod::Generative => stats.generative_used += 1,
        ExtractionMethod::Rule => stats.rule_used += 1,
        ExtractionMethod::None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseConfig;
    use crate::error::ProviderError;
    use crate::llm::MockClient;
    use crate::parsing::types::TransactionType;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_email(id: &str, sender: &str, body: &str) -> PendingEmail {
        PendingEmail {
            id: id.to_string(),
            sender: sender.to_string(),
            subject: None,
            body: body.to_string(),
            received_at: Utc::now(),
            status: EmailStatus::Pending,
        }
    }

    fn make_engine(mock: Arc<MockClient>, store: Arc<MemoryStore>) -> ParsingEngine {
        ParsingEngine::new(
            ParseConfig::default(),
            mock,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
        )
    }

    #[tokio::test]
    async fn high_confidence_generative_skips_rule_path() {
        let mock = Arc::new(MockClient::new());
        mock.push_text(
            r#"{"is_transaction": true, "transaction_type": "debit", "amount": "49.99",
                "currency": "USD", "merchant": "Amazon", "confidence_score": 0.95}"#,
        );
        let store = Arc::new(MemoryStore::new());
        let email = make_email("e-1", "auto-confirm@amazon.com", "Order total: $49.99");
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock.clone(), store.clone());
        let outcome = engine.parse_email(&email, None).await.unwrap();

        assert!(!outcome.fallback_ran);
        assert_eq!(outcome.candidate.method, ExtractionMethod::Generative);
        assert_eq!(mock.calls(), 1);
        assert_eq!(store.status_of("e-1").await, Some(EmailStatus::Parsed));
        assert!(store.transaction_for("e-1").await.is_some());
    }

    #[tokio::test]
    async fn low_confidence_falls_back_and_rule_wins() {
        let mock = Arc::new(MockClient::new());
        mock.push_text(
            r#"{"is_transaction": true, "transaction_type": "debit", "amount": "50.00",
                "currency": "USD", "merchant": "Amazon", "confidence_score": 0.4}"#,
        );
        let store = Arc::new(MemoryStore::new());
        let email = make_email(
            "e-2",
            "alerts@chase.com",
            "Card ending in 1234 charged $50.00 at Amazon",
        );
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store.clone());
        let outcome = engine.parse_email(&email, None).await.unwrap();

        assert!(outcome.fallback_ran);
        assert_eq!(outcome.candidate.method, ExtractionMethod::Rule);
        assert_eq!(outcome.candidate.amount, Some(dec!(50.00)));
        assert_eq!(outcome.candidate.merchant.as_deref(), Some("Amazon"));
        assert_eq!(
            outcome.candidate.extracted_fields.card_last_4.as_deref(),
            Some("1234")
        );
        assert!(outcome.candidate.confidence <= 0.7);
    }

    #[tokio::test]
    async fn provider_error_triggers_fallback_and_is_recorded() {
        let mock = Arc::new(MockClient::new());
        mock.push_error(ProviderError::Timeout {
            provider: "mock".to_string(),
        });
        let store = Arc::new(MemoryStore::new());
        let email = make_email(
            "e-3",
            "alerts@chase.com",
            "Card ending in 9999 charged $10.00 at Cafe Pronto",
        );
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store.clone());
        let outcome = engine.parse_email(&email, None).await.unwrap();

        assert!(outcome.fallback_ran);
        assert_eq!(outcome.candidate.method, ExtractionMethod::Rule);
        assert_eq!(
            outcome.attempt.error_kind.as_deref(),
            Some("provider_timeout")
        );
        // One attempt record, persisted.
        assert_eq!(store.attempts_for("e-3").await.len(), 1);
    }

    #[tokio::test]
    async fn undecodable_response_triggers_fallback() {
        let mock = Arc::new(MockClient::new());
        mock.push_text("I could not process this email, sorry!");
        let store = Arc::new(MemoryStore::new());
        let email = make_email(
            "e-4",
            "alerts@chase.com",
            "Card ending in 1111 charged $5.00 at Kiosk",
        );
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store.clone());
        let outcome = engine.parse_email(&email, None).await.unwrap();

        assert!(outcome.fallback_ran);
        assert_eq!(outcome.candidate.method, ExtractionMethod::Rule);
        assert_eq!(
            outcome.attempt.error_kind.as_deref(),
            Some("response_malformed_json")
        );
    }

    #[tokio::test]
    async fn missing_confidence_is_a_failed_generative_attempt() {
        let mock = Arc::new(MockClient::new());
        mock.push_text(r#"{"is_transaction": true, "transaction_type": "debit"}"#);
        let store = Arc::new(MemoryStore::new());
        let email = make_email(
            "e-5",
            "alerts@chase.com",
            "Card ending in 2222 charged $8.00 at Bakery",
        );
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store.clone());
        let outcome = engine.parse_email(&email, None).await.unwrap();

        assert!(outcome.fallback_ran);
        assert_eq!(
            outcome.attempt.error_kind.as_deref(),
            Some("response_missing_confidence")
        );
    }

    #[tokio::test]
    async fn non_transaction_marks_unparseable_and_persists_nothing() {
        let mock = Arc::new(MockClient::new());
        mock.push_text(r#"{"is_transaction": false, "confidence_score": 0.2}"#);
        let store = Arc::new(MemoryStore::new());
        let email = make_email(
            "e-6",
            "news@example.com",
            "Our weekly newsletter — tips for saving money!",
        );
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store.clone());
        let outcome = engine.parse_email(&email, None).await.unwrap();

        assert!(!outcome.candidate.is_transaction);
        assert_eq!(store.status_of("e-6").await, Some(EmailStatus::Unparseable));
        assert!(store.transaction_for("e-6").await.is_none());
        // The attempt is still logged.
        assert_eq!(store.attempts_for("e-6").await.len(), 1);
    }

    #[tokio::test]
    async fn exact_tie_goes_to_generative() {
        let mock = Arc::new(MockClient::new());
        // Generative decodes at exactly the rule path's capped confidence.
        mock.push_text(
            r#"{"is_transaction": true, "transaction_type": "debit", "amount": "50.00",
                "currency": "USD", "merchant": "Amazon Marketplace", "confidence_score": 0.7}"#,
        );
        let store = Arc::new(MemoryStore::new());
        // Rule path on this text: 0.3 + amount + merchant + type → capped at 0.7.
        let email = make_email("e-7", "alerts@chase.com", "charged $50.00 at Amazon");
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store);
        // Threshold override above both scores forces the comparison.
        let outcome = engine.parse_email(&email, Some(0.9)).await.unwrap();

        assert!(outcome.fallback_ran);
        assert_eq!(outcome.candidate.method, ExtractionMethod::Generative);
        assert_eq!(
            outcome.candidate.merchant.as_deref(),
            Some("Amazon Marketplace")
        );
    }

    #[tokio::test]
    async fn rule_overrides_lower_confidence_generative() {
        let mock = Arc::new(MockClient::new());
        mock.push_text(
            r#"{"is_transaction": true, "transaction_type": "debit", "amount": "50.00",
                "currency": "USD", "merchant": "Amazon", "confidence_score": 0.5}"#,
        );
        let store = Arc::new(MemoryStore::new());
        let email = make_email("e-13", "alerts@chase.com", "charged $50.00 at Amazon");
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store);
        let outcome = engine.parse_email(&email, None).await.unwrap();

        // Rule computes 0.7 here, beating the 0.5 generative result even
        // though the generative path ran first.
        assert_eq!(outcome.candidate.method, ExtractionMethod::Rule);
        assert!((outcome.candidate.confidence - 0.7).abs() < 0.001);
    }

    #[tokio::test]
    async fn misconfigured_provider_is_fatal() {
        let mock = Arc::new(MockClient::new());
        mock.push_error(ProviderError::Misconfigured {
            provider: "anthropic".to_string(),
            reason: "no API key".to_string(),
        });
        let store = Arc::new(MemoryStore::new());
        let email = make_email("e-8", "alerts@chase.com", "charged $1.00 at Kiosk");
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store.clone());
        let result = engine.parse_email(&email, None).await;
        assert!(matches!(result, Err(Error::Provider(_))));
    }

    #[tokio::test]
    async fn parse_one_is_idempotent_without_force() {
        let mock = Arc::new(MockClient::new());
        mock.push_text(
            r#"{"is_transaction": true, "transaction_type": "debit", "amount": "49.99",
                "currency": "USD", "merchant": "Amazon", "confidence_score": 0.95}"#,
        );
        let store = Arc::new(MemoryStore::new());
        let email = make_email("e-9", "auto-confirm@amazon.com", "Order total: $49.99");
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock.clone(), store);

        let first = engine.parse_one("e-9", false).await.unwrap();
        assert_eq!(mock.calls(), 1);

        let second = engine.parse_one("e-9", false).await.unwrap();
        // No second provider call; same stored candidate.
        assert_eq!(mock.calls(), 1);
        assert_eq!(second.amount, first.amount);
        assert_eq!(second.merchant, first.merchant);

        // force_reparse re-invokes the provider.
        let _third = engine.parse_one("e-9", true).await.unwrap();
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn parse_one_unknown_item_errors() {
        let mock = Arc::new(MockClient::new());
        let store = Arc::new(MemoryStore::new());
        let engine = make_engine(mock, store);
        let result = engine.parse_one("missing", false).await;
        assert!(matches!(result, Err(Error::ItemNotFound(_))));
    }

    #[tokio::test]
    async fn persistence_failure_propagates_and_marks_failed() {
        let mock = Arc::new(MockClient::new());
        mock.push_text(
            r#"{"is_transaction": true, "transaction_type": "debit", "amount": "20.00",
                "currency": "USD", "merchant": "Cafe", "confidence_score": 0.9}"#,
        );
        let store = Arc::new(MemoryStore::new());
        store.fail_transaction_writes(true);
        let email = make_email("e-10", "alerts@chase.com", "charged $20.00 at Cafe");
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store.clone());
        let result = engine.parse_email(&email, None).await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(store.status_of("e-10").await, Some(EmailStatus::Failed));

        let attempts = store.attempts_for("e-10").await;
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].succeeded);
        assert_eq!(attempts[0].error_kind.as_deref(), Some("persistence_failed"));
    }

    #[tokio::test]
    async fn confidence_always_in_unit_interval() {
        let mock = Arc::new(MockClient::new());
        mock.push_text(r#"{"is_transaction": false, "confidence_score": -3.0}"#);
        let store = Arc::new(MemoryStore::new());
        let email = make_email("e-11", "x@y.com", "hello");
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store);
        let outcome = engine.parse_email(&email, None).await.unwrap();
        assert!((0.0..=1.0).contains(&outcome.candidate.confidence));
    }

    #[tokio::test]
    async fn default_mock_payload_accepted_outright() {
        // The mock's canned payload is a 0.85-confidence debit — above the
        // default threshold, so no fallback.
        let mock = Arc::new(MockClient::new());
        let store = Arc::new(MemoryStore::new());
        let email = make_email("e-12", "billing@stripe.com", "Payment charged: $25.00");
        store.seed(vec![email.clone()]).await;

        let engine = make_engine(mock, store);
        let outcome = engine.parse_email(&email, None).await.unwrap();
        assert!(!outcome.fallback_ran);
        assert_eq!(outcome.candidate.transaction_type, TransactionType::Debit);
        assert_eq!(outcome.candidate.amount, Some(dec!(25.00)));
    }
}
