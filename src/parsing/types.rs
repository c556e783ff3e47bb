//! Shared types for the transaction extraction pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Transaction classification ──────────────────────────────────────

/// Direction of a financial transaction.
///
/// `Unknown` means the text carried neither debit- nor credit-indicating
/// keywords; meaningful only when the candidate is a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Debit,
    Credit,
    Unknown,
}

impl TransactionType {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
            Self::Unknown => "unknown",
        }
    }
}

/// Which path produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Generative,
    Rule,
    None,
}

impl ExtractionMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Generative => "generative",
            Self::Rule => "rule",
            Self::None => "none",
        }
    }
}

// ── Extraction candidate ────────────────────────────────────────────

/// Auxiliary attributes extracted alongside the core transaction fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_last_4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
}

/// The structured result of one extraction attempt, from either path.
///
/// Invariant: when `is_transaction` is false, `amount`, `merchant` and
/// `transaction_type` are absent or ignored by downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionCandidate {
    pub is_transaction: bool,
    pub transaction_type: TransactionType,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub merchant: Option<String>,
    pub description: String,
    pub transaction_date: Option<NaiveDate>,
    /// Estimate of extraction correctness in [0.0, 1.0], comparable across
    /// both paths on the same scale.
    pub confidence: f32,
    #[serde(default)]
    pub extracted_fields: ExtractedFields,
    pub method: ExtractionMethod,
}

impl ExtractionCandidate {
    /// A non-transaction candidate with the given method and confidence.
    pub fn non_transaction(method: ExtractionMethod, confidence: f32) -> Self {
        Self {
            is_transaction: false,
            transaction_type: TransactionType::Unknown,
            amount: None,
            currency: None,
            merchant: None,
            description: String::new(),
            transaction_date: None,
            confidence: confidence.clamp(0.0, 1.0),
            extracted_fields: ExtractedFields::default(),
            method,
        }
    }
}

// ── Confidence bands ────────────────────────────────────────────────

/// Descriptive confidence bands. The engine enforces only the configured
/// threshold; bands exist for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    /// ≥ 0.8
    High,
    /// 0.6 – 0.79
    Medium,
    /// 0.4 – 0.59
    Low,
    /// < 0.4 — negligible or non-transaction.
    Negligible,
}

impl ConfidenceBand {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.6 {
            Self::Medium
        } else if score >= 0.4 {
            Self::Low
        } else {
            Self::Negligible
        }
    }
}

// ── Attempt log ─────────────────────────────────────────────────────

/// One record per orchestration run, immutable after creation and owned by
/// the attempt-log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingAttemptRecord {
    pub id: Uuid,
    pub item_id: String,
    pub method_used: ExtractionMethod,
    pub confidence: f32,
    pub succeeded: bool,
    /// Stable label of the generative failure that triggered fallback,
    /// if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Raw provider output, kept only for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_provider_payload: Option<String>,
}

// ── Pending items ───────────────────────────────────────────────────

/// Processing status of a source email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Parsed,
    Unparseable,
    Failed,
}

impl EmailStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parsed => "parsed",
            Self::Unparseable => "unparseable",
            Self::Failed => "failed",
        }
    }
}

/// A raw email awaiting extraction, as supplied by the item source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEmail {
    pub id: String,
    pub sender: String,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub status: EmailStatus,
}

impl PendingEmail {
    /// Subject and body joined for pattern analysis.
    pub fn full_text(&self) -> String {
        match &self.subject {
            Some(subject) => format!("{subject}\n{}", self.body),
            None => self.body.clone(),
        }
    }
}

// ── Batch statistics ────────────────────────────────────────────────

/// Aggregated counts for a batch run (or the engine's lifetime).
///
/// `generative_used`/`rule_used` count which method produced the *final*
/// candidate, not attempts. `fetched == processed() + errors` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub fetched: u64,
    pub generative_used: u64,
    pub rule_used: u64,
    pub unparseable: u64,
    pub errors: u64,
}

impl BatchStats {
    /// Items that reached the end of orchestration.
    pub fn processed(&self) -> u64 {
        self.fetched.saturating_sub(self.errors)
    }

    /// Fold another stats block into this one.
    pub fn merge(&mut self, other: &BatchStats) {
        self.fetched += other.fetched;
        self.generative_used += other.generative_used;
        self.rule_used += other.rule_used;
        self.unparseable += other.unparseable;
        self.errors += other.errors;
    }
}
