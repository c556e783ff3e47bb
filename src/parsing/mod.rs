//! Transaction extraction pipeline: prompt/response codec, rule-based
//! fallback, per-item orchestration, and batch execution.

pub mod batch;
pub mod codec;
pub mod engine;
pub mod prompts;
pub mod rules;
pub mod types;

pub use engine::{ParseOutcome, ParsingEngine};
pub use rules::{RULE_CONFIDENCE_CAP, RuleExtractor};
pub use types::{
    BatchStats, ConfidenceBand, EmailStatus, ExtractedFields, ExtractionCandidate,
    ExtractionMethod, ParsingAttemptRecord, PendingEmail, TransactionType,
};
