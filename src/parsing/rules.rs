//! Deterministic rule-based extractor.
//!
//! Pure function of the input text — no network, no shared mutable state,
//! fully reproducible. Serves as the fallback when the generative path fails
//! or scores below threshold, and can never out-rank a high-confidence
//! generative result: its confidence is hard-capped at
//! [`RULE_CONFIDENCE_CAP`].

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::parsing::codec::normalize_date;
use crate::parsing::types::{
    ExtractedFields, ExtractionCandidate, ExtractionMethod, PendingEmail, TransactionType,
};

/// Rule-path confidence ceiling.
pub const RULE_CONFIDENCE_CAP: f32 = 0.7;

/// Keywords indicating money leaving the account.
const DEBIT_KEYWORDS: &[&str] = &[
    "purchase",
    "charged",
    "payment",
    "paid",
    "spent",
    "bought",
    "transaction",
    "withdrawal",
    "debit",
    "debited",
    "order",
    "invoice",
];

/// Keywords indicating money arriving.
const CREDIT_KEYWORDS: &[&str] = &[
    "refund",
    "credit",
    "credited",
    "deposit",
    "received",
    "reimbursement",
    "cashback",
    "return",
    "reversal",
];

/// Keywords that veto transaction classification outright.
const NON_TRANSACTION_KEYWORDS: &[&str] = &[
    "newsletter",
    "subscription",
    "welcome",
    "verify",
    "confirm your email",
    "reset password",
    "unsubscribe",
    "privacy policy",
    "terms of service",
    "marketing",
    "promotional",
    "survey",
];

/// Sender domains treated as financial institutions.
const FINANCIAL_SENDER_DOMAINS: &[&str] = &[
    "paypal",
    "venmo",
    "chase",
    "bankofamerica",
    "wellsfargo",
    "citi",
    "amex",
    "discover",
    "capitalone",
    "amazon",
    "stripe",
    "square",
    "shopify",
    "ebay",
];

/// An amount surface pattern and the currency it implies.
struct AmountPattern {
    regex: Regex,
    currency: &'static str,
}

/// Rule-based transaction extractor with patterns compiled once.
pub struct RuleExtractor {
    merchant_patterns: Vec<Regex>,
    amount_patterns: Vec<AmountPattern>,
    date_patterns: Vec<Regex>,
    card_patterns: Vec<Regex>,
}

impl RuleExtractor {
    pub fn new() -> Self {
        let merchant_patterns = vec![
            Regex::new(
                r"(?i)\b(?:at|from|to)\s+([A-Z][A-Za-z0-9&'-]+(?:\s+[A-Z0-9][A-Za-z0-9&'-]*)*)(?:\s+on\b|\s+for\b|\s*\$|\s*USD|[.,]|\s*$)",
            )
            .unwrap(),
            Regex::new(
                r"(?i)(?:purchase|payment|transaction)(?:\s+at)?\s+([A-Z][A-Za-z0-9\s&'-]+?)(?:\s+on|\s+for)",
            )
            .unwrap(),
            Regex::new(r"([A-Z][A-Z0-9\s&'-]{2,30})(?:\s+charged|\s+transaction)").unwrap(),
        ];

        let amount_patterns = vec![
            AmountPattern {
                regex: Regex::new(r"\$\s*(\d{1,10}(?:,\d{3})*(?:\.\d{2})?)").unwrap(),
                currency: "USD",
            },
            AmountPattern {
                regex: Regex::new(r"(?i)(\d{1,10}(?:,\d{3})*(?:\.\d{2})?)\s*USD").unwrap(),
                currency: "USD",
            },
            AmountPattern {
                regex: Regex::new(r"(?i)USD\s*(\d{1,10}(?:,\d{3})*(?:\.\d{2})?)").unwrap(),
                currency: "USD",
            },
            AmountPattern {
                regex: Regex::new(r"(?i)(\d{1,10}(?:,\d{3})*(?:\.\d{2})?)\s*EUR").unwrap(),
                currency: "EUR",
            },
            AmountPattern {
                regex: Regex::new(r"€\s*(\d{1,10}(?:,\d{3})*(?:\.\d{2})?)").unwrap(),
                currency: "EUR",
            },
            AmountPattern {
                regex: Regex::new(
                    r"(?i)(?:total|amount|charged|paid)[\s:]+\$?\s*(\d{1,10}(?:,\d{3})*(?:\.\d{2})?)",
                )
                .unwrap(),
                currency: "USD",
            },
        ];

        let date_patterns = vec![
            Regex::new(r"(\d{1,2}[-/]\d{1,2}[-/]\d{2,4})").unwrap(),
            Regex::new(r"(\d{4}[-/]\d{1,2}[-/]\d{1,2})").unwrap(),
            Regex::new(
                r"((?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},?\s+\d{4})",
            )
            .unwrap(),
        ];

        let card_patterns = vec![
            Regex::new(r"(?i)card\s+(?:ending\s+(?:in\s+)?|#)?(\d{4})").unwrap(),
            Regex::new(r"(?i)\bx+(\d{4})").unwrap(),
            Regex::new(r"\*+(\d{4})").unwrap(),
        ];

        Self {
            merchant_patterns,
            amount_patterns,
            date_patterns,
            card_patterns,
        }
    }

    /// Extract a candidate from an email using pattern rules only.
    ///
    /// Always completes: a text with no financial indicators resolves to a
    /// non-transaction candidate in the lowest confidence band, never an
    /// error.
    pub fn extract(&self, email: &PendingEmail) -> ExtractionCandidate {
        let text = email.full_text();

        if !self.is_transaction_text(&text, &email.sender) {
            return ExtractionCandidate::non_transaction(ExtractionMethod::Rule, 0.0);
        }

        let (amount, currency) = match self.extract_amount(&text) {
            Some((amount, currency)) => (Some(amount), Some(currency.to_string())),
            None => (None, None),
        };
        let merchant = self.extract_merchant(&text, &email.sender);
        let transaction_type = self.extract_type(&text);
        let transaction_date = self.extract_date(&text);
        let card_last_4 = self.extract_card(&text);

        let confidence =
            field_confidence(amount.is_some(), merchant.is_some(), transaction_type, transaction_date.is_some());

        let description = match &merchant {
            Some(m) => format!("Transaction at {m}"),
            None => "Transaction".to_string(),
        };

        ExtractionCandidate {
            is_transaction: true,
            transaction_type,
            amount,
            currency,
            merchant,
            description,
            transaction_date,
            confidence,
            extracted_fields: ExtractedFields {
                card_last_4,
                ..Default::default()
            },
            method: ExtractionMethod::Rule,
        }
    }

    /// Heuristic filter: does this text describe a transaction at all?
    fn is_transaction_text(&self, text: &str, sender: &str) -> bool {
        let text_lower = text.to_lowercase();

        if NON_TRANSACTION_KEYWORDS
            .iter()
            .any(|kw| text_lower.contains(kw))
        {
            return false;
        }

        let has_amount = self
            .amount_patterns
            .iter()
            .any(|p| p.regex.is_match(text));
        if !has_amount {
            return false;
        }

        let has_debit = DEBIT_KEYWORDS.iter().any(|kw| text_lower.contains(kw));
        let has_credit = CREDIT_KEYWORDS.iter().any(|kw| text_lower.contains(kw));

        let sender_lower = sender.to_lowercase();
        let has_financial_sender = FINANCIAL_SENDER_DOMAINS
            .iter()
            .any(|domain| sender_lower.contains(domain));

        has_debit || has_credit || has_financial_sender
    }

    fn extract_amount(&self, text: &str) -> Option<(Decimal, &'static str)> {
        for pattern in &self.amount_patterns {
            if let Some(captures) = pattern.regex.captures(text) {
                let raw = captures.get(1)?.as_str().replace(',', "");
                if let Ok(amount) = raw.parse::<Decimal>()
                    && amount > Decimal::ZERO
                    && amount < dec!(1_000_000)
                {
                    return Some((amount, pattern.currency));
                }
            }
        }
        None
    }

    fn extract_merchant(&self, text: &str, sender: &str) -> Option<String> {
        for pattern in &self.merchant_patterns {
            if let Some(captures) = pattern.captures(text) {
                let merchant = captures.get(1)?.as_str().trim();
                if merchant.len() > 2 && merchant.len() < 50 {
                    return Some(merchant.to_string());
                }
            }
        }

        // Fall back to the sender's domain name.
        let domain = sender.split('@').nth(1)?;
        let name = domain.split('.').next()?;
        if name.len() > 2 {
            let mut chars = name.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => return None,
            };
            return Some(capitalized);
        }
        None
    }

    /// Infer direction from keyword presence. Credit keywords are more
    /// specific and checked first; neither set present means `Unknown`.
    fn extract_type(&self, text: &str) -> TransactionType {
        let text_lower = text.to_lowercase();
        if CREDIT_KEYWORDS.iter().any(|kw| text_lower.contains(kw)) {
            TransactionType::Credit
        } else if DEBIT_KEYWORDS.iter().any(|kw| text_lower.contains(kw)) {
            TransactionType::Debit
        } else {
            TransactionType::Unknown
        }
    }

    fn extract_date(&self, text: &str) -> Option<chrono::NaiveDate> {
        for pattern in &self.date_patterns {
            if let Some(captures) = pattern.captures(text)
                && let Some(date) = normalize_date(captures.get(1)?.as_str())
            {
                return Some(date);
            }
        }
        None
    }

    fn extract_card(&self, text: &str) -> Option<String> {
        for pattern in &self.card_patterns {
            if let Some(captures) = pattern.captures(text) {
                return Some(captures.get(1)?.as_str().to_string());
            }
        }
        None
    }
}

impl Default for RuleExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Base score for recognizing a transaction plus a share per matched field,
/// capped so the rule path can only compete with low-confidence generative
/// results.
fn field_confidence(
    has_amount: bool,
    has_merchant: bool,
    transaction_type: TransactionType,
    has_date: bool,
) -> f32 {
    let mut score: f32 = 0.3;
    if has_amount {
        score += 0.25;
    }
    if has_merchant {
        score += 0.25;
    }
    if transaction_type != TransactionType::Unknown {
        score += 0.1;
    }
    if has_date {
        score += 0.1;
    }
    score.min(RULE_CONFIDENCE_CAP)
}
