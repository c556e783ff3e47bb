//! Decodes raw provider output into an extraction candidate.
//!
//! Providers are asked for a bare JSON object but routinely wrap it in
//! markdown fences or surrounding prose; the decoder recovers the object
//! before parsing. Anything unrecoverable is a [`DecodeError`], which the
//! engine treats as a failed generative attempt.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::DecodeError;
use crate::parsing::types::{
    ExtractedFields, ExtractionCandidate, ExtractionMethod, TransactionType,
};

/// Date formats accepted from provider output, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m/%d/%y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
];

/// Provider response shape. Every field optional so presence can be checked
/// explicitly rather than failing deep inside serde.
#[derive(Debug, Deserialize)]
struct RawExtraction {
    is_transaction: Option<bool>,
    #[serde(default)]
    transaction_type: Option<String>,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    merchant: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    transaction_date: Option<String>,
    #[serde(default)]
    confidence_score: Option<f32>,
    #[serde(default)]
    extracted_fields: Option<RawExtractedFields>,
}

#[derive(Debug, Default, Deserialize)]
struct RawExtractedFields {
    #[serde(default)]
    card_last_4: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    reference_number: Option<String>,
}

/// Decode a provider's raw text into a candidate.
///
/// Requires `is_transaction` and an explicit `confidence_score` — a missing
/// confidence is an ambiguous response, not a value to be defaulted.
pub fn decode_response(raw: &str) -> Result<ExtractionCandidate, DecodeError> {
    let json_str = extract_json_object(raw);
    let parsed: RawExtraction = serde_json::from_str(&json_str)
        .map_err(|e| DecodeError::MalformedJson(e.to_string()))?;

    let is_transaction = parsed
        .is_transaction
        .ok_or(DecodeError::MissingField("is_transaction"))?;

    let confidence = parsed
        .confidence_score
        .ok_or(DecodeError::MissingConfidence)?
        .clamp(0.0, 1.0);

    if !is_transaction {
        return Ok(ExtractionCandidate::non_transaction(
            ExtractionMethod::Generative,
            confidence,
        ));
    }

    let transaction_type = match parsed.transaction_type.as_deref() {
        Some("debit") => TransactionType::Debit,
        Some("credit") => TransactionType::Credit,
        _ => TransactionType::Unknown,
    };

    let amount = match &parsed.amount {
        Some(serde_json::Value::String(s)) => normalize_amount(s),
        Some(serde_json::Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };

    let transaction_date = parsed.transaction_date.as_deref().and_then(normalize_date);

    let merchant = parsed.merchant.filter(|m| !m.trim().is_empty());
    let currency = parsed.currency.filter(|c| !c.trim().is_empty());

    // A claimed transaction with core fields missing is suspect: keep it,
    // but demote confidence so it cannot pass a default threshold.
    let core_complete = transaction_type != TransactionType::Unknown
        && amount.is_some()
        && currency.is_some()
        && merchant.is_some();
    let confidence = if core_complete {
        confidence
    } else {
        confidence.min(0.5)
    };

    let description = parsed
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| match &merchant {
            Some(m) => format!("Transaction at {m}"),
            None => "Transaction".to_string(),
        });

    let raw_fields = parsed.extracted_fields.unwrap_or_default();

    Ok(ExtractionCandidate {
        is_transaction: true,
        transaction_type,
        amount,
        currency,
        merchant,
        description,
        transaction_date,
        confidence,
        extracted_fields: ExtractedFields {
            card_last_4: raw_fields.card_last_4,
            category: raw_fields.category,
            location: raw_fields.location,
            reference_number: raw_fields.reference_number,
        },
        method: ExtractionMethod::Generative,
    })
}

/// Extract a JSON object from provider output (handles markdown wrapping
/// and surrounding prose).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

/// Normalize an amount representation (currency symbols, thousands
/// separators, leading/trailing currency codes) to a decimal.
pub fn normalize_amount(raw: &str) -> Option<Decimal> {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.trim_matches(|c: char| !(c.is_ascii_digit() || c == '.'));
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(cleaned).ok()
}

/// Normalize a date representation to a canonical date.
///
/// Accepts numeric `MM/DD/YYYY`, ISO `YYYY-MM-DD`, and written forms like
/// "Jan 15, 2024".
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_complete_transaction() {
        let raw = r#"{
            "is_transaction": true,
            "transaction_type": "debit",
            "amount": "125.50",
            "currency": "USD",
            "merchant": "Starbucks",
            "description": "Card transaction at Starbucks",
            "transaction_date": "2024-01-15",
            "confidence_score": 0.95,
            "extracted_fields": {"card_last_4": "1234"}
        }"#;
        let candidate = decode_response(raw).unwrap();
        assert!(candidate.is_transaction);
        assert_eq!(candidate.transaction_type, TransactionType::Debit);
        assert_eq!(candidate.amount, Some(dec!(125.50)));
        assert_eq!(candidate.merchant.as_deref(), Some("Starbucks"));
        assert_eq!(
            candidate.transaction_date,
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert!((candidate.confidence - 0.95).abs() < 0.001);
        assert_eq!(
            candidate.extracted_fields.card_last_4.as_deref(),
            Some("1234")
        );
        assert_eq!(candidate.method, ExtractionMethod::Generative);
    }

    #[test]
    fn decodes_non_transaction() {
        let raw = r#"{"is_transaction": false, "confidence_score": 0.0}"#;
        let candidate = decode_response(raw).unwrap();
        assert!(!candidate.is_transaction);
        assert!(candidate.amount.is_none());
        assert!(candidate.merchant.is_none());
    }

    #[test]
    fn missing_is_transaction_is_an_error() {
        let raw = r#"{"confidence_score": 0.9}"#;
        let err = decode_response(raw).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("is_transaction")));
    }

    #[test]
    fn missing_confidence_is_an_error_not_a_default() {
        let raw = r#"{"is_transaction": true, "transaction_type": "debit", "amount": "10.00"}"#;
        let err = decode_response(raw).unwrap_err();
        assert!(matches!(err, DecodeError::MissingConfidence));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = decode_response("not json at all").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedJson(_)));
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "Here you go:\n```json\n{\"is_transaction\": false, \"confidence_score\": 0.1}\n```";
        let candidate = decode_response(raw).unwrap();
        assert!(!candidate.is_transaction);
    }

    #[test]
    fn recovers_object_from_surrounding_prose() {
        let raw = "Based on the email: {\"is_transaction\": false, \"confidence_score\": 0.2} is my answer.";
        let candidate = decode_response(raw).unwrap();
        assert!(!candidate.is_transaction);
        assert!((candidate.confidence - 0.2).abs() < 0.001);
    }

    #[test]
    fn confidence_clamped_to_unit_interval() {
        let raw = r#"{"is_transaction": false, "confidence_score": 2.5}"#;
        let candidate = decode_response(raw).unwrap();
        assert!((candidate.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn incomplete_transaction_demoted_to_half_confidence() {
        // Claimed transaction with no merchant/currency: kept but demoted.
        let raw = r#"{
            "is_transaction": true,
            "transaction_type": "debit",
            "amount": "10.00",
            "confidence_score": 0.9
        }"#;
        let candidate = decode_response(raw).unwrap();
        assert!(candidate.is_transaction);
        assert!(candidate.confidence <= 0.5);
    }

    #[test]
    fn numeric_amount_accepted() {
        let raw = r#"{
            "is_transaction": true,
            "transaction_type": "credit",
            "amount": 42.75,
            "currency": "USD",
            "merchant": "Employer",
            "confidence_score": 0.8
        }"#;
        let candidate = decode_response(raw).unwrap();
        assert_eq!(candidate.amount, Some(dec!(42.75)));
        assert_eq!(candidate.transaction_type, TransactionType::Credit);
    }

    #[test]
    fn unknown_transaction_type_string_maps_to_unknown() {
        let raw = r#"{
            "is_transaction": true,
            "transaction_type": "transfer",
            "amount": "5.00",
            "currency": "USD",
            "merchant": "Bank",
            "confidence_score": 0.9
        }"#;
        let candidate = decode_response(raw).unwrap();
        assert_eq!(candidate.transaction_type, TransactionType::Unknown);
        // Unknown type counts as incomplete core fields.
        assert!(candidate.confidence <= 0.5);
    }

    #[test]
    fn description_defaults_from_merchant() {
        let raw = r#"{
            "is_transaction": true,
            "transaction_type": "debit",
            "amount": "5.00",
            "currency": "USD",
            "merchant": "Corner Cafe",
            "confidence_score": 0.85
        }"#;
        let candidate = decode_response(raw).unwrap();
        assert_eq!(candidate.description, "Transaction at Corner Cafe");
    }

    // ── Amount normalization ────────────────────────────────────────

    #[test]
    fn normalize_amount_variants() {
        assert_eq!(normalize_amount("$1,234.56"), Some(dec!(1234.56)));
        assert_eq!(normalize_amount("1234.56 USD"), Some(dec!(1234.56)));
        assert_eq!(normalize_amount("USD 1234.56"), Some(dec!(1234.56)));
        assert_eq!(normalize_amount("12.34 EUR"), Some(dec!(12.34)));
        assert_eq!(normalize_amount("€99.00"), Some(dec!(99.00)));
        assert_eq!(normalize_amount("50"), Some(dec!(50)));
        assert_eq!(normalize_amount(""), None);
        assert_eq!(normalize_amount("no digits"), None);
    }

    // ── Date normalization ──────────────────────────────────────────

    #[test]
    fn normalize_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15);
        assert_eq!(normalize_date("2024-01-15"), expected);
        assert_eq!(normalize_date("01/15/2024"), expected);
        assert_eq!(normalize_date("01-15-2024"), expected);
        assert_eq!(normalize_date("Jan 15, 2024"), expected);
        assert_eq!(normalize_date("January 15, 2024"), expected);
        assert_eq!(normalize_date("Jan 15 2024"), expected);
        assert_eq!(normalize_date("not a date"), None);
    }

    // ── JSON extraction ─────────────────────────────────────────────

    #[test]
    fn extract_json_direct_object() {
        let input = r#"{"is_transaction": false}"#;
        assert_eq!(extract_json_object(input), input);
    }

    #[test]
    fn extract_json_from_plain_fence() {
        let input = "```\n{\"is_transaction\": false}\n```";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
    }
}
