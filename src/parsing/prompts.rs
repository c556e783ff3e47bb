//! Extraction prompt construction.
//!
//! Prompts are provider-agnostic: the same text goes to every backend, and
//! the output contract is a single JSON object the codec can decode.

use crate::parsing::types::PendingEmail;

/// Truncate the body at a UTF-8 boundary to keep prompts bounded.
const MAX_BODY_CHARS: usize = 4000;

/// Guidance embedded alongside the few-shot examples so the model assigns
/// confidence on the same scale the engine compares against.
const CONFIDENCE_GUIDELINES: &str = "\
CONFIDENCE SCORING GUIDELINES:

1.0 - Perfect extraction:
  - All key fields explicitly stated (amount, merchant, date, type)
  - Clear transaction notification from a known financial institution

0.8-0.9 - High confidence:
  - All key fields found, minor ambiguity in non-critical fields

0.6-0.7 - Medium confidence:
  - Most key fields found, some inferred from context

0.4-0.5 - Low confidence:
  - Only some transaction indicators present
  - Significant ambiguity in amount or merchant

0.0-0.3 - Very low / no confidence:
  - Not a transaction email or too ambiguous to parse reliably";

/// Build the extraction prompt for one email.
///
/// With `use_few_shot`, worked examples and the confidence guidelines are
/// prepended to steer output format and scoring.
pub fn build_extraction_prompt(email: &PendingEmail, use_few_shot: bool) -> String {
    let base = base_prompt(email);
    if use_few_shot {
        format!(
            "{}\n\n{}\n\n{}",
            few_shot_examples(),
            CONFIDENCE_GUIDELINES,
            base
        )
    } else {
        base
    }
}

fn base_prompt(email: &PendingEmail) -> String {
    let subject = email.subject.as_deref().unwrap_or("");
    let body = truncate_utf8(&email.body, MAX_BODY_CHARS);

    format!(
        r#"You are a financial transaction parser. Extract transaction information from the following email.

EMAIL DETAILS:
Subject: {subject}
From: {sender}

EMAIL BODY:
{body}

INSTRUCTIONS:
1. Identify if this email contains a financial transaction (purchase, payment, refund, etc.)
2. Extract ALL relevant transaction details
3. Return ONLY a valid JSON object with the following structure (no additional text):

{{
  "is_transaction": true/false,
  "transaction_type": "debit" or "credit",
  "amount": "XX.XX",
  "currency": "USD" or other currency code,
  "merchant": "merchant name",
  "description": "brief description of the transaction",
  "transaction_date": "YYYY-MM-DD" or null if not found,
  "confidence_score": 0.0 to 1.0,
  "extracted_fields": {{
    "card_last_4": "XXXX" or null,
    "category": "category if mentioned" or null,
    "location": "location if mentioned" or null,
    "reference_number": "reference if mentioned" or null
  }}
}}

IMPORTANT:
- If this is NOT a transaction email, set "is_transaction" to false and confidence_score to 0.0
- For transaction_type: use "debit" for purchases/payments, "credit" for refunds/deposits
- Amount should be a numeric string without currency symbols
- Always include an explicit confidence_score reflecting how certain you are
- Return ONLY the JSON object, no explanations or additional text"#,
        sender = email.sender,
    )
}

/// Fixed worked examples illustrating correct field extraction and
/// confidence assignment.
fn few_shot_examples() -> &'static str {
    r#"FEW-SHOT EXAMPLES:

Example 1:
Email: subject "Your Amazon purchase" from auto-confirm@amazon.com:
"Thank you for your order. Total: $49.99. Shipped to: 123 Main St."
Output: {"is_transaction": true, "transaction_type": "debit", "amount": "49.99", "currency": "USD", "merchant": "Amazon", "description": "Amazon purchase", "transaction_date": null, "confidence_score": 0.9, "extracted_fields": {"card_last_4": null, "category": "shopping", "location": null, "reference_number": null}}

Example 2:
Email: subject "Card transaction alert" from alerts@chase.com:
"Card ending in 1234 was charged $125.50 at STARBUCKS on 01/15/2024"
Output: {"is_transaction": true, "transaction_type": "debit", "amount": "125.50", "currency": "USD", "merchant": "Starbucks", "description": "Card transaction at Starbucks", "transaction_date": "2024-01-15", "confidence_score": 1.0, "extracted_fields": {"card_last_4": "1234", "category": "dining", "location": null, "reference_number": null}}

Example 3:
Email: subject "Newsletter: Weekly Tips" from newsletter@example.com:
"Check out these great tips for saving money..."
Output: {"is_transaction": false, "transaction_type": null, "amount": null, "currency": null, "merchant": null, "description": null, "transaction_date": null, "confidence_score": 0.0, "extracted_fields": {}}"#
}

/// Truncate at a valid UTF-8 boundary at or before `max` bytes.
fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
