use std::sync::Arc;

use chrono::Utc;
use finmail_parse::config::ParseConfig;
use finmail_parse::llm::create_client;
use finmail_parse::parsing::types::{EmailStatus, PendingEmail};
use finmail_parse::parsing::ParsingEngine;
use finmail_parse::store::{ItemFilter, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ParseConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("finmail-parse v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {}", config.provider.label());
    eprintln!("   Model: {}", config.model);
    eprintln!("   Confidence threshold: {}", config.confidence_threshold);
    eprintln!();

    let provider = create_client(&config);

    // Demo item source: a few representative emails. Real deployments plug
    // in their own ItemSource/sink implementations.
    let store = Arc::new(MemoryStore::new());
    store.seed(sample_emails()).await;

    let engine = Arc::new(ParsingEngine::new(
        config,
        provider,
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    ));

    let stats = engine.parse_batch(&ItemFilter::default(), 100, None).await?;

    println!("Batch complete:");
    println!("  fetched:         {}", stats.fetched);
    println!("  generative used: {}", stats.generative_used);
    println!("  rule used:       {}", stats.rule_used);
    println!("  unparseable:     {}", stats.unparseable);
    println!("  errors:          {}", stats.errors);

    for id in ["demo-1", "demo-2", "demo-3"] {
        if let Some(candidate) = store.transaction_for(id).await {
            println!(
                "  {id}: {} {} at {} (confidence {:.2}, {})",
                candidate.transaction_type.label(),
                candidate
                    .amount
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                candidate.merchant.as_deref().unwrap_or("?"),
                candidate.confidence,
                candidate.method.label(),
            );
        }
    }

    Ok(())
}

fn sample_emails() -> Vec<PendingEmail> {
    let now = Utc::now();
    vec![
        PendingEmail {
            id: "demo-1".to_string(),
            sender: "alerts@chase.com".to_string(),
            subject: Some("Card transaction alert".to_string()),
            body: "Card ending in 1234 was charged $125.50 at STARBUCKS on 01/15/2024"
                .to_string(),
            received_at: now,
            status: EmailStatus::Pending,
        },
        PendingEmail {
            id: "demo-2".to_string(),
            sender: "service@paypal.com".to_string(),
            subject: Some("Refund processed".to_string()),
            body: "Your refund of $12.99 from Acme Store has been processed.".to_string(),
            received_at: now,
            status: EmailStatus::Pending,
        },
        PendingEmail {
            id: "demo-3".to_string(),
            sender: "newsletter@shopmail.com".to_string(),
            subject: Some("Weekly deals".to_string()),
            body: "Save big this weekend! Click here to unsubscribe.".to_string(),
            received_at: now,
            status: EmailStatus::Pending,
        },
    ]
}
