//! Database transactions and cache batches over two named connections.

use serde_json::json;
use storage_kit::{error::Result, CacheAction, Params, Storage};

fn params(value: serde_json::Value) -> Params {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Storage Kit - Transactions Example ===\n");

    let storage = Storage::new();
    storage
        .init(
            json!({
                "ledger": {
                    "driver": "memory",
                    "connection": {},
                    "cache": {"driver": "memory"}
                },
                "reports": {"driver": "memory", "connection": {}}
            }),
            json!({
                "debit": {
                    "sql": "UPDATE accounts SET balance = balance - :amount WHERE id = :from",
                    "connection": "ledger"
                },
                "credit": {
                    "sql": "UPDATE accounts SET balance = balance + :amount WHERE id = :to",
                    "connection": "ledger"
                },
                "log_transfer": {
                    "sql": "INSERT INTO transfers (amount) VALUES (:amount)",
                    "connection": "reports"
                }
            }),
        )
        .await?;
    println!("Connections: {:?}\n", storage.connection_names());

    // 1. Same connection - committed together
    println!("1. Transfer on the ledger connection:");
    let results = storage
        .transaction_to_db(
            &["debit", "credit"],
            &[
                params(json!({"amount": 100, "from": 1})),
                params(json!({"amount": 100, "to": 2})),
            ],
        )
        .await?;
    println!("   ✓ Committed {} statements\n", results.len());

    // 2. Mixed connections - rejected before anything runs
    println!("2. Transfer spanning two connections:");
    match storage
        .transaction_to_db(&["debit", "log_transfer"], &[])
        .await
    {
        Ok(_) => println!("   ✗ Unexpectedly committed\n"),
        Err(e) => println!("   ✓ Rejected: {}\n", e),
    }

    // 3. Cache batch
    println!("3. Cache batch on the ledger connection:");
    let results = storage
        .transaction_to_cache(
            Some("ledger"),
            &[CacheAction::Set, CacheAction::Get, CacheAction::Get],
            &[
                "balance:1".to_string(),
                "balance:1".to_string(),
                "balance:2".to_string(),
            ],
            &[json!(900)],
            &[60],
        )
        .await?;
    println!("   ✓ Results: {:?}\n", results);

    storage.close().await?;

    println!("=== Example Complete ===\n");

    Ok(())
}
