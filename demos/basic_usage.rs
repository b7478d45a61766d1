//! Named queries with cache-aside reads on the in-memory drivers.

use serde_json::json;
use storage_kit::{error::Result, Params, Storage};

fn params(value: serde_json::Value) -> Params {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Storage Kit - Basic Example ===\n");

    // 1. Settings and queries
    println!("1. Initializing storage with in-memory database and cache...");
    let storage = Storage::new();
    let ready = storage
        .init(
            json!({
                "driver": "memory",
                "connection": {
                    "results": {
                        "SELECT * FROM employees WHERE id = :id": [
                            {"id": "emp_001", "employer": "Acme Corp", "salary": 75000.0}
                        ],
                        "SELECT * FROM employees WHERE id = :id AND active": [
                            {"id": "emp_001", "employer": "Acme Corp", "salary": 75000.0}
                        ]
                    }
                },
                "cache": {"driver": "memory", "prefix": "demo"}
            }),
            json!({
                "employee": {
                    "sql": "SELECT * FROM employees WHERE id = :id$>active<",
                    "caching": true,
                    "expire": 300,
                    "addition": {"active": " AND active"}
                },
                "raise": {"sql": "UPDATE employees SET salary = :salary WHERE id = :id"}
            }),
        )
        .await?;
    println!("   ✓ Storage ready: {} ({})\n", ready, storage.state());

    // 2. First read - cache miss, database read
    println!("2. First request for employee (emp_001):");
    let employee = storage
        .get_data("employee", &params(json!({"id": "emp_001"})))
        .await?;
    println!("   ✓ Loaded from database: {:?}\n", employee);

    // Let the background cache write land
    tokio::task::yield_now().await;

    // 3. Second read - cache hit
    println!("3. Second request for same employee (emp_001):");
    let employee = storage
        .get_data("employee", &params(json!({"id": "emp_001"})))
        .await?;
    println!("   ✓ Loaded from cache: {:?}\n", employee);

    // 4. Conditional fragment
    println!("4. Request with the `active` fragment:");
    let employee = storage
        .get_from_db("employee", &params(json!({"id": "emp_001", "active": true})))
        .await?;
    println!("   ✓ Loaded directly from database: {:?}\n", employee);

    // 5. Write, then reload the cache entry
    println!("5. Write and reload:");
    storage
        .set_to_db("raise", &params(json!({"id": "emp_001", "salary": 80000.0})))
        .await?;
    let employee = storage
        .reload_from_db_to_cache("employee", &params(json!({"id": "emp_001"})))
        .await?;
    println!("   ✓ Cache reloaded: {:?}\n", employee);

    // 6. Literal cache keys
    println!("6. Literal cache keys:");
    storage
        .set_to_cache(None, "session:42", &json!({"user": "emp_001"}), 60)
        .await?;
    let session = storage.get_from_cache(None, "session:42").await?;
    println!("   ✓ Session: {:?}\n", session);

    // 7. Unknown query
    println!("7. Unknown query:");
    if let Err(e) = storage.get_data("missing", &Params::new()).await {
        println!("   ✓ Rejected: {}\n", e);
    }

    println!("   Health: {:?}", storage.health_check().await);
    storage.close().await?;

    println!("=== Example Complete ===\n");

    Ok(())
}
