//! Monthly job: zeroes every user's message and upload-credit counters.

use std::sync::Arc;

use common::env_config::Config;
use db::ledger::{PgLedger, UsageLedger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    logger::setup()?;

    let pool = db::setup(&config.database_url, config.environment == "production").await?;
    let ledger = PgLedger::new(Arc::clone(&pool));

    match ledger.reset_usage().await {
        Ok(users) => {
            log::info!("Usage counters reset for {} users", users);
            Ok(())
        }
        Err(e) => {
            log::error!("Usage reset failed: {}", e);
            Err(e.into())
        }
    }
}
