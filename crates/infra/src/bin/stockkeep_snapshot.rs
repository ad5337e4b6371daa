//! Print stock snapshots as JSON lines.
//!
//! Used by the external low-stock / expiry scanner, which polls rather than
//! being pushed to.
//!
//! ```text
//! stockkeep-snapshot [--low-stock-only] [--expiring-within DAYS]
//! ```

use anyhow::{Context, bail};
use chrono::Utc;

use stockkeep_infra::{InfraConfig, PostgresInventoryStore, PostgresReferenceData, StockLedger};
use stockkeep_stock::StockFilter;

struct Args {
    low_stock_only: bool,
    expiring_within: Option<u32>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        low_stock_only: false,
        expiring_within: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--low-stock-only" => args.low_stock_only = true,
            "--expiring-within" => {
                let days = iter.next().context("--expiring-within needs a day count")?;
                args.expiring_within = Some(
                    days.parse()
                        .with_context(|| format!("invalid day count '{days}'"))?,
                );
            }
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = InfraConfig::from_env();
    stockkeep_observability::init_with(config.log_format);

    let args = parse_args()?;
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;

    let store =
        PostgresInventoryStore::connect(database_url, config.max_connections, config.lock_timeout)
            .await
            .context("failed to connect to the inventory database")?;
    let refs = PostgresReferenceData::new(store.pool().clone());
    let ledger = StockLedger::new(store, refs);

    let filter = StockFilter {
        low_stock_only: args.low_stock_only,
        ..StockFilter::default()
    };
    let today = Utc::now().date_naive();
    let snapshots = ledger
        .snapshots(&filter)
        .await
        .context("failed to read stock snapshots")?;

    let mut printed = 0usize;
    for snapshot in snapshots
        .iter()
        .filter(|s| args.expiring_within.is_none_or(|days| s.expires_within(today, days)))
    {
        println!("{}", serde_json::to_string(snapshot)?);
        printed += 1;
    }
    tracing::info!(printed, "snapshot complete");
    Ok(())
}
