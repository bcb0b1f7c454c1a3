//! Ledger Verification CLI
//!
//! Operator tool: load the cached trust state and re-verify the audit
//! chain without going through the running service.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use trustsync::store::{self, SqliteCacheStore};
use trustsync::view;

#[derive(Parser)]
#[command(name = "ledger-verify")]
#[command(about = "SecureCypher audit ledger verification tool")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache database URL
    #[arg(long, default_value = "sqlite://trustsync.db")]
    database_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the audit chain
    Verify {
        /// Verify only the suffix starting at this record id
        #[arg(long)]
        from_id: Option<u64>,
    },

    /// Show the newest audit records
    Tail {
        /// Number of records to show
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },

    /// Show the key set
    Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let sqlite = SqliteCacheStore::new(&cli.database_url).await?;
    sqlite.run_migrations().await?;
    let (registry, ledger) = store::load_state(&sqlite).await?;

    match cli.command {
        Commands::Verify { from_id } => {
            let report = ledger.verify_chain(from_id).await;
            if report.ok {
                println!(
                    "audit chain OK ({} records checked, tail {})",
                    report.records_checked,
                    ledger.tail_hash().await
                );
            } else {
                println!(
                    "audit chain BROKEN at record {} ({} records checked)",
                    report
                        .broken_at_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    report.records_checked
                );
                return Err(anyhow!("integrity violation"));
            }
        }
        Commands::Tail { count } => {
            let page = view::list_audit_records(&ledger, 0, count).await;
            for record in &page.records {
                println!(
                    "#{:<6} {:<12} {:<20} {}",
                    record.id,
                    record.event_type.as_str(),
                    record.actor,
                    record.timestamp.to_rfc3339()
                );
            }
            println!("{} records total", page.total);
        }
        Commands::Keys => {
            for key in view::list_keys(&registry).await {
                println!(
                    "{:<12} v{:<4} {:<8} {:<10} {}",
                    key.key_id,
                    key.version,
                    if key.active { "active" } else { "retired" },
                    key.algorithm,
                    key.public_material_abbrev
                );
            }
        }
    }

    Ok(())
}
