use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vlinks_storage::PgStore;
use vlinks_sync::{airtable_test_report, compute_vc_status, AppConfig, Services};

#[derive(Debug, Parser)]
#[command(name = "vlinks-cli")]
#[command(about = "VentriLinks record sync and client API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API (and the sync scheduler when enabled).
    Serve,
    /// Mirror the VC directory and matches into the local store once.
    Sync,
    /// Print website coverage for the remote VC directory.
    Status,
    /// Probe each remote table.
    AirtableTest,
    /// Apply local-store migrations.
    Migrate,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("VL_LOG_JSON")
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            vlinks_web::serve_from_env().await?;
        }
        Commands::Sync => {
            let summary = vlinks_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} vcs={}/{} with_website={} matches={}/{} skipped={}",
                summary.run_id,
                summary.upserted_vcs,
                summary.remote_vcs,
                summary.with_website,
                summary.upserted_matches,
                summary.remote_matches,
                summary.skipped_matches
            );
        }
        Commands::Status => {
            let services = Services::from_config(AppConfig::from_env()).await?;
            let report = compute_vc_status(services.records.as_ref(), services.fallback).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::AirtableTest => {
            let services = Services::from_config(AppConfig::from_env()).await?;
            let report = airtable_test_report(services.records.as_ref()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Migrate => {
            let config = AppConfig::from_env();
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to migrate")?;
            PgStore::connect(url).await?.migrate().await?;
            info!("migrations complete");
        }
    }

    Ok(())
}
