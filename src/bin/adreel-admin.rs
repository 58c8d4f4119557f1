use adreel::config::Config;
use adreel::logging::init_tracing;
use adreel::seed;
use adreel::serving::stats::resolve_window;
use adreel::serving::AdService;
use adreel::storage;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "adreel-admin")]
#[command(about = "Adreel campaign administration CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the demo catalog (5 campaigns with 10 creatives each)
    Seed {
        /// Also run this many synthetic ad requests through the serving path
        #[arg(long, default_value_t = 0)]
        events: u64,
        /// Click roughly one served ad in N
        #[arg(long, default_value_t = 10)]
        click_one_in: u32,
    },
    /// Restore every campaign's daily budget, bounded by its remaining total
    ResetDaily,
    /// Print impressions, clicks and cost
    Stats {
        /// Only count this campaign
        #[arg(long)]
        campaign_id: Option<i64>,
        /// Look back this many hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    // Admin writes must be visible immediately, so no candidate cache here
    let storage = storage::connect(&config.database, Duration::ZERO).await?;

    match cli.command {
        Commands::Seed {
            events,
            click_one_in,
        } => {
            seed::seed_catalog(storage.as_ref()).await?;
            println!(
                "✓ Seeded {} campaigns with {} creatives each",
                seed::CAMPAIGNS,
                seed::CREATIVES_PER_CAMPAIGN
            );

            if events > 0 {
                let service = AdService::new(Arc::clone(&storage), config.serving.clone());
                let summary = seed::simulate_traffic(&service, events, click_one_in).await?;
                println!(
                    "✓ Simulated {} requests: {} served, {} clicked",
                    summary.requests, summary.served, summary.clicks
                );
            }
        }
        Commands::ResetDaily => {
            let touched = storage.reset_daily_budgets().await?;
            println!("✓ Reset daily budgets for {} campaigns", touched);
        }
        Commands::Stats { campaign_id, hours } => {
            let now = chrono::Utc::now().timestamp();
            let query = resolve_window(Some(now - hours * 60 * 60), None, campaign_id, now);
            let stats = storage.get_stats(&query).await?;

            match campaign_id {
                Some(id) => println!("Campaign {} over the last {}h:", id, hours),
                None => println!("All campaigns over the last {}h:", hours),
            }
            println!("{:<15} {}", "Impressions", stats.impressions);
            println!("{:<15} {}", "Clicks", stats.clicks);
            println!("{:<15} {}", "Cost", stats.cost);
        }
    }

    Ok(())
}
