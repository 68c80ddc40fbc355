use adparse_core::{HistoryStats, ParseResult, ParseStatus, TariffTier};
use adparse_session::{ParseReport, ParseSession, SessionConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "adparse-cli")]
#[command(about = "Extract contact phone numbers from Avito and Rabota.ru ads")]
struct Cli {
    /// Tariff tier to bill with; overrides ADPARSE_TARIFF_TIER.
    #[arg(long, global = true)]
    tier: Option<TariffTier>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract the phone number from one ad.
    Parse { url: String },
    /// List the history service's records, newest first.
    History,
    /// Show request counts, success rate, spend and balance (the default).
    Stats,
    /// List tariff tiers and prices; the active one is starred.
    Tariffs,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper_util=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = SessionConfig::from_env().context("reading ADPARSE_* configuration")?;
    if let Some(tier) = cli.tier {
        config.tariff_tier = tier;
    }
    let session = ParseSession::from_config(&config)?;

    match cli.command.unwrap_or(Commands::Stats) {
        Commands::Parse { url } => {
            session.refresh_history().await;
            let report = session.submit_url(&url).await?;
            print_report(&report);
            session.wait_for_refresh().await;
            print_stats(&session.stats(), session.balance());
        }
        Commands::History => {
            let history = session.refresh_history().await;
            if history.is_empty() {
                println!("no parse history yet");
            }
            for record in &history {
                print_record(record);
            }
        }
        Commands::Stats => {
            session.refresh_history().await;
            print_stats(&session.stats(), session.balance());
        }
        Commands::Tariffs => {
            let active = session.tariff().tier;
            for plan in session.tariffs().plans() {
                let marker = if plan.tier == active { "*" } else { " " };
                println!("{marker} {:<8} {:>3} per request", plan.tier, plan.price);
            }
        }
    }

    Ok(())
}

fn print_report(report: &ParseReport) {
    let result = &report.result;
    match &report.failure {
        None => println!(
            "phone: {} ({} ad, charged {})",
            result.phone, result.platform, result.cost
        ),
        Some(failure) => println!(
            "no phone for {} ad: {} ({})",
            result.platform, failure.reason, failure.kind
        ),
    }
    println!("url: {}", result.url);
    println!("balance: {}", report.balance_after);
}

fn print_record(record: &ParseResult) {
    let status = match record.status {
        ParseStatus::Success => "ok    ",
        ParseStatus::Failed => "failed",
    };
    let phone = if record.phone.is_empty() { "-" } else { record.phone.as_str() };
    println!(
        "{} {status} {:<6} {:<20} {:>3} {}",
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.platform,
        phone,
        record.cost,
        record.url
    );
}

fn print_stats(stats: &HistoryStats, balance: i64) {
    let rate = stats
        .success_rate
        .map(|rate| format!("{rate}%"))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "requests: {} (ok {}, failed {}), success rate: {rate}, spent: {}, balance: {balance}",
        stats.total, stats.successes, stats.failures, stats.total_spend
    );
}
