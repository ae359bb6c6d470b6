use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use configuration::{init_tracing, load_config, ConfigPatch, EngineConfig};
use core_types::{normalize_currency, FxBatch, OrderStatus, PriceBatch, SignalBatch};
use database::{connect, run_migrations, DbRepository};
use engine::{ingest_fx_rates, ingest_prices, ingest_signals, DecisionRunner, FillEngine};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// The main entry point for the Paperfolio paper-trading engine.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be populated.
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from '{}'", cli.config))?
        .patched(&cli.overrides)
        .context("Invalid configuration override")?;
    // Held until exit so the rolling file writer flushes.
    let _log_guard: Option<WorkerGuard> = init_tracing(&config.logging)?;

    if let Commands::Config {
        command: ConfigCommand::Show,
    } = &cli.command
    {
        return show_config(&config, cli.json);
    }

    // Initialize the database connection and run migrations
    let pool = connect(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to the database")?;
    run_migrations(&pool).await.context("Failed to run database migrations")?;
    let repo = DbRepository::new(pool);
    repo.ensure_portfolio(&config.portfolio.base_ccy, config.portfolio.start_cash)
        .await?;

    // Execute the appropriate command
    match cli.command {
        Commands::IngestSignals { file } => {
            let batch: SignalBatch = read_batch(&file).await?;
            let count = ingest_signals(&repo, &batch).await?;
            println!("Ingested {count} signals for {}", batch.as_of_date);
        }
        Commands::IngestPrices { file } => {
            let batch: PriceBatch = read_batch(&file).await?;
            let count = ingest_prices(&repo, &config, &batch).await?;
            println!("Ingested {count} opening prices for {}", batch.as_of_date);
        }
        Commands::IngestFx { file } => {
            let batch: FxBatch = read_batch(&file).await?;
            let count = ingest_fx_rates(&repo, &batch, Utc::now()).await?;
            println!("Ingested {count} FX rates against {}", batch.base.to_uppercase());
        }
        Commands::Decide { date } => {
            let runner = DecisionRunner::new(repo, config.clone())?;
            let report = with_deadline(&config, runner.run(date)).await??;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let mut table = table(&["Symbol", "Stance", "Previous", "Action", "Decision"]);
                for rec in &report.recommendations {
                    table.add_row(vec![
                        rec.symbol.clone(),
                        rec.stance.to_string(),
                        rec.rationale.previous.clone(),
                        rec.rationale.action.clone(),
                        serde_json::to_string(&rec.rationale.decision)?.trim_matches('"').to_string(),
                    ]);
                }
                println!("{table}");
                let mut orders = table_of_orders();
                for order in &report.staged_orders {
                    orders.add_row(vec![
                        order.order_id.to_string(),
                        order.symbol.clone(),
                        order.side.as_str().to_string(),
                        order.qty.round_dp(6).to_string(),
                        order.notional_ccy.round_dp(2).to_string(),
                        order.currency.clone(),
                        order.origin.to_string(),
                    ]);
                }
                println!("{orders}");
                println!(
                    "{} recommendations, {} orders staged, {} superseded",
                    report.recommendations.len(),
                    report.staged_orders.len(),
                    report.superseded_orders
                );
            }
        }
        Commands::Fill { date } => {
            let fills = FillEngine::new(repo, config.clone());
            let report = with_deadline(&config, fills.run(date)).await??;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let mut table = table(&["Order", "Symbol", "Side", "Qty", "Price", "Ccy", "Fee (base)"]);
                for fill in &report.filled {
                    table.add_row(vec![
                        fill.order_id.to_string(),
                        fill.symbol.clone(),
                        fill.side.as_str().to_string(),
                        fill.qty.round_dp(6).to_string(),
                        fill.fill_price.round_dp(4).to_string(),
                        fill.currency.clone(),
                        fill.fee_base.round_dp(4).to_string(),
                    ]);
                }
                println!("{table}");
                println!(
                    "NAV {} = cash {} + equity {}, leverage {}",
                    report.portfolio.nav.round_dp(2),
                    report.portfolio.cash.round_dp(2),
                    report.portfolio.equity.round_dp(2),
                    report.portfolio.leverage.round_dp(4)
                );
            }
        }
        Commands::Portfolio => {
            let portfolio = repo.get_portfolio().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&portfolio)?);
            } else {
                let mut table = table(&["Base", "Cash", "Equity", "NAV", "Leverage", "Peak NAV", "Max DD", "Updated"]);
                table.add_row(vec![
                    portfolio.base_ccy,
                    portfolio.cash.round_dp(2).to_string(),
                    portfolio.equity.round_dp(2).to_string(),
                    portfolio.nav.round_dp(2).to_string(),
                    portfolio.leverage.round_dp(4).to_string(),
                    portfolio.peak_nav.round_dp(2).to_string(),
                    portfolio.dd_max.round_dp(6).to_string(),
                    portfolio.updated_at.to_rfc3339(),
                ]);
                println!("{table}");
            }
        }
        Commands::Positions { all } => {
            let positions = if all {
                repo.all_positions().await?
            } else {
                repo.open_positions().await?
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&positions)?);
            } else {
                let mut table = table(&["Id", "Symbol", "Qty", "Avg cost", "Ccy", "Cost (base)", "Status", "Opened"]);
                for p in positions {
                    table.add_row(vec![
                        p.id.to_string(),
                        p.symbol,
                        p.qty.round_dp(6).to_string(),
                        p.avg_cost_ccy.round_dp(4).to_string(),
                        p.currency,
                        p.cost_base.round_dp(2).to_string(),
                        p.status.as_str().to_string(),
                        p.opened_at.date_naive().to_string(),
                    ]);
                }
                println!("{table}");
            }
        }
        Commands::Orders { status } => {
            let orders = repo.orders_by_status(status).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&orders)?);
            } else {
                let mut table = table_of_orders();
                for o in orders {
                    table.add_row(vec![
                        o.id.to_string(),
                        o.symbol,
                        o.side.as_str().to_string(),
                        o.qty.round_dp(6).to_string(),
                        o.notional_ccy.round_dp(2).to_string(),
                        o.currency,
                        o.origin.map(|s| s.to_string()).unwrap_or_default(),
                    ]);
                }
                println!("{table}");
            }
        }
        Commands::Ledger { order_id } => {
            let entries = repo.ledger_entries(order_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                let mut table = table(&["Id", "Time", "Type", "Debit", "Credit", "Balance", "Note"]);
                for e in entries {
                    table.add_row(vec![
                        e.id.to_string(),
                        e.ts.to_rfc3339(),
                        e.entry_type,
                        e.debit_base.round_dp(4).to_string(),
                        e.credit_base.round_dp(4).to_string(),
                        e.balance_after.round_dp(4).to_string(),
                        e.note,
                    ]);
                }
                println!("{table}");
            }
        }
        Commands::FxLatest { base, quote } => {
            let base = normalize_currency(&base).context("base must be a 3-letter currency code")?;
            let quote = normalize_currency(&quote).context("quote must be a 3-letter currency code")?;
            match repo.latest_fx_rate(&base, &quote).await? {
                Some(fx) if cli.json => println!("{}", serde_json::to_string_pretty(&fx)?),
                Some(fx) => {
                    let mut table = table(&["Base", "Quote", "Rate", "Provider", "Observed"]);
                    table.add_row(vec![
                        fx.base,
                        fx.quote,
                        fx.rate.to_string(),
                        fx.provider,
                        fx.ts.to_rfc3339(),
                    ]);
                    println!("{table}");
                }
                None => println!("No {base}/{quote} rate stored"),
            }
        }
        Commands::Config { .. } => show_config(&config, cli.json)?,
        Commands::Recommendations { date } => {
            let recs = repo.recommendations_for(date).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&recs)?);
            } else {
                let mut table = table(&["Symbol", "Stance", "Previous", "Action", "Weight"]);
                for rec in recs {
                    table.add_row(vec![
                        rec.symbol,
                        rec.stance.to_string(),
                        rec.rationale.previous,
                        rec.rationale.action,
                        rec.rationale.weight.to_string(),
                    ]);
                }
                println!("{table}");
            }
        }
    }

    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// End-of-day decision and next-open settlement for a paper portfolio.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. A missing file falls back to defaults.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Print reports as JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    overrides: ConfigPatch,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a signal batch from a JSON file.
    IngestSignals {
        #[arg(long)]
        file: PathBuf,
    },
    /// Load opening prices for one date from a JSON file.
    IngestPrices {
        #[arg(long)]
        file: PathBuf,
    },
    /// Append FX rates from a JSON file, stamped with the current time.
    IngestFx {
        #[arg(long)]
        file: PathBuf,
    },
    /// Resolve stances and stage orders for a trading date (format: YYYY-MM-DD).
    Decide {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Settle all pending orders at the open of an execution date (format: YYYY-MM-DD).
    Fill {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Show the portfolio row.
    Portfolio,
    /// Show open positions.
    Positions {
        /// Include closed positions.
        #[arg(long)]
        all: bool,
    },
    /// Show orders in a given status ("new" or "filled").
    Orders {
        #[arg(long, default_value = "new")]
        status: OrderStatus,
    },
    /// Show ledger entries, optionally for one order.
    Ledger {
        #[arg(long)]
        order_id: Option<i64>,
    },
    /// Show the recommendations stored for a date.
    Recommendations {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Show the most recent stored FX rate for a currency pair.
    FxLatest {
        /// Base currency (e.g. "GBP").
        base: String,
        /// Quote currency (e.g. "USD").
        quote: String,
    },
    /// Inspect the effective configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the configuration after file, environment and flag overrides.
    Show,
}

// ==============================================================================
// Helpers
// ==============================================================================

async fn read_batch<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let batch = serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    info!(path = %path.display(), "Loaded batch file");
    Ok(batch)
}

/// Runs a batch under the configured deadline. Timing out drops the batch
/// future, which rolls its transaction back.
async fn with_deadline<F: Future>(config: &EngineConfig, batch: F) -> anyhow::Result<F::Output> {
    let secs = config.settlement.batch_timeout_secs;
    tokio::time::timeout(Duration::from_secs(secs), batch)
        .await
        .with_context(|| format!("Batch did not finish within {secs}s and was rolled back"))
}

fn show_config(config: &EngineConfig, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    let mut table = table(&["Setting", "Value"]);
    if let serde_json::Value::Object(sections) = serde_json::to_value(config)? {
        for (section, values) in sections {
            let serde_json::Value::Object(values) = values else {
                continue;
            };
            for (key, value) in values {
                let shown = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                table.add_row(vec![format!("{section}.{key}"), shown]);
            }
        }
    }
    println!("{table}");
    Ok(())
}

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header.to_vec());
    table
}

fn table_of_orders() -> Table {
    table(&["Order", "Symbol", "Side", "Qty", "Notional", "Ccy", "Origin"])
}
