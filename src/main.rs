use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use orderdesk::application::checkout::SeedData;
use orderdesk::application::engine::{CommerceEngine, Stores};
use orderdesk::config::AppConfig;
use orderdesk::domain::ports::Notifier;
use orderdesk::error::CommerceError;
use orderdesk::infrastructure::exchange::HttpExchangeRates;
use orderdesk::infrastructure::in_memory;
use orderdesk::infrastructure::notifier::{LogNotifier, SmtpNotifier};
use orderdesk::infrastructure::providers::{PaypalProvider, PaystackProvider, StripeProvider};
#[cfg(feature = "storage-rocksdb")]
use orderdesk::infrastructure::rocksdb::RocksDBStore;
use orderdesk::interfaces::csv::{ReportRow, ReportWriter, SettlementReader};
use orderdesk::interfaces::http::{self, AppState};
use orderdesk::telemetry;
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Listen address, overrides ORDERDESK_ADDR
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Load packages, orders and subscriptions from a JSON file
    Seed {
        /// JSON file with `packages`, `orders` and `subscriptions` arrays
        file: PathBuf,
    },
    /// Apply a provider settlement export and print a reconciliation report
    Reconcile {
        /// CSV with `provider,reference,outcome,amount` columns
        export: PathBuf,

        /// Seed file loaded before the export is applied
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init();
    let config = AppConfig::from_env().into_diagnostic()?;
    let engine = build_engine(&config, open_stores(cli.db_path)?)?;

    let outcome = match cli.command {
        Command::Serve { addr } => serve(engine.clone(), &config, addr.unwrap_or(config.addr)).await,
        Command::Seed { file } => seed(&engine, &file).await,
        Command::Reconcile { export, seed: seed_file } => {
            if let Some(file) = seed_file {
                seed(&engine, &file).await?;
            }
            reconcile(&engine, &export).await
        }
    };

    engine.close().await.into_diagnostic()?;
    outcome
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok(store.stores())
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(in_memory::stores())
        }
        None => Ok(in_memory::stores()),
    }
}

fn build_engine(config: &AppConfig, stores: Stores) -> Result<Arc<CommerceEngine>> {
    let rates = HttpExchangeRates::new(&config.exchange_rate_url, config.provider_timeout)
        .into_diagnostic()?;
    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, to = %smtp.to, "Mailing notifications over SMTP");
            Arc::new(SmtpNotifier::new(smtp).into_diagnostic()?)
        }
        None => Arc::new(LogNotifier::new(config.notify_email.clone())),
    };
    let mut engine = CommerceEngine::new(
        stores,
        Arc::new(rates),
        notifier,
        config.store_currency.clone(),
    );

    if let Some(stripe) = &config.stripe {
        engine = engine.with_provider(Arc::new(StripeProvider::new(stripe.clone()).into_diagnostic()?));
    }
    if let Some(paypal) = &config.paypal {
        engine = engine.with_provider(Arc::new(PaypalProvider::new(paypal.clone()).into_diagnostic()?));
    }
    if let Some(paystack) = &config.paystack {
        engine =
            engine.with_provider(Arc::new(PaystackProvider::new(paystack.clone()).into_diagnostic()?));
    }
    tracing::debug!(providers = ?engine.registered_providers(), "Payment providers registered");
    Ok(Arc::new(engine))
}

async fn serve(engine: Arc<CommerceEngine>, config: &AppConfig, addr: SocketAddr) -> Result<()> {
    let app = http::router(AppState {
        engine,
        app_base_url: config.app_base_url.clone(),
    });
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!(%addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .into_diagnostic()
}

async fn seed(engine: &CommerceEngine, file: &Path) -> Result<()> {
    let data: SeedData = serde_json::from_reader(File::open(file).into_diagnostic()?).into_diagnostic()?;
    let summary = engine.seed(data).await.into_diagnostic()?;
    eprintln!(
        "Seeded {} package(s), {} order(s), {} subscription(s)",
        summary.packages, summary.orders, summary.subscriptions
    );
    Ok(())
}

async fn reconcile(engine: &CommerceEngine, export: &Path) -> Result<()> {
    let reader = SettlementReader::new(File::open(export).into_diagnostic()?);
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Error reading settlement row: {}", e);
                continue;
            }
        };
        let provider = record.provider;
        let reference = record.reference.clone();
        let row = match record.into_confirmation() {
            Ok(result) => match engine.apply_confirmation(result).await {
                Ok(settlement) => ReportRow {
                    provider,
                    reference,
                    entity: settlement.entity.to_string(),
                    result: settlement.result.to_string(),
                },
                Err(CommerceError::NotFound(_)) => ReportRow {
                    provider,
                    reference,
                    entity: String::new(),
                    result: "unmatched".to_string(),
                },
                Err(e) => {
                    eprintln!("Error applying {} {}: {}", provider, reference, e);
                    ReportRow {
                        provider,
                        reference,
                        entity: String::new(),
                        result: "error".to_string(),
                    }
                }
            },
            Err(e) => {
                eprintln!("Error reading settlement row: {}", e);
                continue;
            }
        };
        writer.write_row(&row).into_diagnostic()?;
    }
    writer.finish().into_diagnostic()
}
