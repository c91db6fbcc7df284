mod attribution;
mod clock;
mod config;
mod error;
mod extract;
mod id_card;
mod ledger;
mod model;
mod pipeline;
mod points;
mod reference;
mod scans;
mod store;
mod validation;

use std::io::Read;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clock::SystemClock;
use config::Config;
use extract::client::HttpVisionModel;
use id_card::IdCardPipeline;
use model::StatusChangeEvent;
use pipeline::InvoicePipeline;
use store::SqliteStore;

const DEFAULT_CONFIG: &str = "config/invoice_points.toml";
const USAGE: &str = "usage: invoice_points <invoice|id-card> <event.json|->\n       invoice_points reverse <scan_id> <reason...>";

fn read_event(source: &str) -> Result<StatusChangeEvent, Box<dyn std::error::Error>> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source)?
    };
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let config_path = std::env::var("INVOICE_POINTS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path)?
    } else {
        Config::from_toml("")?
    };

    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .init();
    info!(config = %config_path, db = %cfg.db_path, "Starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let store = Arc::new(SqliteStore::new(&cfg.db_path)?);
    let vision = Arc::new(HttpVisionModel::from_config(&cfg.vision));

    match args.first().map(String::as_str) {
        Some("invoice") => {
            let event = read_event(args.get(1).ok_or(USAGE)?)?;
            let pipeline = InvoicePipeline::new(
                vision,
                store.clone(),
                store.clone(),
                store,
                cfg.rules,
                Arc::new(SystemClock),
            );
            let outcome = pipeline.handle(&event).await?;
            info!(scan_id = %event.scan_id, outcome = ?outcome, "Done");
        }
        Some("id-card") => {
            let event = read_event(args.get(1).ok_or(USAGE)?)?;
            let outcome = IdCardPipeline::new(vision, store).handle(&event).await?;
            info!(scan_id = %event.scan_id, outcome = ?outcome, "Done");
        }
        Some("reverse") if args.len() >= 3 => {
            let reason = args[2..].join(" ");
            let ledger = ledger::LedgerUpdater::new(store.clone(), store);
            ledger.reverse_scan(&args[1], &reason).await?;
        }
        _ => return Err(USAGE.into()),
    }

    Ok(())
}
