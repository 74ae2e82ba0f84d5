use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;
use ulid::Ulid;

use courtside::compactor::run_compactor;
use courtside::config::Config;
use courtside::engine::Engine;
use courtside::model::{AvailabilityWindow, Schedule, Scope};
use courtside::seed::{SeedGenerator, SeedRequest};

const DEMO_COURT_PRICE: i64 = 25;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    courtside::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), config.conflict_policy)?);

    info!("courtside started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  conflict_policy: {:?}", config.conflict_policy);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    tokio::spawn(run_compactor(engine.clone(), config.compact_threshold));

    let now = chrono::Local::now().naive_local();

    if config.seed_count > 0 {
        let owner = Ulid::new();
        let court = Ulid::new();
        let open = NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default();
        let close = NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default();
        engine
            .create_resource(
                court,
                owner,
                Some("Demo court".into()),
                Decimal::from(DEMO_COURT_PRICE),
                Schedule::windows(vec![AvailabilityWindow::new(open, close)]),
            )
            .await?;

        let outcome = SeedGenerator::new(config.seed)
            .generate(
                &engine,
                SeedRequest {
                    owner_id: owner,
                    requesters: Vec::new(),
                    count: config.seed_count,
                    from: None,
                    to: None,
                },
                now.date(),
            )
            .await?;
        println!("{}", serde_json::to_string(&json!({ "seed": outcome }))?);
    }

    let owners: BTreeSet<Ulid> = engine
        .list_resources(None, now)
        .await
        .into_iter()
        .map(|r| r.owner_id)
        .collect();

    for owner in owners {
        let rows = engine.report(Scope::Owner(owner), config.report_period, now).await?;
        let doc = json!({
            "owner": owner.to_string(),
            "period": config.report_period.as_str(),
            "rows": rows,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    }

    engine.compact_wal().await?;
    info!("courtside finished");
    Ok(())
}
