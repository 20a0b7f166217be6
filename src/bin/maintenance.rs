use std::env;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use hotdog_pipeline::{config::AppConfig, models::Platform, state::AppState};

const USAGE: &str = "Usage: maintenance <command>

Commands:
  scan <platform>          run one scan now
  daily                    run the daily tick (health, approval, schedule)
  materialize [YYYY-MM-DD] build or refill a day's slots (default today)
  post [meal]              post for the open meal window, or the named meal
  check                    evaluate queue health and raise alerts
  approve                  run progressive approval";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    let argument = args.next();

    if !matches!(
        command.as_str(),
        "scan" | "daily" | "materialize" | "post" | "check" | "approve"
    ) {
        eprintln!("Unknown command: {command}\n{USAGE}");
        std::process::exit(1);
    }

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        store_backend = ?config.store_backend,
        pool_size = 1,
        "loaded pipeline configuration"
    );
    let state = AppState::build(config, 1).await?;
    let pipeline = &state.pipeline;

    match command.as_str() {
        "scan" => {
            let platform: Platform = argument
                .context("scan requires a platform")?
                .parse()
                .map_err(anyhow::Error::msg)?;
            print_json(&pipeline.scans.scan(platform).await?)?;
        }
        "daily" => print_json(&pipeline.run_daily().await?)?,
        "materialize" => {
            let day = match argument {
                Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .with_context(|| format!("invalid date {raw}, expected YYYY-MM-DD"))?,
                None => pipeline.today(),
            };
            print_json(&pipeline.materializer.materialize_day(day).await?)?;
        }
        "post" => {
            let outcome = match argument {
                Some(meal) => pipeline.poster.post_named(&meal).await?,
                None => pipeline.poster.tick().await?,
            };
            print_json(&outcome)?;
        }
        "check" => print_json(&pipeline.monitor.check().await?)?,
        "approve" => print_json(&pipeline.approver.run().await?)?,
        _ => unreachable!("command validated above"),
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
