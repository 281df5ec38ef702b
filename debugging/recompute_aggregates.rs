//! Recompute every vehicle's cached rating aggregates from its ratings and report drift.
//! Uses DATABASE_URL from the environment (.env supported).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use easymat::models::VehicleAggregates;
use easymat::store::PgStore;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TOLERANCE: f64 = 1e-9;

fn drifted(before: &VehicleAggregates, after: &VehicleAggregates) -> bool {
    before.rating_count != after.rating_count
        || (before.avg_rating - after.avg_rating).abs() > TOLERANCE
        || (before.safety_score - after.safety_score).abs() > TOLERANCE
        || (before.cleanliness_score - after.cleanliness_score).abs() > TOLERANCE
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let url = env::var("DATABASE_URL").context("Missing DATABASE_URL in environment")?;
    let store = PgStore::connect(&url, 2).await?;

    let ids = store.vehicle_ids().await?;
    let mut repaired = 0usize;
    for id in &ids {
        let (before, after) = store
            .recompute_aggregates(*id)
            .await
            .with_context(|| format!("Failed to recompute aggregates for {}", id))?;
        if drifted(&before, &after) {
            repaired += 1;
            warn!(
                vehicle_id = %id,
                cached_avg = before.avg_rating,
                actual_avg = after.avg_rating,
                cached_count = before.rating_count,
                actual_count = after.rating_count,
                "Aggregate drift repaired"
            );
        }
    }

    info!(vehicles = ids.len(), repaired, "Recompute finished");
    Ok(())
}
