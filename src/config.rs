use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use std::{env, fmt::Display, net::SocketAddr, str::FromStr};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub identity_secret: String,
    pub photo_upload_url: Option<String>,
    pub photo_upload_token: Option<String>,
    pub photo_dir: String,
    pub photo_public_base: String,
    pub day_offset: FixedOffset,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let offset_hours: i32 = try_load("DAY_BOUNDARY_OFFSET_HOURS", "3")?;
        let day_offset = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or_else(|| anyhow!("DAY_BOUNDARY_OFFSET_HOURS out of range: {offset_hours}"))?;

        Ok(Self {
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:3000")?,
            database_url: optional("DATABASE_URL"),
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "10")?,
            identity_secret: optional("IDENTITY_SECRET")
                .ok_or_else(|| anyhow!("IDENTITY_SECRET must be set"))?,
            photo_upload_url: optional("PHOTO_UPLOAD_URL"),
            photo_upload_token: optional("PHOTO_UPLOAD_TOKEN"),
            photo_dir: optional("PHOTO_DIR").unwrap_or_else(|| "uploads".to_string()),
            photo_public_base: optional("PHOTO_PUBLIC_BASE")
                .unwrap_or_else(|| "/uploads".to_string()),
            day_offset,
            max_body_bytes: try_load("MAX_BODY_BYTES", "8388608")?,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value: {raw}"))
}
