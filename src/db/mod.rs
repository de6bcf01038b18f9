use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use thiserror::Error;

pub mod queries;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no device token registered for driver {0}")]
    NotFound(String),
    #[error("device token lookup failed: {0}")]
    Db(#[from] sqlx::Error),
}

/// Resolves the push delivery target for a driver. A missing token abandons
/// the current send attempt only; the caller's timer keeps running so a later
/// tick can succeed once the driver registers a device.
pub struct DeviceTokenStore {
    pool: DbPool,
}

impl DeviceTokenStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn device_token(&self, driver_id: &str) -> Result<String, LookupError> {
        let row = sqlx::query(queries::SELECT_DEVICE_TOKEN)
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("device_token")?),
            None => Err(LookupError::NotFound(driver_id.to_string())),
        }
    }
}
