use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};

use super::{
    models::{DeviceRegistryEntry, SensorPlugMapping, SensorReading, Vendor},
    Store,
};
use crate::{
    error::{Error, Result},
    pagination::CursorPage,
};

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// `Store` backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = create_pool(database_url)
            .await
            .context("failed to connect to Postgres")?;
        run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
        Ok(Self::new(pool))
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(FromRow)]
struct ReadingRow {
    sensor_id: String,
    ts: i64,
    metric_values: Json<BTreeMap<String, Decimal>>,
    received_at: i64,
}

impl From<ReadingRow> for SensorReading {
    fn from(r: ReadingRow) -> Self {
        Self {
            sensor_id: r.sensor_id,
            timestamp: r.ts,
            metric_values: r.metric_values.0,
            received_at: r.received_at,
        }
    }
}

#[derive(FromRow)]
struct MappingRow {
    sensor_id: String,
    plug_device_id: String,
    enabled: bool,
    account_id: String,
    created_at: i64,
    updated_at: i64,
}

impl From<MappingRow> for SensorPlugMapping {
    fn from(r: MappingRow) -> Self {
        Self {
            sensor_id: r.sensor_id,
            plug_device_id: r.plug_device_id,
            enabled: r.enabled,
            account_id: r.account_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct DeviceRow {
    vendor: String,
    device_id: String,
    account_id: String,
    display_name: Option<String>,
    product_info: Json<serde_json::Value>,
    enabled: bool,
    bound_at: i64,
}

impl TryFrom<DeviceRow> for DeviceRegistryEntry {
    type Error = Error;

    fn try_from(r: DeviceRow) -> Result<Self> {
        Ok(Self {
            vendor: r.vendor.parse().map_err(Error::store)?,
            device_id: r.device_id,
            account_id: r.account_id,
            display_name: r.display_name,
            product_info: r.product_info.0,
            enabled: r.enabled,
            bound_at: r.bound_at,
        })
    }
}

const MAPPING_COLUMNS: &str =
    "sensor_id, plug_device_id, enabled, account_id, created_at, updated_at";
const DEVICE_COLUMNS: &str =
    "vendor, device_id, account_id, display_name, product_info, enabled, bound_at";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for PgStore {
    async fn put_reading(&self, reading: &SensorReading) -> Result<bool> {
        let done = sqlx::query(
            r#"
            INSERT INTO sensor_readings (sensor_id, ts, metric_values, received_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (sensor_id, ts) DO NOTHING
            "#,
        )
        .bind(&reading.sensor_id)
        .bind(reading.timestamp)
        .bind(Json(&reading.metric_values))
        .bind(reading.received_at)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    async fn query_readings(
        &self,
        sensor_id: &str,
        from: i64,
        to: i64,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<CursorPage<SensorReading>> {
        let start = match cursor {
            Some(c) => {
                let last: i64 = c
                    .parse()
                    .map_err(|_| Error::validation(format!("invalid continuation token: {c:?}")))?;
                from.max(last.saturating_add(1))
            }
            None => from,
        };

        let rows = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT sensor_id, ts, metric_values, received_at
            FROM sensor_readings
            WHERE sensor_id = $1
              AND ts >= $2
              AND ts <= $3
            ORDER BY ts ASC
            LIMIT $4
            "#,
        )
        .bind(sensor_id)
        .bind(start)
        .bind(to)
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let mut items: Vec<SensorReading> = rows.into_iter().map(Into::into).collect();
        let has_more = items.len() > limit;
        items.truncate(limit);
        let cursor = if has_more {
            items.last().map(|r| r.timestamp.to_string())
        } else {
            None
        };

        Ok(CursorPage { items, has_more, cursor })
    }

    async fn latest_reading(&self, sensor_id: &str) -> Result<Option<SensorReading>> {
        let row = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT sensor_id, ts, metric_values, received_at
            FROM sensor_readings
            WHERE sensor_id = $1
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_mapping(&self, sensor_id: &str) -> Result<Option<SensorPlugMapping>> {
        let row = sqlx::query_as::<_, MappingRow>(&format!(
            "SELECT {MAPPING_COLUMNS} FROM sensor_plug_mappings WHERE sensor_id = $1"
        ))
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn put_mapping(&self, mapping: &SensorPlugMapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_plug_mappings
                (sensor_id, plug_device_id, enabled, account_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sensor_id) DO UPDATE SET
                plug_device_id = EXCLUDED.plug_device_id,
                enabled        = EXCLUDED.enabled,
                account_id     = EXCLUDED.account_id,
                created_at     = EXCLUDED.created_at,
                updated_at     = EXCLUDED.updated_at
            "#,
        )
        .bind(&mapping.sensor_id)
        .bind(&mapping.plug_device_id)
        .bind(mapping.enabled)
        .bind(&mapping.account_id)
        .bind(mapping.created_at)
        .bind(mapping.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_mapping(&self, sensor_id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM sensor_plug_mappings WHERE sensor_id = $1")
            .bind(sensor_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_mappings(&self, account_id: &str) -> Result<Vec<SensorPlugMapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(&format!(
            "SELECT {MAPPING_COLUMNS} FROM sensor_plug_mappings \
             WHERE account_id = $1 ORDER BY sensor_id"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_device(&self, vendor: Vendor, device_id: &str) -> Result<Option<DeviceRegistryEntry>> {
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM device_registry WHERE vendor = $1 AND device_id = $2"
        ))
        .bind(vendor.to_string())
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn put_device(&self, device: &DeviceRegistryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO device_registry
                (vendor, device_id, account_id, display_name, product_info, enabled, bound_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (vendor, device_id) DO UPDATE SET
                account_id   = EXCLUDED.account_id,
                display_name = EXCLUDED.display_name,
                product_info = EXCLUDED.product_info,
                enabled      = EXCLUDED.enabled,
                bound_at     = EXCLUDED.bound_at
            "#,
        )
        .bind(device.vendor.to_string())
        .bind(&device.device_id)
        .bind(&device.account_id)
        .bind(&device.display_name)
        .bind(Json(&device.product_info))
        .bind(device.enabled)
        .bind(device.bound_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_device(&self, vendor: Vendor, device_id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM device_registry WHERE vendor = $1 AND device_id = $2")
            .bind(vendor.to_string())
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_devices(&self, vendor: Vendor, account_id: &str) -> Result<Vec<DeviceRegistryEntry>> {
        let rows = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM device_registry \
             WHERE vendor = $1 AND account_id = $2 ORDER BY device_id"
        ))
        .bind(vendor.to_string())
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
