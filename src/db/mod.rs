pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::{error::Result, pagination};

use self::models::{DeviceRegistryEntry, SensorPlugMapping, SensorReading, Vendor};

pub use self::{memory::MemoryStore, postgres::PgStore};

/// Page size used when draining reading ranges.
pub const READINGS_PAGE_SIZE: usize = 500;

/// Key-value persistence consumed by the handlers.
///
/// Every write is an idempotent put or delete of a single key: several
/// process instances may write concurrently and the last writer wins.
#[async_trait]
pub trait Store: Send + Sync {
    // --- sensor readings, keyed by (sensor_id, timestamp) -------------------

    /// Store a reading. A reading already stored under the same key is kept
    /// as is; returns `false` in that case.
    async fn put_reading(&self, reading: &SensorReading) -> Result<bool>;

    /// Readings of `sensor_id` with `from <= timestamp <= to`, ascending.
    ///
    /// `cursor` is the continuation token returned by the previous page.
    async fn query_readings(
        &self,
        sensor_id: &str,
        from: i64,
        to: i64,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<pagination::CursorPage<SensorReading>>;

    /// Most recent reading of `sensor_id` by measurement time.
    async fn latest_reading(&self, sensor_id: &str) -> Result<Option<SensorReading>>;

    // --- sensor → plug mappings, keyed by sensor_id -------------------------

    async fn get_mapping(&self, sensor_id: &str) -> Result<Option<SensorPlugMapping>>;
    async fn put_mapping(&self, mapping: &SensorPlugMapping) -> Result<()>;
    /// Returns whether a mapping existed.
    async fn delete_mapping(&self, sensor_id: &str) -> Result<bool>;
    async fn list_mappings(&self, account_id: &str) -> Result<Vec<SensorPlugMapping>>;

    // --- device registry, keyed by (vendor, device_id) ----------------------

    async fn get_device(&self, vendor: Vendor, device_id: &str) -> Result<Option<DeviceRegistryEntry>>;
    async fn put_device(&self, device: &DeviceRegistryEntry) -> Result<()>;
    async fn delete_device(&self, vendor: Vendor, device_id: &str) -> Result<bool>;
    async fn list_devices(&self, vendor: Vendor, account_id: &str) -> Result<Vec<DeviceRegistryEntry>>;
}

/// Read every reading in `[from, to]`, following continuation tokens to the end.
pub async fn read_all_readings(
    store: &dyn Store,
    sensor_id: &str,
    from: i64,
    to: i64,
) -> Result<Vec<SensorReading>> {
    pagination::fetch_all_by_cursor(move |cursor| {
        store.query_readings(sensor_id, from, to, cursor, READINGS_PAGE_SIZE)
    })
    .await
}
