use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    models::{DeviceRegistryEntry, SensorPlugMapping, SensorReading, Vendor},
    Store,
};
use crate::{
    error::{Error, Result},
    pagination::CursorPage,
};

/// Process-local `Store`, used by tests and when no database is configured.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    readings: RwLock<BTreeMap<(String, i64), SensorReading>>,
    mappings: RwLock<HashMap<String, SensorPlugMapping>>,
    devices: RwLock<HashMap<(Vendor, String), DeviceRegistryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Continuation tokens are the timestamp of the last reading returned.
fn parse_cursor(cursor: Option<&str>) -> Result<Option<i64>> {
    cursor
        .map(|c| {
            c.parse::<i64>()
                .map_err(|_| Error::validation(format!("invalid continuation token: {c:?}")))
        })
        .transpose()
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_reading(&self, reading: &SensorReading) -> Result<bool> {
        let mut readings = self.inner.readings.write().await;
        let key = (reading.sensor_id.clone(), reading.timestamp);
        if readings.contains_key(&key) {
            return Ok(false);
        }
        readings.insert(key, reading.clone());
        Ok(true)
    }

    async fn query_readings(
        &self,
        sensor_id: &str,
        from: i64,
        to: i64,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<CursorPage<SensorReading>> {
        let start = match parse_cursor(cursor.as_deref())? {
            Some(last) if last >= to => return Ok(CursorPage::last(Vec::new())),
            Some(last) => from.max(last + 1),
            None => from,
        };
        if start > to {
            return Ok(CursorPage::last(Vec::new()));
        }

        let readings = self.inner.readings.read().await;
        let mut items: Vec<SensorReading> = readings
            .range((sensor_id.to_owned(), start)..=(sensor_id.to_owned(), to))
            .map(|(_, r)| r.clone())
            .take(limit + 1)
            .collect();

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
        let readings = self.inner.readings.read().await;
        Ok(readings
            .range((sensor_id.to_owned(), i64::MIN)..=(sensor_id.to_owned(), i64::MAX))
            .next_back()
            .map(|(_, r)| r.clone()))
    }

    async fn get_mapping(&self, sensor_id: &str) -> Result<Option<SensorPlugMapping>> {
        Ok(self.inner.mappings.read().await.get(sensor_id).cloned())
    }

    async fn put_mapping(&self, mapping: &SensorPlugMapping) -> Result<()> {
        self.inner
            .mappings
            .write()
            .await
            .insert(mapping.sensor_id.clone(), mapping.clone());
        Ok(())
    }

    async fn delete_mapping(&self, sensor_id: &str) -> Result<bool> {
        Ok(self.inner.mappings.write().await.remove(sensor_id).is_some())
    }

    async fn list_mappings(&self, account_id: &str) -> Result<Vec<SensorPlugMapping>> {
        let mut out: Vec<SensorPlugMapping> = self
            .inner
            .mappings
            .read()
            .await
            .values()
            .filter(|m| m.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        Ok(out)
    }

    async fn get_device(&self, vendor: Vendor, device_id: &str) -> Result<Option<DeviceRegistryEntry>> {
        Ok(self
            .inner
            .devices
            .read()
            .await
            .get(&(vendor, device_id.to_owned()))
            .cloned())
    }

    async fn put_device(&self, device: &DeviceRegistryEntry) -> Result<()> {
        self.inner
            .devices
            .write()
            .await
            .insert((device.vendor, device.device_id.clone()), device.clone());
        Ok(())
    }

    async fn delete_device(&self, vendor: Vendor, device_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .devices
            .write()
            .await
            .remove(&(vendor, device_id.to_owned()))
            .is_some())
    }

    async fn list_devices(&self, vendor: Vendor, account_id: &str) -> Result<Vec<DeviceRegistryEntry>> {
        let mut out: Vec<DeviceRegistryEntry> = self
            .inner
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.vendor == vendor && d.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn reading(sensor: &str, ts: i64, pm25: i64) -> SensorReading {
        SensorReading {
            sensor_id: sensor.to_owned(),
            timestamp: ts,
            metric_values: BTreeMap::from([("pm25".to_owned(), Decimal::from(pm25))]),
            received_at: ts + 1,
        }
    }

    fn device(vendor: Vendor, id: &str, account: &str) -> DeviceRegistryEntry {
        DeviceRegistryEntry {
            vendor,
            device_id: id.to_owned(),
            account_id: account.to_owned(),
            display_name: None,
            product_info: serde_json::Value::Null,
            enabled: true,
            bound_at: 0,
        }
    }

    #[tokio::test]
    async fn put_reading_is_append_only() {
        let store = MemoryStore::new();
        assert!(store.put_reading(&reading("A", 100, 5)).await.unwrap());
        assert!(!store.put_reading(&reading("A", 100, 99)).await.unwrap());

        let page = store.query_readings("A", 0, 200, None, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].metric_values["pm25"], Decimal::from(5));
    }

    #[tokio::test]
    async fn query_readings_pages_with_cursor() {
        let store = MemoryStore::new();
        for ts in 1..=5 {
            store.put_reading(&reading("A", ts, 1)).await.unwrap();
        }
        store.put_reading(&reading("B", 3, 1)).await.unwrap();

        let first = store.query_readings("A", 1, 5, None, 2).await.unwrap();
        assert_eq!(first.items.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![1, 2]);
        assert!(first.has_more);
        assert_eq!(first.cursor.as_deref(), Some("2"));

        let second = store.query_readings("A", 1, 5, first.cursor, 2).await.unwrap();
        assert_eq!(second.items.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![3, 4]);

        let third = store.query_readings("A", 1, 5, second.cursor, 2).await.unwrap();
        assert_eq!(third.items.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![5]);
        assert!(!third.has_more);
        assert!(third.cursor.is_none());
    }

    #[tokio::test]
    async fn latest_reading_is_per_sensor() {
        let store = MemoryStore::new();
        assert!(store.latest_reading("A").await.unwrap().is_none());

        store.put_reading(&reading("A", 300, 3)).await.unwrap();
        store.put_reading(&reading("A", 100, 1)).await.unwrap();
        store.put_reading(&reading("AB", 900, 9)).await.unwrap();

        let latest = store.latest_reading("A").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 300);
    }

    #[tokio::test]
    async fn query_readings_rejects_garbage_cursor() {
        let store = MemoryStore::new();
        let err = store
            .query_readings("A", 0, 10, Some("zzz".into()), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn mappings_crud() {
        let store = MemoryStore::new();
        let m = SensorPlugMapping {
            sensor_id: "AA".into(),
            plug_device_id: "plug1".into(),
            enabled: true,
            account_id: "acct".into(),
            created_at: 1,
            updated_at: 1,
        };
        store.put_mapping(&m).await.unwrap();
        assert_eq!(store.get_mapping("AA").await.unwrap(), Some(m.clone()));
        assert_eq!(store.list_mappings("acct").await.unwrap().len(), 1);
        assert!(store.list_mappings("other").await.unwrap().is_empty());

        assert!(store.delete_mapping("AA").await.unwrap());
        assert!(!store.delete_mapping("AA").await.unwrap());
        assert!(store.get_mapping("AA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn devices_are_partitioned_by_vendor_and_account() {
        let store = MemoryStore::new();
        store.put_device(&device(Vendor::Qingping, "X", "acct")).await.unwrap();
        store.put_device(&device(Vendor::Tuya, "X", "acct")).await.unwrap();
        store.put_device(&device(Vendor::Tuya, "Y", "other")).await.unwrap();

        assert_eq!(store.list_devices(Vendor::Qingping, "acct").await.unwrap().len(), 1);
        assert_eq!(store.list_devices(Vendor::Tuya, "acct").await.unwrap().len(), 1);

        assert!(store.delete_device(Vendor::Tuya, "X").await.unwrap());
        assert!(store.get_device(Vendor::Qingping, "X").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.put_reading(&reading("A", 1, 1)).await.unwrap();
        let page = clone.query_readings("A", 0, 10, None, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }
}
