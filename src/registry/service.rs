use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    db::{
        models::{normalize_sensor_id, DeviceRegistryEntry, SensorPlugMapping, Vendor},
        Store,
    },
    error::{Error, Result},
    qingping::{
        models::{BoundDevice, DeviceInfo},
        SensorCloud,
    },
    tuya::PlugCloud,
};

use super::{reconcile, upsert_mapping};

/// Counts reported by a registry sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncSummary {
    /// Devices in the vendor listing.
    pub remote: usize,
    pub inserted: usize,
    pub deleted: usize,
}

/// Mapping CRUD plus binding and syncing of vendor devices, all scoped to a
/// single account.
#[derive(Clone)]
pub struct RegistryService {
    store: Arc<dyn Store>,
    sensors: Arc<dyn SensorCloud>,
    plugs: Arc<dyn PlugCloud>,
    account_id: String,
}

impl RegistryService {
    pub fn new(
        store: Arc<dyn Store>,
        sensors: Arc<dyn SensorCloud>,
        plugs: Arc<dyn PlugCloud>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sensors,
            plugs,
            account_id: account_id.into(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    // --- mappings ----------------------------------------------------------

    pub async fn list_mappings(&self) -> Result<Vec<SensorPlugMapping>> {
        self.store.list_mappings(&self.account_id).await
    }

    pub async fn save_mapping(
        &self,
        sensor_id: &str,
        plug_device_id: &str,
        enabled: bool,
    ) -> Result<SensorPlugMapping> {
        let sensor_id = normalize_sensor_id(sensor_id);
        if sensor_id.is_empty() {
            return Err(Error::validation("Missing sensor_id"));
        }
        let plug_device_id = plug_device_id.trim();
        if plug_device_id.is_empty() {
            return Err(Error::validation("Missing plug_device_id"));
        }

        upsert_mapping(
            self.store.as_ref(),
            &sensor_id,
            plug_device_id,
            enabled,
            &self.account_id,
            chrono::Utc::now().timestamp(),
        )
        .await
    }

    /// Returns the normalized sensor id and whether a mapping existed.
    pub async fn delete_mapping(&self, sensor_id: &str) -> Result<(String, bool)> {
        let sensor_id = normalize_sensor_id(sensor_id);
        if sensor_id.is_empty() {
            return Err(Error::validation("Missing sensor_id"));
        }
        let existed = self.store.delete_mapping(&sensor_id).await?;
        info!(sensor_id = %sensor_id, existed, "Mapping deleted");
        Ok((sensor_id, existed))
    }

    // --- devices -----------------------------------------------------------

    pub async fn list_devices(&self, vendor: Vendor) -> Result<Vec<DeviceRegistryEntry>> {
        self.store.list_devices(vendor, &self.account_id).await
    }

    /// Bind a sensor through the vendor cloud and record it locally.
    pub async fn bind_sensor(
        &self,
        device_token: &str,
        product_id: i64,
    ) -> Result<(DeviceRegistryEntry, BoundDevice)> {
        if device_token.trim().is_empty() {
            return Err(Error::validation("Missing device_token"));
        }

        let bound = self.sensors.bind_device(device_token.trim(), product_id).await?;
        let mut entry = self
            .qingping_entry(&bound.info, chrono::Utc::now().timestamp())
            .ok_or_else(|| Error::upstream(anyhow::anyhow!("bound device has no MAC")))?;
        if entry.product_info.is_null() {
            entry.product_info = json!({ "product_id": product_id });
        }

        self.store.put_device(&entry).await?;
        info!(device_id = %entry.device_id, "Qingping device bound");

        Ok((entry, bound))
    }

    pub async fn sync_sensors(&self) -> Result<SyncSummary> {
        let now = chrono::Utc::now().timestamp();
        let remote: Vec<DeviceRegistryEntry> = self
            .sensors
            .list_devices()
            .await?
            .iter()
            .filter_map(|info| {
                let entry = self.qingping_entry(info, now);
                if entry.is_none() {
                    warn!(name = ?info.name, "Skipping Qingping device without MAC");
                }
                entry
            })
            .collect();

        self.apply_sync(Vendor::Qingping, remote).await
    }

    pub async fn sync_plugs(&self) -> Result<SyncSummary> {
        let now = chrono::Utc::now().timestamp();
        let remote = self
            .plugs
            .list_plugs()
            .await?
            .into_iter()
            .map(|plug| DeviceRegistryEntry {
                vendor: Vendor::Tuya,
                display_name: plug.display_name().map(str::to_owned),
                product_info: json!({
                    "category": plug.category,
                    "product_name": plug.product_name,
                }),
                device_id: plug.id,
                account_id: self.account_id.clone(),
                enabled: true,
                bound_at: now,
            })
            .collect();

        self.apply_sync(Vendor::Tuya, remote).await
    }

    async fn apply_sync(&self, vendor: Vendor, remote: Vec<DeviceRegistryEntry>) -> Result<SyncSummary> {
        let remote_count = remote.len();
        let local = self.store.list_devices(vendor, &self.account_id).await?;
        let plan = reconcile(remote, local);

        for entry in &plan.to_insert {
            self.store.put_device(entry).await?;
        }
        for entry in &plan.to_delete {
            self.store.delete_device(vendor, &entry.device_id).await?;
        }

        let summary = SyncSummary {
            remote: remote_count,
            inserted: plan.to_insert.len(),
            deleted: plan.to_delete.len(),
        };
        info!(
            vendor = %vendor,
            remote = summary.remote,
            inserted = summary.inserted,
            deleted = summary.deleted,
            "Registry synced"
        );
        Ok(summary)
    }

    fn qingping_entry(&self, info: &DeviceInfo, now: i64) -> Option<DeviceRegistryEntry> {
        let device_id = info
            .mac
            .as_deref()
            .map(normalize_sensor_id)
            .filter(|id| !id.is_empty())?;

        Some(DeviceRegistryEntry {
            vendor: Vendor::Qingping,
            device_id,
            account_id: self.account_id.clone(),
            display_name: info.name.clone(),
            product_info: info.product.clone(),
            enabled: true,
            bound_at: now,
        })
    }
}
