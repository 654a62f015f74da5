//! In-process vendor clouds for unit and router tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::{
    error::{Error, Result},
    qingping::{
        models::{BoundDevice, DeviceInfo},
        SensorCloud,
    },
    tuya::{
        models::{ReportLog, SpaceDevice},
        PlugCloud,
    },
};

#[derive(Default)]
pub struct FakePlugCloud {
    pub plugs: Vec<SpaceDevice>,
    pub logs: Vec<ReportLog>,
    pub fail_switch: bool,
    pub fail_logs: bool,
    pub switches: Mutex<Vec<(String, bool)>>,
}

impl FakePlugCloud {
    pub fn with_plugs(plugs: Vec<SpaceDevice>) -> Self {
        Self { plugs, ..Default::default() }
    }

    /// Every `(device_id, on)` passed to `set_switch`, in call order.
    pub fn switches(&self) -> Vec<(String, bool)> {
        self.switches.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlugCloud for FakePlugCloud {
    async fn set_switch(&self, device_id: &str, on: bool) -> Result<()> {
        if self.fail_switch {
            return Err(Error::upstream(anyhow::anyhow!("plug offline")));
        }
        self.switches.lock().unwrap().push((device_id.to_owned(), on));
        Ok(())
    }

    async fn list_plugs(&self) -> Result<Vec<SpaceDevice>> {
        Ok(self.plugs.clone())
    }

    async fn switch_logs(&self, _device_id: &str, start_ms: i64, end_ms: i64) -> Result<Vec<ReportLog>> {
        if self.fail_logs {
            return Err(Error::upstream(anyhow::anyhow!("report logs unavailable")));
        }
        Ok(self
            .logs
            .iter()
            .filter(|l| l.event_time.is_some_and(|t| t >= start_ms && t <= end_ms))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeSensorCloud {
    pub devices: Vec<DeviceInfo>,
    /// Returned by `bind_device`; `None` simulates a response without MAC.
    pub bind_mac: Option<String>,
}

#[async_trait]
impl SensorCloud for FakeSensorCloud {
    async fn bind_device(&self, device_token: &str, product_id: i64) -> Result<BoundDevice> {
        let mac = self
            .bind_mac
            .clone()
            .ok_or_else(|| Error::upstream(anyhow::anyhow!("Qingping bind response is missing info.mac")))?;
        let info = DeviceInfo {
            mac: Some(mac.clone()),
            name: Some(format!("device {device_token}")),
            product: json!({ "id": product_id }),
            ..Default::default()
        };
        Ok(BoundDevice {
            raw: json!({ "info": { "mac": mac } }),
            info,
        })
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }
}

pub fn plug(id: &str, name: &str) -> SpaceDevice {
    SpaceDevice {
        id: id.to_owned(),
        name: Some(name.to_owned()),
        custom_name: None,
        category: Some("cz".to_owned()),
        product_name: Some("Smart Plug".to_owned()),
        is_online: Some(true),
    }
}

pub fn sensor(mac: &str) -> DeviceInfo {
    DeviceInfo {
        mac: Some(mac.to_owned()),
        name: Some(format!("sensor {mac}")),
        ..Default::default()
    }
}
