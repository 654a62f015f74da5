use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    config::PlugRule,
    db::{models::SensorReading, Store},
    error::Result,
    tuya::PlugCloud,
};

/// What `ControlService::apply` did for a reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    Unmapped,
    Disabled,
    /// The reading does not carry the rule's metric.
    MetricMissing,
    Switched { plug_device_id: String, on: bool },
}

/// Drives the plug mapped to a sensor from the sensor's readings.
#[derive(Clone)]
pub struct ControlService {
    store: Arc<dyn Store>,
    plugs: Arc<dyn PlugCloud>,
    rule: PlugRule,
}

impl ControlService {
    pub fn new(store: Arc<dyn Store>, plugs: Arc<dyn PlugCloud>, rule: PlugRule) -> Self {
        Self { store, plugs, rule }
    }

    /// Evaluate the plug rule against `reading` and switch the mapped plug.
    pub async fn apply(&self, reading: &SensorReading) -> Result<ControlOutcome> {
        let Some(mapping) = self.store.get_mapping(&reading.sensor_id).await? else {
            debug!(sensor_id = %reading.sensor_id, "No plug mapped to sensor");
            return Ok(ControlOutcome::Unmapped);
        };
        if !mapping.enabled {
            debug!(sensor_id = %reading.sensor_id, "Plug mapping disabled");
            return Ok(ControlOutcome::Disabled);
        }
        let Some(on) = self.rule.evaluate(&reading.metric_values) else {
            debug!(
                sensor_id = %reading.sensor_id,
                metric = %self.rule.metric,
                "Reading lacks rule metric; plug left as is"
            );
            return Ok(ControlOutcome::MetricMissing);
        };

        self.plugs.set_switch(&mapping.plug_device_id, on).await?;
        info!(
            sensor_id = %reading.sensor_id,
            plug_device_id = %mapping.plug_device_id,
            on,
            "Plug switched"
        );

        Ok(ControlOutcome::Switched {
            plug_device_id: mapping.plug_device_id,
            on,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        config::Comparison,
        db::MemoryStore,
        error::Error,
        registry::upsert_mapping,
        testing::FakePlugCloud,
    };

    fn rule(comparison: Comparison) -> PlugRule {
        PlugRule {
            metric: "pm25".into(),
            threshold: Decimal::from(10),
            comparison,
        }
    }

    fn reading(metrics: &[(&str, i64)]) -> SensorReading {
        SensorReading {
            sensor_id: "S1".into(),
            timestamp: 100,
            metric_values: metrics
                .iter()
                .map(|(k, v)| (k.to_string(), Decimal::from(*v)))
                .collect::<BTreeMap<_, _>>(),
            received_at: 101,
        }
    }

    async fn setup(enabled: bool, plugs: FakePlugCloud, comparison: Comparison) -> (ControlService, Arc<FakePlugCloud>) {
        let store = MemoryStore::new();
        upsert_mapping(&store, "S1", "plug-1", enabled, "acct", 1).await.unwrap();
        let plugs = Arc::new(plugs);
        let svc = ControlService::new(Arc::new(store), plugs.clone(), rule(comparison));
        (svc, plugs)
    }

    #[tokio::test]
    async fn switches_on_above_threshold_and_off_otherwise() {
        let (svc, plugs) = setup(true, FakePlugCloud::default(), Comparison::Above).await;

        svc.apply(&reading(&[("pm25", 11)])).await.unwrap();
        svc.apply(&reading(&[("pm25", 10)])).await.unwrap();

        assert_eq!(
            plugs.switches(),
            vec![("plug-1".to_owned(), true), ("plug-1".to_owned(), false)]
        );
    }

    #[tokio::test]
    async fn at_least_includes_threshold() {
        let (svc, plugs) = setup(true, FakePlugCloud::default(), Comparison::AtLeast).await;
        let outcome = svc.apply(&reading(&[("pm25", 10)])).await.unwrap();
        assert_eq!(outcome, ControlOutcome::Switched { plug_device_id: "plug-1".into(), on: true });
        assert_eq!(plugs.switches().len(), 1);
    }

    #[tokio::test]
    async fn unmapped_disabled_and_missing_metric_do_nothing() {
        let (svc, plugs) = setup(false, FakePlugCloud::default(), Comparison::Above).await;
        assert_eq!(svc.apply(&reading(&[("pm25", 50)])).await.unwrap(), ControlOutcome::Disabled);

        let mut other = reading(&[("pm25", 50)]);
        other.sensor_id = "S2".into();
        assert_eq!(svc.apply(&other).await.unwrap(), ControlOutcome::Unmapped);

        let (svc, _) = setup(true, FakePlugCloud::default(), Comparison::Above).await;
        assert_eq!(svc.apply(&reading(&[("co2", 900)])).await.unwrap(), ControlOutcome::MetricMissing);

        assert!(plugs.switches().is_empty());
    }

    #[tokio::test]
    async fn plug_failure_propagates() {
        let failing = FakePlugCloud { fail_switch: true, ..Default::default() };
        let (svc, _) = setup(true, failing, Comparison::Above).await;
        let err = svc.apply(&reading(&[("pm25", 50)])).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }
}
