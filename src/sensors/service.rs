use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    control::{ControlOutcome, ControlService},
    db::Store,
    error::{Error, Result},
    qingping::{models::WebhookPush, signature},
};

/// Result of one accepted webhook push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub sensor_id: String,
    /// Readings newly stored.
    pub stored: usize,
    /// Readings already present under the same timestamp.
    pub duplicates: usize,
    /// `None` when nothing new was stored or control failed.
    pub control: Option<ControlOutcome>,
}

/// Verifies and stores pushed readings, then drives the mapped plug.
#[derive(Clone)]
pub struct SensorService {
    store: Arc<dyn Store>,
    control: ControlService,
    webhook_secret: Option<String>,
}

impl SensorService {
    pub fn new(store: Arc<dyn Store>, control: ControlService, webhook_secret: Option<String>) -> Self {
        Self {
            store,
            control,
            webhook_secret,
        }
    }

    /// Verify the push signature and ingest its readings.
    ///
    /// The payload is only read once the signature holds. Storing the readings
    /// is the primary step and its failure is returned. When something new was
    /// stored, plug control runs on the sensor's latest stored reading; its
    /// failure is logged and does not fail the push.
    pub async fn handle_push(&self, push: &WebhookPush, received_at: i64) -> Result<IngestSummary> {
        let sig = &push.signature;
        if !signature::verify(
            self.webhook_secret.as_deref(),
            &sig.timestamp_string(),
            sig.token(),
            sig.signature(),
        ) {
            warn!(token = %sig.token(), "Rejected webhook with invalid signature");
            return Err(Error::Unauthorized);
        }

        let payload = push.payload()?;
        let sensor_id = payload
            .sensor_id()
            .ok_or_else(|| Error::validation("Missing payload.info.mac"))?;

        let mut stored = 0;
        let mut duplicates = 0;
        for reading in payload.readings(&sensor_id, received_at) {
            if self.store.put_reading(&reading).await? {
                stored += 1;
            } else {
                duplicates += 1;
            }
        }
        info!(sensor_id = %sensor_id, stored, duplicates, "Webhook readings saved");

        let control = if stored == 0 {
            None
        } else {
            self.control_or_warn(&sensor_id).await
        };

        Ok(IngestSummary {
            sensor_id,
            stored,
            duplicates,
            control,
        })
    }

    async fn control_or_warn(&self, sensor_id: &str) -> Option<ControlOutcome> {
        match self.control_latest(sensor_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(sensor_id = %sensor_id, error = %e, "Plug control failed; reading kept");
                None
            }
        }
    }

    async fn control_latest(&self, sensor_id: &str) -> Result<Option<ControlOutcome>> {
        match self.store.latest_reading(sensor_id).await? {
            Some(latest) => self.control.apply(&latest).await.map(Some),
            None => Ok(None),
        }
    }
}
