//! CSV export of a sensor's readings, with the mapped plug's switch history.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    db::{self, models::{normalize_sensor_id, SensorReading}, Store},
    error::{Error, Result},
    tuya::{models::ReportLog, PlugCloud},
};

/// A rendered export ready to be sent as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    pub filename: String,
    pub body: String,
}

/// One CSV line. Field order is the column order.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    source: &'static str,
    time_iso: String,
    time_epoch_s: i64,
    sensor_id: &'a str,
    metric: &'a str,
    value: String,
}

#[derive(Clone)]
pub struct ExportService {
    store: Arc<dyn Store>,
    plugs: Arc<dyn PlugCloud>,
    switch_code: String,
    tz: Tz,
}

impl ExportService {
    pub fn new(store: Arc<dyn Store>, plugs: Arc<dyn PlugCloud>, switch_code: impl Into<String>, tz: Tz) -> Self {
        Self {
            store,
            plugs,
            switch_code: switch_code.into(),
            tz,
        }
    }

    /// Export readings of `sensor_id` between `start_time` and `end_time`.
    ///
    /// Bounds are taken as given by the caller and parsed with [`parse_time`].
    pub async fn export(&self, sensor_id: &str, start_time: &str, end_time: &str) -> Result<CsvExport> {
        let sensor_id = normalize_sensor_id(sensor_id);
        if sensor_id.is_empty() {
            return Err(Error::validation("Missing query param: sensor_id"));
        }
        let (start_raw, end_raw) = (start_time.trim(), end_time.trim());
        if start_raw.is_empty() || end_raw.is_empty() {
            return Err(Error::validation("Missing query params: start_time and end_time"));
        }

        let start = parse_time(start_raw, false, self.tz)?;
        let end = parse_time(end_raw, true, self.tz)?;
        if end < start {
            return Err(Error::validation("end_time must be >= start_time"));
        }

        let readings = db::read_all_readings(self.store.as_ref(), &sensor_id, start, end).await?;
        if readings.is_empty() {
            return Err(Error::NotFound(format!(
                "No sensor data found for {sensor_id} between {start_raw} and {end_raw}"
            )));
        }

        let plug_logs = match self.plug_logs(&sensor_id, start, end).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(sensor_id = %sensor_id, error = %e, "Plug logs unavailable; exporting sensor data only");
                Vec::new()
            }
        };
        info!(
            sensor_id = %sensor_id,
            readings = readings.len(),
            plug_logs = plug_logs.len(),
            "Building CSV export"
        );

        Ok(CsvExport {
            filename: format!("sensor_{sensor_id}_{start_raw}_{end_raw}.csv"),
            body: build_csv(&sensor_id, &readings, &plug_logs, &self.switch_code, self.tz)?,
        })
    }

    async fn plug_logs(&self, sensor_id: &str, start: i64, end: i64) -> Result<Vec<ReportLog>> {
        let Some(mapping) = self.store.get_mapping(sensor_id).await? else {
            info!(sensor_id = %sensor_id, "No plug mapped; CSV will include sensor data only");
            return Ok(Vec::new());
        };
        self.plugs
            .switch_logs(&mapping.plug_device_id, start * 1000, end * 1000)
            .await
    }
}

/// Parse an export bound into Unix seconds.
///
/// Accepts epoch seconds, `YYYY-MM-DD` (local midnight for a start bound, the
/// last second of that local day for an end bound) and ISO-8601 date-times.
/// Values without an offset are read in `tz`.
pub fn parse_time(value: &str, is_end: bool, tz: Tz) -> Result<i64> {
    let s = value.trim();
    let invalid = || Error::validation(format!("Invalid time format: {s}"));

    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().map_err(|_| invalid());
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return if is_end {
            let next = date.checked_add_days(Days::new(1)).ok_or_else(invalid)?;
            Ok(local_midnight(next, tz).ok_or_else(invalid)? - 1)
        } else {
            local_midnight(date, tz).ok_or_else(invalid)
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp())
                .ok_or_else(invalid);
        }
    }

    Err(invalid())
}

fn local_midnight(date: NaiveDate, tz: Tz) -> Option<i64> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp())
}

fn iso_local(epoch_s: i64, tz: Tz) -> String {
    tz.timestamp_opt(epoch_s, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Render sensor rows (one per metric) followed by plug rows.
///
/// Columns: `source,time_iso,time_epoch_s,sensor_id,metric,value`.
pub fn build_csv(
    sensor_id: &str,
    readings: &[SensorReading],
    plug_logs: &[ReportLog],
    switch_code: &str,
    tz: Tz,
) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let csv_err = |e: csv::Error| Error::upstream(anyhow::anyhow!("CSV serialization error: {e}"));

    for reading in readings {
        let time_iso = iso_local(reading.timestamp, tz);
        for (metric, value) in &reading.metric_values {
            wtr.serialize(CsvRow {
                source: "sensor",
                time_iso: time_iso.clone(),
                time_epoch_s: reading.timestamp,
                sensor_id,
                metric,
                value: value.normalize().to_string(),
            })
            .map_err(csv_err)?;
        }
    }

    for log in plug_logs {
        let Some(event_ms) = log.event_time else {
            continue;
        };
        let event_s = event_ms.div_euclid(1000);
        wtr.serialize(CsvRow {
            source: "plug",
            time_iso: iso_local(event_s, tz),
            time_epoch_s: event_s,
            sensor_id,
            metric: log.code.as_deref().unwrap_or(switch_code),
            value: log.value.as_ref().map(ToString::to_string).unwrap_or_default(),
        })
        .map_err(csv_err)?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| Error::upstream(anyhow::anyhow!("CSV writer error: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::upstream(anyhow::anyhow!("UTF-8 conversion error: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        db::MemoryStore,
        registry::upsert_mapping,
        testing::FakePlugCloud,
        tuya::models::DpValue,
    };

    const NY: Tz = chrono_tz::America::New_York;

    fn reading(ts: i64, metrics: &[(&str, Decimal)]) -> SensorReading {
        SensorReading {
            sensor_id: "AABBCC".into(),
            timestamp: ts,
            metric_values: metrics
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            received_at: ts,
        }
    }

    fn log(ms: i64, value: DpValue) -> ReportLog {
        ReportLog {
            code: Some("switch_1".into()),
            value: Some(value),
            event_time: Some(ms),
        }
    }

    #[test]
    fn parse_time_epoch_seconds() {
        assert_eq!(parse_time("1700000000", false, NY).unwrap(), 1_700_000_000);
        assert_eq!(parse_time(" 0 ", true, NY).unwrap(), 0);
    }

    #[test]
    fn parse_time_date_only_uses_local_day() {
        // 2024-01-15 00:00 EST == 05:00 UTC
        assert_eq!(parse_time("2024-01-15", false, NY).unwrap(), 1_705_294_800);
        // Last second of the same local day.
        assert_eq!(parse_time("2024-01-15", true, NY).unwrap(), 1_705_294_800 + 86_400 - 1);
    }

    #[test]
    fn parse_time_date_only_across_dst() {
        // 2024-03-10 is 23 hours long in New York.
        let start = parse_time("2024-03-10", false, NY).unwrap();
        let end = parse_time("2024-03-10", true, NY).unwrap();
        assert_eq!(end - start + 1, 23 * 3600);
    }

    #[test]
    fn parse_time_iso_with_and_without_offset() {
        assert_eq!(parse_time("2024-01-15T12:00:00Z", false, NY).unwrap(), 1_705_320_000);
        assert_eq!(parse_time("2024-01-15T07:00:00-05:00", false, NY).unwrap(), 1_705_320_000);
        // Naive → New York (EST, UTC-5).
        assert_eq!(parse_time("2024-01-15T07:00:00", false, NY).unwrap(), 1_705_320_000);
        assert_eq!(parse_time("2024-01-15 07:00", false, NY).unwrap(), 1_705_320_000);
    }

    #[test]
    fn parse_time_rejects_garbage() {
        for bad in ["", "yesterday", "2024-13-01", "-5", "2024/01/15"] {
            let err = parse_time(bad, false, NY).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{bad}");
        }
    }

    #[test]
    fn build_csv_rows_and_quoting_round_trip() {
        let readings = vec![reading(
            1_705_320_000,
            &[("pm25", Decimal::from(12)), ("temperature", Decimal::new(2150, 2))],
        )];
        let logs = vec![
            log(1_705_320_500_999, DpValue::Bool(true)),
            log(1_705_320_600_000, DpValue::Text("say \"hi\", then\nbye".into())),
        ];

        let body = build_csv("AABBCC", &readings, &logs, "switch_1", NY).unwrap();

        let mut rdr = csv::Reader::from_reader(body.as_bytes());
        assert_eq!(
            rdr.headers().unwrap(),
            vec!["source", "time_iso", "time_epoch_s", "sensor_id", "metric", "value"]
        );
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);

        assert_eq!(&rows[0][0], "sensor");
        assert_eq!(&rows[0][1], "2024-01-15T07:00:00-05:00");
        assert_eq!(&rows[0][2], "1705320000");
        assert_eq!(&rows[0][4], "pm25");
        assert_eq!(&rows[1][4], "temperature");
        assert_eq!(&rows[1][5], "21.5");

        assert_eq!(&rows[2][0], "plug");
        assert_eq!(&rows[2][2], "1705320500");
        assert_eq!(&rows[2][5], "true");
        assert_eq!(&rows[3][5], "say \"hi\", then\nbye");
    }

    #[tokio::test]
    async fn export_includes_plug_rows_when_mapped() {
        let store = MemoryStore::new();
        store.put_reading(&reading(1_705_320_000, &[("pm25", Decimal::from(12))])).await.unwrap();
        upsert_mapping(&store, "AABBCC", "plug-1", true, "acct", 1).await.unwrap();
        let plugs = FakePlugCloud {
            logs: vec![log(1_705_320_100_000, DpValue::Bool(true)), log(1, DpValue::Bool(false))],
            ..Default::default()
        };
        let svc = ExportService::new(Arc::new(store), Arc::new(plugs), "switch_1", NY);

        let export = svc.export("aa:bb:cc", "2024-01-15", "2024-01-15").await.unwrap();
        assert_eq!(export.filename, "sensor_AABBCC_2024-01-15_2024-01-15.csv");
        // Header, one sensor row, one plug row inside the range.
        assert_eq!(export.body.lines().count(), 3);
    }

    #[tokio::test]
    async fn export_survives_plug_log_failure() {
        let store = MemoryStore::new();
        store.put_reading(&reading(1_705_320_000, &[("pm25", Decimal::from(12))])).await.unwrap();
        upsert_mapping(&store, "AABBCC", "plug-1", true, "acct", 1).await.unwrap();
        let plugs = FakePlugCloud { fail_logs: true, ..Default::default() };
        let svc = ExportService::new(Arc::new(store), Arc::new(plugs), "switch_1", NY);

        let export = svc.export("AABBCC", "1705300000", "1705400000").await.unwrap();
        assert_eq!(export.body.lines().count(), 2);
    }

    #[tokio::test]
    async fn export_validation_and_not_found() {
        let svc = ExportService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FakePlugCloud::default()),
            "switch_1",
            NY,
        );

        let err = svc.export("AABBCC", "2024-01-16", "2024-01-15").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = svc.export("", "2024-01-15", "2024-01-15").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = svc.export("AABBCC", "2024-01-15", "").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = svc.export("AABBCC", "2024-01-15", "2024-01-15").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
