use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use utoipa::OpenApi;

use super::{
    dto::{
        BindDeviceRequest, BindDeviceResponse, DeviceListResponse, ErrorResponse, ExportParams,
        MappingDeletedResponse, MappingListResponse, MappingRequest, MappingSavedResponse,
        PlugDto, PlugListResponse, StatusResponse, SyncResponse,
    },
    errors::AppError,
    inbound, AppState,
};
use crate::{
    db::models::{DeviceRegistryEntry, SensorPlugMapping, Vendor},
    error::Error,
    qingping::models::WebhookPush,
    registry::{normalize_bool, SyncSummary},
};

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = StatusResponse)),
    tag = "health"
)]
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse::new("ok"))
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// Liveness check used by the Qingping console when registering the webhook.
#[utoipa::path(
    get,
    path = "/webhooks/qingping",
    responses((status = 200, description = "Webhook endpoint reachable", body = StatusResponse)),
    tag = "webhooks"
)]
pub async fn webhook_alive() -> Json<StatusResponse> {
    Json(StatusResponse::new("alive"))
}

/// Receive a signed Qingping push, store its readings and drive the mapped plug.
#[utoipa::path(
    post,
    path = "/webhooks/qingping",
    request_body(
        content = String,
        description = "Qingping push JSON, plain or wrapped in a gateway envelope",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Readings stored", body = StatusResponse),
        (status = 400, description = "Malformed body or missing info.mac", body = ErrorResponse),
        (status = 401, description = "Signature verification failed", body = ErrorResponse),
        (status = 500, description = "Readings could not be stored", body = ErrorResponse),
    ),
    tag = "webhooks"
)]
pub async fn qingping_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StatusResponse>, AppError> {
    let push = WebhookPush::from_value(inbound::payload(&body)?);
    state
        .sensors
        .handle_push(&push, chrono::Utc::now().timestamp())
        .await?;
    Ok(Json(StatusResponse::new("ok")))
}

// ---------------------------------------------------------------------------
// Mappings
// ---------------------------------------------------------------------------

/// List the sensor → plug mappings of the shared account.
#[utoipa::path(
    get,
    path = "/mappings",
    responses(
        (status = 200, description = "Mappings", body = MappingListResponse),
        (status = 500, description = "Store failure", body = ErrorResponse),
    ),
    tag = "mappings"
)]
pub async fn list_mappings(State(state): State<AppState>) -> Result<Json<MappingListResponse>, AppError> {
    let mappings = state.registry.list_mappings().await?;
    Ok(Json(MappingListResponse {
        status: "ok".to_owned(),
        account_id: state.registry.account_id().to_owned(),
        count: mappings.len(),
        mappings,
    }))
}

/// Save a mapping, or remove it when `delete` is set.
#[utoipa::path(
    post,
    path = "/mappings",
    request_body = MappingRequest,
    responses(
        (status = 200, description = "Mapping saved; a deletion answers with MappingDeletedResponse", body = MappingSavedResponse),
        (status = 400, description = "Missing sensor or plug id", body = ErrorResponse),
    ),
    tag = "mappings"
)]
pub async fn save_mapping(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let req: MappingRequest = inbound::decode(&body)?;
    let sensor_id = req.sensor_id.as_deref().unwrap_or_default();

    if normalize_bool(req.delete.as_ref(), false) {
        let (sensor_id, _) = state.registry.delete_mapping(sensor_id).await?;
        return Ok(Json(MappingDeletedResponse {
            status: "ok".to_owned(),
            message: "deleted".to_owned(),
            sensor_id,
        })
        .into_response());
    }

    let mapping = state
        .registry
        .save_mapping(
            sensor_id,
            req.plug_device_id.as_deref().unwrap_or_default(),
            normalize_bool(req.enabled.as_ref(), true),
        )
        .await?;
    Ok(Json(MappingSavedResponse {
        status: "ok".to_owned(),
        mapping,
    })
    .into_response())
}

#[utoipa::path(
    delete,
    path = "/mappings/{sensor_id}",
    params(("sensor_id" = String, Path, description = "Sensor MAC, separators optional")),
    responses(
        (status = 200, description = "Mapping deleted", body = MappingDeletedResponse),
        (status = 404, description = "No mapping for this sensor", body = ErrorResponse),
    ),
    tag = "mappings"
)]
pub async fn delete_mapping(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
) -> Result<Json<MappingDeletedResponse>, AppError> {
    let (sensor_id, existed) = state.registry.delete_mapping(&sensor_id).await?;
    if !existed {
        return Err(Error::NotFound(format!("No mapping for sensor {sensor_id}")).into());
    }
    Ok(Json(MappingDeletedResponse {
        status: "ok".to_owned(),
        message: "deleted".to_owned(),
        sensor_id,
    }))
}

// ---------------------------------------------------------------------------
// Qingping devices
// ---------------------------------------------------------------------------

/// Bind a Qingping device to the app and record it in the registry.
#[utoipa::path(
    post,
    path = "/qingping/devices",
    request_body = BindDeviceRequest,
    responses(
        (status = 200, description = "Device bound", body = BindDeviceResponse),
        (status = 400, description = "Missing device_token or product_id", body = ErrorResponse),
        (status = 502, description = "Qingping rejected the bind", body = ErrorResponse),
    ),
    tag = "qingping"
)]
pub async fn bind_qingping_device(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BindDeviceResponse>, AppError> {
    let req: BindDeviceRequest = inbound::decode(&body)?;
    let product_id = req
        .product_id()
        .ok_or_else(|| Error::validation("Missing or invalid product_id"))?;

    let (device, bound) = state.registry.bind_sensor(&req.device_token, product_id).await?;
    Ok(Json(BindDeviceResponse {
        status: "ok".to_owned(),
        device,
        raw: bound.raw,
    }))
}

#[utoipa::path(
    get,
    path = "/qingping/devices",
    responses((status = 200, description = "Registered Qingping devices", body = DeviceListResponse)),
    tag = "qingping"
)]
pub async fn list_qingping_devices(State(state): State<AppState>) -> Result<Json<DeviceListResponse>, AppError> {
    device_list(&state, Vendor::Qingping).await
}

/// Reconcile the local Qingping registry with the devices bound to the app.
#[utoipa::path(
    post,
    path = "/qingping/devices/sync",
    responses(
        (status = 200, description = "Registry reconciled", body = SyncResponse),
        (status = 502, description = "Qingping listing failed", body = ErrorResponse),
    ),
    tag = "qingping"
)]
pub async fn sync_qingping_devices(State(state): State<AppState>) -> Result<Json<SyncResponse>, AppError> {
    let summary = state.registry.sync_sensors().await?;
    Ok(Json(SyncResponse {
        status: "ok".to_owned(),
        vendor: Vendor::Qingping,
        summary,
    }))
}

// ---------------------------------------------------------------------------
// Tuya plugs
// ---------------------------------------------------------------------------

/// Plugs of the configured Tuya space, sorted by name.
#[utoipa::path(
    get,
    path = "/tuya/plugs",
    responses(
        (status = 200, description = "Plugs", body = PlugListResponse),
        (status = 400, description = "TUYA_SPACE_ID not configured", body = ErrorResponse),
        (status = 502, description = "Tuya listing failed", body = ErrorResponse),
    ),
    tag = "tuya"
)]
pub async fn list_tuya_plugs(State(state): State<AppState>) -> Result<Json<PlugListResponse>, AppError> {
    let mut plugs: Vec<PlugDto> = state
        .plugs
        .list_plugs()
        .await?
        .into_iter()
        .map(PlugDto::from)
        .collect();
    plugs.sort_by_cached_key(|p| p.name.as_deref().unwrap_or_default().to_lowercase());

    Ok(Json(PlugListResponse {
        status: "ok".to_owned(),
        count: plugs.len(),
        plugs,
    }))
}

/// Reconcile the local Tuya registry with the plugs of the configured space.
#[utoipa::path(
    post,
    path = "/tuya/plugs/sync",
    responses(
        (status = 200, description = "Registry reconciled", body = SyncResponse),
        (status = 400, description = "TUYA_SPACE_ID not configured", body = ErrorResponse),
        (status = 502, description = "Tuya listing failed", body = ErrorResponse),
    ),
    tag = "tuya"
)]
pub async fn sync_tuya_plugs(State(state): State<AppState>) -> Result<Json<SyncResponse>, AppError> {
    let summary = state.registry.sync_plugs().await?;
    Ok(Json(SyncResponse {
        status: "ok".to_owned(),
        vendor: Vendor::Tuya,
        summary,
    }))
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Download a sensor's readings, plus the mapped plug's switch history, as CSV.
#[utoipa::path(
    get,
    path = "/export/csv",
    params(ExportParams),
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv", body = String),
        (status = 400, description = "Missing or invalid parameters", body = ErrorResponse),
        (status = 404, description = "No readings in range", body = ErrorResponse),
    ),
    tag = "export"
)]
pub async fn export_csv(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> Result<Response, AppError> {
    let export = state
        .export
        .export(&params.sensor_id, &params.start_time, &params.end_time)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export.filename),
            ),
        ],
        export.body,
    )
        .into_response())
}

async fn device_list(state: &AppState, vendor: Vendor) -> Result<Json<DeviceListResponse>, AppError> {
    let devices = state.registry.list_devices(vendor).await?;
    Ok(Json(DeviceListResponse {
        status: "ok".to_owned(),
        account_id: state.registry.account_id().to_owned(),
        count: devices.len(),
        devices,
    }))
}

// ---------------------------------------------------------------------------
// OpenAPI
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        webhook_alive,
        qingping_webhook,
        list_mappings,
        save_mapping,
        delete_mapping,
        bind_qingping_device,
        list_qingping_devices,
        sync_qingping_devices,
        list_tuya_plugs,
        sync_tuya_plugs,
        export_csv,
    ),
    components(schemas(
        StatusResponse,
        ErrorResponse,
        MappingRequest,
        MappingListResponse,
        MappingSavedResponse,
        MappingDeletedResponse,
        BindDeviceRequest,
        BindDeviceResponse,
        DeviceListResponse,
        SyncResponse,
        SyncSummary,
        PlugDto,
        PlugListResponse,
        SensorPlugMapping,
        DeviceRegistryEntry,
        Vendor,
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "webhooks", description = "Inbound vendor pushes"),
        (name = "mappings", description = "Sensor → plug mappings"),
        (name = "qingping", description = "Qingping device registry"),
        (name = "tuya", description = "Tuya plugs"),
        (name = "export", description = "Reading export"),
    ),
    info(
        title = "Qingping–Tuya Bridge API",
        version = "0.1.0",
        description = "Sensor webhooks, sensor → plug mappings, device registries and CSV export"
    )
)]
pub struct ApiDoc;
