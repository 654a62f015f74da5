pub mod dto;
pub mod errors;
pub mod handlers;
pub mod inbound;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{
    config::Config,
    control::ControlService,
    db::Store,
    export::ExportService,
    qingping::SensorCloud,
    registry::RegistryService,
    sensors::SensorService,
    tuya::PlugCloud,
};

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub sensors: SensorService,
    pub registry: RegistryService,
    pub export: ExportService,
    pub plugs: Arc<dyn PlugCloud>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        sensor_cloud: Arc<dyn SensorCloud>,
        plugs: Arc<dyn PlugCloud>,
    ) -> Self {
        let control = ControlService::new(store.clone(), plugs.clone(), config.plug_rule.clone());

        Self {
            sensors: SensorService::new(store.clone(), control, config.qingping_webhook_secret.clone()),
            registry: RegistryService::new(
                store.clone(),
                sensor_cloud,
                plugs.clone(),
                config.shared_account_id.clone(),
            ),
            export: ExportService::new(store, plugs.clone(), config.tuya_switch_code.clone(), config.local_tz),
            plugs,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route(
            "/webhooks/qingping",
            get(handlers::webhook_alive).post(handlers::qingping_webhook),
        )
        .route(
            "/mappings",
            get(handlers::list_mappings).post(handlers::save_mapping),
        )
        .route("/mappings/{sensor_id}", delete(handlers::delete_mapping))
        .route(
            "/qingping/devices",
            get(handlers::list_qingping_devices).post(handlers::bind_qingping_device),
        )
        .route("/qingping/devices/sync", post(handlers::sync_qingping_devices))
        .route("/tuya/plugs", get(handlers::list_tuya_plugs))
        .route("/tuya/plugs/sync", post(handlers::sync_tuya_plugs))
        .route("/export/csv", get(handlers::export_csv))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
