mod firmware;

use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use climate_common::{
    types::ReadingPayload, API_DATA_ROUTE, API_FIRMWARE_CHECK_ROUTE, API_FIRMWARE_DOWNLOAD_ROUTE,
    API_REGISTER_ROUTE, MODEL_TYPE,
};

use crate::firmware::{CheckQuery, DownloadQuery, FirmwareImage};

#[derive(Clone)]
struct AppState {
    image: Option<Arc<FirmwareImage>>,
    devices: Arc<Mutex<BTreeMap<String, DeviceRecord>>>,
}

/// Register and status-notification body. Status notifications carry the
/// version being applied.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceReport {
    device_id: String,
    model_type: String,
    firmware_version: String,
    #[serde(default)]
    target_version: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRecord {
    device_id: String,
    model_type: String,
    firmware_version: String,
    last_seen: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    update_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_reading: Option<ReadingPayload>,
}

impl DeviceRecord {
    fn new(device_id: &str, model_type: &str, firmware_version: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            model_type: model_type.to_string(),
            firmware_version: firmware_version.to_string(),
            last_seen: chrono::Utc::now().timestamp(),
            update_status: None,
            last_reading: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let image = match std::env::var("FIRMWARE_IMAGE") {
        Ok(path) => {
            let version = std::env::var("FIRMWARE_VERSION")
                .context("FIRMWARE_VERSION must be set alongside FIRMWARE_IMAGE")?;
            let model_type =
                std::env::var("FIRMWARE_MODEL").unwrap_or_else(|_| MODEL_TYPE.to_string());
            let image = FirmwareImage::load(&PathBuf::from(path), &version, &model_type)?;
            info!(
                "serving firmware {} for {} ({} bytes, sha256 {})",
                image.version,
                image.model_type,
                image.size(),
                image.sha256
            );
            Some(Arc::new(image))
        }
        Err(_) => {
            warn!("FIRMWARE_IMAGE not set; every node will be told it is up to date");
            None
        }
    };

    let app_state = AppState {
        image,
        devices: Arc::new(Mutex::new(BTreeMap::new())),
    };

    let app = Router::new()
        .route(API_FIRMWARE_CHECK_ROUTE, get(handle_firmware_check))
        .route(API_FIRMWARE_DOWNLOAD_ROUTE, get(handle_firmware_download))
        .route(API_REGISTER_ROUTE, post(handle_register))
        .route(API_DATA_ROUTE, post(handle_reading))
        .route("/api/devices", get(handle_list_devices))
        .with_state(app_state);

    let port = std::env::var("DEVSERVER_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind dev server at {addr}"))?;

    info!("dev server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_firmware_check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> impl IntoResponse {
    let response = firmware::check(state.image.as_deref(), &query);
    info!(
        "firmware check from {} ({} {}): update_available={}",
        query.device_id, query.model_type, query.current_version, response.update_available
    );
    Json(response)
}

async fn handle_firmware_download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> axum::response::Response {
    let Some(image) = firmware::select(state.image.as_deref(), &query) else {
        warn!(
            "download of unknown firmware {} for {} requested by {}",
            query.version, query.model_type, query.device_id
        );
        return error_response(StatusCode::NOT_FOUND, "Firmware not found");
    };

    info!(
        "sending firmware {} ({} bytes) to {}",
        image.version,
        image.size(),
        query.device_id
    );
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        image.bytes.clone(),
    )
        .into_response()
}

async fn handle_register(
    State(state): State<AppState>,
    Json(report): Json<DeviceReport>,
) -> impl IntoResponse {
    let mut devices = state.devices.lock().await;
    let record = devices
        .entry(report.device_id.clone())
        .or_insert_with(|| {
            DeviceRecord::new(&report.device_id, &report.model_type, &report.firmware_version)
        });
    record.model_type = report.model_type.clone();
    record.firmware_version = report.firmware_version.clone();
    record.last_seen = chrono::Utc::now().timestamp();

    match (&report.status, &report.target_version) {
        (Some(status), Some(target)) => {
            info!(
                "{} reports update status `{status}` towards {target}",
                report.device_id
            );
            record.update_status = Some(format!("{status} {target}"));
        }
        _ => info!(
            "registered {} ({} {})",
            report.device_id, report.model_type, report.firmware_version
        ),
    }

    StatusCode::CREATED
}

async fn handle_reading(
    State(state): State<AppState>,
    Json(reading): Json<ReadingPayload>,
) -> impl IntoResponse {
    info!(
        "{}: {:.1}°C {:.1}% battery {}",
        reading.device_id,
        reading.temperature,
        reading.humidity,
        reading
            .battery_percentage
            .map_or_else(|| "n/a".to_string(), |pct| format!("{pct}%"))
    );

    let mut devices = state.devices.lock().await;
    let record = devices
        .entry(reading.device_id.clone())
        .or_insert_with(|| {
            DeviceRecord::new(&reading.device_id, &reading.model_type, &reading.firmware_version)
        });
    record.firmware_version = reading.firmware_version.clone();
    record.last_seen = chrono::Utc::now().timestamp();
    record.last_reading = Some(reading);

    StatusCode::CREATED
}

async fn handle_list_devices(State(state): State<AppState>) -> impl IntoResponse {
    let devices = state.devices.lock().await;
    Json(devices.values().cloned().collect::<Vec<_>>())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
