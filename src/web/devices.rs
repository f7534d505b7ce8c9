use super::AppState;
use crate::codec::Value;
use crate::error::{GatewayError, Result};
use crate::request::{AddressWindow, OperationRequest, Payload, RegisterBank};
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;

async fn list_devices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let devices: Vec<serde_json::Value> = state
        .registry
        .iter()
        .map(|gw| {
            let description = state
                .config
                .device(gw.name())
                .and_then(|d| d.description.clone());
            json!({
                "name": gw.name(),
                "description": description,
                "transport": gw.transport(),
                "health_check": gw.health_check_kind(),
                "resources": gw.resources().len(),
                "status": gw.snapshot(),
            })
        })
        .collect();
    Json(json!(devices))
}

async fn device_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let gw = state.registry.get(&name)?;
    Ok(Json(json!({ "device": gw.name(), "status": gw.snapshot() })))
}

/// SSE stream of status transitions, starting with the current one
async fn device_events(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let gw = state.registry.get(&name)?;
    let stream = WatchStream::new(gw.subscribe())
        .map(|snapshot| Event::default().event("status").json_data(&snapshot));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn probe_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let gw = state.registry.get(&name)?;
    let ok = gw.check_access().await;
    Ok(Json(json!({ "device": gw.name(), "ok": ok, "status": gw.snapshot() })))
}

async fn list_resources(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let gw = state.registry.get(&name)?;
    let resources: Vec<_> = gw.resources().iter().collect();
    Ok(Json(json!(resources)))
}

async fn read_values(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let gw = state.registry.get(&name)?;
    let values = gw.read_all().await?;
    Ok(Json(json!({ "device": gw.name(), "values": values })))
}

async fn read_resource(
    State(state): State<AppState>,
    Path((name, resource)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    let gw = state.registry.get(&name)?;
    let value = gw
        .execute(OperationRequest::read_resource(resource.clone()))
        .await?;
    let unit = gw.resource(&resource).and_then(|r| r.unit.clone());
    Ok(Json(json!({
        "device": gw.name(),
        "resource": resource,
        "value": value,
        "unit": unit,
    })))
}

#[derive(Debug, Deserialize)]
struct WriteBody {
    value: serde_json::Value,
}

async fn write_resource(
    State(state): State<AppState>,
    Path((name, resource)): Path<(String, String)>,
    Json(body): Json<WriteBody>,
) -> Result<Json<serde_json::Value>> {
    let gw = state.registry.get(&name)?;
    let spec = gw
        .resource(&resource)
        .ok_or_else(|| GatewayError::UnknownResource {
            device: name.clone(),
            resource: resource.clone(),
        })?;
    let value = spec.value_from_json(&body.value)?;
    gw.execute(OperationRequest::write_resource(resource.clone(), value.clone()))
        .await?;
    Ok(Json(json!({
        "device": gw.name(),
        "resource": resource,
        "written": value,
    })))
}

#[derive(Debug, Deserialize)]
struct RegisterReadBody {
    #[serde(default)]
    bank: RegisterBank,
    offset: u16,
    count: u16,
}

async fn read_registers(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RegisterReadBody>,
) -> Result<Json<serde_json::Value>> {
    let gw = state.registry.get(&name)?;
    let window = AddressWindow::Registers {
        bank: body.bank,
        offset: body.offset,
        count: body.count,
    };
    let value = gw.execute(OperationRequest::read_window(window)).await?;
    let registers = match value {
        Value::Registers(regs) => regs,
        other => {
            return Err(GatewayError::internal(format!(
                "Raw read produced {:?}",
                other
            )));
        }
    };
    Ok(Json(json!({
        "device": gw.name(),
        "offset": body.offset,
        "registers": registers,
    })))
}

#[derive(Debug, Deserialize)]
struct RegisterWriteBody {
    offset: u16,
    values: Vec<u16>,
}

async fn write_registers(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RegisterWriteBody>,
) -> Result<Json<serde_json::Value>> {
    let gw = state.registry.get(&name)?;
    let count = u16::try_from(body.values.len())
        .map_err(|_| GatewayError::invalid_request("Too many register values"))?;
    let window = AddressWindow::holding(body.offset, count);
    gw.execute(OperationRequest::write_window(
        window,
        Payload::Registers(body.values),
    ))
    .await?;
    Ok(Json(json!({
        "device": gw.name(),
        "offset": body.offset,
        "written": count,
    })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{name}/status", get(device_status))
        .route("/api/devices/{name}/events", get(device_events))
        .route("/api/devices/{name}/probe", post(probe_device))
        .route("/api/devices/{name}/resources", get(list_resources))
        .route("/api/devices/{name}/values", get(read_values))
        .route(
            "/api/devices/{name}/resources/{resource}",
            get(read_resource).put(write_resource),
        )
        .route("/api/devices/{name}/registers/read", post(read_registers))
        .route("/api/devices/{name}/registers/write", post(write_registers))
}
