//! Control-plane request handlers.

use crate::{ApiError, ApiResult, AppState};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use meridian_store::{
    normalize_rrset_name, strip_timestamps, ImportMode, RecordData, SyncCatalog, TemplateRecord,
    Zone,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// GET /health — liveness plus a store ping.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "db": "ok" }))).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "db": "unreachable" })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ZoneRequest {
    #[serde(default)]
    name: String,
}

/// POST /zones
pub async fn create_zone(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ZoneRequest>,
) -> ApiResult<(StatusCode, Json<Zone>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("invalid payload".to_string()));
    }
    let zone = state
        .store
        .create_zone(&req.name)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.events.publish();
    Ok((StatusCode::CREATED, Json(zone)))
}

#[derive(Debug, Deserialize)]
pub struct ListZonesQuery {
    #[serde(default)]
    name: Option<String>,
}

/// GET /zones, optionally filtered by `?name=`.
pub async fn list_zones(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListZonesQuery>,
) -> ApiResult<Json<Vec<Zone>>> {
    if let Some(name) = query.name {
        let zone = state.store.find_zone_by_name(&name).await?;
        return Ok(Json(zone.into_iter().collect()));
    }
    Ok(Json(state.store.list_zones().await?))
}

/// GET /zones/:id — RRSets preloaded.
pub async fn get_zone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Zone>> {
    let zone = state
        .store
        .get_zone_with_rrsets(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(zone))
}

/// DELETE /zones/:id — cascades.
pub async fn delete_zone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_zone(id).await? {
        return Err(ApiError::NotFound);
    }
    state.events.publish();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RrSetRequest {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    rtype: String,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    records: Vec<RecordData>,
}

impl RrSetRequest {
    /// Applies the configured default TTL and expands the CNAME `@`
    /// shorthand to the zone apex before the records hit the store.
    fn prepare(&self, state: &AppState, zone: &Zone) -> ApiResult<(u32, Vec<RecordData>)> {
        if self.rtype.trim().is_empty() {
            return Err(ApiError::BadRequest("invalid payload".to_string()));
        }
        let ttl = if self.ttl == 0 && state.config.default_ttl > 0 {
            state.config.default_ttl
        } else {
            self.ttl
        };

        let mut records = self.records.clone();
        if self.rtype.eq_ignore_ascii_case("CNAME") {
            let apex = normalize_rrset_name("@", &zone.name)?;
            for record in &mut records {
                if record.data.trim() == "@" {
                    record.data = apex.clone();
                }
            }
        }
        Ok((ttl, records))
    }
}

/// POST /zones/:id/rrsets — 409 with the existing id on duplicates.
pub async fn create_rrset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<RrSetRequest>,
) -> ApiResult<(StatusCode, Json<meridian_store::RrSet>)> {
    let zone = state.store.get_zone(id).await?.ok_or(ApiError::NotFound)?;
    let (ttl, records) = req.prepare(&state, &zone)?;

    let set = state
        .store
        .create_rrset(&zone, &req.name, &req.rtype, ttl, records)
        .await?;

    state.store.bump_soa_serial_auto(&zone, &state.soa_policy()).await?;
    state.events.publish();
    Ok((StatusCode::CREATED, Json(set)))
}

/// PUT/PATCH /zones/:id/rrsets/:rid — replaces content.
pub async fn update_rrset(
    State(state): State<Arc<AppState>>,
    Path((id, rid)): Path<(i64, i64)>,
    Json(req): Json<RrSetRequest>,
) -> ApiResult<Json<meridian_store::RrSet>> {
    let zone = state.store.get_zone(id).await?.ok_or(ApiError::NotFound)?;
    let (ttl, records) = req.prepare(&state, &zone)?;

    let set = state
        .store
        .update_rrset(&zone, rid, &req.name, &req.rtype, ttl, records)
        .await?;

    state.store.bump_soa_serial_auto(&zone, &state.soa_policy()).await?;
    state.events.publish();
    Ok(Json(set))
}

/// DELETE /zones/:id/rrsets/:rid
pub async fn delete_rrset(
    State(state): State<Arc<AppState>>,
    Path((id, rid)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    let zone = state.store.get_zone(id).await?.ok_or(ApiError::NotFound)?;
    state.store.delete_rrset(zone.id, rid).await?;
    state.store.bump_soa_serial(zone.id).await?;
    state.events.publish();
    Ok(StatusCode::NO_CONTENT)
}

/// GET /zones/:id/rrsets — with records.
pub async fn list_rrsets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<meridian_store::RrSet>>> {
    if state.store.get_zone(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(state.store.list_rrsets(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    format: Option<String>,
}

/// GET /zones/:id/export?format=json|bind
pub async fn export_zone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let zone = state
        .store
        .get_zone_with_rrsets(id)
        .await?
        .ok_or(ApiError::NotFound)?;

    match query.format.as_deref().unwrap_or("json") {
        "json" => Ok(Json(zone).into_response()),
        "bind" => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            meridian_zone::to_bind(&zone),
        )
            .into_response()),
        other => Err(ApiError::BadRequest(format!(
            "unsupported format {:?}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

/// POST /zones/:id/import?format=json|bind&mode=upsert|replace
pub async fn import_zone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let mode = ImportMode::parse(query.mode.as_deref().unwrap_or("upsert"))
        .ok_or_else(|| ApiError::BadRequest("unsupported mode".to_string()))?;
    let zone = state.store.get_zone(id).await?.ok_or(ApiError::NotFound)?;

    match query.format.as_deref().unwrap_or("json") {
        "json" => {
            let payload: serde_json::Value = serde_json::from_slice(&body)
                .map_err(|_| ApiError::BadRequest("invalid json".to_string()))?;
            meridian_zone::import_json(&state.store, &zone, payload, mode, state.config.default_ttl)
                .await?;
        }
        "bind" => {
            let text = std::str::from_utf8(&body)
                .map_err(|_| ApiError::BadRequest("invalid zone text".to_string()))?;
            meridian_zone::import_bind(&state.store, &zone, text, mode, state.config.default_ttl)
                .await?;
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "unsupported format {:?}",
                other
            )));
        }
    }

    state.store.bump_soa_serial_auto(&zone, &state.soa_policy()).await?;
    state.events.publish();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    records: Vec<TemplateRecord>,
}

/// POST /templates
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TemplateRequest>,
) -> ApiResult<(StatusCode, Json<meridian_store::Template>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("invalid payload".to_string()));
    }
    let template = state
        .store
        .create_template(&req.name, &req.description, req.records)
        .await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// GET /templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<meridian_store::Template>>> {
    Ok(Json(state.store.list_templates().await?))
}

/// GET /templates/:id
pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<meridian_store::Template>> {
    let template = state
        .store
        .get_template(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(template))
}

/// DELETE /templates/:id
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_template(id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /zones/:id/templates/:tid/apply
pub async fn apply_template(
    State(state): State<Arc<AppState>>,
    Path((id, tid)): Path<(i64, i64)>,
) -> ApiResult<Json<serde_json::Value>> {
    let zone = state.store.get_zone(id).await?.ok_or(ApiError::NotFound)?;
    let template = state
        .store
        .get_template(tid)
        .await?
        .ok_or(ApiError::NotFound)?;

    let applied = state.store.apply_template(&zone, &template).await?;
    state.store.bump_soa_serial_auto(&zone, &state.soa_policy()).await?;
    state.events.publish();
    Ok(Json(json!({ "applied": applied })))
}

/// GET /sync/export — the whole catalog for replication.
pub async fn sync_export(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<SyncCatalog>> {
    Ok(Json(state.store.sync_snapshot().await?))
}

/// POST /sync/import — full catalog replace.
pub async fn sync_import(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    let cleaned = strip_timestamps(payload);
    let catalog: SyncCatalog = serde_json::from_value(cleaned)
        .map_err(|_| ApiError::BadRequest("invalid payload".to_string()))?;

    let zones = catalog.zones.len();
    let templates = catalog.templates.len();
    state.store.sync_restore(catalog).await?;
    state.events.publish();

    Ok(Json(json!({
        "status": "ok",
        "zones": zones,
        "templates": templates,
    })))
}
