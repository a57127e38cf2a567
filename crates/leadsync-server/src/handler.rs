use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use leadsync_fabric::EventKind;
use leadsync_pipeline::StatsSnapshot;
use leadsync_types::{CanonicalId, CanonicalLead, DeadLetterEntry, Document, SourceId};

use crate::auth::{Action, Credentials, Identity};
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Default page size for `GET /v1/leads`.
pub const DEFAULT_LIST_LIMIT: usize = 50;

async fn authorize(state: &AppState, headers: &HeaderMap, action: Action) -> ServerResult<Identity> {
    let credentials = Credentials::from_headers(headers)?;
    let identity = state.auth.authenticate(&credentials).await?;
    if !state.auth.authorize(&identity, &action).await? {
        return Err(ServerError::AuthorizationDenied {
            action: action.to_string(),
        });
    }
    Ok(identity)
}

/// Health check handler.
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Info handler.
pub async fn info_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "leadsync",
        "version": env!("CARGO_PKG_VERSION"),
        "sources": state.stats.sources().collect::<Vec<_>>(),
    }))
}

fn default_kind() -> EventKind {
    EventKind::Created
}

/// Body of `POST /v1/sources/:source/events`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    /// The record's id in its source store.
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: EventKind,
    /// The full source document.
    pub document: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub sequence: u64,
    pub event_id: String,
}

/// Publish a source event into the event layer.
pub async fn ingest_handler(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> ServerResult<(StatusCode, Json<IngestResponse>)> {
    // Authorized before the source is resolved: a caller without access
    // sees the same error for every source name.
    let identity = authorize(&state, &headers, Action::Ingest {
        source: source.clone(),
    })
    .await?;
    let source = SourceId::new(source.as_str())
        .ok()
        .filter(|s| state.stats.contains(s))
        .ok_or(ServerError::UnknownSource(source))?;

    let body = serde_json::to_vec(&request.document)
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    let event = state
        .fabric
        .publish(source, request.kind, request.id, body)?;

    debug!(
        id = %event.id(),
        source = %event.source,
        record_id = %event.record_id,
        identity = %identity.name,
        "event ingested"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            sequence: event.sequence,
            event_id: event.id().to_string(),
        }),
    ))
}

/// A canonical lead as served over HTTP.
#[derive(Clone, Debug, Serialize)]
pub struct LeadView {
    pub id: CanonicalId,
    pub document: Document,
}

impl From<CanonicalLead> for LeadView {
    fn from(lead: CanonicalLead) -> Self {
        Self {
            id: lead.id,
            document: lead.to_document(),
        }
    }
}

pub async fn get_lead_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ServerResult<Json<LeadView>> {
    authorize(&state, &headers, Action::ReadLeads).await?;
    let canonical_id =
        CanonicalId::from_hex(&id).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    let lead = state
        .store
        .get(&canonical_id)
        .await?
        .ok_or(ServerError::LeadNotFound(id))?;
    Ok(Json(lead.into()))
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

pub async fn list_leads_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> ServerResult<Json<Value>> {
    authorize(&state, &headers, Action::ReadLeads).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(state.max_list_limit);
    let leads: Vec<LeadView> = state
        .store
        .list(limit)
        .await?
        .into_iter()
        .map(LeadView::from)
        .collect();
    let total = state.store.len().await?;
    Ok(Json(json!({ "total": total, "leads": leads })))
}

pub async fn dead_letters_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ServerResult<Json<Vec<DeadLetterEntry>>> {
    authorize(&state, &headers, Action::ReadDeadLetters).await?;
    Ok(Json(state.dead_letters.entries().await?))
}

#[derive(Clone, Debug, Serialize)]
pub struct StatsResponse {
    pub sources: BTreeMap<SourceId, StatsSnapshot>,
    pub total: StatsSnapshot,
}

pub async fn stats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ServerResult<Json<StatsResponse>> {
    authorize(&state, &headers, Action::ReadStats).await?;
    Ok(Json(StatsResponse {
        sources: state.stats.snapshot(),
        total: state.stats.total(),
    }))
}
