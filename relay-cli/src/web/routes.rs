//! Route handlers for the snapshot server.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use relay_core::types::icao_to_string;

use crate::web::kml::{render_kml, KML_CONTENT_TYPE};
use crate::web::AppState;

/// GET / and GET /tracks.kml: the current snapshot as KML.
///
/// Answers 503 while the client has no live upstream connection.
pub async fn tracks_kml(State(state): State<Arc<AppState>>) -> Response {
    if !state.client.is_connected() {
        return (StatusCode::SERVICE_UNAVAILABLE, "relay not connected").into_response();
    }

    let body = render_kml(&state.client.get_current_tracks());
    ([(header::CONTENT_TYPE, KML_CONTENT_TYPE)], body).into_response()
}

/// GET /api/tracks: the current snapshot as JSON, ordered by address.
pub async fn api_tracks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut tracks: Vec<_> = state.client.get_current_tracks().into_iter().collect();
    tracks.sort_by_key(|(icao, _)| *icao);

    let aircraft: Vec<Value> = tracks
        .into_iter()
        .map(|(icao, t)| {
            json!({
                "icao": icao_to_string(&icao),
                "sequence_id": t.sequence_id,
                "last_seen": t.last_seen,
                "lat": t.latitude,
                "lon": t.longitude,
                "alt": t.altitude,
                "velocity": t.velocity,
                "heading": t.heading,
                "vert_rate": t.vertical_rate,
                "squawk": t.squawk,
                "flight_id": t.flight_id,
            })
        })
        .collect();

    Json(json!({
        "count": aircraft.len(),
        "aircraft": aircraft,
    }))
}

/// GET /api/status: connection state and client counters.
pub async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.client.stats();
    Json(json!({
        "state": state.client.state().to_string(),
        "tracks": state.client.track_count(),
        "records_applied": stats.records_applied,
        "protocol_errors": stats.protocol_errors,
        "connects": stats.connects,
        "culled": stats.culled,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
