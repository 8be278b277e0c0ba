//! `WebSocket` handler for realtime change events.
//!
//! Clients connect to `GET /ws` (optionally `?disaster_id=` to watch a
//! single record). The handler subscribes to the bus first, then sends a
//! `snapshot` frame from a fresh read, then marks the subscription
//! connected and forwards every change event as an `event` frame. Events
//! committed between the subscribe and the read are delivered after the
//! snapshot; the client drops any it already saw by `sequence`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use relief_db::RecordFilter;
use relief_types::{ChangeEvent, Disaster};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::EventScope;
use crate::error::ApiError;
use crate::handlers::parse_disaster_id;
use crate::state::AppState;

/// Query parameters for `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Watch only this disaster.
    pub disaster_id: Option<String>,
}

/// A frame sent to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame<'a> {
    /// Full resynchronization state.
    Snapshot {
        /// Active records in scope.
        disasters: &'a [Disaster],
    },
    /// One change event.
    Event {
        /// The event.
        event: &'a ChangeEvent,
    },
}

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming change events.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = match params.disaster_id.as_deref() {
        Some(id) => EventScope::Disaster(parse_disaster_id(id)?),
        None => EventScope::All,
    };
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, scope)))
}

async fn snapshot(state: &AppState, scope: EventScope) -> Result<Vec<Disaster>, ApiError> {
    match scope {
        EventScope::All => {
            state
                .coordinator
                .list_disasters(&RecordFilter::default())
                .await
        }
        EventScope::Disaster(id) => match state.coordinator.get_disaster(id).await {
            Ok(disaster) => Ok(vec![disaster]),
            Err(ApiError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        },
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &WsFrame<'_>) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize WebSocket frame: {e}");
            return true;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

/// Handle the `WebSocket` lifecycle: subscribe, resynchronize, then
/// forward events until either side goes away.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, scope: EventScope) {
    let mut subscription = state.coordinator.bus().subscribe(scope);
    debug!(?scope, "WebSocket client connected");

    let disasters = match snapshot(&state, scope).await {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "Snapshot read failed, closing WebSocket");
            return;
        }
    };
    if !send_frame(&mut socket, &WsFrame::Snapshot { disasters: &disasters }).await {
        debug!("WebSocket client disconnected (snapshot send failed)");
        return;
    }
    if subscription.mark_connected().is_err() {
        return;
    }

    loop {
        tokio::select! {
            // Next change event from the bus.
            result = subscription.recv() => {
                match result {
                    Ok(event) => {
                        if !send_frame(&mut socket, &WsFrame::Event { event: &event }).await {
                            debug!("WebSocket client disconnected (send failed)");
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Subscription ended, shutting down WebSocket");
                        return;
                    }
                }
            }
            // Check if the client sent a close frame or disconnected.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {
                        // Clients have nothing to say beyond pings.
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use relief_types::{ChangeAction, DisasterId};

    use super::*;

    #[test]
    fn frames_are_tagged_by_type() {
        let snapshot = serde_json::to_value(WsFrame::Snapshot { disasters: &[] }).unwrap_or_default();
        assert_eq!(snapshot["type"], "snapshot");
        assert!(snapshot["disasters"].is_array());

        let event = ChangeEvent::resources(ChangeAction::Create, DisasterId::new(), Vec::new(), Utc::now());
        let frame = serde_json::to_value(WsFrame::Event { event: &event }).unwrap_or_default();
        assert_eq!(frame["type"], "event");
        assert_eq!(frame["event"]["channel"], "resources_updated");
    }
}
