//! Real-time hub endpoint.
//!
//! Clients join a server group with `GET /hubs/monitoring?serverName=` and
//! receive every event published to that group as a JSON text frame. The
//! latest retained tick, if any, is sent right after joining.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use common::errors::AppError;
use common::models::{server_key, MonitorEvent};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubQuery {
    pub server_name: Option<String>,
}

pub async fn monitoring_hub(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HubQuery>,
) -> Result<Response, AppError> {
    let server_name = query
        .server_name
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::Validation("serverName is required".into()))?;
    let key = server_key(&server_name);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, key)))
}

async fn handle_socket(socket: WebSocket, state: AppState, key: String) {
    let hub = state.pipeline.hub.clone();
    let mut rx = hub.subscribe(&key).await;
    let (mut sender, mut receiver) = socket.split();
    let subscribers = hub.subscriber_count(&key).await;
    debug!(group = %key, subscribers, "Hub client joined");

    if let Some(tick) = state.pipeline.history.latest(&key).await {
        let event = MonitorEvent::MetricsUpdated((*tick).clone());
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(group = %key, skipped, "Hub client lagging, events skipped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(rx);
    debug!(group = %key, "Hub client left");
}

async fn send_event<S>(sender: &mut S, event: &MonitorEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Failed to serialize hub event");
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
