// Presence queries: membership snapshots and liveness pings, both answered
// as room broadcasts.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{error, warn};

use quillgate_core::messages::NackMessage;
use quillgate_core::services::SocketClient;

use crate::state::{GatewayState, SharedSession};
use crate::submit::send_nack;

pub(crate) const CONNECTED_CLIENTS_EVENT: &str = "connected_clients";
pub(crate) const PONG_EVENT: &str = "pong";

/// Broadcasts the registry's current membership for the caller's room.
pub async fn handle_get_clients(
    state: &GatewayState,
    socket: &Arc<dyn SocketClient>,
    session: &SharedSession,
    client_id: String,
) {
    let session = session.lock().await;

    let Some(room) = session.room(&client_id) else {
        send_nack(state, socket, NackMessage::bad_request("Nonexistent client"));
        return;
    };

    match state
        .client_registry
        .get_clients(&room.tenant_id, &room.document_id)
        .await
    {
        Ok(clients) => {
            let payload = match serde_json::to_value(&clients) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize client list");
                    return;
                }
            };
            if let Err(err) = socket
                .emit_to_room(&room.room_id(), CONNECTED_CLIENTS_EVENT, vec![payload])
                .await
            {
                warn!(
                    tenant_id = %room.tenant_id,
                    document_id = %room.document_id,
                    error = %err,
                    "failed to broadcast client list"
                );
            }
        }
        Err(err) => {
            error!(
                tenant_id = %room.tenant_id,
                document_id = %room.document_id,
                error = %err,
                "failed to fetch connected clients"
            );
        }
    }
}

/// Echoes a liveness ping back to the caller's room.
pub async fn handle_ping(
    state: &GatewayState,
    socket: &Arc<dyn SocketClient>,
    session: &SharedSession,
    client_id: String,
) {
    let session = session.lock().await;

    let Some(room) = session.room(&client_id) else {
        send_nack(state, socket, NackMessage::bad_request("Nonexistent client"));
        return;
    };

    if let Err(err) = socket
        .emit_to_room(
            &room.room_id(),
            PONG_EVENT,
            vec![JsonValue::String(client_id.clone())],
        )
        .await
    {
        warn!(
            tenant_id = %room.tenant_id,
            document_id = %room.document_id,
            client_id = %client_id,
            error = %err,
            "failed to broadcast pong"
        );
    }
}
