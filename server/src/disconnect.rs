// Authoritative teardown on transport close: stop the expiration timer,
// release orderer connections, unregister every hosted clientId and tell
// the room it left.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use quillgate_core::rooms::room_leave_signal;
use quillgate_core::services::SocketClient;

use crate::state::{GatewayState, SharedSession};
use crate::submit::SIGNAL_EVENT;

pub async fn handle_disconnect(
    state: &GatewayState,
    socket: &Arc<dyn SocketClient>,
    session: &SharedSession,
) {
    let (connections, members) = {
        let mut session = session.lock().await;
        session.clear_expiration();
        (session.drain_connections(), session.drain_members())
    };

    for (client_id, connection) in connections {
        info!(
            tenant_id = %connection.tenant_id(),
            document_id = %connection.document_id(),
            client_id = %client_id,
            "releasing orderer connection"
        );
        tokio::spawn(async move {
            if let Err(err) = connection.disconnect().await {
                warn!(client_id = %client_id, error = %err, "orderer disconnect failed");
            }
        });
    }

    let mut removals = Vec::with_capacity(members.len());
    for (client_id, room) in members {
        info!(
            tenant_id = %room.tenant_id,
            document_id = %room.document_id,
            client_id = %client_id,
            "removing client from document"
        );

        match serde_json::to_value(room_leave_signal(&client_id)) {
            Ok(payload) => {
                if let Err(err) = socket
                    .emit_to_room(&room.room_id(), SIGNAL_EVENT, vec![payload])
                    .await
                {
                    warn!(
                        tenant_id = %room.tenant_id,
                        document_id = %room.document_id,
                        error = %err,
                        "failed to announce room leave"
                    );
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize leave signal"),
        }

        let registry = state.client_registry.clone();
        removals.push(async move {
            if let Err(err) = registry
                .remove_client(&room.tenant_id, &room.document_id, &client_id)
                .await
            {
                warn!(
                    tenant_id = %room.tenant_id,
                    document_id = %room.document_id,
                    client_id = %client_id,
                    error = %err,
                    "failed to remove client from registry"
                );
            }
        });
    }

    // Removals complete before the handler returns, so graceful shutdown
    // can observe a drained registry.
    join_all(removals).await;

    state.metrics.dec_connections();
}
