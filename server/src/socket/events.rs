// socket.io wiring: installs the gateway handlers on each incoming socket
// and adapts `SocketRef`/`SocketIo` to the transport seam the gateway
// consumes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use socketioxide::{
    SocketIo,
    extract::{Data, Extension, SocketRef},
};
use tracing::warn;

use quillgate_core::messages::{ConnectRequest, OpBatch};
use quillgate_core::services::SocketClient;

use crate::state::{GatewayState, SharedSession, new_shared_session};
use crate::{connect, disconnect, presence, submit};

pub(crate) fn register_handlers(socket: SocketRef, state: Arc<GatewayState>, io: SocketIo) {
    let client: Arc<dyn SocketClient> = Arc::new(IoSocketClient {
        socket: socket.clone(),
        io,
    });

    socket.extensions.insert(state.clone());
    socket.extensions.insert(new_shared_session());
    socket.extensions.insert(client);
    state.metrics.inc_connections();

    socket.on("connect_document", handle_connect_document);
    socket.on("submitOp", handle_submit_op);
    socket.on("submitSignal", handle_submit_signal);
    socket.on("get_clients", handle_get_clients);
    socket.on("ping", handle_ping);
    socket.on_disconnect(handle_disconnect);
}

async fn handle_connect_document(
    Data(request): Data<ConnectRequest>,
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(session): Extension<SharedSession>,
    Extension(client): Extension<Arc<dyn SocketClient>>,
) {
    connect::handle_connect(state.as_ref(), &client, &session, request).await;
}

async fn handle_submit_op(
    Data((client_id, batches)): Data<(String, Vec<OpBatch>)>,
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(session): Extension<SharedSession>,
    Extension(client): Extension<Arc<dyn SocketClient>>,
) {
    submit::handle_submit_op(state.as_ref(), &client, &session, client_id, batches).await;
}

async fn handle_submit_signal(
    Data((client_id, batches)): Data<(String, Vec<OpBatch>)>,
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(session): Extension<SharedSession>,
    Extension(client): Extension<Arc<dyn SocketClient>>,
) {
    submit::handle_submit_signal(state.as_ref(), &client, &session, client_id, batches).await;
}

async fn handle_get_clients(
    Data(client_id): Data<String>,
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(session): Extension<SharedSession>,
    Extension(client): Extension<Arc<dyn SocketClient>>,
) {
    presence::handle_get_clients(state.as_ref(), &client, &session, client_id).await;
}

async fn handle_ping(
    Data(client_id): Data<String>,
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(session): Extension<SharedSession>,
    Extension(client): Extension<Arc<dyn SocketClient>>,
) {
    presence::handle_ping(state.as_ref(), &client, &session, client_id).await;
}

async fn handle_disconnect(
    Extension(state): Extension<Arc<GatewayState>>,
    Extension(session): Extension<SharedSession>,
    Extension(client): Extension<Arc<dyn SocketClient>>,
) {
    disconnect::handle_disconnect(state.as_ref(), &client, &session).await;
}

struct IoSocketClient {
    socket: SocketRef,
    io: SocketIo,
}

#[async_trait]
impl SocketClient for IoSocketClient {
    fn id(&self) -> String {
        self.socket.id.to_string()
    }

    fn join(&self, room: &str) -> anyhow::Result<()> {
        self.socket.join(room.to_string());
        Ok(())
    }

    fn emit(&self, event: &str, args: Vec<JsonValue>) -> anyhow::Result<()> {
        match args.len() {
            1 => self
                .socket
                .emit(event.to_string(), &args[0])
                .map_err(|err| anyhow::anyhow!("failed to emit {event}: {err:?}")),
            2 => self
                .socket
                .emit(event.to_string(), &(args[0].clone(), args[1].clone()))
                .map_err(|err| anyhow::anyhow!("failed to emit {event}: {err:?}")),
            _ => self
                .socket
                .emit(event.to_string(), &args)
                .map_err(|err| anyhow::anyhow!("failed to emit {event}: {err:?}")),
        }
    }

    async fn emit_to_room(
        &self,
        room: &str,
        event: &str,
        args: Vec<JsonValue>,
    ) -> anyhow::Result<()> {
        let Some(ns) = self.io.of("/") else {
            anyhow::bail!("root namespace is not registered");
        };

        let operators = ns.to(room.to_string());
        match args.len() {
            1 => operators
                .emit(event.to_string(), &args[0])
                .await
                .map_err(|err| anyhow::anyhow!("failed to broadcast {event} to {room}: {err:?}")),
            2 => operators
                .emit(event.to_string(), &(args[0].clone(), args[1].clone()))
                .await
                .map_err(|err| anyhow::anyhow!("failed to broadcast {event} to {room}: {err:?}")),
            _ => operators
                .emit(event.to_string(), &args)
                .await
                .map_err(|err| anyhow::anyhow!("failed to broadcast {event} to {room}: {err:?}")),
        }
    }

    fn disconnect(&self) {
        if let Err(err) = self.socket.clone().disconnect() {
            warn!(error = ?err, "failed to close socket");
        }
    }
}
