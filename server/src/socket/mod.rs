mod events;

use std::sync::Arc;

use socketioxide::{SocketIo, extract::SocketRef, layer::SocketIoLayer};

use crate::state::GatewayState;

/// Builds the socket.io layer and registers the gateway namespace. The
/// embedding process mounts the returned layer on its HTTP stack.
pub fn build_socket_layer(state: Arc<GatewayState>) -> (SocketIoLayer, SocketIo) {
    let (layer, io) = SocketIo::builder()
        .max_payload(state.config.max_payload_bytes)
        .build_layer();

    let handle = io.clone();
    let _ = io.ns("/", move |socket: SocketRef| {
        events::register_handlers(socket, state.clone(), handle.clone());
    });

    (layer, io)
}
