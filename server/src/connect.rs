// The `connect_document` pipeline: throttle, token verification, room
// admission, registry bookkeeping and orderer attachment, in that order.
// Every failure arc answers with `connect_document_error` and leaves the
// socket open so the client may retry.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use quillgate_core::claims::{
    ScopeType, can_summarize, can_write, validate_token_claims, validate_token_claims_expiration,
};
use quillgate_core::messages::{
    ClientDescriptor, ConnectRequest, Connected, ConnectionMode, READER_MAX_MESSAGE_SIZE,
    SUMMARIZER_CLIENT_TYPE, ServiceConfiguration,
};
use quillgate_core::protocol::{select_protocol_version, supported_versions};
use quillgate_core::rooms::{Room, client_room_id, room_join_signal};
use quillgate_core::services::{OrdererConnection, SocketClient};

use crate::error::GatewayError;
use crate::state::{GatewayState, SharedSession, SocketSession};
use crate::submit::SIGNAL_EVENT;
use crate::throttle::{check_throttle, connect_throttle_key};

pub(crate) const CONNECT_SUCCESS_EVENT: &str = "connect_document_success";
pub(crate) const CONNECT_ERROR_EVENT: &str = "connect_document_error";

/// Runs the full connect pipeline for one `connect_document` request and
/// reports the outcome on the socket.
pub async fn handle_connect(
    state: &GatewayState,
    socket: &Arc<dyn SocketClient>,
    session: &SharedSession,
    request: ConnectRequest,
) {
    let mut guard = session.lock().await;

    match establish(state, socket, session, &mut guard, request).await {
        Ok((connected, room, descriptor)) => {
            drop(guard);

            let client_id = connected.client_id.clone();
            match serde_json::to_value(&connected) {
                Ok(payload) => {
                    if let Err(err) = socket.emit(CONNECT_SUCCESS_EVENT, vec![payload]) {
                        warn!(
                            tenant_id = %room.tenant_id,
                            document_id = %room.document_id,
                            error = %err,
                            "failed to send connect response"
                        );
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize connect response"),
            }

            info!(
                tenant_id = %room.tenant_id,
                document_id = %room.document_id,
                client_id = %client_id,
                mode = ?connected.mode,
                "client connected to document"
            );

            announce_join(socket, &room, &client_id, &descriptor).await;
        }
        Err(err) => {
            info!(
                code = err.code(),
                message = %err,
                "connect_document rejected"
            );
            match serde_json::to_value(err.body()) {
                Ok(payload) => {
                    if let Err(err) = socket.emit(CONNECT_ERROR_EVENT, vec![payload]) {
                        warn!(error = %err, "failed to send connect error");
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize connect error"),
            }
        }
    }
}

async fn establish(
    state: &GatewayState,
    socket: &Arc<dyn SocketClient>,
    shared: &SharedSession,
    session: &mut SocketSession,
    request: ConnectRequest,
) -> Result<(Connected, Room, ClientDescriptor), GatewayError> {
    check_throttle(
        state.connect_throttler.as_ref(),
        &connect_throttle_key(&request.tenant_id),
    )?;

    let token = request
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| GatewayError::forbidden("Must provide an authorization token"))?;

    let claims = validate_token_claims(token, &request.id, &request.tenant_id)?;

    state
        .tenant_manager
        .verify_token(&claims.tenant_id, token)
        .await?;

    let client_id = Uuid::new_v4().to_string();
    let room = Room::new(claims.tenant_id.clone(), claims.document_id.clone());

    socket
        .join(&room.room_id())
        .map_err(|err| internal_fault(&room, err))?;
    socket
        .join(&client_room_id(&client_id))
        .map_err(|err| internal_fault(&room, err))?;

    // The client's asserted identity and scopes are never trusted; both are
    // rewritten from the verified claims. Summary-write survives only for
    // actual summarizer clients.
    let mut descriptor = request.client.unwrap_or_default();
    let is_summarizer = descriptor.client_type() == Some(SUMMARIZER_CLIENT_TYPE);
    let effective_scopes: Vec<ScopeType> = claims
        .scopes
        .iter()
        .copied()
        .filter(|scope| *scope != ScopeType::SummaryWrite || is_summarizer)
        .collect();
    let scope_set: HashSet<ScopeType> = effective_scopes.iter().copied().collect();

    descriptor.user = Some(claims.user.clone());
    descriptor.scopes = effective_scopes
        .iter()
        .map(|scope| scope.as_str().to_string())
        .collect();
    let timestamp = Utc::now().timestamp_millis();
    descriptor.timestamp = Some(timestamp);

    let version = select_protocol_version(&request.versions).ok_or_else(|| {
        GatewayError::bad_request(format!(
            "Unsupported client protocol. Server: [{}]. Client: {}",
            supported_versions().join(","),
            serde_json::to_string(&request.versions).unwrap_or_else(|_| "[]".to_string()),
        ))
    })?;

    let initial_clients = state
        .client_registry
        .get_clients(&room.tenant_id, &room.document_id)
        .await
        .map_err(|err| internal_fault(&room, err))?;
    if initial_clients.len() >= state.config.max_clients_per_document {
        return Err(
            GatewayError::new(429, "Too Many Clients Connected to Document").with_retry_after(300),
        );
    }

    state
        .client_registry
        .add_client(&room.tenant_id, &room.document_id, &client_id, &descriptor)
        .await
        .map_err(|err| internal_fault(&room, err))?;

    if state.config.token_expiry_enabled {
        let remaining_ms =
            validate_token_claims_expiration(&claims, state.config.max_token_lifetime_secs)?;
        session.arm_expiration(socket.clone(), remaining_ms);
    }

    let writer = request.mode == ConnectionMode::Write
        && (can_write(&effective_scopes) || can_summarize(&effective_scopes));

    let (mode, max_message_size, service_configuration) = if writer {
        let orderer = state
            .orderer_manager
            .get_orderer(&room.tenant_id, &room.document_id)
            .await
            .map_err(|err| internal_fault(&room, err))?;
        let connection = orderer
            .connect(socket.clone(), &client_id, &descriptor)
            .await
            .map_err(|err| internal_fault(&room, err))?;

        watch_connection_faults(&connection, socket.clone(), shared.clone(), room.clone());
        start_orderer_handshake(&connection, &room);

        let max_message_size = connection.max_message_size();
        let service_configuration = connection.service_configuration();
        session.attach_connection(&client_id, connection);
        (ConnectionMode::Write, max_message_size, service_configuration)
    } else {
        (
            ConnectionMode::Read,
            READER_MAX_MESSAGE_SIZE,
            ServiceConfiguration::default(),
        )
    };

    session.admit(&client_id, room.clone(), scope_set);

    let connected = Connected {
        claims,
        client_id,
        existing: true,
        mode,
        max_message_size,
        service_configuration,
        initial_clients,
        initial_messages: Vec::new(),
        initial_signals: Vec::new(),
        supported_versions: supported_versions(),
        version,
        timestamp,
    };

    Ok((connected, room, descriptor))
}

fn internal_fault(room: &Room, err: anyhow::Error) -> GatewayError {
    error!(
        tenant_id = %room.tenant_id,
        document_id = %room.document_id,
        error = %err,
        "failed to connect client to document"
    );
    GatewayError::internal(err)
}

/// Arms the one-shot fault listener for a writer's orderer connection. A
/// fault tears the whole socket down; the disconnect handler then drains
/// the remaining state.
fn watch_connection_faults(
    connection: &Arc<dyn OrdererConnection>,
    socket: Arc<dyn SocketClient>,
    session: SharedSession,
    room: Room,
) {
    let Some(receiver) = connection.take_fault_receiver() else {
        return;
    };

    tokio::spawn(async move {
        if let Ok(fault) = receiver.await {
            error!(
                tenant_id = %room.tenant_id,
                document_id = %room.document_id,
                error = %fault,
                "orderer connection error, closing socket"
            );
            session.lock().await.clear_expiration();
            socket.disconnect();
        }
    });
}

/// Kicks off the orderer handshake without blocking the connect response.
/// Acks travel the orderer's own path; a rejection here is only logged.
fn start_orderer_handshake(connection: &Arc<dyn OrdererConnection>, room: &Room) {
    let connection = connection.clone();
    let room = room.clone();
    tokio::spawn(async move {
        if let Err(err) = connection.connect().await {
            error!(
                tenant_id = %room.tenant_id,
                document_id = %room.document_id,
                error = %err,
                "orderer connection handshake failed"
            );
        }
    });
}

async fn announce_join(
    socket: &Arc<dyn SocketClient>,
    room: &Room,
    client_id: &str,
    descriptor: &ClientDescriptor,
) {
    let signal = room_join_signal(client_id, descriptor);
    let payload = match serde_json::to_value(&signal) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize join signal");
            return;
        }
    };

    if let Err(err) = socket
        .emit_to_room(&room.room_id(), SIGNAL_EVENT, vec![payload])
        .await
    {
        warn!(
            tenant_id = %room.tenant_id,
            document_id = %room.document_id,
            error = %err,
            "failed to announce room join"
        );
    }
}
