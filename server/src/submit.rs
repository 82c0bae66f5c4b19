// `submitOp` and `submitSignal`: writer-gated ordering and room fan-out.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{error, warn};

use quillgate_core::claims::{can_summarize, can_write};
use quillgate_core::messages::{NackMessage, OpBatch, SignalMessage};
use quillgate_core::services::SocketClient;

use crate::sanitize::{is_round_trip, round_trip_traces, sanitize_operation};
use crate::state::{GatewayState, SharedSession};
use crate::throttle::{check_throttle, submit_op_throttle_key};

pub(crate) const NACK_EVENT: &str = "nack";
pub(crate) const SIGNAL_EVENT: &str = "signal";

/// Unicasts a single nack to the submitting socket. The leading empty
/// string argument is a wire-contract placeholder.
pub(crate) fn send_nack(state: &GatewayState, socket: &Arc<dyn SocketClient>, nack: NackMessage) {
    state.metrics.inc_nacks();
    let nacks = match serde_json::to_value(vec![nack]) {
        Ok(nacks) => nacks,
        Err(err) => {
            warn!(error = %err, "failed to serialize nack");
            return;
        }
    };

    if let Err(err) = socket.emit(NACK_EVENT, vec![JsonValue::String(String::new()), nacks]) {
        warn!(error = %err, "failed to send nack");
    }
}

/// Orders the submitted batches for a writer client. Non-writers get
/// exactly one nack whose code depends on what they are missing.
pub async fn handle_submit_op(
    state: &GatewayState,
    socket: &Arc<dyn SocketClient>,
    session: &SharedSession,
    client_id: String,
    batches: Vec<OpBatch>,
) {
    let session = session.lock().await;

    let Some(room) = session.room(&client_id).cloned() else {
        send_nack(state, socket, NackMessage::bad_request("Nonexistent client"));
        return;
    };

    let Some(connection) = session.connection(&client_id) else {
        let write_capable = session
            .scopes(&client_id)
            .is_some_and(|scopes| can_write(scopes) || can_summarize(scopes));
        let nack = if write_capable {
            NackMessage::bad_request("Readonly client")
        } else {
            NackMessage::invalid_scope("Invalid scope")
        };
        send_nack(state, socket, nack);
        return;
    };

    if let Err(reject) = check_throttle(
        state.submit_op_throttler.as_ref(),
        &submit_op_throttle_key(&client_id, &room.tenant_id),
    ) {
        send_nack(
            state,
            socket,
            NackMessage::throttled(reject.code, reject.message, reject.retry_after),
        );
        return;
    }

    for batch in batches {
        let mut outbound = Vec::new();
        for op in batch.into_ops() {
            if is_round_trip(&op) {
                if let Some(traces) = round_trip_traces(&op) {
                    if let Err(err) = state.metric_sink.write_latency_metric("latency", traces).await
                    {
                        warn!(error = %err, "failed to record round-trip latency");
                    }
                }
                continue;
            }
            outbound.push(sanitize_operation(&op));
        }

        if outbound.is_empty() {
            continue;
        }

        state.metrics.add_ops(outbound.len());
        if let Err(err) = connection.order(outbound).await {
            error!(
                tenant_id = %room.tenant_id,
                document_id = %room.document_id,
                client_id = %client_id,
                error = %err,
                "failed to hand ops to the orderer"
            );
        }
    }
}

/// Fans the submitted payloads out to the client's room. Any room member
/// may signal; there is no throttling and no durability.
pub async fn handle_submit_signal(
    state: &GatewayState,
    socket: &Arc<dyn SocketClient>,
    session: &SharedSession,
    client_id: String,
    batches: Vec<OpBatch>,
) {
    let session = session.lock().await;

    let Some(room) = session.room(&client_id) else {
        send_nack(state, socket, NackMessage::bad_request("Nonexistent client"));
        return;
    };
    let room_id = room.room_id();

    for batch in batches {
        for content in batch.into_ops() {
            let signal = SignalMessage {
                client_id: Some(client_id.clone()),
                content,
            };
            let payload = match serde_json::to_value(&signal) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize signal");
                    continue;
                }
            };

            state.metrics.add_signals(1);
            if let Err(err) = socket.emit_to_room(&room_id, SIGNAL_EVENT, vec![payload]).await {
                warn!(
                    room = %room_id,
                    client_id = %client_id,
                    error = %err,
                    "failed to broadcast signal"
                );
            }
        }
    }
}
