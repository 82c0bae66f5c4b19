// Capability contracts for everything the gateway talks to. Production
// deployments plug HTTP/queue-backed variants in; `memory` holds the
// single-process implementations used locally and in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::messages::{ClientDescriptor, ServiceConfiguration, SignalClient};

/// Transport-side view of one connected socket. The gateway never sees the
/// framing layer, only this surface.
#[async_trait]
pub trait SocketClient: Send + Sync + 'static {
    fn id(&self) -> String;

    fn join(&self, room: &str) -> anyhow::Result<()>;

    /// Unicast an event to this socket. Each element of `args` is sent as a
    /// separate event argument.
    fn emit(&self, event: &str, args: Vec<JsonValue>) -> anyhow::Result<()>;

    /// Broadcast to every socket currently joined to `room`, including this
    /// one.
    async fn emit_to_room(
        &self,
        room: &str,
        event: &str,
        args: Vec<JsonValue>,
    ) -> anyhow::Result<()>;

    fn disconnect(&self);
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TenantError {
    /// Upstream HTTP status, when the authority reported one.
    pub status: Option<u16>,
    pub message: String,
}

impl TenantError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Token authority for a tenant; verifies that `token` was signed with the
/// tenant's key.
#[async_trait]
pub trait TenantManager: Send + Sync {
    async fn verify_token(&self, tenant_id: &str, token: &str) -> Result<(), TenantError>;
}

/// Membership registry shared across gateway instances.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn get_clients(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> anyhow::Result<Vec<SignalClient>>;

    async fn add_client(
        &self,
        tenant_id: &str,
        document_id: &str,
        client_id: &str,
        client: &ClientDescriptor,
    ) -> anyhow::Result<()>;

    async fn remove_client(
        &self,
        tenant_id: &str,
        document_id: &str,
        client_id: &str,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OrdererManager: Send + Sync {
    async fn get_orderer(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> anyhow::Result<Arc<dyn Orderer>>;
}

/// Per-document total-order service for writer ops.
#[async_trait]
pub trait Orderer: Send + Sync {
    async fn connect(
        &self,
        socket: Arc<dyn SocketClient>,
        client_id: &str,
        client: &ClientDescriptor,
    ) -> anyhow::Result<Arc<dyn OrdererConnection>>;
}

/// Asynchronous fault raised by an established orderer connection.
#[derive(Debug, Clone)]
pub struct ConnectionFault {
    pub message: String,
}

impl std::fmt::Display for ConnectionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[async_trait]
pub trait OrdererConnection: Send + Sync {
    fn tenant_id(&self) -> &str;

    fn document_id(&self) -> &str;

    fn max_message_size(&self) -> u64;

    fn service_configuration(&self) -> ServiceConfiguration;

    /// Completes the handshake with the ordering backend. Callers may let
    /// this finish in the background; acks travel the orderer's own path.
    async fn connect(&self) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Submits a batch for total ordering. Order within the batch and across
    /// calls on one connection is preserved.
    async fn order(&self, messages: Vec<JsonValue>) -> anyhow::Result<()>;

    /// One-shot fault channel; returns `None` once taken.
    fn take_fault_receiver(&self) -> Option<oneshot::Receiver<ConnectionFault>>;
}

/// Latency/telemetry sink for round-trip trace samples.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn write_latency_metric(&self, event: &str, traces: &JsonValue) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("{message}")]
    Exceeded {
        code: u16,
        message: String,
        retry_after: u32,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Pluggable counter-based rate limiter. Implementations must be safe for
/// concurrent use across sockets.
pub trait RateLimiter: Send + Sync {
    fn increment_count(&self, key: &str) -> Result<(), RateLimitError>;
}
