//! In-process transport and fixtures for exercising the gateway without a
//! real socket stack.

use std::collections::HashSet;
use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use quillgate_core::claims::{ScopeType, UserIdentity};
use quillgate_core::config::GatewayConfig;
use quillgate_core::memory::{
    MemoryClientRegistry, MemoryMetricSink, MemoryOrdererManager, MemoryTenantManager,
};
use quillgate_core::messages::{
    ClientDescriptor, ClientDetails, ConnectRequest, ConnectionMode, NackMessage,
};
use quillgate_core::services::SocketClient;

use crate::state::{GatewayState, SharedSession, new_shared_session};

pub const TEST_TENANT: &str = "fluffy";
pub const TEST_SECRET: &str = "test-secret";

/// Gateway state wired to the in-memory collaborators, plus handles to the
/// concrete backends for assertions.
pub struct TestHarness {
    pub state: GatewayState,
    pub tenants: Arc<MemoryTenantManager>,
    pub registry: Arc<MemoryClientRegistry>,
    pub orderers: Arc<MemoryOrdererManager>,
    pub metric_sink: Arc<MemoryMetricSink>,
    pub hub: Arc<TestHub>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let tenants = Arc::new(MemoryTenantManager::new());
        tenants.register_tenant(TEST_TENANT, TEST_SECRET);
        let registry = Arc::new(MemoryClientRegistry::new());
        let orderers = Arc::new(MemoryOrdererManager::new());
        let metric_sink = Arc::new(MemoryMetricSink::new());

        let state = GatewayState::new(
            tenants.clone(),
            registry.clone(),
            orderers.clone(),
            metric_sink.clone(),
            config,
        );

        Self {
            state,
            tenants,
            registry,
            orderers,
            metric_sink,
            hub: TestHub::new(),
        }
    }

    /// A fresh socket with its own per-socket session, as the wiring layer
    /// would create on a transport `connection` event.
    pub fn peer(&self) -> TestPeer {
        let socket = TestHub::socket(&self.hub);
        TestPeer {
            client: socket.clone(),
            socket,
            session: new_shared_session(),
        }
    }

    pub fn token(&self, document_id: &str, scopes: Vec<ScopeType>, lifetime_secs: i64) -> String {
        self.tenants
            .mint_token(
                TEST_TENANT,
                document_id,
                UserIdentity::new("user-1"),
                scopes,
                lifetime_secs,
            )
            .expect("mint token")
    }

    /// A well-formed writer connect request for `document_id`.
    pub fn connect_request(
        &self,
        document_id: &str,
        scopes: Vec<ScopeType>,
        mode: ConnectionMode,
    ) -> ConnectRequest {
        ConnectRequest {
            tenant_id: TEST_TENANT.to_string(),
            id: document_id.to_string(),
            token: Some(self.token(document_id, scopes, 600)),
            client: Some(container_client()),
            versions: vec!["^0.4.0".to_string()],
            mode,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestPeer {
    pub socket: Arc<TestSocket>,
    pub client: Arc<dyn SocketClient>,
    pub session: SharedSession,
}

pub fn container_client() -> ClientDescriptor {
    ClientDescriptor {
        details: Some(ClientDetails {
            client_type: Some("container".to_string()),
            capabilities: None,
        }),
        ..ClientDescriptor::default()
    }
}

pub fn summarizer_client() -> ClientDescriptor {
    ClientDescriptor {
        details: Some(ClientDetails {
            client_type: Some("summarizer".to_string()),
            capabilities: None,
        }),
        ..ClientDescriptor::default()
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub event: String,
    pub args: Vec<JsonValue>,
}

/// Delivers room broadcasts to every registered socket joined to the room,
/// the way the socket.io adapter would.
#[derive(Default)]
pub struct TestHub {
    sockets: Mutex<Vec<Arc<TestSocket>>>,
}

impl TestHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn socket(hub: &Arc<TestHub>) -> Arc<TestSocket> {
        let socket = Arc::new(TestSocket {
            id: format!("socket-{}", Uuid::new_v4().simple()),
            hub: Arc::downgrade(hub),
            rooms: Mutex::new(HashSet::new()),
            received: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
            fail_joins: AtomicBool::new(false),
        });
        hub.sockets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(socket.clone());
        socket
    }

    fn deliver(&self, room: &str, event: &str, args: &[JsonValue]) {
        for socket in self
            .sockets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
        {
            if socket.in_room(room) {
                socket.push_event(event, args.to_vec());
            }
        }
    }
}

pub struct TestSocket {
    id: String,
    hub: Weak<TestHub>,
    rooms: Mutex<HashSet<String>>,
    received: Mutex<Vec<ReceivedEvent>>,
    disconnected: AtomicBool,
    fail_joins: AtomicBool,
}

impl TestSocket {
    pub fn in_room(&self, room: &str) -> bool {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(room)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Makes every subsequent room join fail, to drive the internal-fault
    /// arc of the connect pipeline.
    pub fn refuse_joins(&self) {
        self.fail_joins.store(true, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<ReceivedEvent> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn received_named(&self, event: &str) -> Vec<ReceivedEvent> {
        self.received()
            .into_iter()
            .filter(|received| received.event == event)
            .collect()
    }

    /// The clientId granted by the most recent successful connect.
    pub fn connected_client_id(&self) -> Option<String> {
        self.received_named("connect_document_success")
            .last()?
            .args
            .first()?
            .get("clientId")?
            .as_str()
            .map(str::to_string)
    }

    /// Nacks received so far, flattened from the wire shape.
    pub fn nacks(&self) -> Vec<NackMessage> {
        self.received_named("nack")
            .iter()
            .filter_map(|received| received.args.get(1).cloned())
            .filter_map(|batch| serde_json::from_value::<Vec<NackMessage>>(batch).ok())
            .flatten()
            .collect()
    }

    fn push_event(&self, event: &str, args: Vec<JsonValue>) {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ReceivedEvent {
                event: event.to_string(),
                args,
            });
    }
}

#[async_trait]
impl SocketClient for TestSocket {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn join(&self, room: &str) -> anyhow::Result<()> {
        if self.fail_joins.load(Ordering::SeqCst) {
            anyhow::bail!("transport refused room join");
        }
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(room.to_string());
        Ok(())
    }

    fn emit(&self, event: &str, args: Vec<JsonValue>) -> anyhow::Result<()> {
        self.push_event(event, args);
        Ok(())
    }

    async fn emit_to_room(
        &self,
        room: &str,
        event: &str,
        args: Vec<JsonValue>,
    ) -> anyhow::Result<()> {
        if let Some(hub) = self.hub.upgrade() {
            hub.deliver(room, event, &args);
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}
