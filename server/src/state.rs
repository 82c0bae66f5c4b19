use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::info;

use quillgate_core::claims::ScopeType;
use quillgate_core::config::GatewayConfig;
use quillgate_core::rooms::Room;
use quillgate_core::services::{
    ClientRegistry, MetricSink, OrdererConnection, OrdererManager, RateLimiter, SocketClient,
    TenantManager,
};

use crate::observability::SocketMetrics;

/// Shared gateway services and configuration; one per process, cloned into
/// every socket's extensions.
pub struct GatewayState {
    pub tenant_manager: Arc<dyn TenantManager>,
    pub client_registry: Arc<dyn ClientRegistry>,
    pub orderer_manager: Arc<dyn OrdererManager>,
    pub metric_sink: Arc<dyn MetricSink>,
    pub connect_throttler: Option<Arc<dyn RateLimiter>>,
    pub submit_op_throttler: Option<Arc<dyn RateLimiter>>,
    pub config: GatewayConfig,
    pub metrics: Arc<SocketMetrics>,
}

impl GatewayState {
    pub fn new(
        tenant_manager: Arc<dyn TenantManager>,
        client_registry: Arc<dyn ClientRegistry>,
        orderer_manager: Arc<dyn OrdererManager>,
        metric_sink: Arc<dyn MetricSink>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            tenant_manager,
            client_registry,
            orderer_manager,
            metric_sink,
            connect_throttler: None,
            submit_op_throttler: None,
            config,
            metrics: Arc::new(SocketMetrics::default()),
        }
    }

    pub fn with_connect_throttler(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.connect_throttler = Some(limiter);
        self
    }

    pub fn with_submit_op_throttler(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.submit_op_throttler = Some(limiter);
        self
    }
}

/// Handle to one socket's session, shared with its timers and watchers.
/// Handlers lock it for their full body, which serializes events per socket.
pub type SharedSession = Arc<AsyncMutex<SocketSession>>;

pub fn new_shared_session() -> SharedSession {
    Arc::new(AsyncMutex::new(SocketSession::default()))
}

/// Per-socket connection registry: which clientIds this socket hosts, the
/// room and authorized scopes of each, and the orderer connection for
/// writers. Orderer-backed clients are always room members, and the room
/// and scope maps share one key set.
#[derive(Default)]
pub struct SocketSession {
    connections: HashMap<String, Arc<dyn OrdererConnection>>,
    rooms: HashMap<String, Room>,
    scopes: HashMap<String, HashSet<ScopeType>>,
    expiration: Option<ExpirationTimer>,
}

impl SocketSession {
    /// Commits a clientId to the room and scope maps.
    pub fn admit(&mut self, client_id: &str, room: Room, scopes: HashSet<ScopeType>) {
        self.rooms.insert(client_id.to_string(), room);
        self.scopes.insert(client_id.to_string(), scopes);
    }

    pub fn attach_connection(&mut self, client_id: &str, connection: Arc<dyn OrdererConnection>) {
        self.connections.insert(client_id.to_string(), connection);
    }

    pub fn connection(&self, client_id: &str) -> Option<Arc<dyn OrdererConnection>> {
        self.connections.get(client_id).cloned()
    }

    pub fn room(&self, client_id: &str) -> Option<&Room> {
        self.rooms.get(client_id)
    }

    pub fn scopes(&self, client_id: &str) -> Option<&HashSet<ScopeType>> {
        self.scopes.get(client_id)
    }

    pub fn is_member(&self, client_id: &str) -> bool {
        self.rooms.contains_key(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn drain_connections(&mut self) -> Vec<(String, Arc<dyn OrdererConnection>)> {
        self.connections.drain().collect()
    }

    pub fn drain_members(&mut self) -> Vec<(String, Room)> {
        self.scopes.clear();
        self.rooms.drain().collect()
    }

    /// Arms the socket's expiration timer. One timer serves the whole
    /// socket: the soonest deadline across its clients wins, so a later
    /// connect with a longer-lived token never extends the fuse.
    pub fn arm_expiration(&mut self, socket: Arc<dyn SocketClient>, remaining_ms: i64) {
        let deadline = Instant::now() + Duration::from_millis(remaining_ms.max(0) as u64);
        if let Some(existing) = &self.expiration {
            if existing.deadline <= deadline {
                return;
            }
        }

        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;
            info!(socket_id = %socket.id(), "token expired, closing socket");
            socket.disconnect();
        });
        self.expiration = Some(ExpirationTimer { deadline, handle });
    }

    pub fn clear_expiration(&mut self) {
        self.expiration = None;
    }

    pub fn has_expiration(&self) -> bool {
        self.expiration.is_some()
    }

    #[cfg(test)]
    fn expiration_deadline(&self) -> Option<Instant> {
        self.expiration.as_ref().map(|timer| timer.deadline)
    }
}

struct ExpirationTimer {
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct IdleSocket {
        closed: AtomicBool,
    }

    impl IdleSocket {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl SocketClient for IdleSocket {
        fn id(&self) -> String {
            "idle".to_string()
        }

        fn join(&self, _room: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn emit(&self, _event: &str, _args: Vec<JsonValue>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn emit_to_room(
            &self,
            _room: &str,
            _event: &str,
            _args: Vec<JsonValue>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        fn disconnect(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn room_and_scope_maps_share_key_sets() {
        let mut session = SocketSession::default();
        session.admit(
            "client-a",
            Room::new("fluffy", "doc-1"),
            HashSet::from([ScopeType::DocWrite]),
        );

        assert!(session.is_member("client-a"));
        assert!(session.scopes("client-a").is_some());
        assert!(session.connection("client-a").is_none());
        assert_eq!(session.client_count(), 1);

        let members = session.drain_members();
        assert_eq!(members.len(), 1);
        assert!(session.scopes("client-a").is_none());
        assert_eq!(session.client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiration_keeps_the_soonest_deadline() {
        let socket = IdleSocket::new();
        let mut session = SocketSession::default();

        session.arm_expiration(socket.clone(), 10_000);
        let first = session.expiration_deadline().expect("armed");

        session.arm_expiration(socket.clone(), 60_000);
        assert_eq!(
            session.expiration_deadline().expect("still armed"),
            first,
            "a later deadline must not extend the fuse"
        );

        session.arm_expiration(socket.clone(), 1_000);
        assert!(session.expiration_deadline().expect("re-armed") < first);
    }

    #[tokio::test(start_paused = true)]
    async fn expiration_fires_and_closes_the_socket() {
        let socket = IdleSocket::new();
        {
            let mut session = SocketSession::default();
            session.arm_expiration(socket.clone(), 50);
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert!(socket.closed.load(Ordering::SeqCst));
            session.clear_expiration();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_expiration_never_fires() {
        let socket = IdleSocket::new();
        let mut session = SocketSession::default();
        session.arm_expiration(socket.clone(), 50);
        session.clear_expiration();
        assert!(!session.has_expiration());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!socket.closed.load(Ordering::SeqCst));
    }
}
