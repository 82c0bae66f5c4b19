// Single-process collaborator implementations, used by local deployments
// and throughout the test suite.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::claims::{ScopeType, TokenClaims, UserIdentity};
use crate::messages::{ClientDescriptor, ServiceConfiguration, SignalClient};
use crate::services::{
    ClientRegistry, ConnectionFault, MetricSink, Orderer, OrdererConnection, OrdererManager,
    RateLimitError, RateLimiter, SocketClient, TenantError, TenantManager,
};

/// Tenant authority backed by a table of per-tenant HS256 secrets.
#[derive(Default)]
pub struct MemoryTenantManager {
    secrets: DashMap<String, String>,
}

impl MemoryTenantManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tenant(&self, tenant_id: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(tenant_id.into(), secret.into());
    }

    /// Signs a token for `tenant_id` the way the tenant authority would.
    pub fn mint_token(
        &self,
        tenant_id: &str,
        document_id: &str,
        user: UserIdentity,
        scopes: Vec<ScopeType>,
        lifetime_secs: i64,
    ) -> anyhow::Result<String> {
        let secret = self
            .secrets
            .get(tenant_id)
            .ok_or_else(|| anyhow::anyhow!("tenant {tenant_id} is not registered"))?;
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            document_id: document_id.to_string(),
            tenant_id: tenant_id.to_string(),
            scopes,
            user,
            iat: now,
            exp: now + lifetime_secs,
            ver: Some("1.0".to_string()),
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?)
    }
}

#[async_trait]
impl TenantManager for MemoryTenantManager {
    async fn verify_token(&self, tenant_id: &str, token: &str) -> Result<(), TenantError> {
        let Some(secret) = self.secrets.get(tenant_id) else {
            return Err(TenantError::new(Some(403), "Unknown tenant"));
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = Default::default();

        decode::<JsonValue>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map(|_| ())
        .map_err(|_| TenantError::new(Some(401), "Invalid token signature"))
    }
}

/// Client registry keyed by `(tenantId, documentId)`.
#[derive(Default)]
pub struct MemoryClientRegistry {
    clients: DashMap<(String, String), Vec<SignalClient>>,
}

impl MemoryClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientRegistry for MemoryClientRegistry {
    async fn get_clients(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> anyhow::Result<Vec<SignalClient>> {
        Ok(self
            .clients
            .get(&(tenant_id.to_string(), document_id.to_string()))
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn add_client(
        &self,
        tenant_id: &str,
        document_id: &str,
        client_id: &str,
        client: &ClientDescriptor,
    ) -> anyhow::Result<()> {
        self.clients
            .entry((tenant_id.to_string(), document_id.to_string()))
            .or_default()
            .push(SignalClient {
                client_id: client_id.to_string(),
                client: client.clone(),
            });
        Ok(())
    }

    async fn remove_client(
        &self,
        tenant_id: &str,
        document_id: &str,
        client_id: &str,
    ) -> anyhow::Result<()> {
        if let Some(mut entry) = self
            .clients
            .get_mut(&(tenant_id.to_string(), document_id.to_string()))
        {
            entry.retain(|member| member.client_id != client_id);
        }
        Ok(())
    }
}

/// Metric sink that retains every sample for inspection.
#[derive(Default)]
pub struct MemoryMetricSink {
    samples: Mutex<Vec<(String, JsonValue)>>,
}

impl MemoryMetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<(String, JsonValue)> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl MetricSink for MemoryMetricSink {
    async fn write_latency_metric(&self, event: &str, traces: &JsonValue) -> anyhow::Result<()> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((event.to_string(), traces.clone()));
        Ok(())
    }
}

struct RateBucket {
    count: u32,
    window_start: i64,
}

/// Fixed-window counter limiter.
pub struct FixedWindowRateLimiter {
    max_per_window: u32,
    window_secs: i64,
    buckets: DashMap<String, Mutex<RateBucket>>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_per_window: u32, window_secs: i64) -> Self {
        Self {
            max_per_window,
            window_secs,
            buckets: DashMap::new(),
        }
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn increment_count(&self, key: &str) -> Result<(), RateLimitError> {
        let now = Utc::now().timestamp();
        let bucket = self.buckets.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(RateBucket {
                count: 0,
                window_start: now,
            })
        });
        let mut guard = match bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if now.saturating_sub(guard.window_start) >= self.window_secs {
            guard.window_start = now;
            guard.count = 0;
        }
        guard.count = guard.count.saturating_add(1);

        if guard.count > self.max_per_window {
            let retry_after = (guard.window_start + self.window_secs - now).max(1) as u32;
            return Err(RateLimitError::Exceeded {
                code: 429,
                message: format!("Exceeded {} requests per window", self.max_per_window),
                retry_after,
            });
        }

        Ok(())
    }
}

/// Orderer manager that lazily creates one in-process orderer per document.
#[derive(Default)]
pub struct MemoryOrdererManager {
    orderers: DashMap<(String, String), Arc<MemoryOrderer>>,
}

impl MemoryOrdererManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orderer(&self, tenant_id: &str, document_id: &str) -> Option<Arc<MemoryOrderer>> {
        self.orderers
            .get(&(tenant_id.to_string(), document_id.to_string()))
            .map(|entry| entry.clone())
    }
}

#[async_trait]
impl OrdererManager for MemoryOrdererManager {
    async fn get_orderer(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> anyhow::Result<Arc<dyn Orderer>> {
        let orderer = self
            .orderers
            .entry((tenant_id.to_string(), document_id.to_string()))
            .or_insert_with(|| Arc::new(MemoryOrderer::new(tenant_id, document_id)))
            .clone();
        Ok(orderer)
    }
}

pub struct MemoryOrderer {
    tenant_id: String,
    document_id: String,
    connections: Mutex<Vec<Arc<MemoryOrdererConnection>>>,
}

impl MemoryOrderer {
    fn new(tenant_id: &str, document_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            document_id: document_id.to_string(),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn connections(&self) -> Vec<Arc<MemoryOrdererConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Orderer for MemoryOrderer {
    async fn connect(
        &self,
        _socket: Arc<dyn SocketClient>,
        client_id: &str,
        _client: &ClientDescriptor,
    ) -> anyhow::Result<Arc<dyn OrdererConnection>> {
        let connection = Arc::new(MemoryOrdererConnection::new(
            &self.tenant_id,
            &self.document_id,
            client_id,
        ));
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(connection.clone());
        Ok(connection)
    }
}

pub struct MemoryOrdererConnection {
    tenant_id: String,
    document_id: String,
    client_id: String,
    ordered: Mutex<Vec<Vec<JsonValue>>>,
    connected: AtomicBool,
    disconnected: AtomicBool,
    fault_tx: Mutex<Option<oneshot::Sender<ConnectionFault>>>,
    fault_rx: Mutex<Option<oneshot::Receiver<ConnectionFault>>>,
}

impl MemoryOrdererConnection {
    fn new(tenant_id: &str, document_id: &str, client_id: &str) -> Self {
        let (fault_tx, fault_rx) = oneshot::channel();
        Self {
            tenant_id: tenant_id.to_string(),
            document_id: document_id.to_string(),
            client_id: client_id.to_string(),
            ordered: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            fault_tx: Mutex::new(Some(fault_tx)),
            fault_rx: Mutex::new(Some(fault_rx)),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Batches handed over for ordering, in arrival order.
    pub fn ordered_batches(&self) -> Vec<Vec<JsonValue>> {
        self.ordered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Raises an asynchronous connection fault, as the real backend would on
    /// a broken pipe.
    pub fn inject_fault(&self, message: impl Into<String>) {
        if let Some(tx) = self
            .fault_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            let _ = tx.send(ConnectionFault {
                message: message.into(),
            });
        }
    }
}

#[async_trait]
impl OrdererConnection for MemoryOrdererConnection {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn document_id(&self) -> &str {
        &self.document_id
    }

    fn max_message_size(&self) -> u64 {
        ServiceConfiguration::default().max_message_size
    }

    fn service_configuration(&self) -> ServiceConfiguration {
        ServiceConfiguration::default()
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn order(&self, messages: Vec<JsonValue>) -> anyhow::Result<()> {
        self.ordered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(messages);
        Ok(())
    }

    fn take_fault_receiver(&self) -> Option<oneshot::Receiver<ConnectionFault>> {
        self.fault_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tenant_manager_verifies_its_own_tokens() {
        let tenants = MemoryTenantManager::new();
        tenants.register_tenant("fluffy", "secret");

        let token = tenants
            .mint_token(
                "fluffy",
                "doc-1",
                UserIdentity::new("user-1"),
                vec![ScopeType::DocWrite],
                600,
            )
            .expect("mint token");

        tenants
            .verify_token("fluffy", &token)
            .await
            .expect("token verifies");

        let err = tenants
            .verify_token("other", &token)
            .await
            .expect_err("unknown tenant");
        assert_eq!(err.status, Some(403));

        tenants.register_tenant("other", "different-secret");
        let err = tenants
            .verify_token("other", &token)
            .await
            .expect_err("wrong key");
        assert_eq!(err.status, Some(401));
    }

    #[tokio::test]
    async fn registry_tracks_membership_per_document() {
        let registry = MemoryClientRegistry::new();
        let descriptor = ClientDescriptor::default();

        registry
            .add_client("fluffy", "doc-1", "client-a", &descriptor)
            .await
            .unwrap();
        registry
            .add_client("fluffy", "doc-1", "client-b", &descriptor)
            .await
            .unwrap();
        registry
            .add_client("fluffy", "doc-2", "client-c", &descriptor)
            .await
            .unwrap();

        let members = registry.get_clients("fluffy", "doc-1").await.unwrap();
        assert_eq!(members.len(), 2);

        registry
            .remove_client("fluffy", "doc-1", "client-a")
            .await
            .unwrap();
        let members = registry.get_clients("fluffy", "doc-1").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].client_id, "client-b");
    }

    #[test]
    fn fixed_window_limiter_throttles_over_limit() {
        let limiter = FixedWindowRateLimiter::new(2, 60);
        assert!(limiter.increment_count("key").is_ok());
        assert!(limiter.increment_count("key").is_ok());

        let err = limiter.increment_count("key").expect_err("over limit");
        match err {
            RateLimitError::Exceeded {
                code, retry_after, ..
            } => {
                assert_eq!(code, 429);
                assert!(retry_after >= 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Independent keys keep their own windows.
        assert!(limiter.increment_count("other").is_ok());
    }

    #[tokio::test]
    async fn orderer_connection_records_batches_and_faults_once() {
        let manager = MemoryOrdererManager::new();
        let orderer = manager.get_orderer("fluffy", "doc-1").await.unwrap();

        let connection = orderer
            .connect(
                Arc::new(NullSocket),
                "client-a",
                &ClientDescriptor::default(),
            )
            .await
            .unwrap();
        connection
            .order(vec![serde_json::json!({"type": "op"})])
            .await
            .unwrap();

        let concrete = manager
            .orderer("fluffy", "doc-1")
            .expect("orderer exists")
            .connections()
            .pop()
            .expect("connection recorded");
        assert_eq!(concrete.ordered_batches().len(), 1);

        let rx = concrete.take_fault_receiver().expect("first take");
        assert!(concrete.take_fault_receiver().is_none(), "one-shot channel");
        concrete.inject_fault("backend gone");
        let fault = rx.await.expect("fault delivered");
        assert_eq!(fault.message, "backend gone");
    }

    struct NullSocket;

    #[async_trait]
    impl SocketClient for NullSocket {
        fn id(&self) -> String {
            "null".to_string()
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

        fn disconnect(&self) {}
    }
}
