// Wire types exchanged over the collaboration socket.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::claims::{TokenClaims, UserIdentity};

/// Client type whose connections may retain the summary-write scope.
pub const SUMMARIZER_CLIENT_TYPE: &str = "summarizer";

/// Message size advertised to read-only clients, which never submit ops.
pub const READER_MAX_MESSAGE_SIZE: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Read,
    Write,
}

impl Default for ConnectionMode {
    fn default() -> Self {
        ConnectionMode::Write
    }
}

/// Connection request envelope (`connect_document`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub tenant_id: String,
    /// Document id; named `id` on the wire.
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub client: Option<ClientDescriptor>,
    /// Semver ranges the client can speak, most preferred first.
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub mode: ConnectionMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientDetails {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<JsonValue>,
}

/// Client self-description. `user` and `scopes` are always overwritten from
/// the verified token claims before the descriptor is persisted anywhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ClientDetails>,
    pub permission: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserIdentity>,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ClientDescriptor {
    pub fn client_type(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|details| details.client_type.as_deref())
    }
}

/// Registry entry broadcast in presence responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalClient {
    pub client_id: String,
    pub client: ClientDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryConfiguration {
    pub idle_time: u64,
    pub max_ops: u64,
    pub max_time: u64,
    pub max_ack_wait_time: u64,
}

impl Default for SummaryConfiguration {
    fn default() -> Self {
        Self {
            idle_time: 5_000,
            max_ops: 1_000,
            max_time: 60_000,
            max_ack_wait_time: 600_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfiguration {
    pub block_size: u64,
    pub max_message_size: u64,
    pub summary: SummaryConfiguration,
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        Self {
            block_size: 65_536,
            max_message_size: 16_384,
            summary: SummaryConfiguration::default(),
        }
    }
}

/// Connection acceptance payload (`connect_document_success`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub claims: TokenClaims,
    pub client_id: String,
    pub existing: bool,
    pub mode: ConnectionMode,
    pub max_message_size: u64,
    pub service_configuration: ServiceConfiguration,
    pub initial_clients: Vec<SignalClient>,
    pub initial_messages: Vec<JsonValue>,
    pub initial_signals: Vec<JsonValue>,
    pub supported_versions: Vec<String>,
    pub version: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NackType {
    BadRequestError,
    InvalidScopeError,
    ThrottlingError,
}

/// Structured negative acknowledgment, unicast to the submitting socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NackMessage {
    pub code: u16,
    #[serde(rename = "type")]
    pub nack_type: NackType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u32>,
}

impl NackMessage {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: 400,
            nack_type: NackType::BadRequestError,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self {
            code: 403,
            nack_type: NackType::InvalidScopeError,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn throttled(code: u16, message: impl Into<String>, retry_after: u32) -> Self {
        Self {
            code,
            nack_type: NackType::ThrottlingError,
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }
}

/// Transient room broadcast. `client_id` is `None` for server-originated
/// signals such as join/leave announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    pub client_id: Option<String>,
    pub content: JsonValue,
}

/// One element of a submit payload: a single op or an array of ops.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpBatch {
    Many(Vec<JsonValue>),
    One(JsonValue),
}

impl OpBatch {
    pub fn into_ops(self) -> Vec<JsonValue> {
        match self {
            OpBatch::Many(ops) => ops,
            OpBatch::One(op) => vec![op],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connect_request_defaults_optional_fields() {
        let request: ConnectRequest = serde_json::from_value(json!({
            "tenantId": "fluffy",
            "id": "doc-1",
        }))
        .unwrap();

        assert!(request.token.is_none());
        assert!(request.client.is_none());
        assert!(request.versions.is_empty());
        assert_eq!(request.mode, ConnectionMode::Write);
    }

    #[test]
    fn connect_request_reads_mode_and_versions() {
        let request: ConnectRequest = serde_json::from_value(json!({
            "tenantId": "fluffy",
            "id": "doc-1",
            "token": "abc",
            "mode": "read",
            "versions": ["^0.4.0"],
        }))
        .unwrap();

        assert_eq!(request.mode, ConnectionMode::Read);
        assert_eq!(request.versions, vec!["^0.4.0".to_string()]);
    }

    #[test]
    fn client_descriptor_exposes_type() {
        let descriptor: ClientDescriptor = serde_json::from_value(json!({
            "details": { "type": "summarizer" },
        }))
        .unwrap();
        assert_eq!(descriptor.client_type(), Some(SUMMARIZER_CLIENT_TYPE));
        assert_eq!(ClientDescriptor::default().client_type(), None);
    }

    #[test]
    fn nack_serializes_wire_contract() {
        let nack = NackMessage::throttled(429, "slow down", 3);
        let value = serde_json::to_value(&nack).unwrap();
        assert_eq!(
            value,
            json!({
                "code": 429,
                "type": "ThrottlingError",
                "message": "slow down",
                "retryAfter": 3,
            })
        );

        let plain = serde_json::to_value(NackMessage::bad_request("Nonexistent client")).unwrap();
        assert_eq!(plain["type"], "BadRequestError");
        assert!(plain.get("retryAfter").is_none());
    }

    #[test]
    fn op_batches_flatten_in_order() {
        let batches: Vec<OpBatch> = serde_json::from_value(json!([
            { "type": "op", "contents": 1 },
            [{ "type": "op", "contents": 2 }, { "type": "op", "contents": 3 }],
        ]))
        .unwrap();

        let flattened: Vec<_> = batches
            .into_iter()
            .flat_map(OpBatch::into_ops)
            .map(|op| op["contents"].as_i64().unwrap())
            .collect();
        assert_eq!(flattened, vec![1, 2, 3]);
    }

    #[test]
    fn default_service_configuration_is_platform_default() {
        let config = ServiceConfiguration::default();
        assert_eq!(config.block_size, 65_536);
        assert_eq!(config.max_message_size, 16_384);
        assert_eq!(config.summary.max_ack_wait_time, 600_000);
    }
}
