use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::messages::{ClientDescriptor, SignalMessage};

/// A tenant-scoped document broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub tenant_id: String,
    pub document_id: String,
}

impl Room {
    pub fn new(tenant_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            document_id: document_id.into(),
        }
    }

    /// Canonical transport room key: `<tenantId>/<documentId>`.
    pub fn room_id(&self) -> String {
        format!("{}/{}", self.tenant_id, self.document_id)
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.document_id)
    }
}

/// Per-client transport room, used for targeted emits to a single client.
pub fn client_room_id(client_id: &str) -> String {
    format!("client#{client_id}")
}

/// Room-join announcement broadcast to peers when a client is admitted.
pub fn room_join_signal(client_id: &str, client: &ClientDescriptor) -> SignalMessage {
    SignalMessage {
        client_id: None,
        content: json!({
            "type": "join",
            "clientId": client_id,
            "client": client,
        }),
    }
}

/// Room-leave announcement broadcast to peers when a client is removed.
pub fn room_leave_signal(client_id: &str) -> SignalMessage {
    SignalMessage {
        client_id: None,
        content: json!({
            "type": "leave",
            "clientId": client_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_joins_tenant_and_document() {
        let room = Room::new("fluffy", "doc-42");
        assert_eq!(room.room_id(), "fluffy/doc-42");
        assert_eq!(room.to_string(), "fluffy/doc-42");
    }

    #[test]
    fn client_room_is_prefixed() {
        assert_eq!(client_room_id("abc"), "client#abc");
    }

    #[test]
    fn join_signal_carries_client_details() {
        let client = ClientDescriptor::default();
        let signal = room_join_signal("client-1", &client);
        assert!(signal.client_id.is_none());
        assert_eq!(signal.content["type"], "join");
        assert_eq!(signal.content["clientId"], "client-1");
        assert!(signal.content.get("client").is_some());
    }

    #[test]
    fn leave_signal_carries_client_id_only() {
        let signal = room_leave_signal("client-1");
        assert_eq!(signal.content["type"], "leave");
        assert_eq!(signal.content["clientId"], "client-1");
        assert!(signal.content.get("client").is_none());
    }
}
