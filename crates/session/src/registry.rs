//! Connection registry
//!
//! Maps `{device_id}-{client_id}` keys to live connections. Creating a
//! connection for a key that is already live replaces the old entry; the
//! caller closes the replaced connection.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use voiceline_providers::ProviderSet;
use voiceline_tools::ToolRegistry;

use crate::connection::{Connection, ConnectionConfig, OutboundFrame};

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_key(device_id: &str, client_id: &str) -> String {
        format!("{device_id}-{client_id}")
    }

    /// Create and register a connection for a device. Returns the new
    /// connection, its outbound frame receiver, and the replaced entry if
    /// the device already had a live connection — the caller must close it.
    #[must_use = "a replaced connection must be closed"]
    pub fn create(
        self: &Arc<Self>,
        device_id: &str,
        client_id: &str,
        config: ConnectionConfig,
        providers: ProviderSet,
        tools: Arc<ToolRegistry>,
    ) -> (
        Arc<Connection>,
        mpsc::UnboundedReceiver<OutboundFrame>,
        Option<Arc<Connection>>,
    ) {
        let (connection, outbound_rx) = Connection::spawn(
            device_id,
            client_id,
            config,
            providers,
            tools,
            Arc::downgrade(self),
        );

        let key = Self::connection_key(device_id, client_id);
        let replaced = self
            .connections
            .write()
            .insert(key.clone(), Arc::clone(&connection));
        if replaced.is_some() {
            tracing::info!("Replacing live connection for {key}");
        } else {
            tracing::info!("Created connection {key} ({})", connection.session_id);
        }

        (connection, outbound_rx, replaced)
    }

    pub fn get(&self, device_id: &str, client_id: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .get(&Self::connection_key(device_id, client_id))
            .cloned()
    }

    /// Remove an entry, but only if it still belongs to the given session.
    /// A closing connection must not evict its replacement.
    pub fn detach(&self, key: &str, session_id: &str) {
        let mut connections = self.connections.write();
        if connections
            .get(key)
            .is_some_and(|c| c.session_id == session_id)
        {
            connections.remove(key);
            tracing::info!("Removed connection {key}");
        }
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.connections
            .read()
            .values()
            .map(|c| c.session_id.clone())
            .collect()
    }

    /// Close every live connection.
    pub async fn close_all(&self) {
        let all: Vec<Arc<Connection>> = {
            let mut connections = self.connections.write();
            connections.drain().map(|(_, c)| c).collect()
        };
        for connection in all {
            connection.close().await;
        }
        tracing::info!("Closed all connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voiceline_providers::build_providers;

    fn providers() -> ProviderSet {
        build_providers(&voiceline_config::ProviderSettings::default(), Vec::new()).unwrap()
    }

    fn tools() -> Arc<ToolRegistry> {
        Arc::new(voiceline_tools::create_default_registry())
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx, replaced) = registry.create(
            "dev-1",
            "cli-1",
            ConnectionConfig::default(),
            providers(),
            tools(),
        );
        assert!(replaced.is_none());
        assert_eq!(registry.count(), 1);

        let found = registry.get("dev-1", "cli-1").unwrap();
        assert_eq!(found.session_id, conn.session_id);
    }

    #[tokio::test]
    async fn test_duplicate_key_replaces() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1, _) = registry.create(
            "dev-1",
            "cli-1",
            ConnectionConfig::default(),
            providers(),
            tools(),
        );
        let (second, _rx2, replaced) = registry.create(
            "dev-1",
            "cli-1",
            ConnectionConfig::default(),
            providers(),
            tools(),
        );

        let replaced = replaced.expect("old connection should be replaced");
        assert_eq!(replaced.session_id, first.session_id);
        assert_eq!(registry.count(), 1);
        assert_eq!(
            registry.get("dev-1", "cli-1").unwrap().session_id,
            second.session_id
        );
    }

    #[tokio::test]
    async fn test_close_removes_from_registry() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx, _) = registry.create(
            "dev-1",
            "cli-1",
            ConnectionConfig::default(),
            providers(),
            tools(),
        );
        conn.close().await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_replaced_connection_close_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1, _) = registry.create(
            "dev-1",
            "cli-1",
            ConnectionConfig::default(),
            providers(),
            tools(),
        );
        let (_second, _rx2, replaced) = registry.create(
            "dev-1",
            "cli-1",
            ConnectionConfig::default(),
            providers(),
            tools(),
        );
        assert_eq!(replaced.unwrap().session_id, first.session_id);

        // the replaced connection closing must not evict the replacement
        first.close().await;
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1, _) = registry.create(
            "dev-1",
            "cli-1",
            ConnectionConfig::default(),
            providers(),
            tools(),
        );
        let (c2, _rx2, _) = registry.create(
            "dev-2",
            "cli-2",
            ConnectionConfig::default(),
            providers(),
            tools(),
        );

        registry.close_all().await;
        assert_eq!(registry.count(), 0);
        assert!(c1.is_stopped());
        assert!(c2.is_stopped());
    }
}
