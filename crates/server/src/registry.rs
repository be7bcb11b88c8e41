//! Connection registry: the set of open tab channels and the
//! most-recently-active routing policy.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use tabrelay_core::{BrowserInfo, ServerMessage};

/// One open push channel to a tab. The sender feeds the connection's writer
/// task; dropping the receiving side kills delivery and the connection gets
/// unregistered on the next failed push.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    pub info: Option<BrowserInfo>,
}

/// Tracks open tab channels and which one was most recently active. The
/// routing decision lives here so call sites never inline fallback logic.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<Uuid, Connection>,
    most_recent: Option<Uuid>,
}

impl Registry {
    /// Adds a connection and adopts it as most-recent: after a navigation the
    /// freshest channel is the best routing guess.
    pub fn register(&mut self, conn: Connection) {
        self.most_recent = Some(conn.id);
        self.connections.insert(conn.id, conn);
    }

    /// Removes a connection, clearing the most-recent pointer if it was it.
    pub fn unregister(&mut self, id: Uuid) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if self.most_recent == Some(id) {
            self.most_recent = None;
        }
        removed
    }

    /// The most-recent connection if still live; else an arbitrary live one,
    /// re-adopted as most-recent; else none.
    pub fn select_target(&mut self) -> Option<(Uuid, mpsc::UnboundedSender<ServerMessage>)> {
        if let Some(id) = self.most_recent {
            if let Some(conn) = self.connections.get(&id) {
                return Some((id, conn.tx.clone()));
            }
            self.most_recent = None;
        }
        let fallback = self.connections.values().next()?;
        let (id, tx) = (fallback.id, fallback.tx.clone());
        debug!(connection = %id, "Re-adopting fallback connection as most recent");
        self.most_recent = Some(id);
        Some((id, tx))
    }

    /// Marks a connection as most recently active. Keepalives must not call
    /// this.
    pub fn touch(&mut self, id: Uuid) {
        if self.connections.contains_key(&id) {
            self.most_recent = Some(id);
        }
    }

    pub fn update_info(&mut self, id: Uuid, info: BrowserInfo) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.info = Some(info);
        }
    }

    pub fn infos(&self) -> Vec<BrowserInfo> {
        self.connections
            .values()
            .filter_map(|c| c.info.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn conn() -> (Connection, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Connection {
                id: Uuid::new_v4(),
                tx,
                info: None,
            },
            rx,
        )
    }

    #[test]
    fn test_register_adopts_most_recent() {
        let mut reg = Registry::default();
        let (a, _rx_a) = conn();
        let (b, _rx_b) = conn();
        let b_id = b.id;
        reg.register(a);
        reg.register(b);
        assert_eq!(reg.select_target().unwrap().0, b_id);
    }

    #[test]
    fn test_touch_moves_most_recent() {
        let mut reg = Registry::default();
        let (a, _rx_a) = conn();
        let (b, _rx_b) = conn();
        let a_id = a.id;
        reg.register(a);
        reg.register(b);
        reg.touch(a_id);
        assert_eq!(reg.select_target().unwrap().0, a_id);
    }

    #[test]
    fn test_unregister_most_recent_falls_back() {
        let mut reg = Registry::default();
        let (a, _rx_a) = conn();
        let (b, _rx_b) = conn();
        let a_id = a.id;
        let b_id = b.id;
        reg.register(a);
        reg.register(b);
        reg.unregister(b_id);
        // b was most-recent; a must be re-adopted
        assert_eq!(reg.select_target().unwrap().0, a_id);
        assert_eq!(reg.select_target().unwrap().0, a_id);
    }

    #[test]
    fn test_empty_registry_has_no_target() {
        let mut reg = Registry::default();
        assert!(reg.select_target().is_none());
        let (a, _rx) = conn();
        let a_id = a.id;
        reg.register(a);
        reg.unregister(a_id);
        assert!(reg.select_target().is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_touch_unknown_id_is_ignored() {
        let mut reg = Registry::default();
        let (a, _rx) = conn();
        let a_id = a.id;
        reg.register(a);
        reg.touch(Uuid::new_v4());
        // pointer never references a connection outside the registry
        assert_eq!(reg.select_target().unwrap().0, a_id);
    }
}
