//! Relay pairing table
//!
//! Relates an inbound (client-facing) socket to its outbound socket. Both
//! sides are keys into the same map, and removing either removes both.

use crate::socks::transport::SocketId;
use std::collections::HashMap;

/// Symmetric one-to-one mapping between socket ids
#[derive(Debug, Default)]
pub struct PairingTable {
    peers: HashMap<SocketId, SocketId>,
}

impl PairingTable {
    /// Create an empty table
    pub fn new() -> Self {
        PairingTable::default()
    }

    /// Pair `a` with `b`; refused when either is already paired or `a == b`
    pub fn insert(&mut self, a: SocketId, b: SocketId) -> bool {
        if a == b || self.peers.contains_key(&a) || self.peers.contains_key(&b) {
            return false;
        }
        self.peers.insert(a, b);
        self.peers.insert(b, a);
        true
    }

    /// The socket paired with `id`
    pub fn peer_of(&self, id: SocketId) -> Option<SocketId> {
        self.peers.get(&id).copied()
    }

    /// Whether `id` is paired
    pub fn contains(&self, id: SocketId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Remove the pairing containing `id`, returning the other side
    pub fn remove(&mut self, id: SocketId) -> Option<SocketId> {
        let peer = self.peers.remove(&id)?;
        // A half-pair would mean the table is corrupted; drop it either way
        if self.peers.get(&peer) == Some(&id) {
            self.peers.remove(&peer);
        }
        Some(peer)
    }

    /// Number of pairings
    pub fn len(&self) -> usize {
        self.peers.len() / 2
    }

    /// Whether the table holds no pairings
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_symmetric() {
        let mut table = PairingTable::new();
        assert!(table.insert(SocketId(1), SocketId(2)));
        assert_eq!(table.peer_of(SocketId(1)), Some(SocketId(2)));
        assert_eq!(table.peer_of(SocketId(2)), Some(SocketId(1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_refuses_second_pairing() {
        let mut table = PairingTable::new();
        assert!(table.insert(SocketId(1), SocketId(2)));
        assert!(!table.insert(SocketId(1), SocketId(3)));
        assert!(!table.insert(SocketId(4), SocketId(2)));
        assert!(!table.insert(SocketId(5), SocketId(5)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_either_side_removes_both() {
        let mut table = PairingTable::new();
        table.insert(SocketId(1), SocketId(2));
        table.insert(SocketId(3), SocketId(4));

        assert_eq!(table.remove(SocketId(2)), Some(SocketId(1)));
        assert!(!table.contains(SocketId(1)));
        assert!(!table.contains(SocketId(2)));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove(SocketId(2)), None);
        assert_eq!(table.remove(SocketId(3)), Some(SocketId(4)));
        assert!(table.is_empty());
    }
}
