//! See [`PeerTable`].

use std::net::SocketAddr;

use ahash::AHashMap;

use crate::peer::{Peer, PeerId};

enum Slot {
    Occupied(Peer),
    Free { next_free: Option<usize> },
}

/// Owns every connected/connecting [`Peer`], addressable both by its stable
/// [`PeerId`] and by its [`SocketAddr`].
///
/// Backed by a slot arena rather than a plain map keyed by `PeerId`, mirroring
/// [`PacketPool`](crate::packet::PacketPool)'s free-list approach: removed
/// slots are pushed onto a free list and reused by the next `insert`, so a
/// long-running manager churning through peers doesn't leave a
/// monotonically-growing `Vec`.
#[derive(Default)]
pub struct PeerTable {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    by_addr: AHashMap<SocketAddr, PeerId>,
    max_connections: usize,
}

impl PeerTable {
    /// Creates an empty table, rejecting inserts once `len()` would exceed
    /// `max_connections`.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            by_addr: AHashMap::new(),
            max_connections,
        }
    }

    /// Number of peers currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    /// Whether the table holds no peers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// Whether another peer can be inserted without exceeding
    /// `max_connections`.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.len() < self.max_connections
    }

    /// Inserts `peer`, returning its assigned id, or `None` if the table is
    /// already at `max_connections`.
    ///
    /// The closure receives the id this peer will be given, so the caller
    /// can build the [`Peer`] with its final [`PeerId`] already set.
    pub fn insert_with(&mut self, build: impl FnOnce(PeerId) -> Peer) -> Option<PeerId> {
        if !self.has_capacity() {
            return None;
        }
        let index = match self.free_head {
            Some(index) => index,
            None => {
                self.slots.push(Slot::Free { next_free: None });
                self.slots.len() - 1
            }
        };
        let id = PeerId(index as u64);
        let peer = build(id);
        let addr = peer.remote_addr();

        if let Slot::Free { next_free } = self.slots[index] {
            self.free_head = next_free;
        }
        self.slots[index] = Slot::Occupied(peer);
        self.by_addr.insert(addr, id);
        Some(id)
    }

    /// Looks up a peer by id.
    #[must_use]
    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        match self.slots.get(id.0 as usize)? {
            Slot::Occupied(peer) => Some(peer),
            Slot::Free { .. } => None,
        }
    }

    /// Looks up a peer by id, mutably.
    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        match self.slots.get_mut(id.0 as usize)? {
            Slot::Occupied(peer) => Some(peer),
            Slot::Free { .. } => None,
        }
    }

    /// Looks up a peer's id by its remote address.
    #[must_use]
    pub fn id_for_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.by_addr.get(&addr).copied()
    }

    /// Looks up a peer by its remote address, mutably.
    pub fn get_by_addr_mut(&mut self, addr: SocketAddr) -> Option<&mut Peer> {
        let id = self.id_for_addr(addr)?;
        self.get_mut(id)
    }

    /// Removes and returns the peer with `id`, if present.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        let index = id.0 as usize;
        let slot = self.slots.get_mut(index)?;
        if matches!(slot, Slot::Free { .. }) {
            return None;
        }
        let occupied = std::mem::replace(
            slot,
            Slot::Free {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(index);
        let Slot::Occupied(peer) = occupied else {
            unreachable!("checked occupied above");
        };
        self.by_addr.remove(&peer.remote_addr());
        Some(peer)
    }

    /// Iterates every live peer.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(peer) => Some(peer),
            Slot::Free { .. } => None,
        })
    }

    /// Iterates every live peer, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.slots.iter_mut().filter_map(|slot| match slot {
            Slot::Occupied(peer) => Some(peer),
            Slot::Free { .. } => None,
        })
    }

    /// Every id currently occupied, snapshotted so the caller can mutate the
    /// table (e.g. remove peers) while iterating the result.
    #[must_use]
    pub fn ids(&self) -> Vec<PeerId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(_) => Some(PeerId(index as u64)),
                Slot::Free { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::ManagerConfig;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn insert(table: &mut PeerTable, config: &ManagerConfig, port: u16) -> PeerId {
        table
            .insert_with(|id| Peer::new(id, addr(port), 0, true, Instant::now(), config))
            .expect("capacity available")
    }

    #[test]
    fn insert_then_lookup_by_id_and_addr() {
        let config = ManagerConfig::default();
        let mut table = PeerTable::new(4);
        let id = insert(&mut table, &config, 1);
        assert_eq!(1, table.len());
        assert_eq!(addr(1), table.get(id).unwrap().remote_addr());
        assert_eq!(Some(id), table.id_for_addr(addr(1)));
    }

    #[test]
    fn remove_frees_slot_for_reuse() {
        let config = ManagerConfig::default();
        let mut table = PeerTable::new(4);
        let first = insert(&mut table, &config, 1);
        table.remove(first).unwrap();
        assert_eq!(0, table.len());
        assert_eq!(None, table.id_for_addr(addr(1)));

        let second = insert(&mut table, &config, 2);
        assert_eq!(first, second, "freed slot should be recycled");
    }

    #[test]
    fn insert_rejected_once_at_capacity() {
        let config = ManagerConfig::default();
        let mut table = PeerTable::new(1);
        insert(&mut table, &config, 1);
        let overflow = table.insert_with(|id| Peer::new(id, addr(2), 0, true, Instant::now(), &config));
        assert!(overflow.is_none());
    }
}
