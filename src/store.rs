//! Announced peers per info hash.

use std::net::SocketAddrV4;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::common::Id;

/// Bounded store of endpoints announced per info hash.
///
/// Both dimensions are LRU bounded so a flood of announces evicts the
/// longest-unrefreshed entries instead of growing without limit.
#[derive(Debug)]
pub struct PeerStore {
    info_hashes: LruCache<Id, LruCache<SocketAddrV4, ()>>,
    max_peers: NonZeroUsize,
}

impl PeerStore {
    pub fn new(max_info_hashes: NonZeroUsize, max_peers: NonZeroUsize) -> Self {
        Self {
            info_hashes: LruCache::new(max_info_hashes),
            max_peers,
        }
    }

    /// Record that `peer` can serve `info_hash`. Re-announcing refreshes the
    /// entry's recency.
    pub fn store(&mut self, info_hash: Id, peer: SocketAddrV4) {
        if let Some(peers) = self.info_hashes.get_mut(&info_hash) {
            peers.put(peer, ());
        } else {
            let mut peers = LruCache::new(self.max_peers);
            peers.put(peer, ());
            self.info_hashes.put(info_hash, peers);
        }
    }

    /// All endpoints currently known for `info_hash`, most recently
    /// announced first.
    pub fn find(&mut self, info_hash: &Id) -> Vec<SocketAddrV4> {
        self.info_hashes
            .get(info_hash)
            .map(|peers| peers.iter().map(|(peer, _)| *peer).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> PeerStore {
        PeerStore::new(
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(3).unwrap(),
        )
    }

    #[test]
    fn find_returns_stored_peers() {
        let mut store = store();
        let info_hash = Id::random();

        let peer = SocketAddrV4::new([127, 0, 0, 1].into(), 6881);
        store.store(info_hash, peer);

        assert_eq!(store.find(&info_hash), vec![peer]);
        assert!(store.find(&Id::random()).is_empty());
    }

    #[test]
    fn reannounce_does_not_duplicate() {
        let mut store = store();
        let info_hash = Id::random();

        let peer = SocketAddrV4::new([127, 0, 0, 1].into(), 6881);
        store.store(info_hash, peer);
        store.store(info_hash, peer);

        assert_eq!(store.find(&info_hash).len(), 1);
    }

    #[test]
    fn peers_are_bounded_per_info_hash() {
        let mut store = store();
        let info_hash = Id::random();

        for i in 0..5 {
            store.store(info_hash, SocketAddrV4::new([10, 0, 0, i + 1].into(), 6881));
        }

        let peers = store.find(&info_hash);
        assert_eq!(peers.len(), 3);
        // The most recent announce is first, the oldest were evicted.
        assert_eq!(peers[0], SocketAddrV4::new([10, 0, 0, 5].into(), 6881));
    }

    #[test]
    fn info_hashes_are_bounded() {
        let mut store = store();

        let first = Id::random();
        let second = Id::random();
        let third = Id::random();

        let peer = SocketAddrV4::new([127, 0, 0, 1].into(), 6881);
        store.store(first, peer);
        store.store(second, peer);
        store.store(third, peer);

        assert!(store.find(&first).is_empty());
        assert_eq!(store.find(&third), vec![peer]);
    }
}
