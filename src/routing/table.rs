//! Kademlia routing table with splitting buckets.
//!
//! Buckets cover explicit prefix ranges that always partition the id space.
//! A full bucket splits only while it covers the local id, per the classic
//! Kademlia rule, so the table stays detailed near ourselves and coarse far
//! away.

use std::fmt::{self, Debug, Formatter};

use crate::common::{Id, Node, ID_BITS};

/// K = the maximum number of nodes in a bucket.
pub const K: usize = 8;

/// A prefix interval of the id space covered by one bucket.
///
/// Two ranges either coincide or are disjoint. The prefix is normalized:
/// bits past `bits` are always zero, so equal ranges compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    prefix: Id,
    bits: u8,
}

impl Range {
    /// The range covering the entire id space.
    pub fn full() -> Range {
        Range {
            prefix: Id([0; 20]),
            bits: 0,
        }
    }

    pub fn contains(&self, id: &Id) -> bool {
        id.truncated(self.bits) == self.prefix
    }

    /// Split into the two halves extending this prefix by a zero and a one
    /// bit. Panics if the range is a single id already.
    fn split(&self) -> (Range, Range) {
        assert!(self.bits < ID_BITS, "cannot split a single-id range");

        let zero = Range {
            prefix: self.prefix,
            bits: self.bits + 1,
        };
        let one = Range {
            prefix: self.prefix.with_bit(self.bits, true),
            bits: self.bits + 1,
        };

        (zero, one)
    }
}

impl Debug for Range {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Range({:?}/{})", self.prefix, self.bits)
    }
}

struct Bucket {
    range: Range,
    nodes: Vec<Node>,
}

impl Bucket {
    fn new(range: Range) -> Self {
        Bucket {
            range,
            nodes: Vec::with_capacity(K),
        }
    }
}

impl Debug for Bucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Bucket{{ range: {:?}, nodes: {} }}", self.range, self.nodes.len())
    }
}

#[derive(Debug)]
pub struct RoutingTable {
    id: Id,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            buckets: vec![Bucket::new(Range::full())],
        }
    }

    // === Getters ===

    pub fn node_id(&self) -> Id {
        self.id
    }

    pub fn ranges(&self) -> Vec<Range> {
        self.buckets.iter().map(|bucket| bucket.range).collect()
    }

    pub fn node_list(&self) -> Vec<Node> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.nodes.iter().copied())
            .collect()
    }

    pub fn size(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.nodes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.nodes.is_empty())
    }

    // === Public Methods ===

    /// Returns true if this exact node (same id and address) is in the table.
    pub fn is_member(&self, node: &Node) -> bool {
        self.bucket_of(node.id()).nodes.contains(node)
    }

    pub fn is_range(&self, range: &Range) -> bool {
        self.buckets.iter().any(|bucket| bucket.range == *range)
    }

    /// The current range covering `id`. The ranges partition the id space,
    /// so every id is covered by exactly one.
    pub fn range_of(&self, id: &Id) -> Range {
        self.bucket_of(id).range
    }

    /// Members of the range covering the same interval as `range`, or none
    /// if `range` is not a current bucket.
    pub fn members(&self, range: &Range) -> Vec<Node> {
        self.buckets
            .iter()
            .find(|bucket| bucket.range == *range)
            .map(|bucket| bucket.nodes.clone())
            .unwrap_or_default()
    }

    /// Insert a node, splitting the bucket covering the local id as needed.
    ///
    /// Returns false if the node was refused: it is ourselves, its id or
    /// address is already present in its bucket, or the bucket is full and
    /// may not split.
    pub fn insert(&mut self, node: Node) -> bool {
        if node.id == self.id {
            // Do not add self to the routing table.
            return false;
        }

        loop {
            let index = self.bucket_index(node.id());
            let bucket = &mut self.buckets[index];

            if bucket
                .nodes
                .iter()
                .any(|existing| existing.id == node.id || existing.address == node.address)
            {
                return false;
            }

            if bucket.nodes.len() < K {
                let position = bucket
                    .nodes
                    .binary_search_by(|a| a.id.cmp(&node.id))
                    .unwrap_or_else(|insertion| insertion);
                bucket.nodes.insert(position, node);
                return true;
            }

            if !bucket.range.contains(&self.id) || bucket.range.bits >= ID_BITS {
                return false;
            }

            self.split_bucket(index);
        }
    }

    /// Remove a node. Ranges are never merged back.
    pub fn remove(&mut self, node: &Node) {
        let index = self.bucket_index(node.id());
        self.buckets[index].nodes.retain(|existing| existing != node);
    }

    /// Returns up to `k` nodes passing `filter`, closest to `target` first.
    pub fn closest_to<F>(&self, target: &Id, k: usize, filter: F) -> Vec<Node>
    where
        F: Fn(&Node) -> bool,
    {
        let mut result: Vec<Node> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.nodes.iter())
            .filter(|node| filter(node))
            .copied()
            .collect();

        result.sort_by_key(|node| node.id.xor(target));
        result.truncate(k);

        result
    }

    // === Private Methods ===

    fn bucket_index(&self, id: &Id) -> usize {
        self.buckets
            .iter()
            .position(|bucket| bucket.range.contains(id))
            .unwrap_or(0)
    }

    fn bucket_of(&self, id: &Id) -> &Bucket {
        &self.buckets[self.bucket_index(id)]
    }

    fn split_bucket(&mut self, index: usize) {
        let bucket = self.buckets.remove(index);
        let (zero, one) = bucket.range.split();

        let mut lower = Bucket::new(zero);
        let mut upper = Bucket::new(one);

        for node in bucket.nodes {
            if one.contains(node.id()) {
                upper.nodes.push(node);
            } else {
                lower.nodes.push(node);
            }
        }

        self.buckets.push(lower);
        self.buckets.push(upper);
    }
}

#[cfg(test)]
mod test {
    use std::convert::TryInto;
    use std::net::SocketAddrV4;

    use super::*;

    fn node_with_prefix(first_byte: u8, suffix: u8) -> Node {
        let mut bytes = [0_u8; 20];
        bytes[0] = first_byte;
        bytes[19] = suffix;
        Node::new(
            Id::from_bytes(bytes).unwrap(),
            SocketAddrV4::new([10, 0, suffix, first_byte].into(), 6881),
        )
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random());
        assert!(table.is_empty());

        table.insert(Node::random());
        assert!(!table.is_empty());
    }

    #[test]
    fn should_not_add_self() {
        let id = Id::random();
        let mut table = RoutingTable::new(id);
        let node = Node::new(id, SocketAddrV4::new([0, 0, 0, 0].into(), 0));

        assert!(!table.insert(node));
        assert!(table.is_empty());
    }

    #[test]
    fn refuses_duplicate_id_and_address() {
        let mut table = RoutingTable::new(Id::random());
        let node = Node::new(Id::random(), SocketAddrV4::new([10, 0, 0, 1].into(), 6881));

        assert!(table.insert(node));
        assert!(!table.insert(node));
        assert!(!table.insert(Node::new(Id::random(), *node.address())));
    }

    #[test]
    fn splits_bucket_containing_own_id() {
        // Local id in the 0x00... half; fill the full range with nodes from
        // both halves, then push one more to force a split.
        let own_id: Id = "0000000000000000000000000000000000000001"
            .try_into()
            .unwrap();
        let mut table = RoutingTable::new(own_id);

        for suffix in 0..4 {
            assert!(table.insert(node_with_prefix(0x00, suffix + 2)));
            assert!(table.insert(node_with_prefix(0xff, suffix + 2)));
        }
        assert_eq!(table.ranges().len(), 1);

        assert!(table.insert(node_with_prefix(0x01, 9)));

        assert_eq!(table.ranges().len(), 2);
        assert_eq!(table.size(), 9);

        // Every node is still covered by exactly one range.
        for node in table.node_list() {
            assert!(table.range_of(node.id()).contains(node.id()));
            assert!(table.is_member(&node));
        }
    }

    #[test]
    fn refuses_when_full_and_unsplittable() {
        // Local id in the 0x00 half; the 0xff half can never split.
        let own_id: Id = "0000000000000000000000000000000000000001"
            .try_into()
            .unwrap();
        let mut table = RoutingTable::new(own_id);

        // Force an initial split so the far half exists on its own.
        for suffix in 0..4 {
            table.insert(node_with_prefix(0x00, suffix + 2));
            table.insert(node_with_prefix(0xff, suffix + 2));
        }
        table.insert(node_with_prefix(0x01, 9));

        // Fill the far bucket to K.
        let mut refused = 0;
        for suffix in 0..16 {
            if !table.insert(node_with_prefix(0xfe, 100 + suffix)) {
                refused += 1;
            }
        }

        assert!(refused > 0);
    }

    #[test]
    fn remove_keeps_ranges() {
        let mut table = RoutingTable::new(Id::random());
        let node = Node::random();

        table.insert(node);
        let ranges = table.ranges();

        table.remove(&node);
        assert!(!table.is_member(&node));
        assert_eq!(table.ranges(), ranges);
    }

    #[test]
    fn closest_to_orders_by_distance() {
        let own_id: Id = "aefb7fac689c1122107dfcde08f6fa2ec4cfec66"
            .try_into()
            .unwrap();
        let target: Id = "d1406a3d3a8354d566f21dba8bd06c537cde2a20"
            .try_into()
            .unwrap();

        let mut table = RoutingTable::new(own_id);
        for _ in 0..32 {
            table.insert(Node::random());
        }

        let closest = table.closest_to(&target, 20, |_| true);

        assert!(closest.len() <= 20);
        for pair in closest.windows(2) {
            assert!(pair[0].id.xor(&target) <= pair[1].id.xor(&target));
        }
    }

    #[test]
    fn closest_to_respects_filter() {
        let mut table = RoutingTable::new(Id::random());
        let wanted = Node::new(Id::random(), SocketAddrV4::new([10, 0, 0, 1].into(), 1));
        let unwanted = Node::new(Id::random(), SocketAddrV4::new([10, 0, 0, 2].into(), 2));

        table.insert(wanted);
        table.insert(unwanted);

        let closest = table.closest_to(&Id::random(), 20, |node| {
            node.address() != unwanted.address()
        });

        assert_eq!(closest.len(), 1);
        assert_eq!(closest[0], wanted);
    }
}
