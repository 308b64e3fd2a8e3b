//! Liveness bookkeeping on top of the routing table.
//!
//! The table itself only knows membership; this layer remembers when each
//! node was last heard from, how many requests to it timed out, and whether
//! it ever proved reachable, yielding the good/questionable/bad
//! classification of BEP-5. Each active range additionally carries a
//! one-shot refresh timer delivering [InactiveRange] to the owning actor.
//!
//! None of this state is persisted; a restarted node rebuilds it from the
//! clock, so recorded activity can only ever be in the past. A timestamp
//! from the future means the monotonic clock broke and is treated as fatal.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::common::{Id, Node};
use crate::routing::table::{Range, RoutingTable, K};
use crate::timer::{TimerRef, Timers};
use crate::{Error, Result};

/// The age of a node's last activity beyond which it is no longer good.
pub const NODE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// The bucket inactivity span after which a refresh is due.
pub const RANGE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Consecutive timeouts beyond this make a node bad.
const MAX_TIMEOUT_COUNT: u8 = 2;

/// BEP-5 liveness classification, derived on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Good,
    /// Past [NODE_TIMEOUT]; carries how far past.
    Questionable(Duration),
    Bad,
}

/// Freshness of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeState {
    Ok,
    Empty,
    /// Stale; carries the id of a member drawn uniformly at random, a
    /// suitable target for a refresh lookup.
    NeedsRefresh(Id),
}

/// Message delivered when a range's refresh timer expires.
///
/// The owner is expected to consult [RoutingMeta::range_state] and rearm via
/// [RoutingMeta::reset_range_timer]; expiry alone changes nothing here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InactiveRange(pub Range);

#[derive(Debug, Clone, Copy)]
struct NodeEntry {
    last_activity: Instant,
    timeout_count: u8,
    reachable: bool,
}

#[derive(Debug)]
struct RangeEntry {
    /// Oldest member activity at the time the timer was armed.
    last_activity: Instant,
    timer: TimerRef,
}

/// The routing table wrapped with per-node and per-range liveness metadata.
#[derive(Debug)]
pub struct RoutingMeta {
    table: RoutingTable,
    nodes: HashMap<Node, NodeEntry>,
    ranges: HashMap<Range, RangeEntry>,
    timers: Timers<InactiveRange>,
}

impl RoutingMeta {
    /// Wrap a table, arming a fresh refresh timer per range and seeding
    /// every existing node as stale but not bad.
    pub fn new(table: RoutingTable, timers: Timers<InactiveRange>) -> (Id, Self) {
        let now = Instant::now();
        let own_id = table.node_id();

        // Early in process life the clock may not reach back a full
        // NODE_TIMEOUT; clamping to now only makes those nodes look fresher.
        let stale = now.checked_sub(NODE_TIMEOUT).unwrap_or(now);

        let mut meta = RoutingMeta {
            nodes: HashMap::new(),
            ranges: HashMap::new(),
            table,
            timers,
        };

        for node in meta.table.node_list() {
            meta.nodes.insert(
                node,
                NodeEntry {
                    last_activity: stale,
                    timeout_count: 0,
                    reachable: false,
                },
            );
        }

        for range in meta.table.ranges() {
            meta.arm_range_timer(range, now);
        }

        (own_id, meta)
    }

    // === Getters ===

    pub fn node_id(&self) -> Id {
        self.table.node_id()
    }

    pub fn is_member(&self, node: &Node) -> bool {
        self.table.is_member(node)
    }

    pub fn node_list(&self) -> Vec<Node> {
        self.table.node_list()
    }

    pub fn range_of(&self, id: &Id) -> Range {
        self.table.range_of(id)
    }

    pub fn range_members(&self, range: &Range) -> Vec<Node> {
        self.table.members(range)
    }

    /// The bare routing table, for callers that persist it. Timers and
    /// activity metadata are deliberately ephemeral: a fresh [Self::new]
    /// rebuilds them from the clock.
    pub fn export(self) -> RoutingTable {
        self.table
    }

    // === Public Methods ===

    /// Insert a previously unknown node with unreachable-add semantics: it
    /// becomes a member with fresh activity but must still prove it can
    /// answer before it counts as verified.
    pub fn insert(&mut self, node: Node) -> Result<()> {
        debug_assert!(!self.is_member(&node), "insert of an existing member");

        let old_ranges = self.table.ranges();

        if !self.table.insert(node) {
            return Err(Error::NotInserted);
        }

        let now = Instant::now();
        self.nodes.insert(
            node,
            NodeEntry {
                last_activity: now,
                timeout_count: 0,
                reachable: false,
            },
        );

        // The insert may have split a range into several; retime exactly the
        // ranges that changed.
        let new_ranges = self.table.ranges();

        for range in old_ranges.iter().filter(|r| !new_ranges.contains(r)) {
            if let Some(entry) = self.ranges.remove(range) {
                self.timers.cancel(entry.timer);
            }
        }

        for range in new_ranges.iter().filter(|r| !old_ranges.contains(r)) {
            let start = self.oldest_activity(range).unwrap_or(now);
            self.arm_range_timer(*range, start);
        }

        Ok(())
    }

    /// Replace a bad node with a new one.
    ///
    /// Panics if `old` is not bad or `new` is already a member; callers
    /// decide *that* a node goes, this layer only checks they were allowed
    /// to.
    pub fn replace(&mut self, old: &Node, new: Node) -> Result<()> {
        assert!(
            matches!(self.node_state(old), Some(NodeState::Bad)),
            "replace of a node that is not bad"
        );
        assert!(!self.is_member(&new), "replacement is already a member");

        self.table.remove(old);
        self.nodes.remove(old);

        self.insert(new)
    }

    /// Drop a bad node. Range timers are not recomputed; they self-correct
    /// on the next expiry or an explicit [Self::reset_range_timer].
    ///
    /// Panics if the node is not bad.
    pub fn remove(&mut self, node: &Node) {
        assert!(
            matches!(self.node_state(node), Some(NodeState::Bad)),
            "remove of a node that is not bad"
        );

        self.table.remove(node);
        self.nodes.remove(node);
    }

    /// Record communication with a member.
    ///
    /// `reachable` means the node answered a request of ours. Unsolicited
    /// inbound traffic (`reachable = false`) refreshes a node that already
    /// proved reachable but does not upgrade an unverified one.
    pub fn node_touch(&mut self, node: &Node, reachable: bool) {
        let Some(entry) = self.nodes.get_mut(node) else {
            return;
        };

        if reachable {
            *entry = NodeEntry {
                last_activity: Instant::now(),
                timeout_count: 0,
                reachable: true,
            };
        } else if entry.reachable {
            entry.last_activity = Instant::now();
            entry.timeout_count = 0;
        }
    }

    /// Record a request to this node timing out.
    pub fn node_timeout(&mut self, node: &Node) {
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.timeout_count = entry.timeout_count.saturating_add(1);
        }
    }

    /// Classify a member node. Returns None for unknown nodes.
    pub fn node_state(&self, node: &Node) -> Option<NodeState> {
        let entry = self.nodes.get(node)?;

        Some(classify(entry, Instant::now()))
    }

    /// Freshness of a range, based on its *most recently* active member.
    pub fn range_state(&self, range: &Range) -> Result<RangeState> {
        if !self.table.is_range(range) {
            return Err(Error::NotMember);
        }

        let members = self.table.members(range);

        let mut newest: Option<Instant> = None;
        for member in &members {
            if let Some(entry) = self.nodes.get(member) {
                newest = Some(match newest {
                    Some(current) => current.max(entry.last_activity),
                    None => entry.last_activity,
                });
            }
        }

        let Some(newest) = newest else {
            return Ok(RangeState::Empty);
        };

        if age_of(Instant::now(), newest) <= RANGE_TIMEOUT {
            return Ok(RangeState::Ok);
        }

        match members.choose(&mut rand::thread_rng()) {
            Some(member) => Ok(RangeState::NeedsRefresh(*member.id())),
            None => Ok(RangeState::Empty),
        }
    }

    /// Rearm a range's refresh timer, from now when `force` is set and from
    /// the oldest member activity otherwise.
    pub fn reset_range_timer(&mut self, range: &Range, force: bool) {
        if !self.table.is_range(range) {
            debug!(?range, "reset_range_timer on a vanished range");
            return;
        }

        let start = if force {
            Instant::now()
        } else {
            self.oldest_activity(range)
                .unwrap_or_else(Instant::now)
        };

        self.arm_range_timer(*range, start);
    }

    /// Up to `k` nodes closest to `target`: good nodes first (closest
    /// first), topped up with questionable ones. Bad nodes are never
    /// returned.
    pub fn neighbors(&self, target: &Id, k: usize) -> Vec<Node> {
        let now = Instant::now();
        let nodes = &self.nodes;

        let mut result = self.table.closest_to(target, k, |node| {
            matches!(state_of(nodes, node, now), Some(NodeState::Good))
        });

        if result.len() < k {
            let shortfall = k - result.len();
            result.extend(self.table.closest_to(target, shortfall, |node| {
                matches!(state_of(nodes, node, now), Some(NodeState::Questionable(_)))
            }));
        }

        result
    }

    /// Default-width [Self::neighbors].
    pub fn closest_to(&self, target: &Id) -> Vec<Node> {
        self.neighbors(target, K)
    }

    // === Private Methods ===

    fn oldest_activity(&self, range: &Range) -> Option<Instant> {
        self.table
            .members(range)
            .iter()
            .filter_map(|member| self.nodes.get(member))
            .map(|entry| entry.last_activity)
            .min()
    }

    /// Arm the one timer for `range`, cancelling any previous one so no
    /// range ever has two.
    ///
    /// A start whose deadline already passed (one stale member is enough to
    /// drag the oldest activity past RANGE_TIMEOUT) would fire straight back
    /// into the owner's mailbox; arm a full interval from now instead.
    fn arm_range_timer(&mut self, range: Range, start: Instant) {
        let now = Instant::now();
        let start = if start + RANGE_TIMEOUT <= now { now } else { start };

        let timer = self
            .timers
            .arm_at(start + RANGE_TIMEOUT, InactiveRange(range));

        if let Some(previous) = self.ranges.insert(
            range,
            RangeEntry {
                last_activity: start,
                timer,
            },
        ) {
            self.timers.cancel(previous.timer);
        }
    }
}

fn state_of(nodes: &HashMap<Node, NodeEntry>, node: &Node, now: Instant) -> Option<NodeState> {
    nodes.get(node).map(|entry| classify(entry, now))
}

fn classify(entry: &NodeEntry, now: Instant) -> NodeState {
    if entry.timeout_count > MAX_TIMEOUT_COUNT {
        return NodeState::Bad;
    }

    let age = age_of(now, entry.last_activity);

    if age < NODE_TIMEOUT {
        NodeState::Good
    } else {
        NodeState::Questionable(age - NODE_TIMEOUT)
    }
}

/// Activity is always recorded off the same monotonic clock, so it cannot be
/// in the future. If it is, the clock broke underneath us and every derived
/// classification would be wrong.
fn age_of(now: Instant, last_activity: Instant) -> Duration {
    match now.checked_duration_since(last_activity) {
        Some(age) => age,
        None => panic!("monotonic clock ran backwards past a recorded activity timestamp"),
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::net::SocketAddrV4;
    use std::time::Duration;

    use super::*;

    fn meta_with_nodes(count: u8) -> (RoutingMeta, Vec<Node>) {
        let mut table = RoutingTable::new(Id::random());
        let mut nodes = Vec::new();

        for i in 0..count {
            let node = Node::new(
                Id::random(),
                SocketAddrV4::new([10, 0, 0, i + 1].into(), 6881),
            );
            if table.insert(node) {
                nodes.push(node);
            }
        }

        let (tx, _rx) = flume::unbounded();
        let (_, meta) = RoutingMeta::new(table, Timers::new(tx));

        (meta, nodes)
    }

    fn backdate(meta: &mut RoutingMeta, node: &Node, by: Duration) {
        let entry = meta.nodes.get_mut(node).unwrap();
        entry.last_activity = Instant::now().checked_sub(by).unwrap();
    }

    #[test]
    fn membership_and_entries_agree() {
        let (mut meta, nodes) = meta_with_nodes(5);

        for node in &nodes {
            assert!(meta.is_member(node));
            assert!(meta.nodes.contains_key(node));
        }

        let fresh = Node::new(Id::random(), SocketAddrV4::new([10, 0, 1, 1].into(), 6881));
        meta.insert(fresh).unwrap();
        assert!(meta.is_member(&fresh));
        assert!(meta.nodes.contains_key(&fresh));

        assert_eq!(meta.node_list().len(), meta.nodes.len());
    }

    #[test]
    fn every_range_has_exactly_one_entry() {
        let (mut meta, _) = meta_with_nodes(8);

        for _ in 0..24 {
            let _ = meta.insert(Node::new(
                Id::random(),
                SocketAddrV4::new(
                    [10, 1, rand::random::<u8>(), rand::random::<u8>()].into(),
                    6881,
                ),
            ));
        }

        let table_ranges: HashSet<Range> = meta.table.ranges().into_iter().collect();
        let entry_ranges: HashSet<Range> = meta.ranges.keys().copied().collect();

        assert_eq!(table_ranges, entry_ranges);
    }

    #[test]
    fn new_seeds_existing_nodes_stale_but_not_bad() {
        let (meta, nodes) = meta_with_nodes(3);

        for node in &nodes {
            match meta.node_state(node) {
                Some(NodeState::Questionable(_)) | Some(NodeState::Good) => {}
                other => panic!("expected stale-but-not-bad, got {other:?}"),
            }
        }
    }

    #[test]
    fn refused_insert_leaves_no_entry() {
        let (mut meta, nodes) = meta_with_nodes(3);

        let duplicate_address = Node::new(Id::random(), *nodes[0].address());

        assert!(matches!(
            meta.insert(duplicate_address),
            Err(Error::NotInserted)
        ));
        assert!(!meta.nodes.contains_key(&duplicate_address));
    }

    #[test]
    fn three_timeouts_make_a_node_bad() {
        let (mut meta, nodes) = meta_with_nodes(1);
        let node = &nodes[0];

        meta.node_timeout(node);
        meta.node_timeout(node);
        assert!(!matches!(meta.node_state(node), Some(NodeState::Bad)));

        meta.node_timeout(node);
        assert_eq!(meta.node_state(node), Some(NodeState::Bad));
    }

    #[test]
    fn reachable_touch_resets_classification() {
        let (mut meta, nodes) = meta_with_nodes(1);
        let node = &nodes[0];

        backdate(&mut meta, node, NODE_TIMEOUT + Duration::from_millis(1));
        assert!(matches!(
            meta.node_state(node),
            Some(NodeState::Questionable(_))
        ));

        for _ in 0..3 {
            meta.node_timeout(node);
        }
        assert_eq!(meta.node_state(node), Some(NodeState::Bad));

        meta.node_touch(node, true);
        assert_eq!(meta.node_state(node), Some(NodeState::Good));
        assert_eq!(meta.nodes[node].timeout_count, 0);
        assert!(meta.nodes[node].reachable);
    }

    #[test]
    fn unsolicited_touch_does_not_upgrade_unverified_node() {
        let (mut meta, nodes) = meta_with_nodes(1);
        let node = &nodes[0];

        backdate(&mut meta, node, NODE_TIMEOUT + Duration::from_secs(1));
        meta.node_timeout(node);
        let before = meta.nodes[node];

        meta.node_touch(node, false);

        let after = meta.nodes[node];
        assert_eq!(before.last_activity, after.last_activity);
        assert_eq!(before.timeout_count, after.timeout_count);
        assert!(!after.reachable);
    }

    #[test]
    fn unsolicited_touch_refreshes_verified_node() {
        let (mut meta, nodes) = meta_with_nodes(1);
        let node = &nodes[0];

        meta.node_touch(node, true);
        backdate(&mut meta, node, NODE_TIMEOUT + Duration::from_secs(1));
        meta.node_timeout(node);

        meta.node_touch(node, false);

        assert_eq!(meta.node_state(node), Some(NodeState::Good));
        assert_eq!(meta.nodes[node].timeout_count, 0);
        assert!(meta.nodes[node].reachable);
    }

    #[test]
    fn split_retimes_exactly_the_changed_ranges() {
        // Table whose single full-space bucket splits on the ninth insert.
        let own_id: Id = "0000000000000000000000000000000000000001"
            .try_into()
            .unwrap();
        let mut table = RoutingTable::new(own_id);

        let mut near_bytes = [0_u8; 20];
        let mut far_bytes = [0xff_u8; 20];
        for i in 0..4 {
            near_bytes[19] = i + 2;
            far_bytes[19] = i + 2;
            table.insert(Node::new(
                Id::from_bytes(near_bytes).unwrap(),
                SocketAddrV4::new([10, 0, 0, i + 1].into(), 6881),
            ));
            table.insert(Node::new(
                Id::from_bytes(far_bytes).unwrap(),
                SocketAddrV4::new([10, 0, 1, i + 1].into(), 6881),
            ));
        }

        let (tx, _rx) = flume::unbounded();
        let (_, mut meta) = RoutingMeta::new(table, Timers::new(tx));

        let old_ranges = meta.table.ranges();
        assert_eq!(old_ranges.len(), 1);

        // Age the members so the recomputed range start is observable.
        for node in meta.node_list() {
            backdate(&mut meta, &node, Duration::from_secs(60));
        }

        let mut trigger_bytes = [0_u8; 20];
        trigger_bytes[0] = 0x01;
        let trigger = Node::new(
            Id::from_bytes(trigger_bytes).unwrap(),
            SocketAddrV4::new([10, 0, 2, 1].into(), 6881),
        );
        meta.insert(trigger).unwrap();

        let new_ranges = meta.table.ranges();
        assert_eq!(new_ranges.len(), 2);
        assert!(meta.is_member(&trigger));

        // The split-away range has no entry; both new ranges have one,
        // started at the oldest activity of their members.
        assert!(!meta.ranges.contains_key(&old_ranges[0]));
        for range in &new_ranges {
            let entry = meta.ranges.get(range).unwrap();
            let oldest = meta.oldest_activity(range).unwrap();
            assert_eq!(entry.last_activity, oldest);
        }
    }

    #[test]
    fn replace_swaps_bad_node_for_new_one() {
        let (mut meta, nodes) = meta_with_nodes(2);
        let old = &nodes[0];

        for _ in 0..3 {
            meta.node_timeout(old);
        }

        let new = Node::new(Id::random(), SocketAddrV4::new([10, 9, 9, 9].into(), 6881));
        meta.replace(old, new).unwrap();

        assert!(!meta.is_member(old));
        assert!(!meta.nodes.contains_key(old));
        assert!(meta.is_member(&new));
    }

    #[test]
    #[should_panic(expected = "replace of a node that is not bad")]
    fn replace_requires_bad_node() {
        let (mut meta, nodes) = meta_with_nodes(2);

        meta.replace(&nodes[0], Node::random()).unwrap();
    }

    #[test]
    #[should_panic(expected = "remove of a node that is not bad")]
    fn remove_requires_bad_node() {
        let (mut meta, nodes) = meta_with_nodes(1);

        meta.remove(&nodes[0]);
    }

    #[test]
    fn range_state_on_foreign_range_errors() {
        // Split the table so the full range is no longer one of its buckets.
        let own_id: Id = "0000000000000000000000000000000000000001"
            .try_into()
            .unwrap();
        let mut table = RoutingTable::new(own_id);

        let mut bytes = [0_u8; 20];
        for i in 0..9 {
            bytes[0] = if i % 2 == 0 { 0x00 } else { 0xff };
            bytes[19] = i + 2;
            table.insert(Node::new(
                Id::from_bytes(bytes).unwrap(),
                SocketAddrV4::new([10, 3, 0, i + 1].into(), 6881),
            ));
        }
        assert!(table.ranges().len() > 1);

        let (tx, _rx) = flume::unbounded();
        let (_, meta) = RoutingMeta::new(table, Timers::new(tx));

        assert!(matches!(
            meta.range_state(&Range::full()),
            Err(Error::NotMember)
        ));
    }

    #[test]
    fn range_state_reports_staleness() {
        let (mut meta, nodes) = meta_with_nodes(3);
        let range = meta.table.ranges()[0];

        assert_eq!(meta.range_state(&range).unwrap(), RangeState::Ok);

        for node in &nodes {
            backdate(&mut meta, node, RANGE_TIMEOUT + Duration::from_secs(1));
        }

        match meta.range_state(&range).unwrap() {
            RangeState::NeedsRefresh(id) => {
                assert!(nodes.iter().any(|n| *n.id() == id));
            }
            other => panic!("expected NeedsRefresh, got {other:?}"),
        }
    }

    #[test]
    fn one_fresh_member_keeps_range_ok() {
        let (mut meta, nodes) = meta_with_nodes(3);
        let range = meta.table.ranges()[0];

        for node in &nodes[1..] {
            backdate(&mut meta, node, RANGE_TIMEOUT + Duration::from_secs(1));
        }
        meta.node_touch(&nodes[0], true);

        assert_eq!(meta.range_state(&range).unwrap(), RangeState::Ok);
    }

    #[test]
    fn neighbors_orders_good_before_questionable_and_skips_bad() {
        let (mut meta, nodes) = meta_with_nodes(6);
        assert!(nodes.len() >= 6);

        let questionable: Vec<Node> = nodes[0..2].to_vec();
        let bad: Vec<Node> = nodes[2..4].to_vec();
        let good: Vec<Node> = nodes[4..].to_vec();

        for node in &questionable {
            backdate(&mut meta, node, NODE_TIMEOUT + Duration::from_secs(1));
        }
        for node in &bad {
            for _ in 0..3 {
                meta.node_timeout(node);
            }
        }
        for node in &good {
            meta.node_touch(node, true);
        }

        let target = Id::random();
        let result = meta.neighbors(&target, 8);

        assert!(result.len() <= 8);
        for node in &bad {
            assert!(!result.contains(node));
        }

        // All good nodes precede any questionable node.
        let is_good = |n: &Node| good.contains(n);
        let first_questionable = result.iter().position(|n| !is_good(n));
        if let Some(boundary) = first_questionable {
            assert!(result[boundary..].iter().all(|n| !is_good(n)));
            assert!(result[..boundary].iter().all(is_good));
        }
    }

    #[test]
    fn neighbors_caps_at_k() {
        let (mut meta, _) = meta_with_nodes(8);
        for node in meta.node_list() {
            meta.node_touch(&node, true);
        }

        assert!(meta.neighbors(&Id::random(), 3).len() <= 3);
    }

    #[test]
    fn rearm_with_a_stale_member_is_never_already_expired() {
        let (tx, rx) = flume::unbounded();
        let mut table = RoutingTable::new(Id::random());

        let stale = Node::new(Id::random(), SocketAddrV4::new([10, 0, 0, 1].into(), 6881));
        let fresh = Node::new(Id::random(), SocketAddrV4::new([10, 0, 0, 2].into(), 6881));
        table.insert(stale);
        table.insert(fresh);

        let (_, mut meta) = RoutingMeta::new(table, Timers::new(tx));

        // One member far past RANGE_TIMEOUT, one current: the range is still
        // Ok, but the oldest activity alone would arm a deadline in the past.
        backdate(&mut meta, &stale, RANGE_TIMEOUT + Duration::from_secs(60));
        meta.node_touch(&fresh, true);

        let range = meta.table.ranges()[0];
        assert_eq!(meta.range_state(&range).unwrap(), RangeState::Ok);

        meta.reset_range_timer(&range, false);

        // The rearm lands a full interval ahead instead of firing right back.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(
            Instant::now() - meta.ranges[&range].last_activity < RANGE_TIMEOUT,
            "armed start must not be already expired"
        );
    }

    #[test]
    fn range_timer_fires_into_owner_mailbox() {
        let (tx, rx) = flume::unbounded();
        let table = RoutingTable::new(Id::random());
        let (_, mut meta) = RoutingMeta::new(table, Timers::new(tx));

        let range = meta.table.ranges()[0];

        // A start almost a full interval old leaves a deadline only a few
        // milliseconds out, so the timer fires promptly.
        let start = Instant::now()
            .checked_sub(RANGE_TIMEOUT - Duration::from_millis(50))
            .unwrap();
        meta.arm_range_timer(range, start);

        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(fired, InactiveRange(range));
    }

    #[test]
    #[should_panic(expected = "monotonic clock ran backwards")]
    fn future_activity_is_fatal() {
        let (mut meta, nodes) = meta_with_nodes(1);

        let entry = meta.nodes.get_mut(&nodes[0]).unwrap();
        entry.last_activity = Instant::now() + Duration::from_secs(3600);

        let _ = meta.node_state(&nodes[0]);
    }
}
