//! Membership table — the per-node map from address to liveness entry.
//!
//! The local node's own entry is held apart from the peers so that no
//! table operation can remove it. Entries are always addressed by
//! [`NodeAddress`]; iteration order is the address order, which keeps
//! snapshots deterministic.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::debug;

use crate::message::{MAX_WIRE_VALUE, SnapshotEntry};
use crate::types::{MemberEntry, MemberState, NodeAddress, Timestamp};

/// What a merge did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First sighting of this address.
    Inserted,
    /// Address was tombstoned and came back with proof of life.
    Rejoined,
    /// Higher heartbeat; timestamp refreshed and state reset to alive.
    Refreshed,
    /// Heartbeat not newer; nothing changed.
    Unchanged,
    /// Incoming view of the local node carried a higher heartbeat.
    SelfAdvanced,
    /// Mention of a recently purged address with no newer heartbeat.
    StaleTombstone,
}

impl MergeOutcome {
    /// Whether the merge introduced a previously unknown member.
    pub fn is_new_member(self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Rejoined)
    }
}

/// Record of a purged member, kept for the rejoin window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tombstone {
    heartbeat: u64,
    removed_at: Timestamp,
}

/// The membership table owned by one node.
#[derive(Debug, Clone)]
pub struct MembershipTable {
    local: MemberEntry,
    peers: BTreeMap<NodeAddress, MemberEntry>,
    tombstones: HashMap<NodeAddress, Tombstone>,
}

impl MembershipTable {
    /// A table containing only the local node.
    pub fn new(local: NodeAddress, heartbeat: u64, now: Timestamp) -> Self {
        Self {
            local: MemberEntry::alive(local, heartbeat, now),
            peers: BTreeMap::new(),
            tombstones: HashMap::new(),
        }
    }

    pub fn local_address(&self) -> NodeAddress {
        self.local.address
    }

    pub fn local_entry(&self) -> &MemberEntry {
        &self.local
    }

    /// Look up a live or suspect entry. Tombstones are not visible here.
    pub fn lookup(&self, address: &NodeAddress) -> Option<&MemberEntry> {
        if *address == self.local.address {
            Some(&self.local)
        } else {
            self.peers.get(address)
        }
    }

    /// Merge one incoming entry using the max-heartbeat rule.
    ///
    /// Unknown addresses are inserted alive at `now`. Known addresses take
    /// the larger heartbeat, and only a strictly larger one refreshes the
    /// timestamp and resets the state to alive. Applying the same entry
    /// again is a no-op.
    pub fn merge(&mut self, incoming: &SnapshotEntry, now: Timestamp) -> MergeOutcome {
        let address = incoming.address();

        if address == self.local.address {
            if incoming.heartbeat > self.local.heartbeat {
                self.local.heartbeat = incoming.heartbeat;
                return MergeOutcome::SelfAdvanced;
            }
            return MergeOutcome::Unchanged;
        }

        if let Some(tomb) = self.tombstones.get(&address) {
            if incoming.heartbeat <= tomb.heartbeat {
                return MergeOutcome::StaleTombstone;
            }
            self.tombstones.remove(&address);
            self.peers
                .insert(address, MemberEntry::alive(address, incoming.heartbeat, now));
            return MergeOutcome::Rejoined;
        }

        match self.peers.get_mut(&address) {
            Some(existing) => {
                if incoming.heartbeat > existing.heartbeat {
                    existing.heartbeat = incoming.heartbeat;
                    existing.last_update = now;
                    existing.state = MemberState::Alive;
                    MergeOutcome::Refreshed
                } else {
                    MergeOutcome::Unchanged
                }
            }
            None => {
                self.peers
                    .insert(address, MemberEntry::alive(address, incoming.heartbeat, now));
                MergeOutcome::Inserted
            }
        }
    }

    /// Admit a node that asked to join.
    ///
    /// Like [`merge`](Self::merge), except a tombstoned address is always
    /// re-admitted with a fresh entry: an explicit join is proof of life.
    pub fn admit(&mut self, address: NodeAddress, heartbeat: u64, now: Timestamp) -> MergeOutcome {
        if self.tombstones.remove(&address).is_some() {
            self.peers
                .insert(address, MemberEntry::alive(address, heartbeat, now));
            return MergeOutcome::Rejoined;
        }
        self.merge(
            &SnapshotEntry {
                id: address.id,
                port: address.port,
                heartbeat,
                last_update: now,
            },
            now,
        )
    }

    /// Purge a peer, leaving a tombstone. The local entry cannot be removed.
    pub fn remove(&mut self, address: &NodeAddress, now: Timestamp) -> Option<MemberEntry> {
        if *address == self.local.address {
            debug!(node = %address, "refusing to remove local entry");
            return None;
        }
        let mut removed = self.peers.remove(address)?;
        removed.state = MemberState::Removed;
        self.tombstones.insert(
            *address,
            Tombstone {
                heartbeat: removed.heartbeat,
                removed_at: now,
            },
        );
        Some(removed)
    }

    /// Mark a peer suspect. Returns true if its state changed.
    pub fn suspect(&mut self, address: &NodeAddress) -> bool {
        match self.peers.get_mut(address) {
            Some(entry) if entry.state == MemberState::Alive => {
                entry.state = MemberState::Suspect;
                true
            }
            _ => false,
        }
    }

    /// Advance the local heartbeat and refresh its timestamp.
    ///
    /// The heartbeat stops at the largest value the wire accepts.
    pub fn advance_local(&mut self, now: Timestamp) -> u64 {
        if self.local.heartbeat < MAX_WIRE_VALUE {
            self.local.heartbeat += 1;
        }
        self.local.last_update = now;
        self.local.state = MemberState::Alive;
        self.local.heartbeat
    }

    /// Forget tombstones older than `window`. Returns how many expired.
    pub fn expire_tombstones(&mut self, now: Timestamp, window: Duration) -> usize {
        let before = self.tombstones.len();
        let window = window.as_secs();
        self.tombstones
            .retain(|_, tomb| now.saturating_sub(tomb.removed_at) <= window);
        before - self.tombstones.len()
    }

    pub fn is_tombstoned(&self, address: &NodeAddress) -> bool {
        self.tombstones.contains_key(address)
    }

    /// Every present entry, local node included, in address order.
    pub fn entries(&self) -> impl Iterator<Item = &MemberEntry> {
        let local = &self.local;
        let mut peers = self.peers.values().peekable();
        let mut local_pending = true;
        std::iter::from_fn(move || {
            if local_pending && peers.peek().is_none_or(|p| local.address < p.address) {
                local_pending = false;
                return Some(local);
            }
            peers.next()
        })
    }

    /// Every present peer, local node excluded.
    pub fn peers(&self) -> impl Iterator<Item = &MemberEntry> {
        self.peers.values()
    }

    /// Alive peers, local node excluded.
    pub fn alive_peers(&self) -> impl Iterator<Item = &MemberEntry> {
        self.peers.values().filter(|e| e.is_alive())
    }

    /// Number of alive entries, local node included.
    pub fn alive_count(&self) -> usize {
        1 + self.alive_peers().count()
    }

    /// Wire snapshot of every present entry.
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        self.entries().map(SnapshotEntry::from).collect()
    }

    /// Number of present entries, local node included.
    pub fn len(&self) -> usize {
        1 + self.peers.len()
    }

    /// Always false: the local entry is permanent.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Drop every peer and tombstone, keeping only the local entry.
    pub fn clear_peers(&mut self) {
        self.peers.clear();
        self.tombstones.clear();
    }
}
