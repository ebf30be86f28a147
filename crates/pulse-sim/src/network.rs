//! In-memory lossy network.
//!
//! Every node gets a mailbox keyed by its address. Sends land in the
//! destination mailbox unless the destination is detached or the message
//! is randomly dropped. Delivery happens when the driver drains a mailbox.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pulse_membership::{NodeAddress, Transport};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::trace;

/// Per-address traffic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrafficStats {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

struct NetworkInner {
    mailboxes: HashMap<NodeAddress, VecDeque<Vec<u8>>>,
    detached: HashSet<NodeAddress>,
    stats: HashMap<NodeAddress, TrafficStats>,
    drop_rate: f64,
    rng: StdRng,
}

/// Shared handle to the emulated network. Clones see the same mailboxes.
#[derive(Clone)]
pub struct EmulatedNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl EmulatedNetwork {
    /// A network that loses each message with probability `drop_rate`.
    pub fn new(drop_rate: f64, seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkInner {
                mailboxes: HashMap::new(),
                detached: HashSet::new(),
                stats: HashMap::new(),
                drop_rate: drop_rate.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }

    /// A network that never loses messages.
    pub fn lossless() -> Self {
        Self::new(0.0, 0)
    }

    /// Take every message waiting for `address`, oldest first.
    pub fn drain(&self, address: NodeAddress) -> Vec<Vec<u8>> {
        let mut inner = self.lock();
        let pending: Vec<Vec<u8>> = inner
            .mailboxes
            .get_mut(&address)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        inner.stats.entry(address).or_default().received += pending.len() as u64;
        pending
    }

    /// Stop delivering to `address`; queued messages are discarded.
    pub fn detach(&self, address: NodeAddress) {
        let mut inner = self.lock();
        inner.detached.insert(address);
        inner.mailboxes.remove(&address);
    }

    /// Resume delivering to `address`.
    pub fn attach(&self, address: NodeAddress) {
        self.lock().detached.remove(&address);
    }

    pub fn pending(&self, address: NodeAddress) -> usize {
        self.lock().mailboxes.get(&address).map_or(0, VecDeque::len)
    }

    pub fn stats(&self, address: NodeAddress) -> TrafficStats {
        self.lock().stats.get(&address).copied().unwrap_or_default()
    }

    /// Sum of the counters over every address.
    pub fn total_stats(&self) -> TrafficStats {
        self.lock()
            .stats
            .values()
            .fold(TrafficStats::default(), |acc, s| TrafficStats {
                sent: acc.sent + s.sent,
                received: acc.received + s.received,
                dropped: acc.dropped + s.dropped,
            })
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for EmulatedNetwork {
    fn send(&self, from: NodeAddress, to: NodeAddress, payload: Vec<u8>) {
        let mut inner = self.lock();
        inner.stats.entry(from).or_default().sent += 1;

        let drop_rate = inner.drop_rate;
        let lost = inner.detached.contains(&to) || (drop_rate > 0.0 && inner.rng.gen_bool(drop_rate));
        if lost {
            inner.stats.entry(to).or_default().dropped += 1;
            trace!(%from, %to, "message dropped");
            return;
        }
        inner.mailboxes.entry(to).or_default().push_back(payload);
    }
}
