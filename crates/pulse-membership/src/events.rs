//! Membership change notifications.

use std::sync::Arc;

use tracing::{info, warn};

use crate::types::NodeAddress;

/// Receives add/remove events as seen by one observer node.
///
/// Purely informational; implementations must not call back into the
/// engine.
pub trait MembershipEvents: Send + Sync {
    fn member_added(&self, observer: NodeAddress, member: NodeAddress);
    fn member_removed(&self, observer: NodeAddress, member: NodeAddress);
}

/// Shared handle to an event sink.
pub type EventSink = Arc<dyn MembershipEvents>;

/// Writes membership events to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl MembershipEvents for TracingEvents {
    fn member_added(&self, observer: NodeAddress, member: NodeAddress) {
        info!(%observer, %member, "member added");
    }

    fn member_removed(&self, observer: NodeAddress, member: NodeAddress) {
        warn!(%observer, %member, "member removed");
    }
}
