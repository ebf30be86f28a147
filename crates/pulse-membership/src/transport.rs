//! Outbound message delivery.

/// Best-effort datagram delivery between nodes.
///
/// `send` must not block and reports nothing back: a lost message is
/// indistinguishable from a delivered one as far as the engine knows.
pub trait Transport: Send + Sync {
    fn send(&self, from: crate::NodeAddress, to: crate::NodeAddress, payload: Vec<u8>);
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, from: crate::NodeAddress, to: crate::NodeAddress, payload: Vec<u8>) {
        (**self).send(from, to, payload)
    }
}
