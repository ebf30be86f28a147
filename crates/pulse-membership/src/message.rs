//! Wire messages exchanged between membership engines.
//!
//! Every message is a JSON envelope `{"tag": <u8>, "snapshot": [...]}`.
//! The tag selects the variant; the snapshot is an ordered list of
//! entries. Decoding goes straight into [`Message`], so an unknown tag or
//! a malformed entry is rejected before anything reaches the table.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::types::{MemberEntry, NodeAddress, Timestamp};

pub const JOIN_REQUEST: u8 = 0;
pub const JOIN_REPLY: u8 = 1;
pub const GOSSIP: u8 = 2;

/// Largest heartbeat or timestamp accepted off the wire (signed 64-bit range).
pub const MAX_WIRE_VALUE: u64 = i64::MAX as u64;

/// One entry as carried on the wire.
///
/// `last_update` is the sender's local timestamp; receivers never use it
/// for their own staleness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotEntry {
    pub id: u32,
    pub port: u16,
    pub heartbeat: u64,
    pub last_update: Timestamp,
}

impl SnapshotEntry {
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.id, self.port)
    }

    fn check_range(&self) -> Result<(), DecodeError> {
        if self.heartbeat > MAX_WIRE_VALUE {
            return Err(DecodeError::Malformed(format!(
                "heartbeat {} of {} out of range",
                self.heartbeat,
                self.address()
            )));
        }
        if self.last_update > MAX_WIRE_VALUE {
            return Err(DecodeError::Malformed(format!(
                "last_update {} of {} out of range",
                self.last_update,
                self.address()
            )));
        }
        Ok(())
    }
}

impl From<&MemberEntry> for SnapshotEntry {
    fn from(entry: &MemberEntry) -> Self {
        Self {
            id: entry.address.id,
            port: entry.address.port,
            heartbeat: entry.heartbeat,
            last_update: entry.last_update,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    tag: u8,
    snapshot: Vec<SnapshotEntry>,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Sent by a bootstrapping node to the introducer.
    JoinRequest { sender: SnapshotEntry },
    /// The introducer's full table, sent back to a joiner.
    JoinReply { snapshot: Vec<SnapshotEntry> },
    /// Periodic digest pushed to random peers.
    Gossip { snapshot: Vec<SnapshotEntry> },
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::JoinRequest { .. } => JOIN_REQUEST,
            Message::JoinReply { .. } => JOIN_REPLY,
            Message::Gossip { .. } => GOSSIP,
        }
    }

    /// Human-readable variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::JoinRequest { .. } => "join_request",
            Message::JoinReply { .. } => "join_reply",
            Message::Gossip { .. } => "gossip",
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let snapshot = match self {
            Message::JoinRequest { sender } => vec![*sender],
            Message::JoinReply { snapshot } | Message::Gossip { snapshot } => snapshot.clone(),
        };
        serde_json::to_vec(&Envelope {
            tag: self.tag(),
            snapshot,
        })
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        for entry in &envelope.snapshot {
            entry.check_range()?;
        }

        match envelope.tag {
            JOIN_REQUEST => match envelope.snapshot.as_slice() {
                [sender] => Ok(Message::JoinRequest { sender: *sender }),
                other => Err(DecodeError::JoinRequestShape(other.len())),
            },
            JOIN_REPLY => Ok(Message::JoinReply {
                snapshot: envelope.snapshot,
            }),
            GOSSIP => Ok(Message::Gossip {
                snapshot: envelope.snapshot,
            }),
            tag => Err(DecodeError::UnknownTag(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, heartbeat: u64) -> SnapshotEntry {
        SnapshotEntry {
            id,
            port: 0,
            heartbeat,
            last_update: 1_700_000_000,
        }
    }

    #[test]
    fn gossip_round_trips() {
        let msg = Message::Gossip {
            snapshot: vec![entry(1, 777), entry(2, 1), entry(u32::MAX, MAX_WIRE_VALUE)],
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn join_request_carries_single_entry() {
        let msg = Message::JoinRequest { sender: entry(2, 1) };
        let bytes = msg.encode().unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["tag"], 0);
        assert_eq!(raw["snapshot"].as_array().unwrap().len(), 1);
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn wire_layout_is_tag_plus_snapshot() {
        let bytes = br#"{"tag":1,"snapshot":[{"id":1,"port":0,"heartbeat":777,"last_update":5}]}"#;
        let msg = Message::decode(bytes).unwrap();
        assert_eq!(
            msg,
            Message::JoinReply {
                snapshot: vec![SnapshotEntry {
                    id: 1,
                    port: 0,
                    heartbeat: 777,
                    last_update: 5
                }]
            }
        );
    }

    #[test]
    fn unknown_tag_rejected() {
        let bytes = br#"{"tag":9,"snapshot":[]}"#;
        assert_eq!(Message::decode(bytes), Err(DecodeError::UnknownTag(9)));
    }

    #[test]
    fn join_request_with_many_entries_rejected() {
        let bytes = serde_json::to_vec(&Envelope {
            tag: JOIN_REQUEST,
            snapshot: vec![entry(2, 1), entry(3, 1)],
        })
        .unwrap();
        assert_eq!(Message::decode(&bytes), Err(DecodeError::JoinRequestShape(2)));
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(
            Message::decode(b"JOINREQ|2|1"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(Message::decode(&[]), Err(DecodeError::Malformed(_))));

        // Rejections are carried by value in delivery reports.
        let err = Message::decode(b"{}").unwrap_err();
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn out_of_range_fields_rejected() {
        let bytes = br#"{"tag":2,"snapshot":[{"id":1,"port":70000,"heartbeat":1,"last_update":0}]}"#;
        assert!(matches!(Message::decode(bytes), Err(DecodeError::Malformed(_))));

        let bytes = br#"{"tag":2,"snapshot":[{"id":1,"port":1,"heartbeat":-4,"last_update":0}]}"#;
        assert!(matches!(Message::decode(bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn values_past_signed_64_bit_rejected() {
        let bytes = br#"{"tag":2,"snapshot":[{"id":1,"port":0,"heartbeat":9223372036854775808,"last_update":0}]}"#;
        assert!(matches!(Message::decode(bytes), Err(DecodeError::Malformed(_))));

        let bytes = br#"{"tag":2,"snapshot":[{"id":1,"port":0,"heartbeat":18446744073709551615,"last_update":0}]}"#;
        assert!(matches!(Message::decode(bytes), Err(DecodeError::Malformed(_))));

        let bytes = br#"{"tag":0,"snapshot":[{"id":2,"port":0,"heartbeat":1,"last_update":18446744073709551615}]}"#;
        assert!(matches!(Message::decode(bytes), Err(DecodeError::Malformed(_))));

        let bytes = br#"{"tag":2,"snapshot":[{"id":1,"port":0,"heartbeat":9223372036854775807,"last_update":9223372036854775807}]}"#;
        assert!(Message::decode(bytes).is_ok());
    }
}
