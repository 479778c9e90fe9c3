//! Outbound `LDAPMessage` assembly.
//!
//! ```text
//! LDAPMessage ::= SEQUENCE {
//!      messageID       MessageID,
//!      protocolOp      CHOICE { ... },
//!      controls       [0] Controls OPTIONAL }
//! ```

use std::fmt;

use crate::ber::Packet;
use crate::control::encode_controls;
use crate::operation::Operation;

/// Identifier correlating a request with its response.
///
/// Valid identifiers are `1..=MessageId::MAX`; `0` is reserved for
/// unsolicited notifications sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u32);

impl MessageId {
    /// RFC 4511 `maxInt`.
    pub const MAX: u32 = 2_147_483_647;

    /// The identifier of unsolicited notifications.
    pub const UNSOLICITED: MessageId = MessageId(0);

    #[must_use]
    pub fn is_unsolicited(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One outbound message: an operation tagged with its identifier.
///
/// Built per call and consumed by transmission.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    pub message_id: MessageId,
    pub operation: &'a Operation,
}

impl<'a> Envelope<'a> {
    #[must_use]
    pub fn new(message_id: MessageId, operation: &'a Operation) -> Self {
        Self {
            message_id,
            operation,
        }
    }

    /// Assembles `{ id, body, [controls] }`. The controls element is present
    /// only when the operation carries at least one control.
    #[must_use]
    pub fn to_packet(&self) -> Packet {
        let mut children = vec![
            Packet::integer(i64::from(self.message_id.0), "MessageID"),
            self.operation.to_packet(),
        ];
        if let Some(controls) = encode_controls(self.operation.controls()) {
            children.push(controls);
        }
        Packet::sequence(children, "LDAP Request")
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.to_packet().encode()
    }
}
