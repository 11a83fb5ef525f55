//! Message framing for the gossip wire protocol.
//!
//! Every payload crossing the overlay is wrapped in a [`Message`]:
//!
//! ```text
//! length (u32) | version (u16) | variant (u16) | [group id (32 B)] | body
//! ```
//!
//! All integers are big-endian. The group id is present only for
//! `Multicast`, so the header is 8 bytes for nil-group variants and
//! 40 bytes otherwise. `length` counts the whole frame, header included.

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result};

/// Header size for nil-group variants (Ping, Pong, Cast, Broadcast).
pub const HEADER_SIZE: usize = 8;

/// Header size when a group id is on the wire (Multicast).
pub const GROUPED_HEADER_SIZE: usize = 40;

/// Upper bound on a whole message frame, header included.
///
/// Frames claiming a larger length are rejected before any allocation.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// A protocol version number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageVersion(pub u16);

/// The only version currently spoken.
pub const V1: MessageVersion = MessageVersion(1);

impl std::fmt::Display for MessageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The kind of a message, driving supervisor dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageVariant {
    /// Membership probe carrying the sender's address.
    Ping = 1,
    /// Reply to a ping carrying the responder's address.
    Pong = 2,
    /// Direct payload to a single peer.
    Cast = 3,
    /// Payload to the members of a group.
    Multicast = 4,
    /// Payload flooded to the whole network.
    Broadcast = 5,
}

impl MessageVariant {
    /// Wire encoding of this variant.
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Whether this variant carries a group id on the wire.
    pub fn has_group(&self) -> bool {
        matches!(self, MessageVariant::Multicast)
    }

    /// Short name used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            MessageVariant::Ping => "ping",
            MessageVariant::Pong => "pong",
            MessageVariant::Cast => "cast",
            MessageVariant::Multicast => "multicast",
            MessageVariant::Broadcast => "broadcast",
        }
    }
}

impl TryFrom<u16> for MessageVariant {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(MessageVariant::Ping),
            2 => Ok(MessageVariant::Pong),
            3 => Ok(MessageVariant::Cast),
            4 => Ok(MessageVariant::Multicast),
            5 => Ok(MessageVariant::Broadcast),
            other => Err(ProtocolError::UnsupportedVariant(other)),
        }
    }
}

impl std::fmt::Display for MessageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A 32-byte group identifier.
///
/// The all-zero value is the nil group, used by every variant except
/// `Multicast`; at the DHT it stands for "every known peer".
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub [u8; 32]);

impl GroupId {
    /// The nil group.
    pub const NIL: GroupId = GroupId([0u8; 32]);

    /// Whether this is the nil group.
    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_nil() {
            return write!(f, "GroupId(nil)");
        }
        write!(
            f,
            "GroupId({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// A framed wire message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Total frame length in bytes, header included.
    pub length: u32,
    /// Protocol version.
    pub version: MessageVersion,
    /// Message kind.
    pub variant: MessageVariant,
    /// Group id; [`GroupId::NIL`] for everything except `Multicast`.
    pub group_id: GroupId,
    /// Opaque payload.
    pub body: Vec<u8>,
}

impl Message {
    /// Build a message, computing the frame length from the variant and body.
    pub fn new(
        version: MessageVersion,
        variant: MessageVariant,
        group_id: GroupId,
        body: Vec<u8>,
    ) -> Self {
        let header = if variant.has_group() {
            GROUPED_HEADER_SIZE
        } else {
            HEADER_SIZE
        };
        Self {
            length: (header + body.len()) as u32,
            version,
            variant,
            group_id,
            body,
        }
    }

    /// Header size for this message's variant.
    pub fn header_size(&self) -> usize {
        if self.variant.has_group() {
            GROUPED_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Encode the message into its wire frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length as usize);
        out.extend_from_slice(&self.length.to_be_bytes());
        out.extend_from_slice(&self.version.0.to_be_bytes());
        out.extend_from_slice(&self.variant.as_u16().to_be_bytes());
        if self.variant.has_group() {
            out.extend_from_slice(self.group_id.as_bytes());
        }
        out.extend_from_slice(&self.body);
        out
    }

    /// Decode a message from a complete wire frame.
    ///
    /// # Errors
    ///
    /// Fails if the frame is truncated, oversized, carries an unknown
    /// variant, or its length field disagrees with the actual frame size.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidFrame(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::InvalidFrame(format!(
                "frame too large: {} bytes (max {})",
                bytes.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let version = MessageVersion(u16::from_be_bytes([bytes[4], bytes[5]]));
        let variant = MessageVariant::try_from(u16::from_be_bytes([bytes[6], bytes[7]]))?;

        let header = if variant.has_group() {
            GROUPED_HEADER_SIZE
        } else {
            HEADER_SIZE
        };
        if bytes.len() < header {
            return Err(ProtocolError::InvalidFrame(format!(
                "frame too short for {} header: {} bytes",
                variant,
                bytes.len()
            )));
        }
        if length as usize != bytes.len() {
            return Err(ProtocolError::InvalidFrame(format!(
                "length field {} does not match frame size {}",
                length,
                bytes.len()
            )));
        }

        let group_id = if variant.has_group() {
            let mut group = [0u8; 32];
            group.copy_from_slice(&bytes[HEADER_SIZE..GROUPED_HEADER_SIZE]);
            GroupId(group)
        } else {
            GroupId::NIL
        };

        Ok(Self {
            length,
            version,
            variant,
            group_id,
            body: bytes[header..].to_vec(),
        })
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("version", &self.version)
            .field("variant", &self.variant)
            .field("group_id", &self.group_id)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_group_header_length() {
        let msg = Message::new(V1, MessageVariant::Ping, GroupId::NIL, vec![1, 2, 3]);
        assert_eq!(msg.length, 11);
        assert_eq!(msg.header_size(), HEADER_SIZE);
    }

    #[test]
    fn test_grouped_header_length() {
        let msg = Message::new(V1, MessageVariant::Multicast, GroupId([7u8; 32]), vec![1, 2, 3]);
        assert_eq!(msg.length, 43);
        assert_eq!(msg.header_size(), GROUPED_HEADER_SIZE);
    }

    #[test]
    fn test_roundtrip_nil_group() {
        let msg = Message::new(V1, MessageVariant::Broadcast, GroupId::NIL, b"hello".to_vec());
        let decoded = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_roundtrip_with_group() {
        let msg = Message::new(V1, MessageVariant::Multicast, GroupId([9u8; 32]), b"m".to_vec());
        let decoded = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.group_id, GroupId([9u8; 32]));
    }

    #[test]
    fn test_empty_body() {
        let msg = Message::new(V1, MessageVariant::Pong, GroupId::NIL, Vec::new());
        assert_eq!(msg.length as usize, HEADER_SIZE);
        assert_eq!(Message::from_bytes(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_unknown_variant_rejected() {
        let mut bytes = Message::new(V1, MessageVariant::Ping, GroupId::NIL, vec![]).to_bytes();
        bytes[6] = 0xff;
        bytes[7] = 0xff;
        assert!(matches!(
            Message::from_bytes(&bytes),
            Err(ProtocolError::UnsupportedVariant(0xffff))
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let bytes = Message::new(V1, MessageVariant::Ping, GroupId::NIL, vec![1]).to_bytes();
        assert!(Message::from_bytes(&bytes[..4]).is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut bytes = Message::new(V1, MessageVariant::Ping, GroupId::NIL, vec![1, 2]).to_bytes();
        bytes[3] = bytes[3].wrapping_add(1);
        assert!(Message::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_version_is_preserved_not_validated() {
        // Framing accepts any version; handlers decide what they speak.
        let msg = Message::new(MessageVersion(2), MessageVariant::Pong, GroupId::NIL, vec![]);
        let decoded = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.version, MessageVersion(2));
    }

    #[test]
    fn test_variant_try_from() {
        for (raw, variant) in [
            (1u16, MessageVariant::Ping),
            (2, MessageVariant::Pong),
            (3, MessageVariant::Cast),
            (4, MessageVariant::Multicast),
            (5, MessageVariant::Broadcast),
        ] {
            assert_eq!(MessageVariant::try_from(raw).unwrap(), variant);
        }
        assert!(MessageVariant::try_from(0).is_err());
        assert!(MessageVariant::try_from(6).is_err());
    }
}
