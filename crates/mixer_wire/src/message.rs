//! Message types and the command envelope

use crate::binary::{WireError, WireResult};
use serde::{Deserialize, Serialize};

/// Type tag of a command.
///
/// Values below `Command` are room management commands handled by the
/// server; values above it are content commands relayed between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageType {
    JoinRoom = 1,
    CreateRoom = 2,
    LeaveRoom = 3,
    ListRooms = 4,
    Content = 5,
    ClearContent = 6,
    DeleteRoom = 7,
    ClearRoom = 8,
    SetClientName = 11,
    SendError = 12,
    ConnectionLost = 13,
    ClientId = 18,

    Command = 100,
    Delete = 101,
    Camera = 102,
    Light = 103,
    Rename = 105,
    GroupBegin = 150,
    GroupEnd = 151,
    BlenderDataUpdate = 152,
    ClientIdWrapper = 155,
    BlenderDataRemove = 156,
    BlenderDataRename = 157,
    BlenderDataCreate = 160,
}

impl MessageType {
    const ALL: [MessageType; 24] = [
        MessageType::JoinRoom,
        MessageType::CreateRoom,
        MessageType::LeaveRoom,
        MessageType::ListRooms,
        MessageType::Content,
        MessageType::ClearContent,
        MessageType::DeleteRoom,
        MessageType::ClearRoom,
        MessageType::SetClientName,
        MessageType::SendError,
        MessageType::ConnectionLost,
        MessageType::ClientId,
        MessageType::Command,
        MessageType::Delete,
        MessageType::Camera,
        MessageType::Light,
        MessageType::Rename,
        MessageType::GroupBegin,
        MessageType::GroupEnd,
        MessageType::BlenderDataUpdate,
        MessageType::ClientIdWrapper,
        MessageType::BlenderDataRemove,
        MessageType::BlenderDataRename,
        MessageType::BlenderDataCreate,
    ];

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u16 == value)
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Room management command, handled by the server
    pub fn is_room_command(self) -> bool {
        self.as_u16() < MessageType::Command.as_u16()
    }

    /// Content command, relayed to the other peers of the room
    pub fn is_content(self) -> bool {
        self.as_u16() > MessageType::Command.as_u16()
    }
}

impl TryFrom<i32> for MessageType {
    type Error = WireError;

    fn try_from(value: i32) -> WireResult<Self> {
        u16::try_from(value)
            .ok()
            .and_then(Self::from_u16)
            .ok_or(WireError::UnknownMessageType(value))
    }
}

/// A unit of transmission between a peer and the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Server-side sequence number, 0 until assigned
    pub id: u32,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            id: 0,
            message_type,
            payload,
        }
    }

    /// A command without payload
    pub fn empty(message_type: MessageType) -> Self {
        Self::new(message_type, Vec::new())
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    /// Envelope `[type: i32 LE][payload]`
    pub fn to_envelope(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.payload.len());
        bytes.extend_from_slice(&i32::from(self.message_type.as_u16()).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn from_envelope(bytes: &[u8]) -> WireResult<Self> {
        if bytes.len() < 4 {
            return Err(WireError::UnexpectedEnd {
                needed: 4,
                remaining: bytes.len(),
            });
        }
        let (head, payload) = bytes.split_at(4);
        let tag = i32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let message_type = MessageType::try_from(tag)?;
        Ok(Self::new(message_type, payload.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ranges() {
        assert!(MessageType::JoinRoom.is_room_command());
        assert!(!MessageType::JoinRoom.is_content());
        assert!(MessageType::BlenderDataCreate.is_content());
        assert!(!MessageType::Command.is_room_command());
        assert!(!MessageType::Command.is_content());
    }

    #[test]
    fn test_type_lookup() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_u16(t.as_u16()), Some(t));
        }
        assert_eq!(MessageType::from_u16(9999), None);
        assert!(matches!(MessageType::try_from(-1), Err(WireError::UnknownMessageType(-1))));
    }

    #[test]
    fn test_envelope() {
        let command = Command::new(MessageType::Delete, b"Cube".to_vec());
        let bytes = command.to_envelope();
        assert_eq!(&bytes[..4], &[101, 0, 0, 0]);
        assert_eq!(Command::from_envelope(&bytes).unwrap(), command);

        assert!(matches!(
            Command::from_envelope(&[101, 0]),
            Err(WireError::UnexpectedEnd { needed: 4, remaining: 2 })
        ));
        assert!(matches!(
            Command::from_envelope(&[42, 0, 0, 0]),
            Err(WireError::UnknownMessageType(42))
        ));
    }
}
