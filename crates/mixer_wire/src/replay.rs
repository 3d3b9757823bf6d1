//! Room replay files
//!
//! A saved room is a header followed by command frames, all little-endian:
//!
//! ```text
//! [u32 metadata length][room metadata JSON]
//! ([u64 payload size][u32 command id][u16 message type][payload])*
//! ```
//!
//! Uploading a replay to a server recreates the room; downloading a room
//! and writing its commands produces one.

use crate::binary::WireError;
use crate::message::{Command, MessageType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Frames larger than this are treated as corruption
pub const MAX_FRAME_SIZE: u64 = 1 << 30;

/// Room metadata larger than this is treated as corruption
pub const MAX_HEADER_SIZE: u32 = 1 << 20;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid room metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Replay truncated inside a frame")]
    Truncated,

    #[error("Frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(u64),

    #[error("Room metadata of {0} bytes exceeds the size limit")]
    HeaderTooLarge(u64),

    #[error("Invalid frame: {0}")]
    Wire(#[from] WireError),
}

pub type ReplayResult<T> = Result<T, ReplayError>;

/// Description of a saved room
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomMetadata {
    pub name: String,
    /// Keep the room alive when its last client leaves
    #[serde(default)]
    pub keep_open: bool,
    #[serde(default)]
    pub command_count: u64,
    #[serde(default)]
    pub byte_size: u64,
    /// Free-form entries set by clients
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl RoomMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Metadata describing `commands`
    pub fn for_commands(name: impl Into<String>, commands: &[Command]) -> Self {
        Self {
            command_count: commands.len() as u64,
            byte_size: commands.iter().map(|c| c.payload.len() as u64).sum(),
            ..Self::new(name)
        }
    }
}

/// Writes a replay to any byte sink
pub struct ReplayWriter<W: Write> {
    writer: W,
    frames: u64,
}

impl<W: Write> ReplayWriter<W> {
    /// Start a replay, writing the header
    pub fn new(mut writer: W, metadata: &RoomMetadata) -> ReplayResult<Self> {
        let header = serde_json::to_vec(metadata)?;
        if header.len() as u64 > u64::from(MAX_HEADER_SIZE) {
            return Err(ReplayError::HeaderTooLarge(header.len() as u64));
        }
        writer.write_all(&(header.len() as u32).to_le_bytes())?;
        writer.write_all(&header)?;
        Ok(Self { writer, frames: 0 })
    }

    pub fn write_command(&mut self, command: &Command) -> ReplayResult<()> {
        self.writer.write_all(&(command.payload.len() as u64).to_le_bytes())?;
        self.writer.write_all(&command.id.to_le_bytes())?;
        self.writer.write_all(&command.message_type.as_u16().to_le_bytes())?;
        self.writer.write_all(&command.payload)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Flush and hand back the sink
    pub fn finish(mut self) -> ReplayResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reads a replay; iterating yields its commands in order
pub struct ReplayReader<R: Read> {
    reader: R,
    metadata: RoomMetadata,
    done: bool,
}

impl<R: Read> ReplayReader<R> {
    /// Read the header
    pub fn new(mut reader: R) -> ReplayResult<Self> {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len);
        if len > MAX_HEADER_SIZE {
            return Err(ReplayError::HeaderTooLarge(u64::from(len)));
        }
        let mut header = vec![0u8; len as usize];
        reader.read_exact(&mut header)?;
        let metadata = serde_json::from_slice(&header)?;
        Ok(Self {
            reader,
            metadata,
            done: false,
        })
    }

    pub fn metadata(&self) -> &RoomMetadata {
        &self.metadata
    }

    /// Next frame; `None` at a clean end of file
    fn read_frame(&mut self) -> ReplayResult<Option<Command>> {
        let mut size = [0u8; 8];
        match read_full(&mut self.reader, &mut size)? {
            0 => return Ok(None),
            8 => {}
            _ => return Err(ReplayError::Truncated),
        }
        let size = u64::from_le_bytes(size);
        if size > MAX_FRAME_SIZE {
            return Err(ReplayError::FrameTooLarge(size));
        }

        let mut head = [0u8; 6];
        let mut payload = vec![0u8; size as usize];
        if read_full(&mut self.reader, &mut head)? != head.len()
            || read_full(&mut self.reader, &mut payload)? != payload.len()
        {
            return Err(ReplayError::Truncated);
        }
        let id = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let tag = u16::from_le_bytes([head[4], head[5]]);
        let message_type = MessageType::from_u16(tag).ok_or(WireError::UnknownMessageType(i32::from(tag)))?;
        Ok(Some(Command::new(message_type, payload).with_id(id)))
    }
}

impl<R: Read> Iterator for ReplayReader<R> {
    type Item = ReplayResult<Command>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let frame = self.read_frame().transpose();
        if !matches!(frame, Some(Ok(_))) {
            self.done = true;
        }
        frame
    }
}

/// Read until `buf` is full or the input ends, returning the byte count
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Write a whole room to `path`
pub fn save_room(path: impl AsRef<Path>, metadata: &RoomMetadata, commands: &[Command]) -> ReplayResult<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = ReplayWriter::new(BufWriter::new(file), metadata)?;
    for command in commands {
        writer.write_command(command)?;
    }
    writer.finish()?;
    log::info!("Saved room '{}' ({} commands) to {}", metadata.name, commands.len(), path.as_ref().display());
    Ok(())
}

/// Read a whole room from `path`
pub fn load_room(path: impl AsRef<Path>) -> ReplayResult<(RoomMetadata, Vec<Command>)> {
    let file = File::open(path.as_ref())?;
    let reader = ReplayReader::new(BufReader::new(file))?;
    let metadata = reader.metadata().clone();
    let commands = reader.collect::<ReplayResult<Vec<_>>>()?;
    Ok((metadata, commands))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> Vec<Command> {
        vec![
            Command::new(MessageType::BlenderDataCreate, br#"{"class":"DatablockProxy"}"#.to_vec()).with_id(1),
            Command::empty(MessageType::GroupBegin).with_id(2),
            Command::new(MessageType::Delete, vec![4, 0, 0, 0, b'C', b'u', b'b', b'e']).with_id(3),
        ]
    }

    fn replay_bytes(metadata: &RoomMetadata, commands: &[Command]) -> Vec<u8> {
        let mut writer = ReplayWriter::new(Vec::new(), metadata).unwrap();
        for command in commands {
            writer.write_command(command).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_frame_layout() {
        let metadata = RoomMetadata::new("r");
        let bytes = replay_bytes(&metadata, &[Command::new(MessageType::Delete, vec![9]).with_id(7)]);

        let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let frame = &bytes[4 + header_len..];
        assert_eq!(&frame[..8], &1u64.to_le_bytes());
        assert_eq!(&frame[8..12], &7u32.to_le_bytes());
        assert_eq!(&frame[12..14], &101u16.to_le_bytes());
        assert_eq!(&frame[14..], &[9]);
    }

    #[test]
    fn test_commands_read_back() {
        let commands = commands();
        let metadata = RoomMetadata::for_commands("studio", &commands);
        let bytes = replay_bytes(&metadata, &commands);

        let reader = ReplayReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.metadata(), &metadata);
        assert_eq!(reader.metadata().command_count, 3);
        let read: Vec<Command> = reader.map(Result::unwrap).collect();
        assert_eq!(read, commands);
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = replay_bytes(&RoomMetadata::new("r"), &commands());
        let cut = &bytes[..bytes.len() - 2];

        let results: Vec<ReplayResult<Command>> = ReplayReader::new(cut).unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(ReplayError::Truncated)));
    }

    #[test]
    fn test_unknown_message_type_stops_reading() {
        let mut bytes = replay_bytes(&RoomMetadata::new("r"), &[Command::empty(MessageType::GroupEnd)]);
        let len = bytes.len();
        bytes[len - 2..].copy_from_slice(&999u16.to_le_bytes());

        let mut reader = ReplayReader::new(bytes.as_slice()).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(ReplayError::Wire(WireError::UnknownMessageType(999))))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_bad_header() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{no");
        assert!(matches!(ReplayReader::new(bytes.as_slice()), Err(ReplayError::Metadata(_))));
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let mut bytes = u32::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(matches!(
            ReplayReader::new(bytes.as_slice()),
            Err(ReplayError::HeaderTooLarge(size)) if size == u64::from(u32::MAX)
        ));

        let mut metadata = RoomMetadata::new("r");
        metadata
            .custom
            .insert("blob".into(), serde_json::Value::String("x".repeat(MAX_HEADER_SIZE as usize)));
        assert!(matches!(
            ReplayWriter::new(Vec::new(), &metadata),
            Err(ReplayError::HeaderTooLarge(_))
        ));
    }
}
