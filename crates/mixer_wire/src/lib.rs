//! # Mixer Wire - Protocol and Session
//!
//! Moves synchronization messages between peers through a relay server:
//! the command envelope, fixed-layout binary payloads, room replay files,
//! the transport seam and the session that drives the proxy model.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 SyncSession                   │
//! │  ProxyModel ◄── dispatch ◄── consume ◄──┐     │
//! │      │                                  │     │
//! │      └──► send_changes ──► Command ─────┼──► Transport ◄──► server
//! └─────────────────────────────────────────┘     │
//!                                                 ▼
//!                                  ReplayWriter / ReplayReader
//! ```
//!
//! ## Key Concepts
//!
//! - **Command**: `[type][payload]` unit of transmission
//! - **Payload**: binary layout of the non-codec commands
//! - **Group**: commands between `GroupBegin` and `GroupEnd`, applied in one tick
//! - **Replay**: a saved room, uploadable to recreate it

pub mod binary;
pub mod config;
pub mod message;
pub mod payload;
pub mod replay;
pub mod session;
pub mod transport;

pub use binary::{BinaryReader, BinaryWriter, WireError, WireResult};
pub use config::{ConfigError, ConfigResult, FilterConfig, SyncConfig};
pub use message::{Command, MessageType};
pub use payload::{
    CameraPayload, ClientIdWrapper, DataRemovalPayload, DataRename, DataRenamesPayload, DeletePayload, LightPayload,
    LightType, Payload, RenamePayload, SensorFit,
};
pub use replay::{load_room, save_room, ReplayError, ReplayReader, ReplayResult, ReplayWriter, RoomMetadata};
pub use session::{download_room, upload_room, SessionError, SessionResult, SessionStats, SyncSession};
pub use transport::{ChannelTransport, Transport, TransportError, TransportResult, TransportStats};
