//! Synchronization session
//!
//! A `SyncSession` exists from room join to room leave. It owns everything
//! the synchronization needs between ticks: the proxy model, the codec, the
//! transport and the state of the command group being received.
//!
//! ```text
//! tick ──► consume ──► dispatch ──► ProxyModel::apply_*
//!      └─► send_changes ──► ProxyModel::synchronize ──► Codec / payloads ──► Transport
//! ```

use crate::binary::{BinaryReader, BinaryWriter, WireError};
use crate::config::{ConfigError, SyncConfig};
use crate::message::{Command, MessageType};
use crate::payload::{
    find_by_name, CameraPayload, ClientIdWrapper, DataRemovalPayload, DataRename, DataRenamesPayload, DeletePayload,
    LightPayload, Payload, RenamePayload,
};
use crate::replay::RoomMetadata;
use crate::transport::{Transport, TransportError};
use mixer_core::{ExternalGraph, GraphError};
use mixer_proxy::{
    Codec, DatablockRemoval, DatablockRename, DecodeError, EncodeError, ProxyModel, SyncError, SyncMessage,
};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Collection addressed by the name-based delete and rename commands
pub const OBJECTS_COLLECTION: &str = "objects";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection lost")]
    Disconnected,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("No datablock named '{name}' in '{collection}'")]
    UnknownName { collection: String, name: String },
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Disconnected => SessionError::Disconnected,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Command counters of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Commands taken from the transport
    pub received: u64,
    /// Data commands merged into the local graph
    pub applied: u64,
    /// Commands dropped because they could not be decoded or applied
    pub failed: u64,
    /// Commands handed to the transport
    pub sent: u64,
}

fn string_command(message_type: MessageType, s: &str) -> Command {
    let mut writer = BinaryWriter::new();
    writer.write_string(s);
    Command::new(message_type, writer.into_bytes())
}

fn unknown_name(collection: &str, name: &str) -> SessionError {
    SessionError::UnknownName {
        collection: collection.to_string(),
        name: name.to_string(),
    }
}

/// A joined room
pub struct SyncSession<T: Transport> {
    config: SyncConfig,
    model: ProxyModel,
    codec: Codec,
    transport: T,
    client_id: Option<String>,
    /// Nesting depth of the command group being received
    group_depth: usize,
    stats: SessionStats,
}

impl<T: Transport> SyncSession<T> {
    /// Join the configured room
    pub fn join(config: SyncConfig, mut transport: T) -> SessionResult<Self> {
        config.validate()?;
        transport.send(string_command(MessageType::JoinRoom, &config.room))?;
        transport.send(string_command(MessageType::SetClientName, &config.client_name))?;
        log::info!("Joined room '{}' as '{}'", config.room, config.client_name);

        Ok(Self {
            model: config.proxy_model(),
            codec: Codec::default(),
            config,
            transport,
            client_id: None,
            group_depth: 0,
            stats: SessionStats::default(),
        })
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn model(&self) -> &ProxyModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut ProxyModel {
        &mut self.model
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Id assigned by the server, once received
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Whether a received command group is still open
    pub fn in_group(&self) -> bool {
        self.group_depth > 0
    }

    /// Apply what peers sent, then send local changes. Returns the number of
    /// commands sent.
    pub fn tick(&mut self, graph: &mut dyn ExternalGraph) -> SessionResult<usize> {
        self.consume(graph)?;
        self.send_changes(graph)
    }

    /// Apply every waiting command. While a group is open, waits up to the
    /// group timeout for the rest of it; a group that times out is closed and
    /// its late commands are applied as they come. Returns the number of
    /// commands taken.
    pub fn consume(&mut self, graph: &mut dyn ExternalGraph) -> SessionResult<usize> {
        let mut taken = 0;
        loop {
            let next = if self.in_group() {
                let timeout = self.config.group_timeout();
                let next = self.transport.recv_timeout(timeout)?;
                if next.is_none() {
                    log::warn!("Command group still open after {:?}, abandoning it", timeout);
                    self.group_depth = 0;
                }
                next
            } else {
                self.transport.try_recv()?
            };
            let Some(command) = next else {
                break;
            };

            taken += 1;
            self.stats.received += 1;
            self.dispatch(command, graph)?;
        }
        Ok(taken)
    }

    /// Apply commands that did not come from the transport, such as a
    /// downloaded room. Returns the number of data commands applied.
    pub fn apply_room(&mut self, commands: Vec<Command>, graph: &mut dyn ExternalGraph) -> SessionResult<u64> {
        let before = self.stats.applied;
        for command in commands {
            self.dispatch(command, graph)?;
        }
        Ok(self.stats.applied - before)
    }

    /// Handle one command, isolating its failure. Only a lost connection
    /// is returned.
    fn dispatch(&mut self, command: Command, graph: &mut dyn ExternalGraph) -> SessionResult<()> {
        let message_type = command.message_type;
        match self.handle(command, graph) {
            Ok(true) => self.stats.applied += 1,
            Ok(false) => {}
            Err(SessionError::Disconnected) => return Err(SessionError::Disconnected),
            Err(e) => {
                log::warn!("Dropping {:?} command: {}", message_type, e);
                self.stats.failed += 1;
            }
        }
        Ok(())
    }

    /// Returns whether the command changed the local graph
    fn handle(&mut self, command: Command, graph: &mut dyn ExternalGraph) -> SessionResult<bool> {
        let payload = command.payload.as_slice();
        match command.message_type {
            MessageType::GroupBegin => {
                self.group_depth += 1;
                Ok(false)
            }
            MessageType::GroupEnd => {
                if self.group_depth == 0 {
                    log::warn!("Group end without a group");
                }
                self.group_depth = self.group_depth.saturating_sub(1);
                Ok(false)
            }
            MessageType::ClientId => {
                let id = BinaryReader::new(payload).read_string()?;
                log::info!("Server assigned client id '{}'", id);
                self.client_id = Some(id);
                Ok(false)
            }
            MessageType::ClientIdWrapper => {
                let wrapper = ClientIdWrapper::from_bytes(payload)?;
                if self.client_id.as_deref() != Some(wrapper.client_id.as_str()) {
                    log::debug!("Ignoring command for client '{}'", wrapper.client_id);
                    return Ok(false);
                }
                self.handle(wrapper.command, graph)
            }
            MessageType::BlenderDataCreate | MessageType::BlenderDataUpdate => {
                let message = self.codec.decode(payload)?;
                self.model.apply_message(message, graph)?;
                Ok(true)
            }
            MessageType::BlenderDataRemove => {
                let removal = DataRemovalPayload::from_bytes(payload)?;
                self.model.apply_removal(
                    &DatablockRemoval {
                        uuid: removal.uuid,
                        collection: removal.collection,
                        name: removal.debug_name,
                    },
                    graph,
                )?;
                Ok(true)
            }
            MessageType::BlenderDataRename => {
                let renames = DataRenamesPayload::from_bytes(payload)?;
                Ok(self.apply_renames(renames, graph))
            }
            MessageType::Delete => {
                let delete = DeletePayload::from_bytes(payload)?;
                self.delete_by_name(&delete.name, graph)?;
                Ok(true)
            }
            MessageType::Rename => {
                let rename = RenamePayload::from_bytes(payload)?;
                self.rename_by_name(&rename, graph)?;
                Ok(true)
            }
            MessageType::Camera => {
                let camera = CameraPayload::from_bytes(payload)?;
                let node = find_by_name(&*graph, CameraPayload::COLLECTION, &camera.name)
                    .ok_or_else(|| unknown_name(CameraPayload::COLLECTION, &camera.name))?;
                self.model.apply_external(graph, node, |g| camera.apply(g, node))?;
                Ok(true)
            }
            MessageType::Light => {
                let light = LightPayload::from_bytes(payload)?;
                let node = find_by_name(&*graph, LightPayload::COLLECTION, &light.name)
                    .ok_or_else(|| unknown_name(LightPayload::COLLECTION, &light.name))?;
                self.model.apply_external(graph, node, |g| light.apply(g, node))?;
                Ok(true)
            }
            MessageType::ConnectionLost => Err(SessionError::Disconnected),
            MessageType::SendError => {
                let message = BinaryReader::new(payload).read_string()?;
                log::warn!("Server error: {}", message);
                Ok(false)
            }
            other => {
                log::debug!("Ignoring {:?} command", other);
                Ok(false)
            }
        }
    }

    /// Each rename is isolated; returns whether any was applied
    fn apply_renames(&mut self, renames: DataRenamesPayload, graph: &mut dyn ExternalGraph) -> bool {
        let mut applied = false;
        for rename in renames.renames {
            let result = match self.model.get(rename.uuid) {
                Some(proxy) => {
                    let rename = DatablockRename {
                        uuid: rename.uuid,
                        collection: proxy.collection.clone(),
                        old_name: rename.old_name,
                        new_name: rename.new_name,
                    };
                    self.model.apply_rename(&rename, graph)
                }
                None => Err(SyncError::UnknownDatablock(rename.uuid)),
            };
            match result {
                Ok(_) => applied = true,
                Err(e) => {
                    log::warn!("Rename dropped: {}", e);
                    self.stats.failed += 1;
                }
            }
        }
        applied
    }

    fn delete_by_name(&mut self, name: &str, graph: &mut dyn ExternalGraph) -> SessionResult<()> {
        if let Some(proxy) = self.model.find(OBJECTS_COLLECTION, name) {
            let removal = DatablockRemoval {
                uuid: proxy.uuid,
                collection: proxy.collection.clone(),
                name: proxy.name.clone(),
            };
            return Ok(self.model.apply_removal(&removal, graph)?);
        }
        let node = find_by_name(&*graph, OBJECTS_COLLECTION, name).ok_or_else(|| unknown_name(OBJECTS_COLLECTION, name))?;
        Ok(self.model.apply_external(graph, node, |g| g.remove_node(node))?)
    }

    fn rename_by_name(&mut self, rename: &RenamePayload, graph: &mut dyn ExternalGraph) -> SessionResult<()> {
        if let Some(proxy) = self.model.find(OBJECTS_COLLECTION, &rename.old_name) {
            let rename = DatablockRename {
                uuid: proxy.uuid,
                collection: proxy.collection.clone(),
                old_name: rename.old_name.clone(),
                new_name: rename.new_name.clone(),
            };
            self.model.apply_rename(&rename, graph)?;
            return Ok(());
        }
        let node = find_by_name(&*graph, OBJECTS_COLLECTION, &rename.old_name)
            .ok_or_else(|| unknown_name(OBJECTS_COLLECTION, &rename.old_name))?;
        self.model.apply_external(graph, node, |g| g.rename_node(node, &rename.new_name))?;
        Ok(())
    }

    /// Run one synchronization pass and send its changes. A pass producing
    /// more than one command is sent as a group. Returns the number of data
    /// commands sent.
    pub fn send_changes(&mut self, graph: &mut dyn ExternalGraph) -> SessionResult<usize> {
        let changeset = self.model.synchronize(graph);
        if changeset.is_empty() {
            return Ok(0);
        }

        let mut commands = Vec::with_capacity(changeset.len());
        let mut renames = Vec::new();
        for message in changeset.into_messages() {
            if let SyncMessage::Rename(rename) = message {
                renames.push(DataRename {
                    uuid: rename.uuid,
                    old_name: rename.old_name,
                    new_name: rename.new_name,
                });
                continue;
            }
            flush_renames(&mut renames, &mut commands);
            match self.encode(&message) {
                Ok(command) => commands.push(command),
                Err(e) => {
                    log::error!("Cannot send changes of {}: {}", message.uuid(), e);
                    self.stats.failed += 1;
                }
            }
        }
        flush_renames(&mut renames, &mut commands);

        let count = commands.len();
        if count > 1 {
            self.send(Command::empty(MessageType::GroupBegin))?;
        }
        for command in commands {
            self.send(command)?;
        }
        if count > 1 {
            self.send(Command::empty(MessageType::GroupEnd))?;
        }
        log::debug!("Sent {} commands", count);
        Ok(count)
    }

    fn encode(&self, message: &SyncMessage) -> SessionResult<Command> {
        let command = match message {
            SyncMessage::Create(_) => Command::new(MessageType::BlenderDataCreate, self.codec.encode(message)?),
            SyncMessage::Update(_) => Command::new(MessageType::BlenderDataUpdate, self.codec.encode(message)?),
            SyncMessage::Remove(removal) => Command::new(
                MessageType::BlenderDataRemove,
                DataRemovalPayload {
                    uuid: removal.uuid,
                    collection: removal.collection.clone(),
                    debug_name: removal.name.clone(),
                }
                .to_bytes(),
            ),
            SyncMessage::Rename(rename) => Command::new(
                MessageType::BlenderDataRename,
                DataRenamesPayload {
                    renames: vec![DataRename {
                        uuid: rename.uuid,
                        old_name: rename.old_name.clone(),
                        new_name: rename.new_name.clone(),
                    }],
                }
                .to_bytes(),
            ),
        };
        Ok(command)
    }

    fn send(&mut self, command: Command) -> SessionResult<()> {
        self.transport.send(command)?;
        self.stats.sent += 1;
        Ok(())
    }

    /// Leave the room and hand back the transport
    pub fn leave(mut self) -> T {
        if let Err(e) = self.transport.send(Command::empty(MessageType::LeaveRoom)) {
            log::warn!("Leave not delivered: {}", e);
        }
        log::info!("Left room '{}'", self.config.room);
        self.transport
    }
}

fn flush_renames(renames: &mut Vec<DataRename>, commands: &mut Vec<Command>) {
    if renames.is_empty() {
        return;
    }
    let payload = DataRenamesPayload {
        renames: std::mem::take(renames),
    };
    commands.push(Command::new(MessageType::BlenderDataRename, payload.to_bytes()));
}

/// Join `room` and collect its content commands until the server
/// acknowledges the join
pub fn download_room(transport: &mut impl Transport, room: &str, timeout: Duration) -> SessionResult<Vec<Command>> {
    transport.send(string_command(MessageType::JoinRoom, room))?;
    let deadline = Instant::now() + timeout;
    let mut commands = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(SessionError::Timeout("room download"));
        }
        let Some(command) = transport.recv_timeout(left)? else {
            continue;
        };
        match command.message_type {
            MessageType::JoinRoom => break,
            MessageType::ConnectionLost => return Err(SessionError::Disconnected),
            t if t.is_content() => commands.push(command),
            other => log::debug!("Ignoring {:?} during download", other),
        }
    }
    log::info!("Downloaded room '{}' ({} commands)", room, commands.len());
    Ok(commands)
}

/// Recreate a room on the server from saved commands
pub fn upload_room(transport: &mut impl Transport, metadata: &RoomMetadata, commands: &[Command]) -> SessionResult<()> {
    let mut writer = BinaryWriter::new();
    writer.write_string(&metadata.name).write_bool(metadata.keep_open);
    transport.send(Command::new(MessageType::CreateRoom, writer.into_bytes()))?;
    for command in commands {
        transport.send(command.clone())?;
    }
    transport.send(Command::empty(MessageType::Content))?;
    log::info!("Uploaded room '{}' ({} commands)", metadata.name, commands.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use mixer_core::{MemoryGraph, MemoryType};

    fn config() -> SyncConfig {
        SyncConfig::default().with_room("studio").with_client_name("alice")
    }

    fn lights() -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        graph.register_type(
            MemoryType::datablock("Light", "lights")
                .with_value("type", "POINT")
                .with_value("use_shadow", true)
                .with_value("color", [1.0_f64, 1.0, 1.0])
                .with_value("energy", 10.0)
                .with_value("spot_size", 0.8)
                .with_value("spot_blend", 0.15),
        );
        graph
    }

    #[test]
    fn test_join_announces_room_and_name() {
        let (client, mut server) = ChannelTransport::pair();
        let session = SyncSession::join(config(), client).unwrap();
        assert_eq!(session.client_id(), None);

        let join = server.try_recv().unwrap().unwrap();
        assert_eq!(join.message_type, MessageType::JoinRoom);
        assert_eq!(BinaryReader::new(&join.payload).read_string().unwrap(), "studio");
        let name = server.try_recv().unwrap().unwrap();
        assert_eq!(name.message_type, MessageType::SetClientName);

        session.leave();
        assert_eq!(server.try_recv().unwrap().unwrap().message_type, MessageType::LeaveRoom);
    }

    #[test]
    fn test_join_rejects_invalid_config() {
        let (client, _server) = ChannelTransport::pair();
        let result = SyncSession::join(config().with_room(""), client);
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_wrapped_commands_for_other_clients_are_ignored() {
        let (client, mut server) = ChannelTransport::pair();
        let mut session = SyncSession::join(config(), client).unwrap();
        let mut graph = lights();

        server.send(string_command(MessageType::ClientId, "c1")).unwrap();
        let group = Command::empty(MessageType::GroupBegin);
        server.send(ClientIdWrapper::new("c2", group.clone()).into_command()).unwrap();
        session.consume(&mut graph).unwrap();
        assert_eq!(session.client_id(), Some("c1"));
        assert!(!session.in_group());

        server.send(ClientIdWrapper::new("c1", group).into_command()).unwrap();
        server.send(Command::empty(MessageType::GroupEnd)).unwrap();
        assert_eq!(session.consume(&mut graph).unwrap(), 2);
        assert!(!session.in_group());
    }

    #[test]
    fn test_failed_command_does_not_stop_consume() {
        let (client, mut server) = ChannelTransport::pair();
        let mut session = SyncSession::join(config(), client).unwrap();
        let mut graph = lights();
        let node = graph.create_node("lights", "Key", "Light").unwrap();

        server.send(Command::new(MessageType::BlenderDataCreate, b"{broken".to_vec())).unwrap();
        let light = LightPayload {
            name: "Key".into(),
            light_type: crate::payload::LightType::Sun,
            shadow: false,
            color: [1.0, 0.5, 0.0],
            power: 3.0,
            spot_size: 0.0,
            spot_blend: 0.0,
        };
        server.send(Command::new(MessageType::Light, light.to_bytes())).unwrap();

        assert_eq!(session.consume(&mut graph).unwrap(), 2);
        assert_eq!(session.stats().failed, 1);
        assert_eq!(session.stats().applied, 1);
        assert_eq!(graph.value(node, "type").unwrap().as_str(), Some("SUN"));
        assert_eq!(graph.value(node, "energy").unwrap().as_float(), Some(3.0));
    }

    #[test]
    fn test_open_group_times_out() {
        let (client, mut server) = ChannelTransport::pair();
        let mut config = config();
        config.group_timeout_ms = 200;
        let mut session = SyncSession::join(config, client).unwrap();
        let mut graph = lights();
        let node = graph.create_node("lights", "Key", "Light").unwrap();

        server.send(Command::empty(MessageType::GroupBegin)).unwrap();
        assert_eq!(session.consume(&mut graph).unwrap(), 1);
        assert!(!session.in_group());

        // the abandoned group no longer makes consume wait
        let started = Instant::now();
        assert_eq!(session.consume(&mut graph).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_millis(200));

        let light = LightPayload {
            name: "Key".into(),
            light_type: crate::payload::LightType::Spot,
            shadow: true,
            color: [1.0, 1.0, 1.0],
            power: 10.0,
            spot_size: 0.5,
            spot_blend: 0.1,
        };
        server.send(Command::new(MessageType::Light, light.to_bytes())).unwrap();
        server.send(Command::empty(MessageType::GroupEnd)).unwrap();
        assert_eq!(session.consume(&mut graph).unwrap(), 2);
        assert_eq!(session.stats().applied, 1);
        assert_eq!(graph.value(node, "type").unwrap().as_str(), Some("SPOT"));
        assert!(!session.in_group());
    }

    #[test]
    fn test_connection_lost() {
        let (client, mut server) = ChannelTransport::pair();
        let mut session = SyncSession::join(config(), client).unwrap();
        let mut graph = lights();

        server.send(Command::empty(MessageType::ConnectionLost)).unwrap();
        assert!(matches!(session.consume(&mut graph), Err(SessionError::Disconnected)));

        drop(server);
        assert!(matches!(session.tick(&mut graph), Err(SessionError::Disconnected)));
    }

    #[test]
    fn test_download_room() {
        let (mut client, mut server) = ChannelTransport::pair();
        server.send(Command::new(MessageType::BlenderDataCreate, b"{}".to_vec())).unwrap();
        server.send(string_command(MessageType::ClientId, "c1")).unwrap();
        server.send(Command::new(MessageType::Delete, b"x".to_vec())).unwrap();
        server.send(Command::empty(MessageType::JoinRoom)).unwrap();

        let commands = download_room(&mut client, "studio", Duration::from_secs(1)).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].message_type, MessageType::Delete);
        assert_eq!(server.try_recv().unwrap().unwrap().message_type, MessageType::JoinRoom);
    }

    #[test]
    fn test_download_room_failures() {
        let (mut client, server) = ChannelTransport::pair();
        assert!(matches!(
            download_room(&mut client, "studio", Duration::from_millis(20)),
            Err(SessionError::Timeout(_))
        ));
        drop(server);
        assert!(matches!(
            download_room(&mut client, "studio", Duration::from_millis(20)),
            Err(SessionError::Disconnected)
        ));
    }

    #[test]
    fn test_upload_room() {
        let (mut client, mut server) = ChannelTransport::pair();
        let commands = vec![Command::new(MessageType::Delete, b"x".to_vec())];
        upload_room(&mut client, &RoomMetadata::new("saved"), &commands).unwrap();

        let create = server.try_recv().unwrap().unwrap();
        assert_eq!(create.message_type, MessageType::CreateRoom);
        assert_eq!(BinaryReader::new(&create.payload).read_string().unwrap(), "saved");
        assert_eq!(server.try_recv().unwrap().unwrap(), commands[0]);
        assert_eq!(server.try_recv().unwrap().unwrap().message_type, MessageType::Content);
    }
}
