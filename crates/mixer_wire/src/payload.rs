//! Structured payloads with a fixed field order
//!
//! Datablock creations and updates travel as tagged-JSON codec bytes. The
//! payloads here are the binary ones: camera and light parameters addressed
//! by datablock name, removals and renames, and the client-id wrapper.

use crate::binary::{BinaryReader, BinaryWriter, WireError, WireResult};
use crate::message::{Command, MessageType};
use mixer_core::{AttrPath, ExternalGraph, GraphError, GraphResult, NodeHandle, Uuid, Value};

/// A payload with a fixed binary layout
pub trait Payload: Sized {
    fn write(&self, writer: &mut BinaryWriter);

    fn read(reader: &mut BinaryReader) -> WireResult<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.write(&mut writer);
        writer.into_bytes()
    }

    fn from_bytes(bytes: &[u8]) -> WireResult<Self> {
        Self::read(&mut BinaryReader::new(bytes))
    }
}

/// Node called `name` in `collection`
pub fn find_by_name(graph: &dyn ExternalGraph, collection: &str, name: &str) -> Option<NodeHandle> {
    graph
        .enumerate_collection(collection)
        .ok()?
        .into_iter()
        .find(|info| info.name == name)
        .map(|info| info.handle)
}

fn read_float(graph: &dyn ExternalGraph, node: NodeHandle, path: &str) -> GraphResult<f32> {
    let path = AttrPath::from(path);
    match graph.get_attribute(node, &path)? {
        mixer_core::Attr::Value(v) => v.as_float().map(|f| f as f32).ok_or_else(|| GraphError::TypeMismatch {
            path,
            expected: "float".into(),
            got: v.kind().into(),
        }),
        other => Err(GraphError::TypeMismatch {
            path,
            expected: "float".into(),
            got: format!("{:?}", other.kind()),
        }),
    }
}

fn read_value(graph: &dyn ExternalGraph, node: NodeHandle, path: &str) -> GraphResult<Value> {
    let path = AttrPath::from(path);
    match graph.get_attribute(node, &path)? {
        mixer_core::Attr::Value(v) => Ok(v),
        other => Err(GraphError::TypeMismatch {
            path,
            expected: "value".into(),
            got: format!("{:?}", other.kind()),
        }),
    }
}

fn write_float(graph: &mut dyn ExternalGraph, node: NodeHandle, path: &str, v: f32) -> GraphResult<()> {
    graph.set_value(node, &AttrPath::from(path), Value::Float(f64::from(v)))
}

/// How the sensor size maps to the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFit {
    Auto = 0,
    Horizontal = 1,
    Vertical = 2,
}

impl SensorFit {
    fn from_wire(value: i32) -> WireResult<Self> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::Horizontal),
            2 => Ok(Self::Vertical),
            _ => Err(WireError::InvalidField {
                field: "sensor fit",
                value,
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Horizontal => "HORIZONTAL",
            Self::Vertical => "VERTICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AUTO" => Some(Self::Auto),
            "HORIZONTAL" => Some(Self::Horizontal),
            "VERTICAL" => Some(Self::Vertical),
            _ => None,
        }
    }
}

/// Camera parameters of the camera datablock called `name`
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPayload {
    pub name: String,
    pub focal: f32,
    pub clip_start: f32,
    pub clip_end: f32,
    pub dof_enabled: bool,
    pub fstop: f32,
    pub focus_distance: f32,
    pub sensor_fit: SensorFit,
    pub sensor_width: f32,
    pub sensor_height: f32,
}

impl Payload for CameraPayload {
    fn write(&self, writer: &mut BinaryWriter) {
        writer
            .write_string(&self.name)
            .write_float(self.focal)
            .write_float(self.clip_start)
            .write_float(self.clip_end)
            .write_bool(self.dof_enabled)
            .write_float(self.fstop)
            .write_float(self.focus_distance)
            .write_int(self.sensor_fit as i32)
            .write_float(self.sensor_width)
            .write_float(self.sensor_height);
    }

    fn read(reader: &mut BinaryReader) -> WireResult<Self> {
        Ok(Self {
            name: reader.read_string()?,
            focal: reader.read_float()?,
            clip_start: reader.read_float()?,
            clip_end: reader.read_float()?,
            dof_enabled: reader.read_bool()?,
            fstop: reader.read_float()?,
            focus_distance: reader.read_float()?,
            sensor_fit: SensorFit::from_wire(reader.read_int()?)?,
            sensor_width: reader.read_float()?,
            sensor_height: reader.read_float()?,
        })
    }
}

impl CameraPayload {
    pub const COLLECTION: &'static str = "cameras";

    /// Read the parameters of a camera node
    pub fn from_graph(graph: &dyn ExternalGraph, node: NodeHandle) -> GraphResult<Self> {
        let name = graph.node_info(node).ok_or(GraphError::UnknownNode(node))?.name;
        let fit = read_value(graph, node, "sensor_fit")?;
        Ok(Self {
            name,
            focal: read_float(graph, node, "lens")?,
            clip_start: read_float(graph, node, "clip_start")?,
            clip_end: read_float(graph, node, "clip_end")?,
            dof_enabled: read_value(graph, node, "dof.use_dof")?.as_bool().unwrap_or(false),
            fstop: read_float(graph, node, "dof.aperture_fstop")?,
            focus_distance: read_float(graph, node, "dof.focus_distance")?,
            sensor_fit: fit.as_str().and_then(SensorFit::parse).unwrap_or(SensorFit::Auto),
            sensor_width: read_float(graph, node, "sensor_width")?,
            sensor_height: read_float(graph, node, "sensor_height")?,
        })
    }

    /// Write the parameters into a camera node
    pub fn apply(&self, graph: &mut dyn ExternalGraph, node: NodeHandle) -> GraphResult<()> {
        write_float(graph, node, "lens", self.focal)?;
        write_float(graph, node, "clip_start", self.clip_start)?;
        write_float(graph, node, "clip_end", self.clip_end)?;
        graph.set_value(node, &AttrPath::from("dof.use_dof"), Value::Bool(self.dof_enabled))?;
        write_float(graph, node, "dof.aperture_fstop", self.fstop)?;
        write_float(graph, node, "dof.focus_distance", self.focus_distance)?;
        graph.set_value(node, &AttrPath::from("sensor_fit"), self.sensor_fit.as_str().into())?;
        write_float(graph, node, "sensor_width", self.sensor_width)?;
        write_float(graph, node, "sensor_height", self.sensor_height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    Point = 0,
    Sun = 1,
    Spot = 2,
    Area = 3,
}

impl LightType {
    fn from_wire(value: i32) -> WireResult<Self> {
        match value {
            0 => Ok(Self::Point),
            1 => Ok(Self::Sun),
            2 => Ok(Self::Spot),
            3 => Ok(Self::Area),
            _ => Err(WireError::InvalidField {
                field: "light type",
                value,
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "POINT",
            Self::Sun => "SUN",
            Self::Spot => "SPOT",
            Self::Area => "AREA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "POINT" => Some(Self::Point),
            "SUN" => Some(Self::Sun),
            "SPOT" => Some(Self::Spot),
            "AREA" => Some(Self::Area),
            _ => None,
        }
    }
}

/// Light parameters of the light datablock called `name`.
///
/// Spot size and blend are meaningful for spot lights only.
#[derive(Debug, Clone, PartialEq)]
pub struct LightPayload {
    pub name: String,
    pub light_type: LightType,
    pub shadow: bool,
    pub color: [f32; 3],
    pub power: f32,
    pub spot_size: f32,
    pub spot_blend: f32,
}

impl Payload for LightPayload {
    fn write(&self, writer: &mut BinaryWriter) {
        writer
            .write_string(&self.name)
            .write_int(self.light_type as i32)
            .write_bool(self.shadow)
            .write_color(self.color)
            .write_float(self.power)
            .write_float(self.spot_size)
            .write_float(self.spot_blend);
    }

    fn read(reader: &mut BinaryReader) -> WireResult<Self> {
        Ok(Self {
            name: reader.read_string()?,
            light_type: LightType::from_wire(reader.read_int()?)?,
            shadow: reader.read_bool()?,
            color: reader.read_color()?,
            power: reader.read_float()?,
            spot_size: reader.read_float()?,
            spot_blend: reader.read_float()?,
        })
    }
}

impl LightPayload {
    pub const COLLECTION: &'static str = "lights";

    pub fn from_graph(graph: &dyn ExternalGraph, node: NodeHandle) -> GraphResult<Self> {
        let name = graph.node_info(node).ok_or(GraphError::UnknownNode(node))?.name;
        let light_type = read_value(graph, node, "type")?
            .as_str()
            .and_then(LightType::parse)
            .unwrap_or(LightType::Point);
        let color = read_value(graph, node, "color")?
            .as_color()
            .map(|[r, g, b]| [r as f32, g as f32, b as f32])
            .unwrap_or([1.0, 1.0, 1.0]);
        let (spot_size, spot_blend) = match light_type {
            LightType::Spot => (read_float(graph, node, "spot_size")?, read_float(graph, node, "spot_blend")?),
            _ => (0.0, 0.0),
        };
        Ok(Self {
            name,
            light_type,
            shadow: read_value(graph, node, "use_shadow")?.as_bool().unwrap_or(true),
            color,
            power: read_float(graph, node, "energy")?,
            spot_size,
            spot_blend,
        })
    }

    pub fn apply(&self, graph: &mut dyn ExternalGraph, node: NodeHandle) -> GraphResult<()> {
        graph.set_value(node, &AttrPath::from("type"), self.light_type.as_str().into())?;
        graph.set_value(node, &AttrPath::from("use_shadow"), Value::Bool(self.shadow))?;
        let [r, g, b] = self.color;
        graph.set_value(
            node,
            &AttrPath::from("color"),
            Value::FloatArray(vec![f64::from(r), f64::from(g), f64::from(b)]),
        )?;
        write_float(graph, node, "energy", self.power)?;
        if self.light_type == LightType::Spot {
            write_float(graph, node, "spot_size", self.spot_size)?;
            write_float(graph, node, "spot_blend", self.spot_blend)?;
        }
        Ok(())
    }
}

/// Removal of the object called `name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    pub name: String,
}

impl Payload for DeletePayload {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.name);
    }

    fn read(reader: &mut BinaryReader) -> WireResult<Self> {
        Ok(Self {
            name: reader.read_string()?,
        })
    }
}

/// Rename of the object called `old_name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePayload {
    pub old_name: String,
    pub new_name: String,
}

impl Payload for RenamePayload {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.old_name).write_string(&self.new_name);
    }

    fn read(reader: &mut BinaryReader) -> WireResult<Self> {
        Ok(Self {
            old_name: reader.read_string()?,
            new_name: reader.read_string()?,
        })
    }
}

/// Removal of a synchronized datablock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRemovalPayload {
    pub uuid: Uuid,
    pub collection: String,
    /// Name at removal time, for logs only
    pub debug_name: String,
}

impl Payload for DataRemovalPayload {
    fn write(&self, writer: &mut BinaryWriter) {
        writer
            .write_uuid(&self.uuid)
            .write_string(&self.collection)
            .write_string(&self.debug_name);
    }

    fn read(reader: &mut BinaryReader) -> WireResult<Self> {
        Ok(Self {
            uuid: reader.read_uuid()?,
            collection: reader.read_string()?,
            debug_name: reader.read_string()?,
        })
    }
}

/// One rename of a synchronized datablock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRename {
    pub uuid: Uuid,
    pub old_name: String,
    pub new_name: String,
}

/// All renames of one pass, `[count][uuid, old, new]*`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRenamesPayload {
    pub renames: Vec<DataRename>,
}

impl Payload for DataRenamesPayload {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_int(self.renames.len() as i32);
        for rename in &self.renames {
            writer
                .write_uuid(&rename.uuid)
                .write_string(&rename.old_name)
                .write_string(&rename.new_name);
        }
    }

    fn read(reader: &mut BinaryReader) -> WireResult<Self> {
        let count = reader.read_count()?;
        let mut renames = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            renames.push(DataRename {
                uuid: reader.read_uuid()?,
                old_name: reader.read_string()?,
                new_name: reader.read_string()?,
            });
        }
        Ok(Self { renames })
    }
}

/// A command addressed to one client, `[client id][inner type][inner payload]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdWrapper {
    pub client_id: String,
    pub command: Command,
}

impl ClientIdWrapper {
    pub fn new(client_id: impl Into<String>, command: Command) -> Self {
        Self {
            client_id: client_id.into(),
            command,
        }
    }

    /// The wrapping command
    pub fn into_command(self) -> Command {
        Command::new(MessageType::ClientIdWrapper, self.to_bytes())
    }
}

impl Payload for ClientIdWrapper {
    fn write(&self, writer: &mut BinaryWriter) {
        writer
            .write_string(&self.client_id)
            .write_int(i32::from(self.command.message_type.as_u16()))
            .write_bytes(&self.command.payload);
    }

    fn read(reader: &mut BinaryReader) -> WireResult<Self> {
        let client_id = reader.read_string()?;
        let message_type = MessageType::try_from(reader.read_int()?)?;
        let payload = reader.read_rest().to_vec();
        Ok(Self {
            client_id,
            command: Command::new(message_type, payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_field_order() {
        let camera = CameraPayload {
            name: "Cam".into(),
            focal: 35.0,
            clip_start: 0.1,
            clip_end: 100.0,
            dof_enabled: true,
            fstop: 2.8,
            focus_distance: 10.0,
            sensor_fit: SensorFit::Vertical,
            sensor_width: 36.0,
            sensor_height: 24.0,
        };
        let bytes = camera.to_bytes();
        // name, then focal right after it
        assert_eq!(&bytes[..7], &[3, 0, 0, 0, b'C', b'a', b'm']);
        assert_eq!(&bytes[7..11], &35.0f32.to_le_bytes());
        assert_eq!(bytes.len(), 7 + 4 * 3 + 1 + 4 * 2 + 4 + 4 * 2);
        assert_eq!(CameraPayload::from_bytes(&bytes).unwrap(), camera);
    }

    #[test]
    fn test_invalid_enum_values() {
        let mut writer = BinaryWriter::new();
        writer.write_string("Lamp").write_int(7);
        assert!(matches!(
            LightPayload::from_bytes(&writer.into_bytes()),
            Err(WireError::InvalidField { field: "light type", value: 7 })
        ));
    }

    #[test]
    fn test_renames_count_prefix() {
        let payload = DataRenamesPayload {
            renames: vec![
                DataRename {
                    uuid: Uuid::new_v4(),
                    old_name: "W0".into(),
                    new_name: "W00".into(),
                },
                DataRename {
                    uuid: Uuid::new_v4(),
                    old_name: "W2".into(),
                    new_name: "W22".into(),
                },
            ],
        };
        let bytes = payload.to_bytes();
        assert_eq!(&bytes[..4], &[2, 0, 0, 0]);
        assert_eq!(DataRenamesPayload::from_bytes(&bytes).unwrap(), payload);

        // count larger than the payload holds
        assert!(DataRenamesPayload::from_bytes(&[5, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_client_id_wrapper() {
        let inner = Command::new(MessageType::Delete, DeletePayload { name: "Cube".into() }.to_bytes());
        let wrapped = ClientIdWrapper::new("client-7", inner.clone()).into_command();
        assert_eq!(wrapped.message_type, MessageType::ClientIdWrapper);

        let unwrapped = ClientIdWrapper::from_bytes(&wrapped.payload).unwrap();
        assert_eq!(unwrapped.client_id, "client-7");
        assert_eq!(unwrapped.command, inner);
    }
}
