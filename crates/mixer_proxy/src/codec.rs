//! Codec - tagged JSON encoding of proxies, deltas and messages
//!
//! Every object is written as a JSON map whose `class` entry names a
//! registered class, followed by the class attributes. Scalars are written
//! as plain JSON, except arrays and non-finite floats which are wrapped in a
//! one-key object. The receiver rebuilds objects from the class tag.
//!
//! One unencodable or undecodable nested object costs only the field that
//! holds it: it is logged and omitted. The top-level object has no such
//! fallback, a degraded message is an error.

use crate::changeset::{DatablockDelta, DatablockRemoval, DatablockRename, SyncMessage};
use crate::delta::{Delta, DeltaUpdate, ItemKey};
use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::proxy::{
    CollectionKind, CustomInputsProxy, DatablockProxy, DatablockRefProxy, NodeLinksProxy, Proxy,
    StructCollectionProxy, StructProxy,
};
use mixer_core::Value;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashMap};

/// Key of the class tag in every encoded object
pub const CLASS_KEY: &str = "class";

pub const STRUCT_PROXY: &str = "StructProxy";
pub const DATABLOCK_PROXY: &str = "DatablockProxy";
pub const DATABLOCK_REF_PROXY: &str = "DatablockRefProxy";
pub const NONE_PTR_PROXY: &str = "NonePtrProxy";
pub const STRUCT_COLLECTION_PROXY: &str = "StructCollectionProxy";
pub const NODE_LINKS_PROXY: &str = "NodeLinksProxy";
pub const CUSTOM_INPUTS_PROXY: &str = "CustomInputsProxy";
pub const DELTA_UPDATE: &str = "DeltaUpdate";
pub const DELTA_REPLACE: &str = "DeltaReplace";
pub const STRUCT_DELTA: &str = "StructDelta";
pub const ITEMS_DELTA: &str = "ItemsDelta";
pub const CUSTOM_INPUTS_DELTA: &str = "CustomInputsDelta";
pub const DATABLOCK_DELTA: &str = "DatablockDelta";
pub const DATABLOCK_REMOVAL: &str = "DatablockRemoval";
pub const DATABLOCK_RENAME: &str = "DatablockRename";

/// Classes known to both peers, with their required constructor arguments
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    classes: HashMap<String, Vec<String>>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(STRUCT_PROXY, &["type_name"])
            .register(DATABLOCK_PROXY, &["uuid", "collection", "name", "type_name"])
            .register(DATABLOCK_REF_PROXY, &["uuid", "collection"])
            .register(NONE_PTR_PROXY, &[])
            .register(STRUCT_COLLECTION_PROXY, &["kind", "item_type", "items"])
            .register(NODE_LINKS_PROXY, &["links"])
            .register(CUSTOM_INPUTS_PROXY, &["inputs"])
            .register(DELTA_UPDATE, &["value"])
            .register(DELTA_REPLACE, &["value"])
            .register(STRUCT_DELTA, &["fields"])
            .register(ITEMS_DELTA, &["items"])
            .register(CUSTOM_INPUTS_DELTA, &["inputs"])
            .register(DATABLOCK_DELTA, &["uuid", "collection", "delta"])
            .register(DATABLOCK_REMOVAL, &["uuid", "collection"])
            .register(DATABLOCK_RENAME, &["uuid", "collection", "old_name", "new_name"]);
        registry
    }
}

impl ClassRegistry {
    /// A registry without any class
    pub fn empty() -> Self {
        Self {
            classes: HashMap::new(),
        }
    }

    pub fn register(&mut self, class: &str, required: &[&str]) -> &mut Self {
        self.classes
            .insert(class.to_string(), required.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Forget a class, as a peer speaking an older protocol would
    pub fn unregister(&mut self, class: &str) -> bool {
        self.classes.remove(class).is_some()
    }

    pub fn is_registered(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Required constructor arguments of a registered class
    pub fn required(&self, class: &str) -> Option<&[String]> {
        self.classes.get(class).map(Vec::as_slice)
    }
}

/// Encoder and decoder bound to a class registry
#[derive(Debug, Clone, Default)]
pub struct Codec {
    registry: ClassRegistry,
}

impl Codec {
    pub fn new(registry: ClassRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClassRegistry {
        &mut self.registry
    }

    /// Encode a message to bytes
    pub fn encode(&self, message: &SyncMessage) -> EncodeResult<Vec<u8>> {
        let json = self.encode_message(message)?;
        Ok(serde_json::to_vec(&json)?)
    }

    /// Decode a message from bytes
    pub fn decode(&self, bytes: &[u8]) -> DecodeResult<SyncMessage> {
        let json: Json = serde_json::from_slice(bytes)?;
        self.decode_message(&json)
    }

    pub fn encode_message(&self, message: &SyncMessage) -> EncodeResult<Json> {
        let (class, json) = match message {
            SyncMessage::Create(proxy) => (DATABLOCK_PROXY, self.datablock_to_json(proxy)),
            SyncMessage::Remove(removal) => (DATABLOCK_REMOVAL, self.removal_to_json(removal)),
            SyncMessage::Rename(rename) => (DATABLOCK_RENAME, self.rename_to_json(rename)),
            SyncMessage::Update(update) => (DATABLOCK_DELTA, self.datablock_delta_to_json(update)),
        };
        Self::top_level(class, json, &self.registry)
    }

    /// Encode a standalone proxy, e.g. for a room snapshot
    pub fn encode_proxy(&self, proxy: &Proxy) -> EncodeResult<Json> {
        let json = self.proxy_to_json(proxy);
        Self::top_level(proxy_class(proxy), json, &self.registry)
    }

    pub fn encode_delta(&self, delta: &Delta) -> EncodeResult<Json> {
        let class = match delta {
            Delta::Update(_) => DELTA_UPDATE,
            Delta::Replace(_) => DELTA_REPLACE,
        };
        Self::top_level(class, self.delta_to_json(delta), &self.registry)
    }

    fn top_level(class: &str, json: Option<Json>, registry: &ClassRegistry) -> EncodeResult<Json> {
        match json {
            Some(json) => Ok(json),
            None if !registry.is_registered(class) => Err(EncodeError::Unregistered(class.to_string())),
            None => Err(EncodeError::Incomplete(class.to_string())),
        }
    }

    /// Tagged map, or `None` when the class is not registered
    fn tagged(&self, class: &str, fields: Vec<(&str, Json)>) -> Option<Json> {
        if !self.registry.is_registered(class) {
            log::error!("Class '{}' is not registered, field omitted", class);
            return None;
        }
        let mut map = Map::new();
        map.insert(CLASS_KEY.to_string(), Json::String(class.to_string()));
        for (key, value) in fields {
            map.insert(key.to_string(), value);
        }
        Some(Json::Object(map))
    }

    fn proxy_to_json(&self, proxy: &Proxy) -> Option<Json> {
        match proxy {
            Proxy::Value(value) => value_to_json(value),
            Proxy::Struct(s) => self.struct_to_json(s),
            Proxy::Collection(c) => self.collection_to_json(c),
            Proxy::DatablockRef(r) => self.tagged(
                DATABLOCK_REF_PROXY,
                vec![
                    ("uuid", Json::String(r.uuid.to_string())),
                    ("collection", Json::String(r.collection.clone())),
                    ("name", Json::String(r.name.clone())),
                ],
            ),
            Proxy::NoneRef => self.tagged(NONE_PTR_PROXY, Vec::new()),
            Proxy::NodeLinks(l) => {
                let links = serde_json::to_value(&l.links).ok()?;
                self.tagged(NODE_LINKS_PROXY, vec![("links", links)])
            }
            Proxy::CustomInputs(c) => {
                self.tagged(CUSTOM_INPUTS_PROXY, vec![("inputs", inputs_to_json(&c.inputs)?)])
            }
        }
    }

    fn struct_to_json(&self, s: &StructProxy) -> Option<Json> {
        let data: Map<String, Json> = s
            .data
            .iter()
            .filter_map(|(key, member)| Some((key.clone(), self.proxy_to_json(member)?)))
            .collect();
        self.tagged(
            STRUCT_PROXY,
            vec![
                ("type_name", Json::String(s.type_name.clone())),
                ("data", Json::Object(data)),
            ],
        )
    }

    /// A collection with an unencodable item is dropped whole, items are
    /// positional
    fn collection_to_json(&self, c: &StructCollectionProxy) -> Option<Json> {
        let mut items = Vec::with_capacity(c.items.len());
        for (key, item) in &c.items {
            let Some(json) = self.proxy_to_json(item) else {
                log::error!("Collection of {} dropped, item '{}' cannot be encoded", c.item_type, key);
                return None;
            };
            items.push(Json::Array(vec![Json::String(key.clone()), json]));
        }
        let kind = match c.kind {
            CollectionKind::Sequence => "sequence",
            CollectionKind::Mapping => "mapping",
        };
        self.tagged(
            STRUCT_COLLECTION_PROXY,
            vec![
                ("kind", Json::String(kind.into())),
                ("item_type", Json::String(c.item_type.clone())),
                ("items", Json::Array(items)),
            ],
        )
    }

    fn datablock_to_json(&self, proxy: &DatablockProxy) -> Option<Json> {
        let data = self.struct_to_json(&proxy.data)?;
        self.tagged(
            DATABLOCK_PROXY,
            vec![
                ("uuid", Json::String(proxy.uuid.to_string())),
                ("collection", Json::String(proxy.collection.clone())),
                ("name", Json::String(proxy.name.clone())),
                ("type_name", Json::String(proxy.type_name.clone())),
                ("data", data),
            ],
        )
    }

    fn delta_to_json(&self, delta: &Delta) -> Option<Json> {
        match delta {
            Delta::Update(update) => self.tagged(DELTA_UPDATE, vec![("value", self.update_to_json(update)?)]),
            Delta::Replace(proxy) => self.tagged(DELTA_REPLACE, vec![("value", self.proxy_to_json(proxy)?)]),
        }
    }

    fn update_to_json(&self, update: &DeltaUpdate) -> Option<Json> {
        match update {
            DeltaUpdate::Value(value) => value_to_json(value),
            DeltaUpdate::Struct(fields) => {
                let fields: Map<String, Json> = fields
                    .iter()
                    .filter_map(|(key, delta)| Some((key.clone(), self.delta_to_json(delta)?)))
                    .collect();
                self.tagged(STRUCT_DELTA, vec![("fields", Json::Object(fields))])
            }
            DeltaUpdate::Items(items) => {
                let items = items
                    .iter()
                    .filter_map(|(key, delta)| {
                        let key = match key {
                            ItemKey::Index(i) => Json::from(*i),
                            ItemKey::Key(k) => Json::String(k.clone()),
                        };
                        Some(Json::Array(vec![key, self.delta_to_json(delta)?]))
                    })
                    .collect();
                self.tagged(ITEMS_DELTA, vec![("items", Json::Array(items))])
            }
            DeltaUpdate::CustomInputs(inputs) => {
                self.tagged(CUSTOM_INPUTS_DELTA, vec![("inputs", inputs_to_json(inputs)?)])
            }
        }
    }

    fn removal_to_json(&self, removal: &DatablockRemoval) -> Option<Json> {
        self.tagged(
            DATABLOCK_REMOVAL,
            vec![
                ("uuid", Json::String(removal.uuid.to_string())),
                ("collection", Json::String(removal.collection.clone())),
                ("name", Json::String(removal.name.clone())),
            ],
        )
    }

    fn rename_to_json(&self, rename: &DatablockRename) -> Option<Json> {
        self.tagged(
            DATABLOCK_RENAME,
            vec![
                ("uuid", Json::String(rename.uuid.to_string())),
                ("collection", Json::String(rename.collection.clone())),
                ("old_name", Json::String(rename.old_name.clone())),
                ("new_name", Json::String(rename.new_name.clone())),
            ],
        )
    }

    fn datablock_delta_to_json(&self, update: &DatablockDelta) -> Option<Json> {
        self.tagged(
            DATABLOCK_DELTA,
            vec![
                ("uuid", Json::String(update.uuid.to_string())),
                ("collection", Json::String(update.collection.clone())),
                ("delta", self.delta_to_json(&update.delta)?),
            ],
        )
    }

    /// Check the class tag and the required arguments of an object
    fn open<'a>(&self, json: &'a Json) -> DecodeResult<(&'a str, &'a Map<String, Json>)> {
        let map = json.as_object().ok_or(DecodeError::Untagged)?;
        let class = map
            .get(CLASS_KEY)
            .and_then(Json::as_str)
            .ok_or(DecodeError::Untagged)?;
        let required = self
            .registry
            .required(class)
            .ok_or_else(|| DecodeError::Unregistered(class.to_string()))?;
        if let Some(missing) = required.iter().find(|arg| !map.contains_key(arg.as_str())) {
            return Err(DecodeError::MissingArgument {
                class: class.to_string(),
                argument: missing.clone(),
            });
        }
        Ok((class, map))
    }

    pub fn decode_message(&self, json: &Json) -> DecodeResult<SyncMessage> {
        let (class, map) = self.open(json)?;
        match class {
            DATABLOCK_PROXY => Ok(SyncMessage::Create(self.decode_datablock(class, map)?)),
            DATABLOCK_REMOVAL => Ok(SyncMessage::Remove(DatablockRemoval {
                uuid: field(class, map, "uuid")?,
                collection: field(class, map, "collection")?,
                name: field_or_default(class, map, "name")?,
            })),
            DATABLOCK_RENAME => Ok(SyncMessage::Rename(DatablockRename {
                uuid: field(class, map, "uuid")?,
                collection: field(class, map, "collection")?,
                old_name: field(class, map, "old_name")?,
                new_name: field(class, map, "new_name")?,
            })),
            DATABLOCK_DELTA => Ok(SyncMessage::Update(DatablockDelta {
                uuid: field(class, map, "uuid")?,
                collection: field(class, map, "collection")?,
                delta: self.decode_delta(required(class, map, "delta")?)?,
            })),
            other => Err(DecodeError::UnexpectedClass {
                expected: "message",
                found: other.to_string(),
            }),
        }
    }

    fn decode_datablock(&self, class: &str, map: &Map<String, Json>) -> DecodeResult<DatablockProxy> {
        let type_name: String = field(class, map, "type_name")?;
        let data = match map.get("data") {
            Some(json) => match self.decode_proxy(json)? {
                Proxy::Struct(data) => data,
                other => {
                    return Err(DecodeError::InvalidField {
                        class: class.to_string(),
                        field: "data".into(),
                        reason: format!("expected struct, got {}", other.kind_name()),
                    })
                }
            },
            None => StructProxy::new(type_name.clone()),
        };
        Ok(DatablockProxy {
            uuid: field(class, map, "uuid")?,
            collection: field(class, map, "collection")?,
            name: field(class, map, "name")?,
            type_name,
            data,
        })
    }

    /// Decode a proxy; untagged JSON is a scalar value
    pub fn decode_proxy(&self, json: &Json) -> DecodeResult<Proxy> {
        if !is_tagged(json) {
            return decode_value(json).map(Proxy::Value);
        }
        let (class, map) = self.open(json)?;
        match class {
            STRUCT_PROXY => Ok(Proxy::Struct(self.decode_struct(class, map)?)),
            STRUCT_COLLECTION_PROXY => Ok(Proxy::Collection(self.decode_collection(class, map)?)),
            DATABLOCK_REF_PROXY => Ok(Proxy::DatablockRef(DatablockRefProxy {
                uuid: field(class, map, "uuid")?,
                collection: field(class, map, "collection")?,
                name: field_or_default(class, map, "name")?,
            })),
            NONE_PTR_PROXY => Ok(Proxy::NoneRef),
            NODE_LINKS_PROXY => Ok(Proxy::NodeLinks(NodeLinksProxy {
                links: field(class, map, "links")?,
            })),
            CUSTOM_INPUTS_PROXY => Ok(Proxy::CustomInputs(CustomInputsProxy {
                inputs: decode_inputs(class, map)?,
            })),
            other => Err(DecodeError::UnexpectedClass {
                expected: "proxy",
                found: other.to_string(),
            }),
        }
    }

    fn decode_struct(&self, class: &str, map: &Map<String, Json>) -> DecodeResult<StructProxy> {
        let mut proxy = StructProxy::new(field::<String>(class, map, "type_name")?);
        if let Some(data) = map.get("data").and_then(Json::as_object) {
            for (key, json) in data {
                match self.decode_proxy(json) {
                    Ok(member) => {
                        proxy.data.insert(key.clone(), member);
                    }
                    Err(e) => log::error!("Dropping member '{}' of {}: {}", key, proxy.type_name, e),
                }
            }
        }
        Ok(proxy)
    }

    fn decode_collection(&self, class: &str, map: &Map<String, Json>) -> DecodeResult<StructCollectionProxy> {
        let kind = match field::<String>(class, map, "kind")?.as_str() {
            "sequence" => CollectionKind::Sequence,
            "mapping" => CollectionKind::Mapping,
            other => return Err(invalid(class, "kind", format!("unknown kind '{}'", other))),
        };
        let entries = required(class, map, "items")?
            .as_array()
            .ok_or_else(|| invalid(class, "items", "expected an array"))?;
        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.as_array().map(Vec::as_slice) {
                Some([Json::String(key), item]) => items.push((key.clone(), self.decode_proxy(item)?)),
                _ => return Err(invalid(class, "items", "expected [key, item] pairs")),
            }
        }
        Ok(StructCollectionProxy {
            kind,
            item_type: field(class, map, "item_type")?,
            items,
        })
    }

    pub fn decode_delta(&self, json: &Json) -> DecodeResult<Delta> {
        let (class, map) = self.open(json)?;
        match class {
            DELTA_UPDATE => Ok(Delta::Update(self.decode_update(required(class, map, "value")?)?)),
            DELTA_REPLACE => Ok(Delta::Replace(self.decode_proxy(required(class, map, "value")?)?)),
            other => Err(DecodeError::UnexpectedClass {
                expected: "delta",
                found: other.to_string(),
            }),
        }
    }

    fn decode_update(&self, json: &Json) -> DecodeResult<DeltaUpdate> {
        if !is_tagged(json) {
            return decode_value(json).map(DeltaUpdate::Value);
        }
        let (class, map) = self.open(json)?;
        match class {
            STRUCT_DELTA => {
                let mut fields = BTreeMap::new();
                if let Some(entries) = required(class, map, "fields")?.as_object() {
                    for (key, json) in entries {
                        match self.decode_delta(json) {
                            Ok(delta) => {
                                fields.insert(key.clone(), delta);
                            }
                            Err(e) => log::error!("Dropping change of '{}': {}", key, e),
                        }
                    }
                }
                Ok(DeltaUpdate::Struct(fields))
            }
            ITEMS_DELTA => {
                let entries = required(class, map, "items")?
                    .as_array()
                    .ok_or_else(|| invalid(class, "items", "expected an array"))?;
                let mut items = Vec::with_capacity(entries.len());
                for entry in entries {
                    let (key, json) = match entry.as_array().map(Vec::as_slice) {
                        Some([Json::String(k), json]) => (ItemKey::Key(k.clone()), json),
                        Some([Json::Number(n), json]) => match n.as_u64() {
                            Some(i) => (ItemKey::Index(i as usize), json),
                            None => return Err(invalid(class, "items", "negative index")),
                        },
                        _ => return Err(invalid(class, "items", "expected [key, delta] pairs")),
                    };
                    match self.decode_delta(json) {
                        Ok(delta) => items.push((key, delta)),
                        Err(e) => log::error!("Dropping change of item {:?}: {}", key, e),
                    }
                }
                Ok(DeltaUpdate::Items(items))
            }
            CUSTOM_INPUTS_DELTA => Ok(DeltaUpdate::CustomInputs(decode_inputs(class, map)?)),
            other => Err(DecodeError::UnexpectedClass {
                expected: "delta update",
                found: other.to_string(),
            }),
        }
    }
}

fn proxy_class(proxy: &Proxy) -> &'static str {
    match proxy {
        Proxy::Value(_) => "Value",
        Proxy::Struct(_) => STRUCT_PROXY,
        Proxy::Collection(_) => STRUCT_COLLECTION_PROXY,
        Proxy::DatablockRef(_) => DATABLOCK_REF_PROXY,
        Proxy::NoneRef => NONE_PTR_PROXY,
        Proxy::NodeLinks(_) => NODE_LINKS_PROXY,
        Proxy::CustomInputs(_) => CUSTOM_INPUTS_PROXY,
    }
}

fn is_tagged(json: &Json) -> bool {
    json.as_object().map_or(false, |map| map.contains_key(CLASS_KEY))
}

/// Arrays and non-finite floats are wrapped in a one-key object, so that an
/// empty float array or a NaN survives the trip.
const INT_ARRAY_KEY: &str = "int_array";
const FLOAT_ARRAY_KEY: &str = "float_array";
const FLOAT_KEY: &str = "float";

fn float_to_json(x: f64) -> Json {
    match serde_json::Number::from_f64(x) {
        Some(number) => Json::Number(number),
        None if x.is_nan() => Json::from("nan"),
        None if x > 0.0 => Json::from("inf"),
        None => Json::from("-inf"),
    }
}

fn float_from_json(json: &Json) -> Option<f64> {
    match json {
        Json::Number(number) => number.as_f64(),
        Json::String(s) => match s.as_str() {
            "nan" => Some(f64::NAN),
            "inf" => Some(f64::INFINITY),
            "-inf" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

fn wrapped(key: &str, json: Json) -> Json {
    let mut map = Map::new();
    map.insert(key.to_string(), json);
    Json::Object(map)
}

fn value_to_json(value: &Value) -> Option<Json> {
    let json = match value {
        Value::Float(x) if x.is_finite() => float_to_json(*x),
        Value::Float(x) => wrapped(FLOAT_KEY, float_to_json(*x)),
        Value::IntArray(items) => wrapped(INT_ARRAY_KEY, Json::from(items.clone())),
        Value::FloatArray(items) => wrapped(
            FLOAT_ARRAY_KEY,
            Json::Array(items.iter().map(|x| float_to_json(*x)).collect()),
        ),
        other => match serde_json::to_value(other) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Cannot encode value: {}", e);
                return None;
            }
        },
    };
    Some(json)
}

fn decode_value(json: &Json) -> DecodeResult<Value> {
    let wrapper = json
        .as_object()
        .filter(|map| map.len() == 1)
        .and_then(|map| map.iter().next());
    let decoded = match wrapper {
        Some((key, inner)) if key == FLOAT_KEY => float_from_json(inner).map(Value::Float),
        Some((key, inner)) if key == INT_ARRAY_KEY => inner
            .as_array()
            .and_then(|items| items.iter().map(Json::as_i64).collect::<Option<Vec<_>>>())
            .map(Value::IntArray),
        Some((key, inner)) if key == FLOAT_ARRAY_KEY => inner
            .as_array()
            .and_then(|items| items.iter().map(float_from_json).collect::<Option<Vec<_>>>())
            .map(Value::FloatArray),
        _ => serde_json::from_value(json.clone()).ok(),
    };
    decoded.ok_or_else(|| DecodeError::InvalidValue(json.to_string()))
}

fn inputs_to_json(inputs: &[(String, Value)]) -> Option<Json> {
    let pairs = inputs
        .iter()
        .map(|(identifier, value)| Some(Json::Array(vec![Json::from(identifier.as_str()), value_to_json(value)?])))
        .collect::<Option<Vec<_>>>()?;
    Some(Json::Array(pairs))
}

fn decode_inputs(class: &str, map: &Map<String, Json>) -> DecodeResult<Vec<(String, Value)>> {
    let pairs = required(class, map, "inputs")?
        .as_array()
        .ok_or_else(|| invalid(class, "inputs", "expected [identifier, value] pairs"))?;
    pairs
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Json::String(identifier), value]) => Ok((identifier.clone(), decode_value(value)?)),
            _ => Err(invalid(class, "inputs", "expected [identifier, value] pairs")),
        })
        .collect()
}

fn invalid(class: &str, field: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidField {
        class: class.to_string(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Raw field of an object; a missing field is a missing argument
fn required<'a>(class: &str, map: &'a Map<String, Json>, name: &str) -> DecodeResult<&'a Json> {
    map.get(name).ok_or_else(|| DecodeError::MissingArgument {
        class: class.to_string(),
        argument: name.to_string(),
    })
}

/// Typed field of an object
fn field<T: DeserializeOwned>(class: &str, map: &Map<String, Json>, name: &str) -> DecodeResult<T> {
    let json = required(class, map, name)?;
    serde_json::from_value(json.clone()).map_err(|e| invalid(class, name, e.to_string()))
}

fn field_or_default<T: DeserializeOwned + Default>(
    class: &str,
    map: &Map<String, Json>,
    name: &str,
) -> DecodeResult<T> {
    match map.get(name) {
        Some(json) => serde_json::from_value(json.clone()).map_err(|e| invalid(class, name, e.to_string())),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixer_core::{NodeLink, Uuid};

    fn camera() -> DatablockProxy {
        DatablockProxy {
            uuid: Uuid::new_v4(),
            collection: "cameras".into(),
            name: "Camera".into(),
            type_name: "Camera".into(),
            data: StructProxy::new("Camera")
                .with("lens", Proxy::Value(Value::Float(50.0)))
                .with("passepartout_alpha", Proxy::Value(Value::Int(1)))
                .with("icon", Proxy::Value(Value::from(vec![1u8, 2, 3])))
                .with(
                    "dof_object",
                    Proxy::DatablockRef(DatablockRefProxy {
                        uuid: Uuid::new_v4(),
                        collection: "objects".into(),
                        name: "Target".into(),
                    }),
                )
                .with("parent", Proxy::NoneRef)
                .with(
                    "links",
                    Proxy::NodeLinks(NodeLinksProxy {
                        links: vec![NodeLink::new("A", 0, "B", 2)],
                    }),
                ),
        }
    }

    #[test]
    fn test_message_survives_encoding() {
        let codec = Codec::default();
        let message = SyncMessage::Create(camera());
        let bytes = codec.encode(&message).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_objects_carry_class_tag() {
        let codec = Codec::default();
        let json = codec.encode_message(&SyncMessage::Create(camera())).unwrap();
        assert_eq!(json[CLASS_KEY], DATABLOCK_PROXY);
        assert_eq!(json["data"][CLASS_KEY], STRUCT_PROXY);
        assert_eq!(json["data"]["data"]["dof_object"][CLASS_KEY], DATABLOCK_REF_PROXY);
        assert_eq!(json["data"]["data"]["lens"], 50.0);
    }

    #[test]
    fn test_unregistered_nested_class_drops_field() {
        let mut codec = Codec::default();
        codec.registry_mut().unregister(DATABLOCK_REF_PROXY);

        let bytes = codec.encode(&SyncMessage::Create(camera())).unwrap();
        let SyncMessage::Create(decoded) = codec.decode(&bytes).unwrap() else {
            panic!("expected a creation");
        };
        assert!(decoded.data.get("dof_object").is_none());
        assert_eq!(decoded.data.get("lens"), Some(&Proxy::Value(Value::Float(50.0))));
    }

    #[test]
    fn test_unregistered_top_level_class() {
        let mut codec = Codec::default();
        codec.registry_mut().unregister(DATABLOCK_PROXY);
        assert!(matches!(
            codec.encode(&SyncMessage::Create(camera())),
            Err(EncodeError::Unregistered(_))
        ));

        let bytes = Codec::default().encode(&SyncMessage::Create(camera())).unwrap();
        assert!(matches!(codec.decode(&bytes), Err(DecodeError::Unregistered(_))));
    }

    #[test]
    fn test_untagged_top_level_is_rejected() {
        let codec = Codec::default();
        assert!(matches!(codec.decode(br#"{"uuid": "x"}"#), Err(DecodeError::Untagged)));
        assert!(matches!(codec.decode(b"42"), Err(DecodeError::Untagged)));
        assert!(matches!(codec.decode(b"{not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_missing_required_argument() {
        let codec = Codec::default();
        let result = codec.decode(br#"{"class": "DatablockRename", "uuid": "67e55044-10b1-426f-9247-bb680e5fe0c8", "collection": "cameras", "old_name": "A"}"#);
        match result {
            Err(DecodeError::MissingArgument { class, argument }) => {
                assert_eq!(class, DATABLOCK_RENAME);
                assert_eq!(argument, "new_name");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wrong_class_in_message_position() {
        let codec = Codec::default();
        let result = codec.decode(br#"{"class": "NonePtrProxy"}"#);
        assert!(matches!(result, Err(DecodeError::UnexpectedClass { .. })));
    }

    #[test]
    fn test_delta_encoding() {
        let codec = Codec::default();
        let mut fields = BTreeMap::new();
        fields.insert("lens".to_string(), Delta::Update(DeltaUpdate::Value(Value::Float(35.0))));
        fields.insert(
            "key_blocks".to_string(),
            Delta::Update(DeltaUpdate::Items(vec![(
                ItemKey::Index(1),
                Delta::Update(DeltaUpdate::Value(Value::Int(3))),
            )])),
        );
        fields.insert("parent".to_string(), Delta::Replace(Proxy::NoneRef));
        let message = SyncMessage::Update(DatablockDelta {
            uuid: Uuid::new_v4(),
            collection: "cameras".into(),
            delta: Delta::Update(DeltaUpdate::Struct(fields)),
        });

        let decoded = codec.decode(&codec.encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_empty_arrays_keep_their_type() {
        let codec = Codec::default();
        let data = StructProxy::new("Mesh")
            .with("weights", Proxy::Value(Value::FloatArray(Vec::new())))
            .with("indices", Proxy::Value(Value::IntArray(Vec::new())))
            .with("co", Proxy::Value(Value::FloatArray(vec![1.0, 2.0])))
            .with(
                "modifier",
                Proxy::CustomInputs(CustomInputsProxy {
                    inputs: vec![("Input_2".into(), Value::FloatArray(Vec::new()))],
                }),
            );
        let message = SyncMessage::Create(DatablockProxy {
            uuid: Uuid::new_v4(),
            collection: "meshes".into(),
            name: "Mesh".into(),
            type_name: "Mesh".into(),
            data,
        });
        let json = codec.encode_message(&message).unwrap();
        assert_eq!(json["data"]["data"]["weights"][FLOAT_ARRAY_KEY], Json::Array(Vec::new()));
        assert_eq!(codec.decode(&codec.encode(&message).unwrap()).unwrap(), message);
    }

    #[test]
    fn test_non_finite_floats() {
        let codec = Codec::default();
        let mut fields = BTreeMap::new();
        for (key, x) in [("clip_end", f64::INFINITY), ("clip_start", f64::NEG_INFINITY), ("lens", f64::NAN)] {
            fields.insert(key.to_string(), Delta::Update(DeltaUpdate::Value(Value::Float(x))));
        }
        fields.insert(
            "scale".to_string(),
            Delta::Update(DeltaUpdate::Value(Value::FloatArray(vec![f64::INFINITY, 1.5]))),
        );
        let message = SyncMessage::Update(DatablockDelta {
            uuid: Uuid::new_v4(),
            collection: "cameras".into(),
            delta: Delta::Update(DeltaUpdate::Struct(fields)),
        });

        let SyncMessage::Update(decoded) = codec.decode(&codec.encode(&message).unwrap()).unwrap() else {
            panic!("expected an update");
        };
        let float = |key: &str| match decoded.delta.field(key) {
            Some(Delta::Update(DeltaUpdate::Value(Value::Float(x)))) => *x,
            other => panic!("unexpected change of {}: {:?}", key, other),
        };
        assert_eq!(float("clip_end"), f64::INFINITY);
        assert_eq!(float("clip_start"), f64::NEG_INFINITY);
        assert!(float("lens").is_nan());
        assert_eq!(
            decoded.delta.field("scale"),
            Some(&Delta::Update(DeltaUpdate::Value(Value::FloatArray(vec![f64::INFINITY, 1.5]))))
        );
    }

    #[test]
    fn test_malformed_wrapped_value() {
        assert!(matches!(
            decode_value(&serde_json::json!({ "float": "big" })),
            Err(DecodeError::InvalidValue(_))
        ));
        assert_eq!(decode_value(&serde_json::json!(3)).unwrap(), Value::Int(3));
    }
}
