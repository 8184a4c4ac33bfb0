//! Schema-driven payload serialization
//!
//! The server describes, per route, how payloads are laid out as a
//! tag-length-value binary encoding (a reduced protocol-buffers dialect). The
//! description arrives once in the handshake as JSON:
//!
//! ```text
//! {
//!   "chat.say": {
//!     "text":  { "option": "required", "type": "string", "tag": 1 },
//!     "to":    { "option": "repeated", "type": "Target", "tag": 2 },
//!     "__messages": { "Target": { "uid": { "option": "required", "type": "uInt32", "tag": 1 } } },
//!     "__tags": { "1": "text", "2": "to" }
//!   }
//! }
//! ```
//!
//! [`SchemaSet`] turns that into typed, immutable lookup tables. Nested message
//! types resolve through enclosing scopes (innermost first) and every
//! reference is checked when the set is built.
//!
//! [`SchemaRegistry`] pairs the set used for outgoing payloads with the set
//! used for incoming ones and falls back to JSON text for routes without a
//! schema.

mod decoder;
mod encoder;

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::ProtocolError;

pub use decoder::decode_message;
pub use encoder::encode_message;

/// Deepest message nesting accepted when encoding or decoding
pub const MAX_NESTING_DEPTH: usize = 100;

const MESSAGES_KEY: &str = "__messages";
const TAGS_KEY: &str = "__tags";

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOption {
    /// Must be present when encoding
    Required,
    /// May be absent
    Optional,
    /// Zero or more elements
    Repeated,
}

impl FieldOption {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "required" => Some(Self::Required),
            "optional" => Some(Self::Optional),
            "repeated" => Some(Self::Repeated),
            _ => None,
        }
    }
}

/// Wire kind stored in the low three bits of a field key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireKind {
    /// Varint or zigzag varint
    Varint = 0,
    /// 8 fixed bytes
    Fixed64 = 1,
    /// Varint length followed by that many bytes
    LengthDelimited = 2,
    /// 4 fixed bytes
    Fixed32 = 5,
}

/// Scalar field types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    UInt32,
    Int32,
    SInt32,
    UInt64,
    SInt64,
    Float,
    Double,
    String,
}

impl ScalarType {
    /// Parse a schema type name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uInt32" => Some(Self::UInt32),
            "int32" => Some(Self::Int32),
            "sInt32" => Some(Self::SInt32),
            "uInt64" => Some(Self::UInt64),
            "sInt64" => Some(Self::SInt64),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    /// Wire kind used in the field key
    pub fn wire_kind(&self) -> WireKind {
        match self {
            Self::UInt32 | Self::Int32 | Self::SInt32 | Self::UInt64 | Self::SInt64 => {
                WireKind::Varint
            }
            Self::Double => WireKind::Fixed64,
            Self::String => WireKind::LengthDelimited,
            Self::Float => WireKind::Fixed32,
        }
    }

    /// Whether repeated values of this type use the packed form
    pub fn is_packed(&self) -> bool {
        !matches!(self, Self::String)
    }
}

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Built-in scalar
    Scalar(ScalarType),
    /// Reference to a nested message type by name
    Message(String),
}

impl FieldType {
    fn from_name(name: &str) -> Self {
        match ScalarType::from_name(name) {
            Some(scalar) => Self::Scalar(scalar),
            None => Self::Message(name.to_string()),
        }
    }

    /// Wire kind used in the field key
    pub fn wire_kind(&self) -> WireKind {
        match self {
            Self::Scalar(scalar) => scalar.wire_kind(),
            Self::Message(_) => WireKind::LengthDelimited,
        }
    }

    /// Whether repeated values of this type use the packed form
    pub fn is_packed(&self) -> bool {
        matches!(self, Self::Scalar(scalar) if scalar.is_packed())
    }
}

/// One field of a message schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name in the structured value
    pub name: String,
    /// Cardinality
    pub option: FieldOption,
    /// Declared type
    pub field_type: FieldType,
    /// Positive field number
    pub tag: u32,
}

impl FieldDescriptor {
    fn from_json(name: &str, value: &Value) -> Result<Self, ProtocolError> {
        let invalid = |what: &str| ProtocolError::InvalidSchema(format!("field '{}': {}", name, what));

        let option = value
            .get("option")
            .and_then(Value::as_str)
            .and_then(FieldOption::from_name)
            .ok_or_else(|| invalid("missing or unknown option"))?;
        let type_name = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing type"))?;
        let tag = value
            .get("tag")
            .and_then(Value::as_u64)
            .filter(|tag| *tag > 0 && *tag <= u32::MAX as u64 >> 3)
            .ok_or_else(|| invalid("missing or out-of-range tag"))?;

        Ok(Self {
            name: name.to_string(),
            option,
            field_type: FieldType::from_name(type_name),
            tag: tag as u32,
        })
    }

    /// Field key: `(tag << 3) | wire_kind`
    pub fn key(&self) -> u64 {
        ((self.tag as u64) << 3) | self.field_type.wire_kind() as u64
    }
}

/// Schema of one message type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSchema {
    /// Fields ordered by tag
    fields: BTreeMap<u32, FieldDescriptor>,
    /// Name to tag
    names: HashMap<String, u32>,
    /// Nested message types declared in this scope
    messages: HashMap<String, MessageSchema>,
}

impl MessageSchema {
    /// Build a message schema from its JSON description
    pub fn from_json(value: &Value) -> Result<Self, ProtocolError> {
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidSchema("message schema must be an object".into()))?;

        let mut schema = MessageSchema::default();
        for (key, entry) in object {
            match key.as_str() {
                // Recomputed from the field descriptors
                TAGS_KEY => {}
                MESSAGES_KEY => {
                    let nested = entry.as_object().ok_or_else(|| {
                        ProtocolError::InvalidSchema("__messages must be an object".into())
                    })?;
                    for (type_name, body) in nested {
                        schema
                            .messages
                            .insert(type_name.clone(), MessageSchema::from_json(body)?);
                    }
                }
                name => schema.insert(FieldDescriptor::from_json(name, entry)?)?,
            }
        }
        Ok(schema)
    }

    /// Add a field, rejecting duplicate tags
    pub fn insert(&mut self, field: FieldDescriptor) -> Result<(), ProtocolError> {
        if let Some(existing) = self.fields.get(&field.tag) {
            return Err(ProtocolError::InvalidSchema(format!(
                "tag {} used by both '{}' and '{}'",
                field.tag, existing.name, field.name
            )));
        }
        self.names.insert(field.name.clone(), field.tag);
        self.fields.insert(field.tag, field);
        Ok(())
    }

    /// Add a nested message type
    pub fn insert_message(&mut self, name: impl Into<String>, schema: MessageSchema) {
        self.messages.insert(name.into(), schema);
    }

    /// Fields in tag order
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.names.get(name).and_then(|tag| self.fields.get(tag))
    }

    /// Look up a field by tag
    pub fn field_by_tag(&self, tag: u32) -> Option<&FieldDescriptor> {
        self.fields.get(&tag)
    }

    /// Field name for a tag
    pub fn tag_name(&self, tag: u32) -> Option<&str> {
        self.field_by_tag(tag).map(|field| field.name.as_str())
    }

    /// Nested message type declared directly in this scope
    pub fn message(&self, name: &str) -> Option<&MessageSchema> {
        self.messages.get(name)
    }

    fn check_references<'a>(&'a self, scopes: &mut Vec<&'a MessageSchema>) -> Result<(), ProtocolError> {
        scopes.push(self);
        for field in self.fields() {
            if let FieldType::Message(type_name) = &field.field_type {
                if resolve(scopes, type_name).is_none() {
                    return Err(ProtocolError::UnknownType(type_name.clone()));
                }
            }
        }
        for nested in self.messages.values() {
            nested.check_references(scopes)?;
        }
        scopes.pop();
        Ok(())
    }
}

/// Find a message type by name, innermost scope first
pub(crate) fn resolve<'a>(scopes: &[&'a MessageSchema], name: &str) -> Option<&'a MessageSchema> {
    scopes.iter().rev().find_map(|scope| scope.message(name))
}

/// Route-keyed message schemas
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSet {
    routes: HashMap<String, MessageSchema>,
}

impl SchemaSet {
    /// Build from the `{route: messageSchema}` JSON shape
    pub fn from_json(value: &Value) -> Result<Self, ProtocolError> {
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidSchema("schema set must be an object".into()))?;

        let mut set = SchemaSet::default();
        for (route, body) in object {
            set.insert(route.clone(), MessageSchema::from_json(body)?)?;
        }
        Ok(set)
    }

    /// Register a route schema after checking its type references
    pub fn insert(&mut self, route: impl Into<String>, schema: MessageSchema) -> Result<(), ProtocolError> {
        schema.check_references(&mut Vec::new())?;
        self.routes.insert(route.into(), schema);
        Ok(())
    }

    /// Schema for `route`, if registered
    pub fn get(&self, route: &str) -> Option<&MessageSchema> {
        self.routes.get(route)
    }

    /// Number of routes with a schema
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route has a schema
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Encode and decode schemas for one session
///
/// `encoder` covers payloads this client sends, `decoder` payloads it
/// receives. A route missing from either set falls back to JSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    encoder: SchemaSet,
    decoder: SchemaSet,
}

impl SchemaRegistry {
    /// Create a registry from explicit sets
    pub fn new(encoder: SchemaSet, decoder: SchemaSet) -> Self {
        Self { encoder, decoder }
    }

    /// Build from the handshake `sys.protos` object (`{client, server}`)
    pub fn from_handshake(protos: &Value) -> Result<Self, ProtocolError> {
        let set = |key: &str| match protos.get(key) {
            Some(value) if !value.is_null() => SchemaSet::from_json(value),
            _ => Ok(SchemaSet::default()),
        };
        Ok(Self {
            encoder: set("client")?,
            decoder: set("server")?,
        })
    }

    /// Schemas for outgoing payloads
    pub fn encoder(&self) -> &SchemaSet {
        &self.encoder
    }

    /// Schemas for incoming payloads
    pub fn decoder(&self) -> &SchemaSet {
        &self.decoder
    }

    /// Serialize an outgoing payload for `route`
    pub fn encode(&self, route: &str, value: &Value) -> Result<Bytes, ProtocolError> {
        match self.encoder.get(route) {
            Some(schema) => encode_message(schema, value),
            None => {
                tracing::trace!("No schema for '{}', encoding as JSON", route);
                Ok(Bytes::from(serde_json::to_vec(value)?))
            }
        }
    }

    /// Deserialize an incoming payload for `route`
    ///
    /// An empty JSON body decodes as `null`.
    pub fn decode(&self, route: &str, body: &[u8]) -> Result<Value, ProtocolError> {
        match self.decoder.get(route) {
            Some(schema) => decode_message(schema, body),
            None if body.is_empty() => Ok(Value::Null),
            None => Ok(serde_json::from_slice(body)?),
        }
    }
}

/// Object view of a structured value, or a typed error naming `field`
pub(crate) fn as_object<'v>(field: &str, value: &'v Value) -> Result<&'v Map<String, Value>, ProtocolError> {
    value.as_object().ok_or_else(|| ProtocolError::InvalidFieldValue {
        field: field.to_string(),
        expected: "object",
    })
}
