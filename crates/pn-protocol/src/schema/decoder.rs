//! Tag-length-value bytes to structured value

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use super::{resolve, FieldOption, FieldType, MessageSchema, ScalarType, MAX_NESTING_DEPTH};
use crate::error::ProtocolError;
use crate::varint;

/// Decode `src` against `schema`
///
/// The whole slice is one message; nested messages are decoded from the
/// sub-slice their length prefix delimits. An unknown tag is an error since
/// the length of its value cannot be known. Nesting deeper than
/// [`MAX_NESTING_DEPTH`] is rejected.
pub fn decode_message(schema: &MessageSchema, src: &[u8]) -> Result<Value, ProtocolError> {
    let mut scopes = Vec::new();
    read_message(&mut scopes, schema, &mut Reader::new(src))
}

/// Cursor over one message boundary
struct Reader<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> Reader<'b> {
    fn new(buf: &'b [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn rest(&self) -> &'b [u8] {
        &self.buf[self.pos..]
    }

    fn uvarint(&mut self) -> Result<u64, ProtocolError> {
        let (value, used) = varint::decode_uvarint(self.rest())?;
        self.pos += used;
        Ok(value)
    }

    fn zigzag(&mut self) -> Result<i64, ProtocolError> {
        let (value, used) = varint::decode_zigzag(self.rest())?;
        self.pos += used;
        Ok(value)
    }

    fn bytes(&mut self, len: usize) -> Result<&'b [u8], ProtocolError> {
        let rest = self.rest();
        if rest.len() < len {
            return Err(ProtocolError::Truncated {
                needed: len - rest.len(),
            });
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn length_prefixed(&mut self) -> Result<&'b [u8], ProtocolError> {
        let len = self.uvarint()?;
        let len = usize::try_from(len).map_err(|_| ProtocolError::VarintOverflow)?;
        self.bytes(len)
    }
}

fn read_message<'a>(
    scopes: &mut Vec<&'a MessageSchema>,
    schema: &'a MessageSchema,
    reader: &mut Reader<'_>,
) -> Result<Value, ProtocolError> {
    if scopes.len() >= MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        });
    }
    scopes.push(schema);
    let mut object = Map::new();
    let mut repeated: BTreeMap<&str, Vec<Value>> = BTreeMap::new();

    while !reader.is_empty() {
        let tag = reader.uvarint()? >> 3;
        let field = u32::try_from(tag)
            .ok()
            .and_then(|tag| schema.field_by_tag(tag))
            .ok_or(ProtocolError::UnknownTag { tag })?;

        match field.option {
            FieldOption::Required | FieldOption::Optional => {
                let value = read_value(scopes, &field.field_type, reader)?;
                object.insert(field.name.clone(), value);
            }
            FieldOption::Repeated => {
                let elements = repeated.entry(field.name.as_str()).or_default();
                match &field.field_type {
                    // Packed: one count, then the values back to back
                    FieldType::Scalar(scalar) if scalar.is_packed() => {
                        let count = reader.uvarint()?;
                        for _ in 0..count {
                            elements.push(read_scalar(*scalar, reader)?);
                        }
                    }
                    // Unpacked: one element per key
                    field_type => elements.push(read_value(scopes, field_type, reader)?),
                }
            }
        }
    }

    for (name, elements) in repeated {
        object.insert(name.to_string(), Value::Array(elements));
    }

    scopes.pop();
    Ok(Value::Object(object))
}

fn read_value<'a>(
    scopes: &mut Vec<&'a MessageSchema>,
    field_type: &FieldType,
    reader: &mut Reader<'_>,
) -> Result<Value, ProtocolError> {
    match field_type {
        FieldType::Scalar(scalar) => read_scalar(*scalar, reader),
        FieldType::Message(type_name) => {
            let inner = resolve(scopes, type_name)
                .ok_or_else(|| ProtocolError::UnknownType(type_name.clone()))?;
            let bytes = reader.length_prefixed()?;
            read_message(scopes, inner, &mut Reader::new(bytes))
        }
    }
}

fn read_scalar(scalar: ScalarType, reader: &mut Reader<'_>) -> Result<Value, ProtocolError> {
    Ok(match scalar {
        ScalarType::UInt32 | ScalarType::UInt64 => Value::from(reader.uvarint()?),
        ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SInt64 => Value::from(reader.zigzag()?),
        ScalarType::Float => float(varint::decode_float(reader.bytes(4)?)? as f64),
        ScalarType::Double => float(varint::decode_double(reader.bytes(8)?)?),
        ScalarType::String => {
            let bytes = reader.length_prefixed()?;
            Value::String(varint::decode_str(bytes)?.to_string())
        }
    })
}

// JSON has no NaN or infinity
fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
