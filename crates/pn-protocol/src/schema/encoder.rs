//! Structured value to tag-length-value bytes

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use super::{as_object, resolve, FieldOption, FieldType, MessageSchema, ScalarType, MAX_NESTING_DEPTH};
use crate::error::ProtocolError;
use crate::varint;

/// Encode `value` against `schema`
///
/// Required fields are checked across the whole value (including nested
/// messages) before any byte is produced, so a failed encode yields no
/// partial output. Fields of `value` without a descriptor are ignored, and
/// `null` counts as absent. Nesting deeper than [`MAX_NESTING_DEPTH`] fails
/// validation.
pub fn encode_message(schema: &MessageSchema, value: &Value) -> Result<Bytes, ProtocolError> {
    let mut scopes = Vec::new();
    validate(&mut scopes, schema, value, "")?;

    let mut buf = BytesMut::new();
    write_message(&mut scopes, schema, value, &mut buf)?;
    Ok(buf.freeze())
}

fn field_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn present<'v>(value: &'v Value, name: &str) -> Option<&'v Value> {
    value.get(name).filter(|v| !v.is_null())
}

fn enter<'a>(scopes: &mut Vec<&'a MessageSchema>, schema: &'a MessageSchema) -> Result<(), ProtocolError> {
    if scopes.len() >= MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        });
    }
    scopes.push(schema);
    Ok(())
}

fn nested<'a>(scopes: &[&'a MessageSchema], type_name: &str) -> Result<&'a MessageSchema, ProtocolError> {
    resolve(scopes, type_name).ok_or_else(|| ProtocolError::UnknownType(type_name.to_string()))
}

fn validate<'a>(
    scopes: &mut Vec<&'a MessageSchema>,
    schema: &'a MessageSchema,
    value: &Value,
    path: &str,
) -> Result<(), ProtocolError> {
    as_object(path, value)?;
    enter(scopes, schema)?;

    for field in schema.fields() {
        let path = field_path(path, &field.name);
        let Some(item) = present(value, &field.name) else {
            if field.option == FieldOption::Required {
                return Err(ProtocolError::MissingRequiredField(path));
            }
            continue;
        };

        let FieldType::Message(type_name) = &field.field_type else {
            continue;
        };
        let inner = nested(scopes, type_name)?;

        match field.option {
            FieldOption::Required | FieldOption::Optional => validate(scopes, inner, item, &path)?,
            FieldOption::Repeated => {
                for (i, element) in as_array(&path, item)?.iter().enumerate() {
                    validate(scopes, inner, element, &format!("{}[{}]", path, i))?;
                }
            }
        }
    }

    scopes.pop();
    Ok(())
}

fn write_message<'a>(
    scopes: &mut Vec<&'a MessageSchema>,
    schema: &'a MessageSchema,
    value: &Value,
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    enter(scopes, schema)?;

    for field in schema.fields() {
        let Some(item) = present(value, &field.name) else {
            continue;
        };

        match field.option {
            FieldOption::Required | FieldOption::Optional => {
                varint::encode_uvarint(field.key(), dst);
                write_value(scopes, &field.name, &field.field_type, item, dst)?;
            }
            FieldOption::Repeated => {
                let elements = as_array(&field.name, item)?;
                if elements.is_empty() {
                    continue;
                }

                if field.field_type.is_packed() {
                    varint::encode_uvarint(field.key(), dst);
                    varint::encode_uvarint(elements.len() as u64, dst);
                    for element in elements {
                        write_value(scopes, &field.name, &field.field_type, element, dst)?;
                    }
                } else {
                    for element in elements {
                        varint::encode_uvarint(field.key(), dst);
                        write_value(scopes, &field.name, &field.field_type, element, dst)?;
                    }
                }
            }
        }
    }

    scopes.pop();
    Ok(())
}

fn write_value<'a>(
    scopes: &mut Vec<&'a MessageSchema>,
    name: &str,
    field_type: &FieldType,
    value: &Value,
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    match field_type {
        FieldType::Scalar(scalar) => write_scalar(name, *scalar, value, dst),
        FieldType::Message(type_name) => {
            let inner = nested(scopes, type_name)?;
            let mut sub = BytesMut::new();
            write_message(scopes, inner, value, &mut sub)?;
            varint::encode_uvarint(sub.len() as u64, dst);
            dst.extend_from_slice(&sub);
            Ok(())
        }
    }
}

fn write_scalar(
    name: &str,
    scalar: ScalarType,
    value: &Value,
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let invalid = |expected: &'static str| ProtocolError::InvalidFieldValue {
        field: name.to_string(),
        expected,
    };

    match scalar {
        ScalarType::UInt32 => {
            let n = unsigned(value)
                .filter(|n| *n <= u32::MAX as u64)
                .ok_or_else(|| invalid("unsigned 32-bit integer"))?;
            varint::encode_uvarint(n, dst);
        }
        ScalarType::UInt64 => {
            let n = unsigned(value).ok_or_else(|| invalid("unsigned 64-bit integer"))?;
            varint::encode_uvarint(n, dst);
        }
        ScalarType::Int32 | ScalarType::SInt32 => {
            let n = signed(value)
                .filter(|n| i32::try_from(*n).is_ok())
                .ok_or_else(|| invalid("signed 32-bit integer"))?;
            varint::encode_zigzag(n, dst);
        }
        ScalarType::SInt64 => {
            let n = signed(value).ok_or_else(|| invalid("signed 64-bit integer"))?;
            varint::encode_zigzag(n, dst);
        }
        ScalarType::Float => {
            let n = value.as_f64().ok_or_else(|| invalid("number"))?;
            varint::encode_float(n as f32, dst);
        }
        ScalarType::Double => {
            let n = value.as_f64().ok_or_else(|| invalid("number"))?;
            varint::encode_double(n, dst);
        }
        ScalarType::String => {
            let s = value.as_str().ok_or_else(|| invalid("string"))?;
            varint::encode_uvarint(s.len() as u64, dst);
            varint::encode_str(s, dst);
        }
    }
    Ok(())
}

// Whole-valued floats are accepted for integer fields; fractions truncate.
fn unsigned(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && *f < u64::MAX as f64)
            .map(|f| f as u64)
    })
}

fn signed(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn as_array<'v>(field: &str, value: &'v Value) -> Result<&'v Vec<Value>, ProtocolError> {
    value.as_array().ok_or_else(|| ProtocolError::InvalidFieldValue {
        field: field.to_string(),
        expected: "array",
    })
}
