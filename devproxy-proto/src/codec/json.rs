//! JSON codec.
//!
//! Objects map to JSON objects keyed by field name, arrays to arrays,
//! binary blobs to standard base64 strings and references to hyphenated
//! UUID strings. Unions carry their discriminator under the tag name.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value};

use crate::codec::{Decoder, Encoder};
use crate::error::{DecodeError, EncodeError};
use crate::reference::Reference;

/// Container under construction.
#[derive(Debug)]
enum Open {
    /// An array collecting its elements.
    Array(Vec<Value>),
    /// An object and the name announced for its next value.
    Object {
        /// Fields written so far.
        map: Map<String, Value>,
        /// Name set by the last [`Encoder::field`] call.
        key: Option<&'static str>,
    },
}

/// JSON encoder building a [`Value`] tree.
#[derive(Debug, Default)]
pub struct JsonWriter {
    /// Containers that have been started but not ended.
    stack: Vec<Open>,
    /// The completed top-level value.
    root: Option<Value>,
}

impl JsonWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the completed document.
    pub fn finish(self) -> Result<Value, EncodeError> {
        if !self.stack.is_empty() {
            return Err(EncodeError::Structure("unterminated container"));
        }
        self.root
            .ok_or(EncodeError::Structure("no value was written"))
    }

    /// Places `v` into the innermost container.
    fn push(&mut self, v: Value) -> Result<(), EncodeError> {
        match self.stack.last_mut() {
            None if self.root.is_some() => Err(EncodeError::Structure("multiple root values")),
            None => {
                self.root = Some(v);
                Ok(())
            }
            Some(Open::Array(items)) => {
                items.push(v);
                Ok(())
            }
            Some(Open::Object { map, key }) => {
                let name = key
                    .take()
                    .ok_or(EncodeError::Structure("object value written without a field name"))?;
                map.insert(name.to_owned(), v);
                Ok(())
            }
        }
    }
}

impl Encoder for JsonWriter {
    fn write_nil(&mut self) -> Result<(), EncodeError> {
        self.push(Value::Null)
    }

    fn write_bool(&mut self, v: bool) -> Result<(), EncodeError> {
        self.push(Value::Bool(v))
    }

    fn write_u64(&mut self, v: u64) -> Result<(), EncodeError> {
        self.push(Value::Number(v.into()))
    }

    fn write_i64(&mut self, v: i64) -> Result<(), EncodeError> {
        self.push(Value::Number(v.into()))
    }

    fn write_f64(&mut self, v: f64) -> Result<(), EncodeError> {
        let n = Number::from_f64(v).ok_or(EncodeError::Structure("non-finite float"))?;
        self.push(Value::Number(n))
    }

    fn write_str(&mut self, v: &str) -> Result<(), EncodeError> {
        self.push(Value::String(v.to_owned()))
    }

    fn write_bin(&mut self, v: &[u8]) -> Result<(), EncodeError> {
        self.push(Value::String(STANDARD.encode(v)))
    }

    fn begin_array(&mut self, len: usize) -> Result<(), EncodeError> {
        self.stack.push(Open::Array(Vec::with_capacity(len)));
        Ok(())
    }

    fn end_array(&mut self) -> Result<(), EncodeError> {
        match self.stack.pop() {
            Some(Open::Array(items)) => self.push(Value::Array(items)),
            _ => Err(EncodeError::Structure("end_array without matching array")),
        }
    }

    fn begin_object(&mut self, _fields: usize) -> Result<(), EncodeError> {
        self.stack.push(Open::Object {
            map: Map::new(),
            key: None,
        });
        Ok(())
    }

    fn begin_union(
        &mut self,
        tag_name: &'static str,
        tag: u64,
        fields: usize,
    ) -> Result<(), EncodeError> {
        self.begin_object(fields)?;
        self.field(tag_name)?;
        self.write_u64(tag)
    }

    fn field(&mut self, name: &'static str) -> Result<(), EncodeError> {
        match self.stack.last_mut() {
            Some(Open::Object { key, .. }) if key.is_none() => {
                *key = Some(name);
                Ok(())
            }
            Some(Open::Object { .. }) => Err(EncodeError::Structure("field announced twice")),
            _ => Err(EncodeError::Structure("field outside of an object")),
        }
    }

    fn end_object(&mut self) -> Result<(), EncodeError> {
        match self.stack.pop() {
            Some(Open::Object { map, key: None }) => self.push(Value::Object(map)),
            Some(Open::Object { .. }) => Err(EncodeError::Structure("field without a value")),
            _ => Err(EncodeError::Structure("end_object without matching object")),
        }
    }

    fn write_reference(&mut self, r: &Reference) -> Result<(), EncodeError> {
        self.write_str(&r.to_string())
    }
}

/// Container being read.
#[derive(Debug)]
enum Cursor {
    /// The document itself, until taken.
    Root(Option<Value>),
    /// Remaining array elements.
    Array(std::vec::IntoIter<Value>),
    /// Remaining object fields and the selected field name.
    Object {
        /// Record being read, for error messages.
        what: &'static str,
        /// Fields not yet read.
        map: Map<String, Value>,
        /// Name set by the last [`Decoder::field`] call.
        key: Option<&'static str>,
    },
}

/// JSON decoder walking a parsed [`Value`].
#[derive(Debug)]
pub struct JsonReader {
    /// Containers entered so far; the bottom entry is the document root.
    stack: Vec<Cursor>,
}

impl JsonReader {
    /// Creates a reader over a parsed document.
    pub fn new(doc: Value) -> Self {
        Self {
            stack: vec![Cursor::Root(Some(doc))],
        }
    }

    /// Takes the next value from the innermost container.
    fn take_value(&mut self) -> Result<Value, DecodeError> {
        match self.stack.last_mut() {
            Some(Cursor::Root(doc)) => doc
                .take()
                .ok_or(DecodeError::Structure("document already consumed")),
            Some(Cursor::Array(items)) => items
                .next()
                .ok_or(DecodeError::Structure("read past the end of an array")),
            Some(Cursor::Object { map, key, .. }) => {
                let name = key
                    .take()
                    .ok_or(DecodeError::Structure("object value read without a field name"))?;
                map.remove(name).ok_or(DecodeError::MissingField(name))
            }
            None => Err(DecodeError::Structure("reader has no open container")),
        }
    }

    /// Takes the next value, requiring it to be an object.
    fn next_object(&mut self, expected: &'static str) -> Result<Map<String, Value>, DecodeError> {
        match self.take_value()? {
            Value::Object(map) => Ok(map),
            other => Err(mismatch(expected, &other)),
        }
    }

    /// Takes the next value, requiring it to be a string.
    fn next_string(&mut self, expected: &'static str) -> Result<String, DecodeError> {
        match self.take_value()? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(expected, &other)),
        }
    }

    /// Takes the next value, requiring it to be a number.
    fn next_number(&mut self, expected: &'static str) -> Result<Number, DecodeError> {
        match self.take_value()? {
            Value::Number(n) => Ok(n),
            other => Err(mismatch(expected, &other)),
        }
    }

    /// Pops the innermost container, which must be a fully read object.
    fn pop_object(&mut self) -> Result<(), DecodeError> {
        match self.stack.pop() {
            Some(Cursor::Object { what, map, .. }) => match map.keys().next() {
                None => Ok(()),
                Some(extra) => Err(DecodeError::Unexpected {
                    expected: what,
                    found: format!("unknown field `{extra}`"),
                }),
            },
            _ => Err(DecodeError::Structure("end_object without matching object")),
        }
    }
}

impl Decoder for JsonReader {
    fn read_nil(&mut self) -> Result<(), DecodeError> {
        match self.take_value()? {
            Value::Null => Ok(()),
            other => Err(mismatch("null", &other)),
        }
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.take_value()? {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let n = self.next_number("unsigned integer")?;
        if let Some(v) = n.as_u64() {
            Ok(v)
        } else if let Some(v) = n.as_i64() {
            Err(DecodeError::IntegerOverflow {
                value: i128::from(v),
                target: "u64",
            })
        } else {
            Err(DecodeError::Unexpected {
                expected: "unsigned integer",
                found: format!("float {n}"),
            })
        }
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let n = self.next_number("integer")?;
        if let Some(v) = n.as_i64() {
            Ok(v)
        } else if let Some(v) = n.as_u64() {
            Err(DecodeError::IntegerOverflow {
                value: i128::from(v),
                target: "i64",
            })
        } else {
            Err(DecodeError::Unexpected {
                expected: "integer",
                found: format!("float {n}"),
            })
        }
    }

    fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let n = self.next_number("float")?;
        n.as_f64().ok_or(DecodeError::Unexpected {
            expected: "float",
            found: format!("number {n}"),
        })
    }

    fn read_str(&mut self) -> Result<String, DecodeError> {
        self.next_string("string")
    }

    fn read_bin(&mut self) -> Result<Vec<u8>, DecodeError> {
        let text = self.next_string("base64 string")?;
        Ok(STANDARD.decode(text)?)
    }

    fn begin_array(&mut self) -> Result<usize, DecodeError> {
        match self.take_value()? {
            Value::Array(items) => {
                let len = items.len();
                self.stack.push(Cursor::Array(items.into_iter()));
                Ok(len)
            }
            other => Err(mismatch("array", &other)),
        }
    }

    fn end_array(&mut self) -> Result<(), DecodeError> {
        match self.stack.pop() {
            Some(Cursor::Array(rest)) if rest.as_slice().is_empty() => Ok(()),
            Some(Cursor::Array(_)) => Err(DecodeError::Structure("array has unread elements")),
            _ => Err(DecodeError::Structure("end_array without matching array")),
        }
    }

    fn begin_object(&mut self, what: &'static str, _fields: usize) -> Result<(), DecodeError> {
        let map = self.next_object(what)?;
        self.stack.push(Cursor::Object {
            what,
            map,
            key: None,
        });
        Ok(())
    }

    fn begin_union(&mut self, tag_name: &'static str) -> Result<(u64, usize), DecodeError> {
        let mut map = self.next_object(tag_name)?;
        let tag = match map.remove(tag_name) {
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| DecodeError::Unexpected {
                expected: tag_name,
                found: format!("number {n}"),
            })?,
            Some(other) => return Err(mismatch(tag_name, &other)),
            None => return Err(DecodeError::MissingField(tag_name)),
        };
        let fields = map.len();
        self.stack.push(Cursor::Object {
            what: tag_name,
            map,
            key: None,
        });
        Ok((tag, fields))
    }

    fn field(&mut self, name: &'static str) -> Result<(), DecodeError> {
        match self.stack.last_mut() {
            Some(Cursor::Object { key, .. }) => {
                *key = Some(name);
                Ok(())
            }
            _ => Err(DecodeError::Structure("field outside of an object")),
        }
    }

    fn end_object(&mut self) -> Result<(), DecodeError> {
        self.pop_object()
    }

    fn skip(&mut self) -> Result<(), DecodeError> {
        self.take_value().map(drop)
    }

    fn read_reference(&mut self) -> Result<Reference, DecodeError> {
        let text = self.next_string("reference")?;
        text.parse()
    }
}

/// Builds a [`DecodeError::Unexpected`] naming the JSON type found.
fn mismatch(expected: &'static str, found: &Value) -> DecodeError {
    let kind = match found {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    DecodeError::Unexpected {
        expected,
        found: kind.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn objects_are_keyed_by_field_name() {
        let mut w = JsonWriter::new();
        w.begin_object(2).unwrap();
        w.field("port").unwrap();
        w.write_u64(80).unwrap();
        w.field("blob").unwrap();
        w.write_bin(b"hi").unwrap();
        w.end_object().unwrap();
        assert_eq!(w.finish().unwrap(), json!({"port": 80, "blob": "aGk="}));
    }

    #[test]
    fn unions_carry_their_tag() {
        let mut w = JsonWriter::new();
        w.begin_union("family", 4, 1).unwrap();
        w.field("host").unwrap();
        w.write_str("relay").unwrap();
        w.end_object().unwrap();
        let doc = w.finish().unwrap();
        assert_eq!(doc, json!({"family": 4, "host": "relay"}));

        let mut r = JsonReader::new(doc);
        assert_eq!(r.begin_union("family").unwrap(), (4, 1));
        r.field("host").unwrap();
        assert_eq!(r.read_str().unwrap(), "relay");
        r.end_object().unwrap();
    }

    #[test]
    fn extra_field_is_rejected() {
        let mut r = JsonReader::new(json!({"a": 1, "b": 2}));
        r.begin_object("single", 1).unwrap();
        r.field("a").unwrap();
        assert_eq!(r.read_u64().unwrap(), 1);
        let err = r.end_object().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Unexpected { expected: "single", ref found } if found == "unknown field `b`"
        ));
    }

    #[test]
    fn missing_field_is_named() {
        let mut r = JsonReader::new(json!({"a": 1}));
        r.begin_object("pair", 2).unwrap();
        r.field("b").unwrap();
        let err = r.read_u64().unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("b")));
    }

    #[test]
    fn value_without_field_name_is_rejected() {
        let mut w = JsonWriter::new();
        w.begin_object(1).unwrap();
        assert!(matches!(
            w.write_u64(1).unwrap_err(),
            EncodeError::Structure(_)
        ));
    }

    #[test]
    fn wrong_type_is_reported() {
        let mut r = JsonReader::new(json!("text"));
        let err = r.read_u64().unwrap_err();
        assert!(matches!(err, DecodeError::Unexpected { ref found, .. } if found == "string"));
    }

    #[test]
    fn negative_into_unsigned_overflows() {
        let mut r = JsonReader::new(json!(-3));
        assert!(matches!(
            r.read_u64().unwrap_err(),
            DecodeError::IntegerOverflow { value: -3, .. }
        ));
    }

    #[test]
    fn bad_base64_is_rejected() {
        let mut r = JsonReader::new(json!("@@@"));
        assert!(matches!(r.read_bin().unwrap_err(), DecodeError::Base64(_)));
    }

    #[test]
    fn arrays_must_be_fully_read() {
        let mut r = JsonReader::new(json!([1, 2]));
        assert_eq!(r.begin_array().unwrap(), 2);
        r.read_u64().unwrap();
        assert!(r.end_array().is_err());
    }
}
