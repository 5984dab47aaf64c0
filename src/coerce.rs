//! Bidirectional conversion between the Skiff server's dynamically-typed
//! attribute values and the provider's structured values.
//!
//! The server describes every attribute with a type tag (`bool`, `int`,
//! `float`, `string`, `time`, `duration`, `ref`, `[]<T>`, `map[string]<T>`)
//! and reports values as plain JSON. [`decode`] turns a JSON value into a
//! [`StructuredValue`] driven by the tag, and [`encode`] is the inverse used
//! when extracting configured values for transmission to the server.
//!
//! Neither direction ever fails: a value whose runtime shape disagrees with
//! its declared tag degrades to a string rendering (with a logged warning on
//! decode), and an absent value is represented as a null that still knows its
//! expected shape.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// A parsed Skiff attribute type tag.
///
/// The tag grammar is closed: scalars plus `[]<T>` lists and
/// `map[string]<T>` maps, recursively composable. Unrecognised tags are
/// treated as `string`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    /// `bool`
    Bool,
    /// `int` or `uint`
    Int,
    /// `float`
    Float,
    /// `string`, or any tag the grammar does not recognise
    String,
    /// `time`: an RFC 3339 timestamp string
    Time,
    /// `duration`: a duration string such as `"30s"`
    Duration,
    /// `ref`: a reference to another instance, as a string
    Ref,
    /// `[]<T>`: an ordered list
    List(Box<TypeTag>),
    /// `map[string]<T>`: a string-keyed map
    Map(Box<TypeTag>),
}

impl TypeTag {
    /// Parse a type tag string reported by the server. Never fails;
    /// unrecognised tags fall back to [`TypeTag::String`].
    pub fn parse(tag: &str) -> Self {
        if let Some(elem) = tag.strip_prefix("[]") {
            return Self::List(Box::new(Self::parse(elem)));
        }
        if tag.starts_with("map[") {
            // The value type follows the first ']', e.g. "map[string]int".
            if let Some(idx) = tag.find(']') {
                if idx + 1 < tag.len() {
                    return Self::Map(Box::new(Self::parse(&tag[idx + 1..])));
                }
            }
            return Self::Map(Box::new(Self::String));
        }
        match tag {
            "bool" => Self::Bool,
            "int" | "uint" => Self::Int,
            "float" => Self::Float,
            "time" => Self::Time,
            "duration" => Self::Duration,
            "ref" => Self::Ref,
            _ => Self::String,
        }
    }

    /// Tags that are string-shaped by definition; a non-string value for
    /// these is rendered without a mismatch warning.
    pub fn is_string_shaped(&self) -> bool {
        matches!(self, Self::String | Self::Duration | Self::Ref)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Time => write!(f, "time"),
            Self::Duration => write!(f, "duration"),
            Self::Ref => write!(f, "ref"),
            Self::List(elem) => write!(f, "[]{}", elem),
            Self::Map(value) => write!(f, "map[string]{}", value),
        }
    }
}

/// A structured value with a typed notion of absence.
///
/// Every variant carries an `Option` so a null is never shapeless: a missing
/// integer is `Int(None)`, a missing list of strings is
/// `List(TypeTag::String, None)`, and so on. Compound variants remember
/// their element type so an empty or absent collection still round-trips
/// through the schema layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    /// A boolean, or a boolean-shaped null.
    Bool(Option<bool>),
    /// A 64-bit integer, or an integer-shaped null.
    Int(Option<i64>),
    /// A 64-bit float, or a float-shaped null.
    Float(Option<f64>),
    /// A string (also used for `time`/`duration`/`ref`), or a string null.
    String(Option<String>),
    /// An ordered list with its element tag.
    List(TypeTag, Option<Vec<StructuredValue>>),
    /// A string-keyed map with its value tag.
    Map(TypeTag, Option<BTreeMap<String, StructuredValue>>),
}

impl StructuredValue {
    /// Whether this value is a (typed) null.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Bool(v) => v.is_none(),
            Self::Int(v) => v.is_none(),
            Self::Float(v) => v.is_none(),
            Self::String(v) => v.is_none(),
            Self::List(_, v) => v.is_none(),
            Self::Map(_, v) => v.is_none(),
        }
    }

    /// Convert to the host-facing JSON representation. Typed nulls become
    /// JSON null; the shape information lives in the schema, not the record.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(Some(b)) => Value::Bool(*b),
            Self::Int(Some(i)) => Value::Number((*i).into()),
            Self::Float(Some(f)) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::String(Some(s)) => Value::String(s.clone()),
            Self::List(_, Some(items)) => {
                Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(_, Some(entries)) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            _ => Value::Null,
        }
    }

    /// String rendering used when a value must degrade to a string. Returns
    /// `None` for nulls.
    fn render(&self) -> Option<String> {
        if self.is_null() {
            return None;
        }
        Some(render_dynamic(&self.to_json()))
    }
}

/// The typed null for a tag.
pub fn null_value(tag: &TypeTag) -> StructuredValue {
    match tag {
        TypeTag::Bool => StructuredValue::Bool(None),
        TypeTag::Int => StructuredValue::Int(None),
        TypeTag::Float => StructuredValue::Float(None),
        TypeTag::List(elem) => StructuredValue::List((**elem).clone(), None),
        TypeTag::Map(value) => StructuredValue::Map((**value).clone(), None),
        _ => StructuredValue::String(None),
    }
}

/// Decode a dynamically-typed server value into a structured value driven by
/// its declared tag.
///
/// Never fails. A null input yields the typed null for the tag. A scalar
/// whose runtime shape disagrees with the tag is rendered as a string and
/// the mismatch logged as a warning, except for tags that are string-shaped
/// by definition. A non-array/non-object input for a compound tag degrades
/// to the typed null of the compound type.
pub fn decode(value: &Value, tag: &TypeTag) -> StructuredValue {
    if value.is_null() {
        return null_value(tag);
    }

    match tag {
        TypeTag::List(elem) => {
            return match value {
                Value::Array(items) => StructuredValue::List(
                    (**elem).clone(),
                    Some(items.iter().map(|item| decode(item, elem)).collect()),
                ),
                _ => null_value(tag),
            };
        }
        TypeTag::Map(val_tag) => {
            return match value {
                Value::Object(entries) => StructuredValue::Map(
                    (**val_tag).clone(),
                    Some(
                        entries
                            .iter()
                            .map(|(k, v)| (k.clone(), decode(v, val_tag)))
                            .collect(),
                    ),
                ),
                _ => null_value(tag),
            };
        }
        _ => {}
    }

    if let Some(decoded) = decode_scalar(value, tag) {
        return decoded;
    }

    // Value does not match its declared tag: fall back to a string rendering
    // but log the mismatch so server-side data issues are not silently
    // hidden. The raw value is intentionally omitted from the log because it
    // may be sensitive.
    if !tag.is_string_shaped() {
        tracing::warn!(
            declared_type = %tag,
            actual_type = dynamic_type_name(value),
            "attribute type mismatch: coercing to string"
        );
    }
    StructuredValue::String(Some(render_dynamic(value)))
}

/// Scalar decode; `None` signals a shape mismatch.
fn decode_scalar(value: &Value, tag: &TypeTag) -> Option<StructuredValue> {
    match tag {
        TypeTag::Bool => match value {
            Value::Bool(b) => Some(StructuredValue::Bool(Some(*b))),
            _ => None,
        },
        TypeTag::Int => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(StructuredValue::Int(Some(i)))
                } else {
                    n.as_f64().map(|f| StructuredValue::Int(Some(f as i64)))
                }
            }
            _ => None,
        },
        TypeTag::Float => match value {
            Value::Number(n) => n.as_f64().map(|f| StructuredValue::Float(Some(f))),
            _ => None,
        },
        TypeTag::Time => match value {
            // The server marshals timestamps as RFC 3339; parsed values are
            // re-emitted in canonical form, unparsable ones pass through.
            Value::String(s) => Some(StructuredValue::String(Some(
                match chrono::DateTime::parse_from_rfc3339(s) {
                    Ok(parsed) => parsed.to_rfc3339(),
                    Err(_) => s.clone(),
                },
            ))),
            _ => None,
        },
        TypeTag::String | TypeTag::Duration | TypeTag::Ref => match value {
            Value::String(s) => Some(StructuredValue::String(Some(s.clone()))),
            // String-shaped tags render any other value without a warning.
            _ => Some(StructuredValue::String(Some(render_dynamic(value)))),
        },
        TypeTag::List(_) | TypeTag::Map(_) => None,
    }
}

/// Encode a structured value for transmission to the server.
///
/// Returns `None` for nulls so absent attributes are omitted from the
/// submitted set. Encoding is total: a structured value whose variant does
/// not match the tag degrades to a string rendering rather than failing.
pub fn encode(value: &StructuredValue, tag: &TypeTag) -> Option<Value> {
    if value.is_null() {
        return None;
    }
    match (tag, value) {
        (TypeTag::Bool, StructuredValue::Bool(Some(b))) => Some(Value::Bool(*b)),
        (TypeTag::Int, StructuredValue::Int(Some(i))) => Some(Value::Number((*i).into())),
        (TypeTag::Float, StructuredValue::Float(Some(f))) => {
            serde_json::Number::from_f64(*f).map(Value::Number)
        }
        (
            TypeTag::String | TypeTag::Time | TypeTag::Duration | TypeTag::Ref,
            StructuredValue::String(Some(s)),
        ) => Some(Value::String(s.clone())),
        (TypeTag::List(elem), StructuredValue::List(_, Some(items))) => Some(Value::Array(
            items
                .iter()
                .map(|item| encode(item, elem).unwrap_or(Value::Null))
                .collect(),
        )),
        (TypeTag::Map(val_tag), StructuredValue::Map(_, Some(entries))) => Some(Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), encode(value, val_tag).unwrap_or(Value::Null)))
                .collect(),
        )),
        // Kind mismatch: degrade to a string rendering, never fail.
        (_, other) => other.render().map(Value::String),
    }
}

/// Render a dynamic value as a string. Strings render as themselves, all
/// other values as their JSON text.
fn render_dynamic(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human-readable name of a JSON value's runtime type, for diagnostics.
pub(crate) fn dynamic_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
