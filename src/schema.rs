//! Serialization layer: typed records <-> nested JSON mappings
//!
//! Every persistable type declares its shape through [`Describe`], an explicit
//! per-type field descriptor list. One generic interpreter walks a descriptor
//! against a [`serde_json::Value`] mapping, resolving every declared field by
//! name, and serde's derived code then performs the typed construction.
//!
//! ## Supported shapes
//!
//! ```text
//! primitive   bool | integer | float | string
//! optional    null/absent -> None, present -> recurse
//! record      nested mapping, recurse field by field
//! list        element-wise, including list-of-list
//! ```
//!
//! Map-valued fields and fixed-size tuples can be *described* but are rejected
//! with [`Error::UnsupportedType`] by both directions of the conversion.
//!
//! ## Example
//!
//! ```rust
//! use run_ledger::record::{Metric, RunRecord};
//! use run_ledger::schema::{from_mapping, to_mapping};
//!
//! let mut run = RunRecord::new("run-001", "baseline");
//! run.log_metric("f1", 0.87);
//!
//! let mapping = to_mapping(&run)?;
//! assert_eq!(mapping["metrics"][0]["name"], "f1");
//!
//! let back: RunRecord = from_mapping(&mapping)?;
//! assert_eq!(back, run);
//! # Ok::<(), run_ledger::Error>(())
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Shape of a persistable type.
#[derive(Debug, Clone)]
pub enum TypeDesc {
    /// JSON boolean
    Bool,
    /// JSON integer (signed or unsigned)
    Integer,
    /// Any JSON number
    Float,
    /// JSON string
    String,
    /// `null`/absent or the wrapped shape
    Optional(Box<TypeDesc>),
    /// Homogeneous JSON array
    List(Box<TypeDesc>),
    /// Nested record mapping
    Record(RecordDesc),
    /// Mapping-valued field (unsupported)
    Map(Box<TypeDesc>, Box<TypeDesc>),
    /// Fixed-size tuple (unsupported)
    Tuple(Vec<TypeDesc>),
}

/// Named record shape. Fields are expanded lazily so records may nest
/// themselves (a run holding child runs).
#[derive(Debug, Clone, Copy)]
pub struct RecordDesc {
    name: &'static str,
    fields: fn() -> Vec<FieldDesc>,
}

/// Whether a field must be present in a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Absent value is a [`Error::TypeMismatch`] (unless the type is optional)
    Required,
    /// Absent value falls back to the type's default
    Defaulted,
}

/// One declared field of a record.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    name: &'static str,
    ty: TypeDesc,
    presence: Presence,
}

/// Types with a declared persistable shape.
pub trait Describe {
    /// Descriptor for this type.
    fn describe() -> TypeDesc;
}

impl TypeDesc {
    /// Descriptor for a nested record.
    #[must_use]
    pub const fn record(name: &'static str, fields: fn() -> Vec<FieldDesc>) -> Self {
        Self::Record(RecordDesc { name, fields })
    }

    /// Descriptor of `T`.
    #[must_use]
    pub fn of<T: Describe>() -> Self {
        T::describe()
    }

    /// Check that no unsupported container appears anywhere in the shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedType`] naming the first offending field.
    pub fn ensure_supported(&self) -> Result<()> {
        self.walk_supported(&mut Vec::new(), "$")
    }

    fn walk_supported(&self, seen: &mut Vec<&'static str>, path: &str) -> Result<()> {
        match self {
            Self::Bool | Self::Integer | Self::Float | Self::String => Ok(()),
            Self::Optional(inner) | Self::List(inner) => inner.walk_supported(seen, path),
            Self::Record(desc) => {
                if seen.contains(&desc.name) {
                    return Ok(());
                }
                seen.push(desc.name);
                for field in desc.fields() {
                    field.ty.walk_supported(seen, &field_path(path, field.name))?;
                }
                Ok(())
            }
            Self::Map(..) | Self::Tuple(..) => Err(Error::UnsupportedType(format!(
                "{} at `{path}`; only primitives, optionals, nested records and lists are supported",
                self.label()
            ))),
        }
    }

    /// Human-readable description, used in error messages.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Bool => "a boolean".to_string(),
            Self::Integer => "an integer".to_string(),
            Self::Float => "a number".to_string(),
            Self::String => "a string".to_string(),
            Self::Optional(inner) => format!("null or {}", inner.label()),
            Self::List(inner) => format!("a list of {}", strip_article(&inner.label())),
            Self::Record(desc) => format!("a `{}` mapping", desc.name),
            Self::Map(..) => "a map".to_string(),
            Self::Tuple(items) => format!("a {}-tuple", items.len()),
        }
    }
}

impl RecordDesc {
    /// Record type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Declared fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldDesc> {
        (self.fields)()
    }
}

impl FieldDesc {
    /// A field that must be present.
    #[must_use]
    pub const fn required(name: &'static str, ty: TypeDesc) -> Self {
        Self {
            name,
            ty,
            presence: Presence::Required,
        }
    }

    /// A field that takes its default when absent.
    #[must_use]
    pub const fn defaulted(name: &'static str, ty: TypeDesc) -> Self {
        Self {
            name,
            ty,
            presence: Presence::Defaulted,
        }
    }

    /// Field name in the mapping.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Field shape.
    #[must_use]
    pub const fn ty(&self) -> &TypeDesc {
        &self.ty
    }

    /// Field presence rule.
    #[must_use]
    pub const fn presence(&self) -> Presence {
        self.presence
    }
}

/// Build a typed value from a nested mapping.
///
/// # Errors
///
/// - [`Error::UnsupportedType`] if `T` declares a map or tuple anywhere
/// - [`Error::TypeMismatch`] if a required field is absent or a value has the
///   wrong kind
pub fn from_mapping<T: Describe + DeserializeOwned>(mapping: &Value) -> Result<T> {
    let desc = T::describe();
    desc.ensure_supported()?;
    let normalized = conform(&desc, mapping, "$")?;
    serde_json::from_value(normalized).map_err(|e| Error::mismatch("$", e.to_string()))
}

/// Convert a typed value into plain nested primitives.
///
/// # Errors
///
/// - [`Error::UnsupportedType`] if `T` declares a map or tuple, or if the
///   value cannot be represented as JSON
/// - [`Error::TypeMismatch`] if the output would not read back, e.g. a NaN or
///   infinite float (JSON renders those as `null`)
pub fn to_mapping<T: Describe + Serialize>(value: &T) -> Result<Value> {
    let desc = T::describe();
    desc.ensure_supported()?;
    let mapping = serde_json::to_value(value).map_err(|e| Error::UnsupportedType(e.to_string()))?;
    conform(&desc, &mapping, "$")?;
    Ok(mapping)
}

/// Parse JSON text into a typed value.
///
/// # Errors
///
/// Same as [`from_mapping`]; malformed JSON is a mismatch at `$`.
pub fn from_json_str<T: Describe + DeserializeOwned>(text: &str) -> Result<T> {
    let mapping: Value =
        serde_json::from_str(text).map_err(|e| Error::mismatch("$", format!("valid JSON ({e})")))?;
    from_mapping(&mapping)
}

/// Render a typed value as compact JSON text.
///
/// # Errors
///
/// Same as [`to_mapping`].
pub fn to_json_string<T: Describe + Serialize>(value: &T) -> Result<String> {
    Ok(to_mapping(value)?.to_string())
}

fn conform(desc: &TypeDesc, value: &Value, path: &str) -> Result<Value> {
    let accepted = match desc {
        TypeDesc::Bool => value.is_boolean(),
        TypeDesc::Integer => value.is_i64() || value.is_u64(),
        TypeDesc::Float => value.is_number(),
        TypeDesc::String => value.is_string(),
        TypeDesc::Optional(inner) => {
            return if value.is_null() {
                Ok(Value::Null)
            } else {
                conform(inner, value, path)
            };
        }
        TypeDesc::List(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| Error::mismatch(path, desc.label()))?;
            return items
                .iter()
                .enumerate()
                .map(|(i, item)| conform(inner, item, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array);
        }
        TypeDesc::Record(record) => return conform_record(record, value, path),
        TypeDesc::Map(..) | TypeDesc::Tuple(..) => {
            return Err(Error::UnsupportedType(format!(
                "{} at `{path}`",
                desc.label()
            )))
        }
    };
    if accepted {
        Ok(value.clone())
    } else {
        Err(Error::mismatch(path, desc.label()))
    }
}

fn conform_record(record: &RecordDesc, value: &Value, path: &str) -> Result<Value> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::mismatch(path, format!("a `{}` mapping", record.name)))?;

    let mut out = Map::new();
    for field in record.fields() {
        let path = field_path(path, field.name);
        match (object.get(field.name), &field.ty) {
            (Some(found), ty) => {
                out.insert(field.name.to_string(), conform(ty, found, &path)?);
            }
            (None, TypeDesc::Optional(_)) => {
                out.insert(field.name.to_string(), Value::Null);
            }
            // serde fills the default
            (None, _) if field.presence == Presence::Defaulted => {}
            (None, ty) => return Err(Error::mismatch(&path, ty.label())),
        }
    }
    Ok(Value::Object(out))
}

fn field_path(parent: &str, field: &str) -> String {
    format!("{parent}.{field}")
}

fn strip_article(label: &str) -> &str {
    label
        .strip_prefix("an ")
        .or_else(|| label.strip_prefix("a "))
        .unwrap_or(label)
}

macro_rules! describe_as {
    ($desc:ident: $($ty:ty),+) => {
        $(impl Describe for $ty {
            fn describe() -> TypeDesc {
                TypeDesc::$desc
            }
        })+
    };
}

describe_as!(Bool: bool);
describe_as!(Integer: i8, i16, i32, i64, u8, u16, u32, u64, usize);
describe_as!(Float: f32, f64);
describe_as!(String: String, std::path::PathBuf);

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDesc {
        TypeDesc::Optional(Box::new(T::describe()))
    }
}

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> TypeDesc {
        TypeDesc::List(Box::new(T::describe()))
    }
}

impl<K: Describe, V: Describe, S> Describe for HashMap<K, V, S> {
    fn describe() -> TypeDesc {
        TypeDesc::Map(Box::new(K::describe()), Box::new(V::describe()))
    }
}

impl<K: Describe, V: Describe> Describe for BTreeMap<K, V> {
    fn describe() -> TypeDesc {
        TypeDesc::Map(Box::new(K::describe()), Box::new(V::describe()))
    }
}

impl<A: Describe, B: Describe> Describe for (A, B) {
    fn describe() -> TypeDesc {
        TypeDesc::Tuple(vec![A::describe(), B::describe()])
    }
}

impl<A: Describe, B: Describe, C: Describe> Describe for (A, B, C) {
    fn describe() -> TypeDesc {
        TypeDesc::Tuple(vec![A::describe(), B::describe(), C::describe()])
    }
}
