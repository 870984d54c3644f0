//! Field values bound to native column values.
//!
//! A [`Value`] ties one field descriptor to one [`Transcoder`] and the
//! [`FieldCodec`] converting between them. Values are built per argument or
//! per result column and are never shared between operations.

use std::collections::HashMap;

use prost_reflect::{DynamicMessage, FieldDescriptor, ReflectMessage, Value as FieldValue};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::codec::{CodecRegistry, FieldCodec};
use crate::error::{Error, Result};
use crate::native::{NativeValue, Transcoder};

/// What to bind for a field that is not set in the message.
///
/// Deserializes from `zero` or `null`; a YAML null counts as `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OnEmpty {
    /// Bind `NULL`.
    #[default]
    Null,
    /// Bind the zero value of the field.
    Zero,
}

impl<'de> Deserialize<'de> for OnEmpty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)?.as_deref() {
            None | Some("null") => Ok(OnEmpty::Null),
            Some("zero") => Ok(OnEmpty::Zero),
            Some(other) => Err(de::Error::unknown_variant(other, &["null", "zero"])),
        }
    }
}

/// Per-column [`OnEmpty`] policy. Columns without an entry use `Null`.
///
/// # Examples
///
/// ```
/// use protorow_core::{ColumnDefaults, OnEmpty};
///
/// let defaults = ColumnDefaults::new().with("title", OnEmpty::Zero);
/// assert_eq!(defaults.get("title"), OnEmpty::Zero);
/// assert_eq!(defaults.get("data"), OnEmpty::Null);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnDefaults(HashMap<String, OnEmpty>);

impl ColumnDefaults {
    /// Creates an empty policy (every column `Null`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the policy with `column` set to `on_empty`.
    pub fn with(mut self, column: impl Into<String>, on_empty: OnEmpty) -> Self {
        self.0.insert(column.into(), on_empty);
        self
    }

    /// Policy for `column`.
    pub fn get(&self, column: &str) -> OnEmpty {
        self.0.get(column).copied().unwrap_or_default()
    }
}

impl<S: Into<String>> FromIterator<(S, OnEmpty)> for ColumnDefaults {
    fn from_iter<T: IntoIterator<Item = (S, OnEmpty)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One field bound to one native column value.
#[derive(Debug, Clone)]
pub struct Value {
    field: FieldDescriptor,
    codec: FieldCodec,
    native: Transcoder,
}

impl Value {
    /// Creates a value for `field` in the null state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFieldType`] if the registry has no codec
    /// for the field.
    pub fn new(registry: &CodecRegistry, field: &FieldDescriptor) -> Result<Self> {
        let codec = registry.codec_for(field)?;
        Ok(Self {
            field: field.clone(),
            native: Transcoder::null(codec.native_type()),
            codec,
        })
    }

    /// Creates a value for binding `field` of `message` as a query argument.
    ///
    /// A set field is bound with its actual value. An unset field is bound as
    /// null or as its zero value, depending on `on_empty`.
    pub fn bind_argument(
        registry: &CodecRegistry,
        message: &DynamicMessage,
        field: &FieldDescriptor,
        on_empty: OnEmpty,
    ) -> Result<Self> {
        let mut value = Self::new(registry, field)?;

        if message.has_field(field) {
            value.set_from(&message.get_field(field))?;
        } else if on_empty == OnEmpty::Zero {
            value.set_from(&FieldValue::default_value_for_field(field))?;
        }

        Ok(value)
    }

    /// The bound field.
    pub fn field(&self) -> &FieldDescriptor {
        &self.field
    }

    /// The native value holder.
    pub fn native(&self) -> &Transcoder {
        &self.native
    }

    /// Mutable access to the native value holder, for drivers decoding rows.
    pub fn native_mut(&mut self) -> &mut Transcoder {
        &mut self.native
    }

    /// Consumes the value, returning the native holder for the executor.
    pub fn into_native(self) -> Transcoder {
        self.native
    }

    /// Encodes a field value into the native holder.
    pub fn set_from(&mut self, value: &FieldValue) -> Result<()> {
        let native = self.codec.encode(value)?;
        self.native.set(native)
    }

    /// Writes the native value into `message`.
    ///
    /// A null native value leaves the field unset, as does the zero value of
    /// a field without presence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] if the native value does not convert
    /// into the field, e.g. an out of range unsigned value.
    pub fn set_to(&self, message: &mut DynamicMessage) -> Result<()> {
        let Some(value) = self.codec.decode(self.native.get())? else {
            return Ok(());
        };
        // Without presence a zero value is indistinguishable from unset.
        let zero = FieldValue::default_value_for_field(&self.field);
        if !self.field.supports_presence() && value == zero {
            message.clear_field(&self.field);
            return Ok(());
        }

        message.try_set_field(&self.field, value).map_err(|e| {
            Error::conversion(format!("setting field {}: {e}", self.field.full_name()))
        })
    }
}

/// Returns the names of the fields of `message`, in declaration order.
///
/// With `skip_empty`, fields that are not set are left out. Names listed in
/// `exclude` are always left out. Names are the field names of the message
/// definition, case sensitive.
pub fn parse_fields(message: &DynamicMessage, skip_empty: bool, exclude: &[&str]) -> Vec<String> {
    message
        .descriptor()
        .fields()
        .filter(|fd| !skip_empty || message.has_field(fd))
        .filter(|fd| !exclude.contains(&fd.name()))
        .map(|fd| fd.name().to_string())
        .collect()
}

/// Binds the fields named by `names` as query arguments.
///
/// Unset fields are bound according to `defaults`.
///
/// # Errors
///
/// Returns [`Error::ArgumentBuild`] if a name is not a field of the message,
/// or [`Error::UnsupportedFieldType`] if a field has no codec.
pub fn parse_args(
    registry: &CodecRegistry,
    message: &DynamicMessage,
    names: &[String],
    defaults: &ColumnDefaults,
) -> Result<Vec<Transcoder>> {
    let descriptor = message.descriptor();
    let mut args = Vec::with_capacity(names.len() + 1);

    for name in names {
        let field = descriptor.get_field_by_name(name).ok_or_else(|| {
            Error::ArgumentBuild(format!(
                "field {name:?} not in message {}",
                descriptor.full_name()
            ))
        })?;

        let value = Value::bind_argument(registry, message, &field, defaults.get(name))?;
        args.push(value.into_native());
    }

    Ok(args)
}
