//! Codec registry: field kinds to native column types.
//!
//! [`CodecRegistry::codec_for`] resolves a field descriptor into a
//! [`FieldCodec`], the conversion strategy used by [`Value`](crate::Value).
//! Scalar kinds map one to one onto a [`ScalarType`]; repeated fields map
//! onto the array of their element type. Nested messages are only
//! supported when a [`MessageCodec`] is registered under the message's full
//! name. The default registry knows `google.protobuf.Timestamp`.
//!
//! # Process-wide registry
//!
//! Tables use [`CodecRegistry::global`] unless given a registry explicitly.
//! Extensions are registered on a registry value which is then published
//! once with [`CodecRegistry::install`], before the first table is used:
//!
//! ```
//! use protorow_core::{CodecRegistry, TimestampCodec};
//!
//! let mut registry = CodecRegistry::new();
//! registry.register("google.protobuf.Timestamp", TimestampCodec).unwrap();
//! assert!(registry.contains("google.protobuf.Timestamp"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::DateTime;
use prost::bytes::Bytes;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, Value as FieldValue};

use crate::error::{Error, Result};
use crate::native::{NativeType, NativeValue, Scalar, ScalarType};

/// Full name of the well-known timestamp message.
pub const TIMESTAMP: &str = "google.protobuf.Timestamp";

static GLOBAL: OnceLock<Arc<CodecRegistry>> = OnceLock::new();

/// Conversion between one nested message type and a native scalar.
pub trait MessageCodec: Send + Sync + fmt::Debug {
    /// Native type the message is stored as.
    fn scalar_type(&self) -> ScalarType;

    /// Converts a message into its native representation.
    fn encode(&self, message: &DynamicMessage) -> Result<Scalar>;

    /// Reconstructs a message of type `descriptor` from a native value.
    fn decode(&self, scalar: Scalar, descriptor: &MessageDescriptor) -> Result<DynamicMessage>;
}

/// `google.protobuf.Timestamp` stored as a UTC timestamp.
///
/// Seconds and nanos are taken from the message fields of the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampCodec;

const NANOS_PER_SECOND: u32 = 1_000_000_000;

impl MessageCodec for TimestampCodec {
    fn scalar_type(&self) -> ScalarType {
        ScalarType::Timestamptz
    }

    fn encode(&self, message: &DynamicMessage) -> Result<Scalar> {
        let seconds = message
            .get_field_by_name("seconds")
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        let nanos = message
            .get_field_by_name("nanos")
            .and_then(|v| v.as_i32())
            .unwrap_or_default();
        let nanos = u32::try_from(nanos)
            .map_err(|_| Error::conversion(format!("timestamp nanos {nanos} is negative")))?;

        DateTime::from_timestamp(seconds, nanos)
            .map(Scalar::Timestamptz)
            .ok_or_else(|| {
                Error::conversion(format!("timestamp {seconds}s {nanos}ns is out of range"))
            })
    }

    fn decode(&self, scalar: Scalar, descriptor: &MessageDescriptor) -> Result<DynamicMessage> {
        let Scalar::Timestamptz(ts) = scalar else {
            return Err(Error::conversion(format!(
                "cannot decode {scalar:?} into {}",
                descriptor.full_name()
            )));
        };

        // A leap second reports nanos past one second; fold them into the
        // next second to stay in the protobuf range.
        let (seconds, nanos) = match ts.timestamp_subsec_nanos() {
            n if n >= NANOS_PER_SECOND => (ts.timestamp() + 1, n - NANOS_PER_SECOND),
            n => (ts.timestamp(), n),
        };

        // Zero parts stay unset so decoded messages compare equal to ones
        // built field by field.
        let mut message = DynamicMessage::new(descriptor.clone());
        if seconds != 0 {
            message
                .try_set_field_by_name("seconds", FieldValue::I64(seconds))
                .map_err(|e| Error::conversion(e.to_string()))?;
        }
        if nanos != 0 {
            message
                .try_set_field_by_name("nanos", FieldValue::I32(nanos as i32))
                .map_err(|e| Error::conversion(e.to_string()))?;
        }
        Ok(message)
    }
}

/// Conversion strategy for a single (non-repeated) field value.
#[derive(Debug, Clone)]
pub enum ElementCodec {
    Bool,
    Int32,
    Int64,
    /// Stored as `Int8`, narrowed with a range check on decode.
    Uint32,
    /// Stored as `Int8` by two's-complement reinterpretation.
    Uint64,
    Float,
    Double,
    String,
    Bytes,
    /// A registered nested message type.
    Message {
        descriptor: MessageDescriptor,
        codec: Arc<dyn MessageCodec>,
    },
}

impl ElementCodec {
    /// Native scalar type values are stored as.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ElementCodec::Bool => ScalarType::Bool,
            ElementCodec::Int32 => ScalarType::Int4,
            ElementCodec::Int64 | ElementCodec::Uint32 | ElementCodec::Uint64 => ScalarType::Int8,
            ElementCodec::Float => ScalarType::Float4,
            ElementCodec::Double => ScalarType::Float8,
            ElementCodec::String => ScalarType::Text,
            ElementCodec::Bytes => ScalarType::Bytea,
            ElementCodec::Message { codec, .. } => codec.scalar_type(),
        }
    }

    /// Converts a field value into a native scalar.
    pub fn encode(&self, value: &FieldValue) -> Result<Scalar> {
        let scalar = match (self, value) {
            (ElementCodec::Bool, FieldValue::Bool(v)) => Scalar::Bool(*v),
            (ElementCodec::Int32, FieldValue::I32(v)) => Scalar::Int4(*v),
            (ElementCodec::Int64, FieldValue::I64(v)) => Scalar::Int8(*v),
            (ElementCodec::Uint32, FieldValue::U32(v)) => Scalar::Int8(i64::from(*v)),
            (ElementCodec::Uint64, FieldValue::U64(v)) => Scalar::Int8(*v as i64),
            (ElementCodec::Float, FieldValue::F32(v)) => Scalar::Float4(*v),
            (ElementCodec::Double, FieldValue::F64(v)) => Scalar::Float8(*v),
            (ElementCodec::String, FieldValue::String(v)) => Scalar::Text(v.clone()),
            (ElementCodec::Bytes, FieldValue::Bytes(v)) => Scalar::Bytea(v.to_vec()),
            (ElementCodec::Message { codec, .. }, FieldValue::Message(m)) => {
                return codec.encode(m);
            }
            (codec, value) => {
                return Err(Error::conversion(format!(
                    "cannot encode {value:?} with {} codec",
                    codec.name()
                )));
            }
        };
        Ok(scalar)
    }

    /// Converts a native scalar back into a field value.
    pub fn decode(&self, scalar: Scalar) -> Result<FieldValue> {
        let value = match (self, scalar) {
            (ElementCodec::Bool, Scalar::Bool(v)) => FieldValue::Bool(v),
            (ElementCodec::Int32, Scalar::Int4(v)) => FieldValue::I32(v),
            (ElementCodec::Int64, Scalar::Int8(v)) => FieldValue::I64(v),
            (ElementCodec::Uint32, Scalar::Int8(v)) => {
                FieldValue::U32(u32::try_from(v).map_err(|_| {
                    Error::conversion(format!("{v} does not fit an unsigned 32-bit field"))
                })?)
            }
            (ElementCodec::Uint64, Scalar::Int8(v)) => FieldValue::U64(v as u64),
            (ElementCodec::Float, Scalar::Float4(v)) => FieldValue::F32(v),
            (ElementCodec::Double, Scalar::Float8(v)) => FieldValue::F64(v),
            (ElementCodec::String, Scalar::Text(v)) => FieldValue::String(v),
            (ElementCodec::Bytes, Scalar::Bytea(v)) => FieldValue::Bytes(Bytes::from(v)),
            (ElementCodec::Message { descriptor, codec }, scalar) => {
                FieldValue::Message(codec.decode(scalar, descriptor)?)
            }
            (codec, scalar) => {
                return Err(Error::conversion(format!(
                    "cannot decode {scalar:?} with {} codec",
                    codec.name()
                )));
            }
        };
        Ok(value)
    }

    fn name(&self) -> &str {
        match self {
            ElementCodec::Bool => "bool",
            ElementCodec::Int32 => "int32",
            ElementCodec::Int64 => "int64",
            ElementCodec::Uint32 => "uint32",
            ElementCodec::Uint64 => "uint64",
            ElementCodec::Float => "float",
            ElementCodec::Double => "double",
            ElementCodec::String => "string",
            ElementCodec::Bytes => "bytes",
            ElementCodec::Message { descriptor, .. } => descriptor.full_name(),
        }
    }
}

/// Conversion strategy for a field, singular or repeated.
#[derive(Debug, Clone)]
pub struct FieldCodec {
    element: ElementCodec,
    repeated: bool,
}

impl FieldCodec {
    /// Strategy for each element of the field.
    pub fn element(&self) -> &ElementCodec {
        &self.element
    }

    /// Whether the field is a list.
    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    /// Declared native type of the column holding this field.
    pub fn native_type(&self) -> NativeType {
        let t = self.element.scalar_type();
        if self.repeated {
            NativeType::Array(t)
        } else {
            NativeType::Scalar(t)
        }
    }

    /// Converts a whole field value (a list for repeated fields).
    pub fn encode(&self, value: &FieldValue) -> Result<NativeValue> {
        if !self.repeated {
            return Ok(NativeValue::Scalar(self.element.encode(value)?));
        }

        let list = value
            .as_list()
            .ok_or_else(|| Error::conversion(format!("expected a list, got {value:?}")))?;
        let elems = list
            .iter()
            .map(|v| self.element.encode(v))
            .collect::<Result<Vec<_>>>()?;
        Ok(NativeValue::Array(elems))
    }

    /// Converts a native value into a field value.
    ///
    /// Returns `None` for null, meaning the field is to be left unset.
    pub fn decode(&self, native: &NativeValue) -> Result<Option<FieldValue>> {
        match (native, self.repeated) {
            (NativeValue::Null, _) => Ok(None),
            (NativeValue::Scalar(s), false) => Ok(Some(self.element.decode(s.clone())?)),
            (NativeValue::Array(elems), true) => {
                let list = elems
                    .iter()
                    .map(|s| self.element.decode(s.clone()))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(FieldValue::List(list)))
            }
            (native, _) => Err(Error::conversion(format!(
                "cannot decode {native:?} into {}",
                self.native_type_name()
            ))),
        }
    }

    fn native_type_name(&self) -> String {
        if self.repeated {
            format!("repeated {}", self.element.name())
        } else {
            self.element.name().to_string()
        }
    }
}

/// Registry of conversion strategies, keyed by nested message full name.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    messages: HashMap<String, Arc<dyn MessageCodec>>,
}

impl CodecRegistry {
    /// Creates a registry without any message codecs.
    ///
    /// Scalar kinds are always supported; only nested messages need
    /// registration.
    pub fn new() -> Self {
        Self {
            messages: HashMap::new(),
        }
    }

    /// Registers a codec for the message type named `full_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateMessageCodec`] if the name is already taken;
    /// registrations are never replaced.
    pub fn register(
        &mut self,
        full_name: impl Into<String>,
        codec: impl MessageCodec + 'static,
    ) -> Result<()> {
        let full_name = full_name.into();
        if self.messages.contains_key(&full_name) {
            return Err(Error::DuplicateMessageCodec(full_name));
        }
        self.messages.insert(full_name, Arc::new(codec));
        Ok(())
    }

    /// Whether a codec is registered for the message type.
    pub fn contains(&self, full_name: &str) -> bool {
        self.messages.contains_key(full_name)
    }

    /// Resolves the conversion strategy for `field`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFieldType`] for map fields, enums and
    /// nested messages without a registered codec.
    pub fn codec_for(&self, field: &FieldDescriptor) -> Result<FieldCodec> {
        if field.is_map() {
            return Err(unsupported(field));
        }

        let element = match field.kind() {
            Kind::Bool => ElementCodec::Bool,
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => ElementCodec::Int32,
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => ElementCodec::Int64,
            Kind::Uint32 | Kind::Fixed32 => ElementCodec::Uint32,
            Kind::Uint64 | Kind::Fixed64 => ElementCodec::Uint64,
            Kind::Float => ElementCodec::Float,
            Kind::Double => ElementCodec::Double,
            Kind::String => ElementCodec::String,
            Kind::Bytes => ElementCodec::Bytes,
            Kind::Message(descriptor) => match self.messages.get(descriptor.full_name()) {
                Some(codec) => ElementCodec::Message {
                    descriptor,
                    codec: Arc::clone(codec),
                },
                None => return Err(unsupported(field)),
            },
            Kind::Enum(_) => return Err(unsupported(field)),
        };

        Ok(FieldCodec {
            element,
            repeated: field.is_list(),
        })
    }

    /// Returns the process-wide registry.
    ///
    /// If none was installed, the default registry is published on first
    /// call and later [`install`](Self::install) calls fail.
    pub fn global() -> Arc<CodecRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(CodecRegistry::default())))
    }

    /// Publishes this registry as the process-wide registry.
    ///
    /// Must run at startup, before any table uses the global registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryInstalled`] if a global registry is already
    /// in place.
    pub fn install(self) -> Result<()> {
        GLOBAL
            .set(Arc::new(self))
            .map_err(|_| Error::RegistryInstalled)
    }
}

impl Default for CodecRegistry {
    /// Registry with the timestamp codec registered.
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .messages
            .insert(TIMESTAMP.to_string(), Arc::new(TimestampCodec));
        registry
    }
}

fn unsupported(field: &FieldDescriptor) -> Error {
    let kind = match field.kind() {
        Kind::Message(m) if field.is_map() => format!("map {}", m.full_name()),
        Kind::Message(m) => m.full_name().to_string(),
        Kind::Enum(e) => format!("enum {}", e.full_name()),
        other => format!("{other:?}").to_lowercase(),
    };
    let cardinality = if field.is_list() || field.is_map() {
        "repeated"
    } else {
        "singular"
    };

    Error::UnsupportedFieldType {
        field: field.full_name().to_string(),
        kind,
        cardinality: cardinality.to_string(),
    }
}
