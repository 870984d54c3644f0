//! Database-native column values.
//!
//! A [`Transcoder`] is the holder a driver reads bound arguments from and
//! decodes result columns into. It pairs a declared [`NativeType`] with the
//! current [`NativeValue`], where `Null` is a state distinct from any zero
//! value. Assignments are type-checked so a transcoder never holds a value
//! of a different type than the one it was declared with.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Scalar column types understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    /// 32-bit signed integer.
    Int4,
    /// 64-bit signed integer.
    Int8,
    Float4,
    Float8,
    Text,
    Bytea,
    /// Timestamp with time zone, normalized to UTC.
    Timestamptz,
}

/// Declared type of a column: a scalar or an array of scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl NativeType {
    /// Element type of an array, or the scalar type itself.
    pub fn element(self) -> ScalarType {
        match self {
            NativeType::Scalar(t) | NativeType::Array(t) => t,
        }
    }

    /// Whether the type is an array type.
    pub fn is_array(self) -> bool {
        matches!(self, NativeType::Array(_))
    }
}

/// A single non-null scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Timestamptz(DateTime<Utc>),
}

impl Scalar {
    /// Returns the type of this scalar.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalar::Bool(_) => ScalarType::Bool,
            Scalar::Int4(_) => ScalarType::Int4,
            Scalar::Int8(_) => ScalarType::Int8,
            Scalar::Float4(_) => ScalarType::Float4,
            Scalar::Float8(_) => ScalarType::Float8,
            Scalar::Text(_) => ScalarType::Text,
            Scalar::Bytea(_) => ScalarType::Bytea,
            Scalar::Timestamptz(_) => ScalarType::Timestamptz,
        }
    }
}

/// A column value: null, a scalar or an array of scalars.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NativeValue {
    #[default]
    Null,
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

impl NativeValue {
    /// Whether the value is in the null state.
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }

    /// Checks whether this value may be held by a column of type `ty`.
    ///
    /// Null is accepted by every type.
    pub fn fits(&self, ty: NativeType) -> bool {
        match (self, ty) {
            (NativeValue::Null, _) => true,
            (NativeValue::Scalar(s), NativeType::Scalar(t)) => s.scalar_type() == t,
            (NativeValue::Array(elems), NativeType::Array(t)) => {
                elems.iter().all(|s| s.scalar_type() == t)
            }
            _ => false,
        }
    }
}

/// Settable holder for one column value of a declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcoder {
    ty: NativeType,
    value: NativeValue,
}

impl Transcoder {
    /// Creates a transcoder of type `ty` in the null state.
    pub fn null(ty: NativeType) -> Self {
        Self {
            ty,
            value: NativeValue::Null,
        }
    }

    /// Creates a transcoder holding `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] if `value` does not fit `ty`.
    pub fn with_value(ty: NativeType, value: NativeValue) -> Result<Self> {
        let mut t = Self::null(ty);
        t.set(value)?;
        Ok(t)
    }

    /// Declared type of the column.
    pub fn native_type(&self) -> NativeType {
        self.ty
    }

    /// Current value.
    pub fn get(&self) -> &NativeValue {
        &self.value
    }

    /// Whether the current value is null.
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Replaces the current value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] if `value` does not fit the declared type;
    /// the previous value is kept in that case.
    pub fn set(&mut self, value: NativeValue) -> Result<()> {
        if !value.fits(self.ty) {
            return Err(Error::conversion(format!(
                "cannot assign {value:?} to column of type {:?}",
                self.ty
            )));
        }
        self.value = value;
        Ok(())
    }

    /// Resets the value to null.
    pub fn set_null(&mut self) {
        self.value = NativeValue::Null;
    }

    /// Consumes the transcoder, returning its value.
    pub fn into_value(self) -> NativeValue {
        self.value
    }
}

macro_rules! scalar_transcoder {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Transcoder {
                fn from(v: $t) -> Self {
                    Transcoder {
                        ty: NativeType::Scalar(ScalarType::$variant),
                        value: NativeValue::Scalar(Scalar::$variant(v.into())),
                    }
                }
            }
        )*
    };
}

scalar_transcoder! {
    bool => Bool,
    i32 => Int4,
    i64 => Int8,
    u32 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    &str => Text,
    Vec<u8> => Bytea,
    DateTime<Utc> => Timestamptz,
}
