//! Conversion between user message types and reflective messages.

use std::borrow::Cow;

use prost_reflect::DynamicMessage;

use crate::error::Result;

/// A message type the table facade can write and materialize.
///
/// Implemented for [`DynamicMessage`]. Generated message types implement it
/// by transcoding through `prost_reflect::ReflectMessage`:
///
/// ```ignore
/// impl Record for Simple {
///     fn from_message(message: DynamicMessage) -> Result<Self> {
///         message.transcode_to().map_err(|e| Error::Conversion(e.to_string()))
///     }
///
///     fn to_message(&self) -> Cow<'_, DynamicMessage> {
///         Cow::Owned(self.transcode_to_dynamic())
///     }
/// }
/// ```
pub trait Record: Sized {
    /// Builds the record from a materialized row.
    fn from_message(message: DynamicMessage) -> Result<Self>;

    /// Reflective view of the record, used to bind arguments.
    fn to_message(&self) -> Cow<'_, DynamicMessage>;
}

impl Record for DynamicMessage {
    fn from_message(message: DynamicMessage) -> Result<Self> {
        Ok(message)
    }

    fn to_message(&self) -> Cow<'_, DynamicMessage> {
        Cow::Borrowed(self)
    }
}
