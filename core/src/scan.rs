//! Row materialization.
//!
//! A [`Scanner`] turns the rows of a result set into records. Column names
//! are resolved against the record's message descriptor up front: a column
//! without a matching field fails with [`Error::UnknownColumn`] before any
//! row is read. One [`Value`] per column is then reused for every row; the
//! row source decodes into the values in place and each row is assigned to a
//! fresh message.
//!
//! A decode failure aborts the traversal with [`Error::Scan`]. Collected
//! reads return nothing on failure; rows already pushed to a [`Sink`] stay
//! pushed.

use std::marker::PhantomData;

use prost_reflect::{DynamicMessage, MessageDescriptor};
use tracing::{debug, trace};

use crate::codec::CodecRegistry;
use crate::error::{DriverError, Error, Result};
use crate::native::Transcoder;
use crate::record::Record;
use crate::value::Value;

/// A result set as delivered by a driver.
pub trait Rows {
    /// Column names of the result set, in column order.
    fn columns(&self) -> &[String];

    /// Moves to the next row. Returns `false` once the rows are exhausted.
    fn advance(&mut self) -> std::result::Result<bool, DriverError>;

    /// Decodes column `index` of the current row into `dest`, according to
    /// the native type `dest` was declared with.
    fn decode(
        &mut self,
        index: usize,
        dest: &mut Transcoder,
    ) -> std::result::Result<(), DriverError>;
}

/// Receiver of streamed records.
///
/// Implemented for closures `FnMut(M) -> Result<(), E>`.
pub trait Sink<M> {
    fn accept(&mut self, record: M) -> std::result::Result<(), DriverError>;
}

impl<M, F, E> Sink<M> for F
where
    F: FnMut(M) -> std::result::Result<(), E>,
    E: Into<DriverError>,
{
    fn accept(&mut self, record: M) -> std::result::Result<(), DriverError> {
        self(record).map_err(Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Exhausted,
    Failed,
}

/// Iterator of records over a result set.
pub struct Scanner<R, M> {
    rows: R,
    descriptor: MessageDescriptor,
    values: Vec<Value>,
    state: State,
    _record: PhantomData<fn() -> M>,
}

impl<R: Rows, M: Record> Scanner<R, M> {
    /// Resolves the columns of `rows` against `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] for a column without a matching
    /// field, or [`Error::UnsupportedFieldType`] for a field without codec.
    pub fn new(registry: &CodecRegistry, descriptor: &MessageDescriptor, rows: R) -> Result<Self> {
        let values = rows
            .columns()
            .iter()
            .map(|column| {
                let field = descriptor.get_field_by_name(column).ok_or_else(|| {
                    Error::UnknownColumn {
                        column: column.clone(),
                        message: descriptor.full_name().to_string(),
                    }
                })?;
                Value::new(registry, &field)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            message = descriptor.full_name(),
            columns = ?rows.columns(),
            "resolved result columns"
        );

        Ok(Self {
            rows,
            descriptor: descriptor.clone(),
            values,
            state: State::Ready,
            _record: PhantomData,
        })
    }

    fn next_record(&mut self) -> Result<Option<M>> {
        let has_row = self.rows.advance().map_err(|e| self.scan_error(e))?;
        if !has_row {
            return Ok(None);
        }

        for (i, value) in self.values.iter_mut().enumerate() {
            value.native_mut().set_null();
            self.rows
                .decode(i, value.native_mut())
                .map_err(|source| Error::Scan {
                    message: self.descriptor.full_name().to_string(),
                    source,
                })?;
        }

        let mut message = DynamicMessage::new(self.descriptor.clone());
        for value in &self.values {
            value.set_to(&mut message)?;
        }
        trace!(message = self.descriptor.full_name(), "materialized row");

        M::from_message(message).map(Some)
    }

    fn scan_error(&self, source: DriverError) -> Error {
        Error::Scan {
            message: self.descriptor.full_name().to_string(),
            source,
        }
    }

    /// Collects records until the rows are exhausted or `limit` records were
    /// read; 0 means no limit.
    pub fn scan(self, limit: usize) -> Result<Vec<M>> {
        if limit == 0 {
            self.collect()
        } else {
            self.take(limit).collect()
        }
    }

    /// Returns the first record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] if there are no rows. Further rows are
    /// ignored.
    pub fn scan_one(mut self) -> Result<M> {
        self.next().unwrap_or(Err(Error::NoRows))
    }

    /// Pushes each record to `sink` as soon as it is materialized.
    ///
    /// Returns the number of records pushed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if the sink rejects a record; traversal stops
    /// there.
    pub fn scan_stream<S: Sink<M> + ?Sized>(self, sink: &mut S) -> Result<u64> {
        let mut count = 0;
        for record in self {
            sink.accept(record?).map_err(Error::Sink)?;
            count += 1;
        }
        Ok(count)
    }
}

impl<R: Rows, M: Record> Iterator for Scanner<R, M> {
    type Item = Result<M>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != State::Ready {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.state = State::Exhausted;
                None
            }
            Err(e) => {
                self.state = State::Failed;
                Some(Err(e))
            }
        }
    }
}
