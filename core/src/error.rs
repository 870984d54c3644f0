//! Error types for the message/row bridge.
//!
//! Provides a single error type covering codec lookup, argument binding,
//! row materialization, executor failures and configuration loading.
//! Facade operations wrap their errors in [`Error::Operation`] so the
//! failing call is visible in the message; [`Error::root`] strips that
//! context again when callers need to match on the cause.

use thiserror::Error;

/// Boxed error produced by a driver (executor, row source or sink).
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while converting, building or executing statements.
#[derive(Debug, Error)]
pub enum Error {
    /// A field's kind, cardinality or nested message type has no codec.
    #[error("unsupported field type \"{cardinality} {kind}\" for field {field}")]
    UnsupportedFieldType {
        /// Full name of the offending field.
        field: String,
        /// Kind of the field, e.g. `int32` or the nested message name.
        kind: String,
        /// Cardinality of the field, e.g. `repeated`.
        cardinality: String,
    },

    /// A result-set column has no matching field in the target message.
    #[error("unknown column {column:?} for message {message}")]
    UnknownColumn {
        /// Column name as reported by the row source.
        column: String,
        /// Full name of the target message type.
        message: String,
    },

    /// The row source failed to decode a column into its native value.
    #[error("scan into {message}: {source}")]
    Scan {
        /// Full name of the target message type.
        message: String,
        /// Underlying driver error.
        #[source]
        source: DriverError,
    },

    /// A single-row read found no rows.
    #[error("no rows in result set")]
    NoRows,

    /// Arguments for a write operation could not be built.
    #[error("building arguments: {0}")]
    ArgumentBuild(String),

    /// A value did not agree with the native or field type it was assigned to.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A message codec was registered twice under the same name.
    #[error("message codec for {0:?} is already registered")]
    DuplicateMessageCodec(String),

    /// The process-wide codec registry was already published.
    #[error("global codec registry is already installed")]
    RegistryInstalled,

    /// The executor failed to run a statement.
    #[error("executor: {0}")]
    Executor(#[source] DriverError),

    /// A streaming sink rejected a row.
    #[error("sink: {0}")]
    Sink(#[source] DriverError),

    /// The call context was cancelled.
    #[error("context cancelled")]
    Cancelled,

    /// The call context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A batch write failed at record `index`; earlier records were applied.
    #[error("record {index}: {source}")]
    Batch {
        /// Position of the failing record in the batch.
        index: usize,
        /// Error of the failing record.
        #[source]
        source: Box<Error>,
    },

    /// Error annotated with the name of the operation that produced it.
    #[error("{operation}: {source}")]
    Operation {
        /// Operation name, e.g. `Table::create`.
        operation: &'static str,
        /// Wrapped error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps the error with the name of the failing operation.
    pub fn context(self, operation: &'static str) -> Self {
        Error::Operation {
            operation,
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping operation and batch context.
    ///
    /// An executor error whose source is itself an [`Error`], such as a
    /// driver reporting a cancelled context, resolves to that error.
    ///
    /// # Examples
    ///
    /// ```
    /// use protorow_core::Error;
    ///
    /// let err = Error::NoRows.context("Table::read").context("handler");
    /// assert!(matches!(err.root(), Error::NoRows));
    /// ```
    pub fn root(&self) -> &Error {
        let mut err = self;
        loop {
            err = match err {
                Error::Operation { source, .. } | Error::Batch { source, .. } => &**source,
                Error::Executor(source) => match source.downcast_ref::<Error>() {
                    Some(inner) => inner,
                    None => return err,
                },
                _ => return err,
            };
        }
    }

    /// Reports whether the root cause is [`Error::NoRows`].
    pub fn is_no_rows(&self) -> bool {
        matches!(self.root(), Error::NoRows)
    }

    pub(crate) fn conversion(msg: impl Into<String>) -> Self {
        Error::Conversion(msg.into())
    }
}

/// Convenience alias for results with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
