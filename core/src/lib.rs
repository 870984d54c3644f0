//! Protobuf message to SQL row bridge.
//!
//! This crate maps reflectively described protobuf messages onto relational
//! rows, without per-table code:
//!
//! - [`CodecRegistry`] resolves each field kind and cardinality into a
//!   conversion to a native column type ([`NativeType`]).
//! - [`Value`] binds one field to one native value, in both directions;
//!   [`parse_fields`] and [`parse_args`] turn a message into columns and
//!   arguments.
//! - [`query::Builder`] writes INSERT, SELECT, UPDATE and DELETE statements
//!   with quoted identifiers and positional arguments, reused through a
//!   [`query::BuilderPool`].
//! - [`Scanner`] materializes result rows into messages.
//! - [`Table`] combines the above into generic CRUD operations run through
//!   any [`Executor`].
//!
//! Database drivers implement [`Executor`] and [`Rows`]; see the
//! `protorow-sqlite` crate.
//!
//! # Example
//!
//! ```
//! use protorow_core::query::{Builder, WhereId};
//!
//! let mut b = Builder::new();
//! b.update_columns("public", "simple", &["title", "data"], Some(&WhereId::new()), &["id"]);
//! assert_eq!(
//!     b.as_str(),
//!     r#"UPDATE "public"."simple" SET "title" = $1, "data" = $2 WHERE "id" = $3 RETURNING "id";"#
//! );
//! ```

mod codec;
mod config;
mod context;
mod error;
mod executor;
mod native;
pub mod query;
mod record;
mod scan;
mod table;
mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use codec::{CodecRegistry, ElementCodec, FieldCodec, MessageCodec, TIMESTAMP, TimestampCodec};
pub use config::TableConfig;
pub use context::Context;
pub use error::{DriverError, Error, Result};
pub use executor::{CommandTag, Executor, exec, query, query_row, query_stream};
pub use native::{NativeType, NativeValue, Scalar, ScalarType, Transcoder};
pub use record::Record;
pub use scan::{Rows, Scanner, Sink};
pub use table::Table;
pub use value::{ColumnDefaults, OnEmpty, Value, parse_args, parse_fields};

pub use prost_reflect;
