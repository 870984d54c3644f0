//! SQLite executor for protorow tables.
//!
//! This crate runs the statements built by
//! [`protorow_core`](protorow_core) on a [`rusqlite`] connection and decodes
//! SQLite values back into native column values.
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - **`executor`**: [`SqliteExecutor`], the [`Executor`](protorow_core::Executor)
//!   over a borrowed connection, and its result set [`SqliteRows`]
//! - **`convert`**: native values to and from SQLite storage classes
//! - **`error`**: [`SqliteError`]
//!
//! # Quick start
//!
//! ```no_run
//! use protorow_core::{Context, Table};
//! use protorow_sqlite::SqliteExecutor;
//! use rusqlite::Connection;
//! # use protorow_core::prost_reflect::MessageDescriptor;
//! # fn run(descriptor: MessageDescriptor) -> Result<(), Box<dyn std::error::Error>> {
//!
//! let conn = Connection::open("app.db")?;
//! let db = SqliteExecutor::new(&conn);
//! let ctx = Context::background();
//!
//! let table: Table<&str> = Table::new(descriptor, "", "simple");
//! for row in table.read_all(&db, &ctx, &["id", "title"], None, 10)? {
//!     println!("{row:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Schemas
//!
//! SQLite has no schemas in the PostgreSQL sense. A table configured with a
//! schema such as `public` needs a database attached under that name:
//!
//! ```no_run
//! # let conn = rusqlite::Connection::open_in_memory().unwrap();
//! conn.execute_batch("ATTACH DATABASE ':memory:' AS public;").unwrap();
//! ```
//!
//! Statements use `RETURNING`, which needs SQLite 3.35 or later; the bundled
//! library qualifies.

pub mod convert;
mod error;
mod executor;

pub use convert::SqlArg;
pub use error::{Result, SqliteError};
pub use executor::{SqliteExecutor, SqliteRows};
