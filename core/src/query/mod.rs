//! SQL statement builder.
//!
//! A [`Builder`] assembles one statement at a time into a reusable text
//! buffer. Identifiers are double-quoted, arguments are positional
//! (`$1, $2, ...`) and numbered by a single counter shared by every clause
//! written into the statement, so placeholders never collide.
//!
//! Builders are reused through a [`BuilderPool`].
//!
//! # Example
//!
//! ```
//! use protorow_core::query::{Builder, WhereId};
//!
//! let mut b = Builder::new();
//! b.delete("public", "simple", Some(&WhereId::new()), &["id", "title", "data"]);
//! assert_eq!(
//!     b.as_str(),
//!     r#"DELETE FROM "public"."simple" WHERE "id" = $1 RETURNING "id", "title", "data";"#
//! );
//! ```

mod clause;
mod pool;

use std::fmt::Write as _;

use prost_reflect::DynamicMessage;

use crate::value::parse_fields;

pub use clause::{Direction, Order, WhereClause, WhereId, WhereIdIn};
pub use pool::{BuilderPool, HighWaterMark, PooledBuilder, Shape};

/// Text buffer plus positional argument counter for one statement.
#[derive(Debug, Default)]
pub struct Builder {
    buf: String,
    arg_pos: usize,
}

impl Builder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty builder with at least `capacity` bytes of buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            arg_pos: 0,
        }
    }

    /// Statement text written so far.
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Length of the statement text in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Capacity of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Number of positional arguments written so far.
    pub fn arg_count(&self) -> usize {
        self.arg_pos
    }

    /// Empties the buffer and restarts argument numbering, keeping the
    /// allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.arg_pos = 0;
    }

    pub(crate) fn reserve(&mut self, capacity: usize) {
        self.buf.reserve(capacity.saturating_sub(self.buf.len()));
    }

    /// Appends raw SQL text.
    pub fn write_str(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    /// Appends `name` as a double-quoted identifier.
    ///
    /// Embedded double quotes are doubled.
    pub fn write_quoted(&mut self, name: &str) {
        self.buf.push('"');
        for part in name.split_inclusive('"') {
            self.buf.push_str(part);
            if part.ends_with('"') {
                self.buf.push('"');
            }
        }
        self.buf.push('"');
    }

    /// Appends `"schema"."table"`, or just `"table"` when `schema` is empty.
    pub fn write_identifier(&mut self, schema: &str, table: &str) {
        if !schema.is_empty() {
            self.write_quoted(schema);
            self.buf.push('.');
        }
        self.write_quoted(table);
    }

    /// Appends the next positional placeholder, e.g. `$3`.
    pub fn write_pos_arg(&mut self) {
        self.arg_pos += 1;
        // Writing to a String cannot fail.
        let _ = write!(self.buf, "${}", self.arg_pos);
    }

    /// Appends `n` comma separated placeholders continuing the count.
    pub fn write_pos_args(&mut self, n: usize) {
        for i in 0..n {
            if i > 0 {
                self.buf.push_str(", ");
            }
            self.write_pos_arg();
        }
    }

    /// Appends a comma separated list of quoted column names.
    pub fn write_column_spec<C: AsRef<str>>(&mut self, columns: &[C]) {
        for (i, col) in columns.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            self.write_quoted(col.as_ref());
        }
    }

    /// Appends ` RETURNING <columns>`; writes nothing for an empty list.
    pub fn write_return_clause<C: AsRef<str>>(&mut self, columns: &[C]) {
        if columns.is_empty() {
            return;
        }
        self.buf.push_str(" RETURNING ");
        self.write_column_spec(columns);
    }

    /// Appends ` LIMIT n` unless `limit` is 0.
    pub fn write_limit(&mut self, limit: u64) {
        if limit > 0 {
            let _ = write!(self.buf, " LIMIT {limit}");
        }
    }

    /// Writes an INSERT for the fields of `message`.
    ///
    /// Columns are the message fields in declaration order, filtered by
    /// `skip_empty` and `exclude` (see [`parse_fields`]). Returns the column
    /// names, in placeholder order.
    pub fn insert<R: AsRef<str>>(
        &mut self,
        schema: &str,
        table: &str,
        message: &DynamicMessage,
        skip_empty: bool,
        exclude: &[&str],
        returning: &[R],
    ) -> Vec<String> {
        let columns = parse_fields(message, skip_empty, exclude);
        self.insert_columns(schema, table, &columns, returning);
        columns
    }

    /// Writes `INSERT INTO <ident> (<columns>) VALUES (<$1..$n>)[ RETURNING ...];`.
    ///
    /// With no columns, writes `DEFAULT VALUES` instead of the column and
    /// value lists.
    pub fn insert_columns<C: AsRef<str>, R: AsRef<str>>(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[C],
        returning: &[R],
    ) {
        self.buf.push_str("INSERT INTO ");
        self.write_identifier(schema, table);
        if columns.is_empty() {
            self.buf.push_str(" DEFAULT VALUES");
        } else {
            self.buf.push_str(" (");
            self.write_column_spec(columns);
            self.buf.push_str(") VALUES (");
            self.write_pos_args(columns.len());
            self.buf.push(')');
        }
        self.write_return_clause(returning);
        self.buf.push(';');
    }

    /// Writes `SELECT <columns|*> FROM <ident>[ WHERE ...][ ORDER BY ...][ LIMIT n];`.
    ///
    /// An empty column list selects `*`. Without a where clause every row
    /// matches.
    pub fn select<C: AsRef<str>>(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[C],
        where_clause: Option<&dyn WhereClause>,
        order: Option<&Order<C>>,
        limit: u64,
    ) {
        self.buf.push_str("SELECT ");
        if columns.is_empty() {
            self.buf.push('*');
        } else {
            self.write_column_spec(columns);
        }
        self.buf.push_str(" FROM ");
        self.write_identifier(schema, table);
        if let Some(w) = where_clause {
            w.write_where(self);
        }
        if let Some(order) = order {
            order.write_order(self);
        }
        self.write_limit(limit);
        self.buf.push(';');
    }

    /// Writes an UPDATE assigning the fields of `message`.
    ///
    /// Columns are chosen as for [`insert`](Self::insert) and returned in
    /// placeholder order.
    #[allow(clippy::too_many_arguments)]
    pub fn update<R: AsRef<str>>(
        &mut self,
        schema: &str,
        table: &str,
        message: &DynamicMessage,
        skip_empty: bool,
        exclude: &[&str],
        where_clause: Option<&dyn WhereClause>,
        returning: &[R],
    ) -> Vec<String> {
        let columns = parse_fields(message, skip_empty, exclude);
        self.update_columns(schema, table, &columns, where_clause, returning);
        columns
    }

    /// Writes `UPDATE <ident> SET "a" = $1, ...[ WHERE ...][ RETURNING ...];`.
    ///
    /// Where-clause placeholders are numbered after the SET list.
    ///
    /// **Without a where clause every row is updated.** With no columns
    /// there is no valid statement and nothing is written.
    pub fn update_columns<C: AsRef<str>, R: AsRef<str>>(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[C],
        where_clause: Option<&dyn WhereClause>,
        returning: &[R],
    ) {
        if columns.is_empty() {
            return;
        }
        self.buf.push_str("UPDATE ");
        self.write_identifier(schema, table);
        self.buf.push_str(" SET ");
        for (i, col) in columns.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            self.write_quoted(col.as_ref());
            self.buf.push_str(" = ");
            self.write_pos_arg();
        }
        if let Some(w) = where_clause {
            w.write_where(self);
        }
        self.write_return_clause(returning);
        self.buf.push(';');
    }

    /// Writes `DELETE FROM <ident>[ WHERE ...][ RETURNING ...];`.
    ///
    /// **Without a where clause every row is deleted.**
    pub fn delete<R: AsRef<str>>(
        &mut self,
        schema: &str,
        table: &str,
        where_clause: Option<&dyn WhereClause>,
        returning: &[R],
    ) {
        self.buf.push_str("DELETE FROM ");
        self.write_identifier(schema, table);
        if let Some(w) = where_clause {
            w.write_where(self);
        }
        self.write_return_clause(returning);
        self.buf.push(';');
    }
}
