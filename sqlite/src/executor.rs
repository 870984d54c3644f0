//! [`Executor`] implementation for a SQLite connection.

use std::collections::VecDeque;
use std::time::Duration;

use protorow_core::{CommandTag, Context, DriverError, Executor, Rows, Transcoder};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use tracing::{trace, warn};

use crate::convert::{self, SqlArg};
use crate::error::{Result, SqliteError};

/// Runs statements on a borrowed SQLite connection.
///
/// Statements are prepared through the connection's statement cache, so a
/// table's repeated statement shapes are only compiled once. `$n`
/// placeholders bind in order of appearance.
///
/// A context deadline becomes the connection's busy timeout for the call,
/// so waiting on a locked database gives up in time; the previous timeout
/// is restored when the call returns. Result rows are read
/// in full inside [`query`](Executor::query), checking the context between
/// rows.
///
/// # Examples
///
/// ```
/// use protorow_core::{Context, Executor};
/// use protorow_sqlite::SqliteExecutor;
/// use rusqlite::Connection;
///
/// let conn = Connection::open_in_memory().unwrap();
/// let db = SqliteExecutor::new(&conn);
/// let ctx = Context::background();
///
/// db.exec(&ctx, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[]).unwrap();
/// let tag = db.exec(&ctx, "INSERT INTO t (name) VALUES ($1)", &["a".into()]).unwrap();
/// assert_eq!(tag.rows_affected, 1);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SqliteExecutor<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteExecutor<'c> {
    /// Wraps a connection. Transactions deref to a connection and can be
    /// wrapped the same way.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// The wrapped connection.
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    fn prepare(&self, ctx: &Context) -> Result<Option<BusyTimeout<'c>>> {
        ctx.check()?;
        match ctx.remaining() {
            Some(remaining) => BusyTimeout::set(self.conn, remaining).map(Some),
            None => Ok(None),
        }
    }

    fn exec_inner(&self, ctx: &Context, sql: &str, args: &[Transcoder]) -> Result<CommandTag> {
        let _timeout = self.prepare(ctx)?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        let n = stmt.execute(params_from_iter(args.iter().map(SqlArg)))?;
        trace!(sql, rows_affected = n, "sqlite exec");
        Ok(CommandTag::new(n as u64))
    }

    fn query_inner(&self, ctx: &Context, sql: &str, args: &[Transcoder]) -> Result<SqliteRows> {
        let _timeout = self.prepare(ctx)?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params_from_iter(args.iter().map(SqlArg)))?;
        let mut buffered = VecDeque::new();
        while let Some(row) = rows.next()? {
            ctx.check()?;
            let values = (0..columns.len())
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            buffered.push_back(values);
        }
        trace!(sql, rows = buffered.len(), "sqlite query");

        Ok(SqliteRows {
            columns,
            rows: buffered,
            current: None,
        })
    }
}

/// Busy timeout of a connection, overridden for the lifetime of the guard.
struct BusyTimeout<'c> {
    conn: &'c Connection,
    previous: Duration,
}

impl<'c> BusyTimeout<'c> {
    fn set(conn: &'c Connection, timeout: Duration) -> Result<Self> {
        let previous: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
        conn.busy_timeout(timeout)?;
        Ok(Self {
            conn,
            previous: Duration::from_millis(previous.max(0) as u64),
        })
    }
}

impl Drop for BusyTimeout<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.busy_timeout(self.previous) {
            warn!(error = %e, "failed to restore busy timeout");
        }
    }
}

/// Boxes an error for the executor boundary. Core errors, such as a
/// cancelled context, cross unwrapped so callers can match on them.
fn driver_error(err: SqliteError) -> DriverError {
    match err {
        SqliteError::CoreError(core) => Box::new(core),
        other => Box::new(other),
    }
}

impl Executor for SqliteExecutor<'_> {
    type Rows<'a>
        = SqliteRows
    where
        Self: 'a;

    fn exec(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[Transcoder],
    ) -> std::result::Result<CommandTag, DriverError> {
        self.exec_inner(ctx, sql, args).map_err(driver_error)
    }

    fn query<'a>(
        &'a self,
        ctx: &Context,
        sql: &str,
        args: &[Transcoder],
    ) -> std::result::Result<SqliteRows, DriverError> {
        self.query_inner(ctx, sql, args).map_err(driver_error)
    }
}

/// Result set read from SQLite.
#[derive(Debug, Clone)]
pub struct SqliteRows {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
}

impl SqliteRows {
    /// Rows not yet advanced to.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Rows for SqliteRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn advance(&mut self) -> std::result::Result<bool, DriverError> {
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn decode(
        &mut self,
        index: usize,
        dest: &mut Transcoder,
    ) -> std::result::Result<(), DriverError> {
        let value = self
            .current
            .as_ref()
            .and_then(|row| row.get(index))
            .ok_or_else(|| {
                SqliteError::ConversionError(format!("no column {index} in current row"))
            })?;
        convert::decode_into(value.into(), dest).map_err(|e| {
            let column = self.columns.get(index).map_or("?", String::as_str);
            SqliteError::ConversionError(format!("column {column:?}: {e}"))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use protorow_core::{NativeType, NativeValue, Scalar, ScalarType};

    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        conn
    }

    #[test]
    fn test_exec_and_query() {
        let conn = setup();
        let db = SqliteExecutor::new(&conn);
        let ctx = Context::background();

        let tag = db
            .exec(&ctx, "INSERT INTO t (id, name) VALUES ($1, $2)", &[1.into(), "a".into()])
            .unwrap();
        assert_eq!(tag.rows_affected, 1);

        let mut rows = db
            .query(&ctx, "SELECT name, id FROM t WHERE id = $1", &[1.into()])
            .unwrap();
        assert_eq!(rows.columns(), ["name", "id"]);
        assert!(rows.advance().unwrap());

        let mut name = Transcoder::null(NativeType::Scalar(ScalarType::Text));
        rows.decode(0, &mut name).unwrap();
        assert_eq!(name.get(), &NativeValue::Scalar(Scalar::Text("a".into())));
        assert!(!rows.advance().unwrap());
    }

    #[test]
    fn test_decode_error_names_column() {
        let conn = setup();
        conn.execute("INSERT INTO t (id, name) VALUES (1, 'a')", []).unwrap();
        let db = SqliteExecutor::new(&conn);

        let mut rows = db
            .query(&Context::background(), "SELECT name FROM t", &[])
            .unwrap();
        rows.advance().unwrap();
        let mut dest = Transcoder::null(NativeType::Scalar(ScalarType::Int8));
        let err = rows.decode(0, &mut dest).unwrap_err();
        assert!(err.to_string().contains("\"name\""), "{err}");
    }

    #[test]
    fn test_cancelled_context() {
        let conn = setup();
        let db = SqliteExecutor::new(&conn);
        let ctx = Context::background();
        ctx.cancel();

        let err = db.exec(&ctx, "DELETE FROM t", &[]).unwrap_err();
        assert_eq!(err.to_string(), "context cancelled");
        assert!(matches!(
            err.downcast_ref::<protorow_core::Error>(),
            Some(protorow_core::Error::Cancelled)
        ));
    }

    fn busy_timeout(conn: &Connection) -> i64 {
        conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_deadline_busy_timeout_is_restored() {
        let conn = setup();
        conn.busy_timeout(Duration::from_millis(2_500)).unwrap();
        let db = SqliteExecutor::new(&conn);

        let ctx = Context::with_timeout(Duration::from_secs(60));
        db.query(&ctx, "SELECT * FROM t", &[]).unwrap();
        db.exec(&ctx, "DELETE FROM t", &[]).unwrap();
        assert_eq!(busy_timeout(&conn), 2_500);

        let short = Context::with_timeout(Duration::from_millis(5));
        let _ = db.query(&short, "SELECT * FROM t", &[]);
        db.query(&Context::background(), "SELECT * FROM t", &[]).unwrap();
        assert_eq!(busy_timeout(&conn), 2_500);
    }
}
