//! Generic CRUD facade over one table.
//!
//! A [`Table`] knows where a table lives, which message describes its rows
//! and how absent fields are written. Every operation builds its statement
//! with a pooled [`Builder`](crate::query::Builder), binds the record's
//! fields as arguments and runs the statement through the caller's
//! [`Executor`]. Tables hold no per-call state and can be shared between
//! threads.
//!
//! # Example
//!
//! ```no_run
//! use protorow_core::{Context, Table};
//! # use prost_reflect::MessageDescriptor;
//! # fn run<E: protorow_core::Executor>(
//! #     db: &E,
//! #     descriptor: MessageDescriptor,
//! # ) -> protorow_core::Result<()> {
//! let table: Table<&str> = Table::new(descriptor, "public", "simple");
//! let ctx = Context::background();
//!
//! let rows = table.read_all(db, &ctx, &["id", "title"], None, 10)?;
//! for row in rows {
//!     println!("{row:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tracing::{debug, warn};

use crate::codec::CodecRegistry;
use crate::config::TableConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::{self, CommandTag, Executor};
use crate::native::Transcoder;
use crate::query::{BuilderPool, Order, Shape, WhereId, WhereIdIn};
use crate::record::Record;
use crate::scan::Sink;
use crate::value::{ColumnDefaults, parse_args};

const NO_COLUMNS: &[&str] = &[];

/// CRUD operations on one table.
///
/// `C` names columns (usually an enum implementing `AsRef<str>`), `M` is the
/// record type rows are read into and `I` the type of the id column.
///
/// Single-record writes leave absent fields out of the statement, so the
/// database default applies. [`create_many`](Self::create_many) writes every
/// field and uses the table's [`ColumnDefaults`] to decide between null and
/// the zero value.
pub struct Table<C, M = DynamicMessage, I = i64> {
    descriptor: MessageDescriptor,
    schema: String,
    table: String,
    id_column: String,
    defaults: ColumnDefaults,
    registry: Arc<CodecRegistry>,
    pool: BuilderPool,
    all_columns: Vec<String>,
    _types: PhantomData<fn(C, I) -> M>,
}

impl<C, M, I> std::fmt::Debug for Table<C, M, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("message", &self.descriptor.full_name())
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("id_column", &self.id_column)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl<C, M, I> Table<C, M, I>
where
    C: AsRef<str>,
    M: Record,
    I: Into<Transcoder> + Clone,
{
    /// Creates a table whose rows are described by `descriptor`.
    ///
    /// `schema` may be empty, in which case it is left out of statements.
    /// The table uses the process-wide codec registry, the `id` column and
    /// null for absent fields until configured otherwise.
    pub fn new(
        descriptor: MessageDescriptor,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let all_columns = descriptor.fields().map(|f| f.name().to_string()).collect();
        Self {
            descriptor,
            schema: schema.into(),
            table: table.into(),
            id_column: "id".to_string(),
            defaults: ColumnDefaults::default(),
            registry: CodecRegistry::global(),
            pool: BuilderPool::new(),
            all_columns,
            _types: PhantomData,
        }
    }

    /// Creates a table from configuration.
    pub fn from_config(descriptor: MessageDescriptor, config: &TableConfig) -> Self {
        Self::new(descriptor, config.schema.clone(), config.table.clone())
            .with_id_column(config.id_column.clone())
            .with_column_defaults(config.column_defaults.clone())
    }

    pub fn with_column_defaults(mut self, defaults: ColumnDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_registry(mut self, registry: Arc<CodecRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn column_defaults(&self) -> &ColumnDefaults {
        &self.defaults
    }

    /// Builder pool of this table.
    pub fn pool(&self) -> &BuilderPool {
        &self.pool
    }

    /// Columns to return: the given ones, or every field of the record.
    fn return_columns<'a>(&'a self, columns: &'a [C]) -> Vec<&'a str> {
        if columns.is_empty() {
            self.all_columns.iter().map(String::as_str).collect()
        } else {
            columns.iter().map(AsRef::as_ref).collect()
        }
    }

    fn args(&self, message: &DynamicMessage, columns: &[String]) -> Result<Vec<Transcoder>> {
        parse_args(&self.registry, message, columns, &self.defaults)
    }

    fn log(&self, operation: &'static str, sql: &str, args: &[Transcoder]) {
        debug!(operation, table = %self.table, sql, args = args.len(), "executing statement");
    }

    /// Inserts one record. Absent fields are left out of the statement.
    ///
    /// # Errors
    ///
    /// Fails if a field has no codec, or with the executor's error.
    pub fn create<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        record: &M,
    ) -> Result<CommandTag> {
        operation("Table::create", || {
            let message = record.to_message();
            let mut b = self.pool.get(Shape::Insert);
            let columns = b.insert(&self.schema, &self.table, &message, true, &[], NO_COLUMNS);
            let args = self.args(&message, &columns)?;

            self.log("Table::create", b.as_str(), &args);
            executor::exec(db, ctx, b.as_str(), &args)
        })
    }

    /// Inserts one record and returns the inserted row.
    ///
    /// The returned record has `columns` set; all fields when `columns` is
    /// empty.
    pub fn create_returning<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        record: &M,
        columns: &[C],
    ) -> Result<M> {
        operation("Table::create_returning", || {
            let message = record.to_message();
            let returning = self.return_columns(columns);
            let mut b = self.pool.get(Shape::Insert);
            let columns = b.insert(&self.schema, &self.table, &message, true, &[], &returning);
            let args = self.args(&message, &columns)?;

            self.log("Table::create_returning", b.as_str(), &args);
            executor::query_row(db, ctx, &self.registry, &self.descriptor, b.as_str(), &args)
        })
    }

    /// Inserts several records with one statement shape, one execution per
    /// record.
    ///
    /// Columns are every field of the first record; absent fields are
    /// written according to the table's [`ColumnDefaults`]. Returns one tag
    /// per record.
    ///
    /// There is no transaction: when record `n` fails, records before it
    /// stay inserted and the error is [`Error::Batch`] with index `n`.
    pub fn create_many<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        records: &[M],
    ) -> Result<Vec<CommandTag>> {
        let Some(first) = records.first() else {
            return Ok(Vec::new());
        };

        operation("Table::create_many", || {
            let mut b = self.pool.get(Shape::Insert);
            let first = first.to_message();
            let columns = b.insert(&self.schema, &self.table, &first, false, &[], NO_COLUMNS);
            debug!(
                operation = "Table::create_many",
                table = %self.table,
                sql = b.as_str(),
                records = records.len(),
                "executing statement"
            );

            let mut tags = Vec::with_capacity(records.len());
            for (index, record) in records.iter().enumerate() {
                let result = self
                    .args(&record.to_message(), &columns)
                    .and_then(|args| executor::exec(db, ctx, b.as_str(), &args));

                match result {
                    Ok(tag) => tags.push(tag),
                    Err(e) => {
                        warn!(
                            table = %self.table,
                            index,
                            applied = tags.len(),
                            error = %e,
                            "batch create stopped"
                        );
                        return Err(Error::Batch {
                            index,
                            source: Box::new(e),
                        });
                    }
                }
            }
            Ok(tags)
        })
    }

    /// Reads the row with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] (wrapped) when no row matches; check with
    /// [`Error::is_no_rows`].
    pub fn read<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        id: I,
        columns: &[C],
    ) -> Result<M> {
        operation("Table::read", || {
            let mut b = self.pool.get(Shape::Select);
            b.select(
                &self.schema,
                &self.table,
                columns,
                Some(&WhereId::column(&self.id_column)),
                None,
                1,
            );
            let args = [id.into()];

            self.log("Table::read", b.as_str(), &args);
            executor::query_row(db, ctx, &self.registry, &self.descriptor, b.as_str(), &args)
        })
    }

    /// Reads the rows matching `ids`, in `order` if given.
    ///
    /// An empty id list returns an empty list without querying.
    pub fn read_list<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        ids: &[I],
        columns: &[C],
        order: Option<&Order<C>>,
    ) -> Result<Vec<M>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        operation("Table::read_list", || {
            let mut b = self.pool.get(Shape::Select);
            b.select(
                &self.schema,
                &self.table,
                columns,
                Some(&WhereIdIn::column(&self.id_column, ids.len())),
                order,
                0,
            );
            let args: Vec<Transcoder> = ids.iter().cloned().map(Into::into).collect();

            self.log("Table::read_list", b.as_str(), &args);
            executor::query(db, ctx, &self.registry, &self.descriptor, b.as_str(), &args, 0)
        })
    }

    /// Reads up to `limit` rows (0 means all), in `order` if given.
    pub fn read_all<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        columns: &[C],
        order: Option<&Order<C>>,
        limit: u64,
    ) -> Result<Vec<M>> {
        operation("Table::read_all", || {
            let mut b = self.pool.get(Shape::Select);
            b.select(&self.schema, &self.table, columns, None, order, limit);

            self.log("Table::read_all", b.as_str(), &[]);
            executor::query(db, ctx, &self.registry, &self.descriptor, b.as_str(), &[], 0)
        })
    }

    /// Pushes every row to `sink` as it is read. Returns the row count.
    ///
    /// Rows pushed before a failure stay pushed.
    pub fn read_all_stream<E, S>(
        &self,
        db: &E,
        ctx: &Context,
        columns: &[C],
        order: Option<&Order<C>>,
        sink: &mut S,
    ) -> Result<u64>
    where
        E: Executor + ?Sized,
        S: Sink<M> + ?Sized,
    {
        operation("Table::read_all_stream", || {
            let mut b = self.pool.get(Shape::Select);
            b.select(&self.schema, &self.table, columns, None, order, 0);

            self.log("Table::read_all_stream", b.as_str(), &[]);
            executor::query_stream(db, ctx, &self.registry, &self.descriptor, b.as_str(), &[], sink)
        })
    }

    /// Updates the row with `id` from the fields set in `record`.
    ///
    /// Absent fields are not modified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArgumentBuild`] if `record` has no field set.
    pub fn update<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        id: I,
        record: &M,
    ) -> Result<CommandTag> {
        operation("Table::update", || {
            let message = record.to_message();
            let mut b = self.pool.get(Shape::Update);
            let columns = b.update(
                &self.schema,
                &self.table,
                &message,
                true,
                &[],
                Some(&WhereId::column(&self.id_column)),
                NO_COLUMNS,
            );
            let args = self.update_args(&message, &columns, id)?;

            self.log("Table::update", b.as_str(), &args);
            executor::exec(db, ctx, b.as_str(), &args)
        })
    }

    /// Updates the row with `id` and returns the updated row.
    pub fn update_returning<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        id: I,
        record: &M,
        columns: &[C],
    ) -> Result<M> {
        operation("Table::update_returning", || {
            let message = record.to_message();
            let returning = self.return_columns(columns);
            let mut b = self.pool.get(Shape::Update);
            let columns = b.update(
                &self.schema,
                &self.table,
                &message,
                true,
                &[],
                Some(&WhereId::column(&self.id_column)),
                &returning,
            );
            let args = self.update_args(&message, &columns, id)?;

            self.log("Table::update_returning", b.as_str(), &args);
            executor::query_row(db, ctx, &self.registry, &self.descriptor, b.as_str(), &args)
        })
    }

    fn update_args(
        &self,
        message: &DynamicMessage,
        columns: &[String],
        id: I,
    ) -> Result<Vec<Transcoder>> {
        if columns.is_empty() {
            return Err(Error::ArgumentBuild(format!(
                "no fields set in {} to update",
                message.descriptor().full_name()
            )));
        }
        let mut args = self.args(message, columns)?;
        args.push(id.into());
        Ok(args)
    }

    /// Deletes the row with `id`.
    pub fn delete<E: Executor + ?Sized>(&self, db: &E, ctx: &Context, id: I) -> Result<CommandTag> {
        operation("Table::delete", || {
            let mut b = self.pool.get(Shape::Delete);
            b.delete(
                &self.schema,
                &self.table,
                Some(&WhereId::column(&self.id_column)),
                NO_COLUMNS,
            );
            let args = [id.into()];

            self.log("Table::delete", b.as_str(), &args);
            executor::exec(db, ctx, b.as_str(), &args)
        })
    }

    /// Deletes the row with `id` and returns it.
    pub fn delete_returning<E: Executor + ?Sized>(
        &self,
        db: &E,
        ctx: &Context,
        id: I,
        columns: &[C],
    ) -> Result<M> {
        operation("Table::delete_returning", || {
            let returning = self.return_columns(columns);
            let mut b = self.pool.get(Shape::Delete);
            b.delete(
                &self.schema,
                &self.table,
                Some(&WhereId::column(&self.id_column)),
                &returning,
            );
            let args = [id.into()];

            self.log("Table::delete_returning", b.as_str(), &args);
            executor::query_row(db, ctx, &self.registry, &self.descriptor, b.as_str(), &args)
        })
    }
}

fn operation<T>(name: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    f().map_err(|e| e.context(name))
}
