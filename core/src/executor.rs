//! The database executor contract.
//!
//! An [`Executor`] runs SQL text with positional arguments. The free
//! functions [`query`], [`query_row`] and [`query_stream`] combine an
//! executor call with a [`Scanner`], checking the [`Context`] first.

use prost_reflect::MessageDescriptor;
use tracing::trace;

use crate::codec::CodecRegistry;
use crate::context::Context;
use crate::error::{DriverError, Error, Result};
use crate::native::Transcoder;
use crate::record::Record;
use crate::scan::{Rows, Scanner, Sink};

/// Result of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandTag {
    pub rows_affected: u64,
}

impl CommandTag {
    pub fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }
}

/// Runs statements against a database.
///
/// Arguments bind to `$1..$n` in order. Implementations should give up on
/// the call once `ctx` is cancelled or past its deadline.
pub trait Executor {
    /// Result set type returned by [`query`](Self::query).
    type Rows<'a>: Rows
    where
        Self: 'a;

    /// Runs a statement, returning the affected row count.
    fn exec(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[Transcoder],
    ) -> std::result::Result<CommandTag, DriverError>;

    /// Runs a statement, returning its rows.
    fn query<'a>(
        &'a self,
        ctx: &Context,
        sql: &str,
        args: &[Transcoder],
    ) -> std::result::Result<Self::Rows<'a>, DriverError>;
}

/// Runs `sql` through `executor` after checking `ctx`.
pub fn exec<E: Executor + ?Sized>(
    executor: &E,
    ctx: &Context,
    sql: &str,
    args: &[Transcoder],
) -> Result<CommandTag> {
    ctx.check()?;
    trace!(sql, args = args.len(), "exec");
    executor.exec(ctx, sql, args).map_err(Error::Executor)
}

fn scanner<'a, E, M>(
    executor: &'a E,
    ctx: &Context,
    registry: &CodecRegistry,
    descriptor: &MessageDescriptor,
    sql: &str,
    args: &[Transcoder],
) -> Result<Scanner<E::Rows<'a>, M>>
where
    E: Executor + ?Sized,
    M: Record,
{
    ctx.check()?;
    trace!(sql, args = args.len(), "query");
    let rows = executor.query(ctx, sql, args).map_err(Error::Executor)?;
    Scanner::new(registry, descriptor, rows)
}

/// Runs `sql` and collects up to `limit` records (0 means all).
pub fn query<E, M>(
    executor: &E,
    ctx: &Context,
    registry: &CodecRegistry,
    descriptor: &MessageDescriptor,
    sql: &str,
    args: &[Transcoder],
    limit: usize,
) -> Result<Vec<M>>
where
    E: Executor + ?Sized,
    M: Record,
{
    scanner(executor, ctx, registry, descriptor, sql, args)?.scan(limit)
}

/// Runs `sql` and returns the first record.
///
/// # Errors
///
/// Returns [`Error::NoRows`] when the statement returns no rows.
pub fn query_row<E, M>(
    executor: &E,
    ctx: &Context,
    registry: &CodecRegistry,
    descriptor: &MessageDescriptor,
    sql: &str,
    args: &[Transcoder],
) -> Result<M>
where
    E: Executor + ?Sized,
    M: Record,
{
    scanner(executor, ctx, registry, descriptor, sql, args)?.scan_one()
}

/// Runs `sql` and pushes every record to `sink`, returning the count.
pub fn query_stream<E, M, S>(
    executor: &E,
    ctx: &Context,
    registry: &CodecRegistry,
    descriptor: &MessageDescriptor,
    sql: &str,
    args: &[Transcoder],
    sink: &mut S,
) -> Result<u64>
where
    E: Executor + ?Sized,
    M: Record,
    S: Sink<M> + ?Sized,
{
    scanner(executor, ctx, registry, descriptor, sql, args)?.scan_stream(sink)
}

#[cfg(test)]
mod tests {
    use prost_reflect::DynamicMessage;

    use super::*;
    use crate::native::{NativeValue, Scalar};
    use crate::testing::{self, MemoryRows, RecordingExecutor};

    fn rows() -> MemoryRows {
        let mut rows = MemoryRows::new(["id"]);
        rows.push([NativeValue::Scalar(Scalar::Int4(7))]);
        rows
    }

    #[test]
    fn test_query_row() {
        let executor = RecordingExecutor::new().with_rows(rows());
        let record: DynamicMessage = query_row(
            &executor,
            &Context::background(),
            &CodecRegistry::default(),
            &testing::message(testing::SIMPLE),
            "SELECT 1;",
            &[Transcoder::from(7)],
        )
        .unwrap();
        assert_eq!(record, testing::simple(7, "", ""));

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].sql, "SELECT 1;");
        assert_eq!(calls[0].args, [NativeValue::Scalar(Scalar::Int4(7))]);
    }

    #[test]
    fn test_cancelled_context_skips_executor() {
        let executor = RecordingExecutor::new();
        let ctx = Context::background();
        ctx.cancel();

        let err = exec(&executor, &ctx, "DELETE FROM t;", &[]).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn test_executor_error_is_wrapped() {
        let executor = RecordingExecutor::new().failing("connection reset");
        let err = query::<_, DynamicMessage>(
            &executor,
            &Context::background(),
            &CodecRegistry::default(),
            &testing::message(testing::SIMPLE),
            "SELECT * FROM t;",
            &[],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Executor(_)));
        assert!(err.to_string().contains("connection reset"), "{err}");
    }
}
