//! Integration tests for the protorow-sqlite crate.

use std::io::Write;
use std::time::Duration;

use prost_reflect::{DynamicMessage, Value as FieldValue};
use protorow_core::query::Order;
use protorow_core::testing::{self, SimpleColumn};
use protorow_core::{ColumnDefaults, Context, Error, OnEmpty, Table, TableConfig};
use protorow_sqlite::SqliteExecutor;
use rusqlite::Connection;

type SimpleTable = Table<SimpleColumn, DynamicMessage, i32>;

const SIMPLE_DDL: &str = "
    CREATE TABLE public.simple (
        id INTEGER PRIMARY KEY,
        title TEXT,
        data TEXT,
        created TEXT
    );";

const SUPPORTED_DDL: &str = "
    CREATE TABLE public.supported (
        bl INTEGER, i32 INTEGER, i64 INTEGER, f REAL, d REAL,
        s TEXT, bt BLOB, u32 INTEGER, u64 INTEGER, ts TEXT,
        r_bl TEXT, r_i32 TEXT, r_i64 TEXT, r_f TEXT, r_d TEXT,
        r_s TEXT, r_u32 TEXT, r_bt TEXT, r_u64 TEXT, r_ts TEXT
    );";

/// Opens an in-memory database with a `public` schema holding the fixture
/// tables.
fn setup() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("ATTACH DATABASE ':memory:' AS public;").unwrap();
    conn.execute_batch(SIMPLE_DDL).unwrap();
    conn.execute_batch(SUPPORTED_DDL).unwrap();
    conn
}

fn simple_table() -> SimpleTable {
    Table::new(testing::message(testing::SIMPLE), "public", "simple")
}

/// Inserts `simple(id, title, data)` for each entry.
fn seed(db: &SqliteExecutor<'_>, rows: &[(i32, &str, &str)]) {
    let table = simple_table();
    let ctx = Context::background();
    for &(id, title, data) in rows {
        table.create(db, &ctx, &testing::simple(id, title, data)).unwrap();
    }
}

fn count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM public.simple", [], |r| r.get(0))
        .unwrap()
}

// =============================================================================
// Create and Read Tests
// =============================================================================

#[test]
fn test_create_and_read() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = simple_table();

    let tag = table.create(&db, &ctx, &testing::simple(1, "foo", "bar")).unwrap();
    assert_eq!(tag.rows_affected, 1);

    let record = table.read(&db, &ctx, 1, &[]).unwrap();
    assert_eq!(record, testing::simple(1, "foo", "bar"));

    let partial = table
        .read(&db, &ctx, 1, &[SimpleColumn::Id, SimpleColumn::Title])
        .unwrap();
    assert_eq!(partial, testing::simple(1, "foo", ""));
}

#[test]
fn test_create_leaves_absent_fields_to_database() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    simple_table()
        .create(&db, &Context::background(), &testing::simple(1, "foo", ""))
        .unwrap();

    let data_is_null: bool = conn
        .query_row("SELECT data IS NULL FROM public.simple WHERE id = 1", [], |r| r.get(0))
        .unwrap();
    assert!(data_is_null);
}

#[test]
fn test_create_returning() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = simple_table();

    let created = testing::simple_created(5, "foo", testing::timestamp(1_600_000_000, 42));
    let all = table.create_returning(&db, &ctx, &created, &[]).unwrap();
    assert_eq!(all, created);

    let some = table
        .create_returning(&db, &ctx, &testing::simple(6, "bar", "baz"), &[SimpleColumn::Id])
        .unwrap();
    assert_eq!(some, testing::simple(6, "", ""));
}

#[test]
fn test_round_trip_all_supported_kinds() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = supported_table();

    let message = testing::supported_message();
    table.create(&db, &ctx, &message).unwrap();

    let rows = table.read_all(&db, &ctx, &[], None, 0).unwrap();
    assert_eq!(rows, vec![message.clone()]);

    let returned = table.create_returning(&db, &ctx, &message, &[]).unwrap();
    assert_eq!(returned, message);
}

#[test]
fn test_read_missing_row() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);

    let err = simple_table()
        .read(&db, &Context::background(), 404, &[])
        .unwrap_err();
    assert!(err.is_no_rows(), "{err}");
    assert!(err.to_string().starts_with("Table::read: "), "{err}");
}

#[test]
fn test_read_unknown_column() {
    let conn = setup();
    conn.execute_batch("ALTER TABLE public.simple ADD COLUMN extra TEXT;")
        .unwrap();
    let db = SqliteExecutor::new(&conn);
    seed(&db, &[(1, "foo", "bar")]);

    let err = simple_table()
        .read(&db, &Context::background(), 1, &[])
        .unwrap_err();
    match err.root() {
        Error::UnknownColumn { column, message } => {
            assert_eq!(column, "extra");
            assert_eq!(message, &testing::qualified(testing::SIMPLE));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_read_invalid_timestamp() {
    let conn = setup();
    conn.execute(
        "INSERT INTO public.simple (id, created) VALUES (1, 'not a date')",
        [],
    )
    .unwrap();
    let db = SqliteExecutor::new(&conn);

    let err = simple_table()
        .read(&db, &Context::background(), 1, &[])
        .unwrap_err();
    assert!(matches!(err.root(), Error::Scan { .. }), "{err}");
    assert!(err.to_string().contains("not a date"), "{err}");
}

#[test]
fn test_read_sqlite_current_timestamp() {
    let conn = setup();
    conn.execute_batch(
        "CREATE TABLE public.stamped (
            id INTEGER PRIMARY KEY,
            title TEXT,
            data TEXT,
            created TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )
    .unwrap();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table: SimpleTable = Table::new(testing::message(testing::SIMPLE), "public", "stamped");

    table.create(&db, &ctx, &testing::simple(1, "foo", "")).unwrap();
    let record = table.read(&db, &ctx, 1, &[SimpleColumn::Created]).unwrap();

    let created = record.get_field_by_name("created").unwrap();
    let seconds = created
        .as_message()
        .and_then(|ts| ts.get_field_by_name("seconds"))
        .and_then(|s| s.as_i64())
        .unwrap();
    assert!(seconds > 1_600_000_000, "{seconds}");
}

// =============================================================================
// Floating Point Tests
// =============================================================================

fn supported_table() -> Table<&'static str> {
    Table::new(testing::message(testing::SUPPORTED), "public", "supported")
}

/// Finite doubles from a xorshift sequence, plus a few known hard cases.
fn doubles(n: usize) -> Vec<f64> {
    let mut values = vec![0.1, 1.0 / 3.0, -0.0, 5e-324, f64::MIN_POSITIVE, f64::MAX];
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    while values.len() < n {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let v = f64::from_bits(state);
        if v.is_finite() {
            values.push(v);
        }
    }
    values
}

fn list_field(message: &DynamicMessage, name: &str) -> Vec<FieldValue> {
    message
        .get_field_by_name(name)
        .and_then(|v| v.as_list().map(<[FieldValue]>::to_vec))
        .unwrap_or_default()
}

fn float_field(message: &DynamicMessage, name: &str) -> FieldValue {
    message.get_field_by_name(name).unwrap().into_owned()
}

#[test]
fn test_repeated_doubles_keep_exact_bits() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = supported_table();

    let values = doubles(20_000);
    let mut message = DynamicMessage::new(testing::message(testing::SUPPORTED));
    message.set_field_by_name(
        "r_d",
        FieldValue::List(values.iter().copied().map(FieldValue::F64).collect()),
    );
    table.create(&db, &ctx, &message).unwrap();

    let rows = table.read_all(&db, &ctx, &["r_d"], None, 0).unwrap();
    let read: Vec<u64> = list_field(&rows[0], "r_d")
        .iter()
        .map(|v| v.as_f64().unwrap().to_bits())
        .collect();
    let expected: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
    let mismatched = read.iter().zip(&expected).filter(|(a, b)| a != b).count();
    assert_eq!(read.len(), expected.len());
    assert_eq!(mismatched, 0, "mismatched doubles: {mismatched} / {}", expected.len());
}

#[test]
fn test_non_finite_floats_round_trip() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = supported_table();

    let mut message = DynamicMessage::new(testing::message(testing::SUPPORTED));
    message.set_field_by_name("d", FieldValue::F64(f64::NAN));
    message.set_field_by_name("f", FieldValue::F32(f32::INFINITY));
    message.set_field_by_name(
        "r_d",
        FieldValue::List(vec![
            FieldValue::F64(f64::NAN),
            FieldValue::F64(f64::INFINITY),
            FieldValue::F64(f64::NEG_INFINITY),
            FieldValue::F64(1.5),
        ]),
    );
    message.set_field_by_name(
        "r_f",
        FieldValue::List(vec![FieldValue::F32(f32::NEG_INFINITY), FieldValue::F32(f32::NAN)]),
    );
    table.create(&db, &ctx, &message).unwrap();

    let rows = table.read_all(&db, &ctx, &["d", "f", "r_d", "r_f"], None, 0).unwrap();
    let row = &rows[0];
    assert!(float_field(row, "d").as_f64().unwrap().is_nan());
    assert_eq!(float_field(row, "f"), FieldValue::F32(f32::INFINITY));

    let r_d = list_field(row, "r_d");
    assert_eq!(r_d.len(), 4);
    assert!(r_d[0].as_f64().unwrap().is_nan());
    assert_eq!(
        r_d[1..],
        [FieldValue::F64(f64::INFINITY), FieldValue::F64(f64::NEG_INFINITY), FieldValue::F64(1.5)]
    );

    let r_f = list_field(row, "r_f");
    assert_eq!(r_f[0], FieldValue::F32(f32::NEG_INFINITY));
    assert!(r_f[1].as_f32().unwrap().is_nan());
}

// =============================================================================
// Multi-row Write Tests
// =============================================================================

#[test]
fn test_create_many_null_and_zero_policies() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let table = simple_table()
        .with_column_defaults(ColumnDefaults::new().with("title", OnEmpty::Zero));

    let tags = table
        .create_many(
            &db,
            &Context::background(),
            &[testing::simple(1, "", ""), testing::simple(2, "foo", "bar")],
        )
        .unwrap();
    assert_eq!(tags.len(), 2);
    assert!(tags.iter().all(|t| t.rows_affected == 1));

    let (title, data_is_null): (String, bool) = conn
        .query_row(
            "SELECT title, data IS NULL FROM public.simple WHERE id = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(title, "");
    assert!(data_is_null);
}

#[test]
fn test_create_many_stops_at_failing_record() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let records = [
        testing::simple(1, "a", ""),
        testing::simple(1, "duplicate", ""),
        testing::simple(3, "c", ""),
    ];

    let err = simple_table()
        .create_many(&db, &Context::background(), &records)
        .unwrap_err();
    let Error::Operation { operation, source } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(*operation, "Table::create_many");
    assert!(matches!(**source, Error::Batch { index: 1, .. }), "{err}");
    assert!(matches!(err.root(), Error::Executor(_)), "{err}");

    assert_eq!(count(&conn), 1);
}

#[test]
fn test_create_many_empty() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let tags = simple_table()
        .create_many(&db, &Context::background(), &[])
        .unwrap();
    assert!(tags.is_empty());
}

// =============================================================================
// Update and Delete Tests
// =============================================================================

#[test]
fn test_update_modifies_set_fields_only() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = simple_table();
    seed(&db, &[(1, "foo", "bar")]);

    let tag = table.update(&db, &ctx, 1, &testing::simple(0, "new", "")).unwrap();
    assert_eq!(tag.rows_affected, 1);
    assert_eq!(
        table.read(&db, &ctx, 1, &[]).unwrap(),
        testing::simple(1, "new", "bar")
    );

    let tag = table.update(&db, &ctx, 2, &testing::simple(0, "new", "")).unwrap();
    assert_eq!(tag.rows_affected, 0);
}

#[test]
fn test_update_without_fields() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    seed(&db, &[(1, "foo", "bar")]);

    let err = simple_table()
        .update(&db, &Context::background(), 1, &testing::simple(0, "", ""))
        .unwrap_err();
    assert!(matches!(err.root(), Error::ArgumentBuild(_)), "{err}");
}

#[test]
fn test_update_returning() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = simple_table();
    seed(&db, &[(1, "foo", "bar")]);

    let updated = table
        .update_returning(&db, &ctx, 1, &testing::simple(0, "", "baz"), &[])
        .unwrap();
    assert_eq!(updated, testing::simple(1, "foo", "baz"));

    let err = table
        .update_returning(&db, &ctx, 9, &testing::simple(0, "", "baz"), &[])
        .unwrap_err();
    assert!(err.is_no_rows(), "{err}");
}

#[test]
fn test_delete() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = simple_table();
    seed(&db, &[(1, "foo", "bar"), (2, "baz", "")]);

    assert_eq!(table.delete(&db, &ctx, 1).unwrap().rows_affected, 1);
    assert_eq!(table.delete(&db, &ctx, 1).unwrap().rows_affected, 0);

    let deleted = table
        .delete_returning(&db, &ctx, 2, &[SimpleColumn::Title])
        .unwrap();
    assert_eq!(deleted, testing::simple(0, "baz", ""));
    assert_eq!(count(&conn), 0);

    let err = table.delete_returning(&db, &ctx, 2, &[]).unwrap_err();
    assert!(err.is_no_rows(), "{err}");
}

// =============================================================================
// Multi-row Read Tests
// =============================================================================

#[test]
fn test_read_list() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = simple_table();
    seed(&db, &[(1, "a", ""), (2, "b", ""), (3, "c", ""), (4, "d", "")]);

    let order = Order::descending(vec![SimpleColumn::Id]);
    let rows = table
        .read_list(&db, &ctx, &[3, 1, 4, 9], &[SimpleColumn::Id], Some(&order))
        .unwrap();
    assert_eq!(
        rows,
        vec![
            testing::simple(4, "", ""),
            testing::simple(3, "", ""),
            testing::simple(1, "", ""),
        ]
    );

    assert!(table.read_list(&db, &ctx, &[], &[], None).unwrap().is_empty());
}

#[test]
fn test_read_all_with_limit() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = simple_table();
    seed(&db, &[(2, "b", ""), (1, "a", ""), (3, "c", "")]);

    let order = Order::ascending(vec![SimpleColumn::Title]);
    let rows = table
        .read_all(&db, &ctx, &[SimpleColumn::Title], Some(&order), 2)
        .unwrap();
    assert_eq!(
        rows,
        vec![testing::simple(0, "a", ""), testing::simple(0, "b", "")]
    );

    assert_eq!(table.read_all(&db, &ctx, &[], None, 0).unwrap().len(), 3);
}

#[test]
fn test_read_all_stream() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    let table = simple_table();
    seed(&db, &[(1, "a", ""), (2, "b", ""), (3, "c", "")]);

    let mut titles = Vec::new();
    let mut sink = |m: DynamicMessage| -> Result<(), String> {
        if let Some(FieldValue::String(title)) = m.get_field_by_name("title").as_deref() {
            titles.push(title.clone());
        }
        Ok(())
    };
    let order = Order::ascending(vec![SimpleColumn::Id]);
    let n = table
        .read_all_stream(&db, &ctx, &[], Some(&order), &mut sink)
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(titles, ["a", "b", "c"]);
}

#[test]
fn test_read_all_stream_sink_failure() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    seed(&db, &[(1, "a", ""), (2, "b", ""), (3, "c", "")]);

    let mut seen = 0;
    let mut sink = |_: DynamicMessage| -> Result<(), String> {
        seen += 1;
        if seen == 2 {
            return Err("sink full".to_string());
        }
        Ok(())
    };
    let err = simple_table()
        .read_all_stream(&db, &Context::background(), &[], None, &mut sink)
        .unwrap_err();
    assert!(matches!(err.root(), Error::Sink(_)), "{err}");
    assert!(err.to_string().contains("sink full"), "{err}");
    assert_eq!(seen, 2);
}

// =============================================================================
// Context Tests
// =============================================================================

#[test]
fn test_cancelled_context() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    ctx.cancel();

    let err = simple_table()
        .create(&db, &ctx, &testing::simple(1, "foo", ""))
        .unwrap_err();
    assert!(matches!(err.root(), Error::Cancelled), "{err}");
    assert_eq!(count(&conn), 0);
}

#[test]
fn test_expired_deadline() {
    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::with_timeout(Duration::ZERO);

    let err = simple_table().read_all(&db, &ctx, &[], None, 0).unwrap_err();
    assert!(matches!(err.root(), Error::DeadlineExceeded), "{err}");
}

#[test]
fn test_deadline_does_not_outlive_call() {
    let conn = setup();
    let before: i64 = conn
        .query_row("PRAGMA busy_timeout", [], |r| r.get(0))
        .unwrap();
    let db = SqliteExecutor::new(&conn);
    let table = simple_table();
    seed(&db, &[(1, "a", "")]);

    let short = Context::with_timeout(Duration::from_millis(5));
    let _ = table.read_all(&db, &short, &[], None, 0);
    table
        .read_all(&db, &Context::background(), &[], None, 0)
        .unwrap();

    let after: i64 = conn
        .query_row("PRAGMA busy_timeout", [], |r| r.get(0))
        .unwrap();
    assert_eq!(after, before);
}

#[test]
fn test_driver_context_errors_resolve_to_root() {
    use protorow_core::Executor as _;

    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    ctx.cancel();

    let err = Error::Executor(db.query(&ctx, "SELECT 1", &[]).unwrap_err())
        .context("Table::read_all");
    assert!(matches!(err.root(), Error::Cancelled), "{err}");

    let expired = Context::with_timeout(Duration::ZERO);
    let err = Error::Executor(db.exec(&expired, "DELETE FROM public.simple", &[]).unwrap_err());
    assert!(matches!(err.root(), Error::DeadlineExceeded), "{err}");
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_table_from_yaml_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        concat!(
            "schema: public\ntable: simple\nid_column: id\n",
            "column_defaults:\n  title: zero\n  data: null",
        )
    )
    .unwrap();
    file.flush().unwrap();

    let config = TableConfig::load(file.path()).unwrap();
    let table: SimpleTable = Table::from_config(testing::message(testing::SIMPLE), &config);
    assert_eq!(table.schema(), "public");
    assert_eq!(table.column_defaults().get("title"), OnEmpty::Zero);

    let conn = setup();
    let db = SqliteExecutor::new(&conn);
    let ctx = Context::background();
    table
        .create_many(&db, &ctx, &[testing::simple(1, "", "")])
        .unwrap();

    let title_is_null: bool = conn
        .query_row("SELECT title IS NULL FROM public.simple WHERE id = 1", [], |r| r.get(0))
        .unwrap();
    assert!(!title_is_null);
    assert_eq!(table.read(&db, &ctx, 1, &[]).unwrap(), testing::simple(1, "", ""));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_shared_table_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    Connection::open(&path)
        .unwrap()
        .execute_batch(
            "CREATE TABLE simple (id INTEGER PRIMARY KEY, title TEXT, data TEXT, created TEXT);",
        )
        .unwrap();

    let table: SimpleTable = Table::new(testing::message(testing::SIMPLE), "", "simple");
    let threads = 4;
    let per_thread = 25;

    std::thread::scope(|s| {
        for t in 0..threads {
            let table = &table;
            let path = &path;
            s.spawn(move || {
                let conn = Connection::open(path).unwrap();
                let db = SqliteExecutor::new(&conn);
                let ctx = Context::with_timeout(Duration::from_secs(30));
                for i in 0..per_thread {
                    let id = t * per_thread + i + 1;
                    table
                        .create(&db, &ctx, &testing::simple(id, &format!("t{t}"), ""))
                        .unwrap();
                    let read = table.read(&db, &ctx, id, &[SimpleColumn::Id]).unwrap();
                    assert_eq!(read, testing::simple(id, "", ""));
                }
            });
        }
    });

    let conn = Connection::open(&path).unwrap();
    let db = SqliteExecutor::new(&conn);
    let rows = table
        .read_all(&db, &Context::background(), &[], None, 0)
        .unwrap();
    assert_eq!(rows.len(), (threads * per_thread) as usize);
}
