//! Test fixtures: message descriptors, an in-memory result set and a
//! recording executor.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! driver crates. The descriptors are built from descriptor protos so tests
//! need no code generation:
//!
//! ```text
//! package support;
//!
//! message Simple { int32 id; string title; string data; Timestamp created; }
//! message Supported { bl, i32, i64, f, d, s, bt, u32, u64, ts, and repeated r_* of each }
//! message Unsupported { Supported sup; map<string,int32> mp; map<int32,Timestamp> ts_mp;
//!                       SimpleColumns en; repeated SimpleColumns r_en; }
//! enum SimpleColumns { id; title; data; created; }
//! ```

use std::collections::VecDeque;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prost::Message as _;
use prost::bytes::Bytes;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, Value as FieldValue};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions,
};

use crate::codec::{MessageCodec, TIMESTAMP};
use crate::context::Context;
use crate::error::{DriverError, Error, Result};
use crate::executor::{CommandTag, Executor};
use crate::native::{NativeValue, Scalar, ScalarType, Transcoder};
use crate::scan::Rows;

pub const SIMPLE: &str = "Simple";
pub const SUPPORTED: &str = "Supported";
pub const UNSUPPORTED: &str = "Unsupported";

const PACKAGE: &str = "support";

/// Columns of the `Simple` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleColumn {
    Id,
    Title,
    Data,
    Created,
}

impl AsRef<str> for SimpleColumn {
    fn as_ref(&self) -> &str {
        match self {
            SimpleColumn::Id => "id",
            SimpleColumn::Title => "title",
            SimpleColumn::Data => "data",
            SimpleColumn::Created => "created",
        }
    }
}

/// Full name of a fixture message.
pub fn qualified(name: &str) -> String {
    format!("{PACKAGE}.{name}")
}

/// Descriptor pool holding the fixture messages and
/// `google.protobuf.Timestamp`.
pub fn pool() -> &'static DescriptorPool {
    static POOL: OnceLock<DescriptorPool> = OnceLock::new();
    POOL.get_or_init(|| {
        DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
            file: vec![timestamp_file(), support_file()],
        })
        .unwrap_or_else(|e| panic!("invalid fixture descriptors: {e}"))
    })
}

/// Descriptor of a fixture message, by short or full name.
pub fn message(name: &str) -> MessageDescriptor {
    let full_name = if name.contains('.') {
        name.to_string()
    } else {
        qualified(name)
    };
    pool()
        .get_message_by_name(&full_name)
        .unwrap_or_else(|| panic!("no fixture message {full_name}"))
}

/// A `google.protobuf.Timestamp`; zero parts are left unset.
pub fn timestamp(seconds: i64, nanos: i32) -> DynamicMessage {
    let mut ts = DynamicMessage::new(message(TIMESTAMP));
    if seconds != 0 {
        ts.set_field_by_name("seconds", FieldValue::I64(seconds));
    }
    if nanos != 0 {
        ts.set_field_by_name("nanos", FieldValue::I32(nanos));
    }
    ts
}

/// A `Simple` message; zero and empty arguments are left unset.
pub fn simple(id: i32, title: &str, data: &str) -> DynamicMessage {
    let mut m = DynamicMessage::new(message(SIMPLE));
    if id != 0 {
        m.set_field_by_name("id", FieldValue::I32(id));
    }
    if !title.is_empty() {
        m.set_field_by_name("title", FieldValue::String(title.to_string()));
    }
    if !data.is_empty() {
        m.set_field_by_name("data", FieldValue::String(data.to_string()));
    }
    m
}

/// A `Simple` message with `created` set.
pub fn simple_created(id: i32, title: &str, created: DynamicMessage) -> DynamicMessage {
    let mut m = simple(id, title, "");
    m.set_field_by_name("created", FieldValue::Message(created));
    m
}

/// A `Supported` message with every field set to a non-default value,
/// including the extremes of the unsigned kinds.
pub fn supported_message() -> DynamicMessage {
    let ts = || FieldValue::Message(timestamp(1_600_000_000, 123_456_789));
    let bytes = |b: &[u8]| FieldValue::Bytes(Bytes::copy_from_slice(b));

    let fields = [
        ("bl", FieldValue::Bool(true)),
        ("i32", FieldValue::I32(-42)),
        ("i64", FieldValue::I64(-(1 << 40))),
        ("f", FieldValue::F32(1.5)),
        ("d", FieldValue::F64(-2.25)),
        ("s", FieldValue::String("hello".to_string())),
        ("bt", bytes(&[0, 1, 0xff])),
        ("u32", FieldValue::U32(u32::MAX)),
        ("u64", FieldValue::U64(u64::MAX)),
        ("ts", ts()),
        (
            "r_bl",
            FieldValue::List(vec![FieldValue::Bool(true), FieldValue::Bool(false)]),
        ),
        (
            "r_i32",
            FieldValue::List(vec![FieldValue::I32(1), FieldValue::I32(-2), FieldValue::I32(3)]),
        ),
        (
            "r_i64",
            FieldValue::List(vec![FieldValue::I64(i64::MIN), FieldValue::I64(i64::MAX)]),
        ),
        (
            "r_f",
            FieldValue::List(vec![FieldValue::F32(0.5), FieldValue::F32(-1.25)]),
        ),
        (
            "r_d",
            FieldValue::List(vec![FieldValue::F64(0.1), FieldValue::F64(1e300)]),
        ),
        (
            "r_s",
            FieldValue::List(vec![
                FieldValue::String("a".to_string()),
                FieldValue::String(String::new()),
                FieldValue::String("c\"d".to_string()),
            ]),
        ),
        (
            "r_u32",
            FieldValue::List(vec![FieldValue::U32(0), FieldValue::U32(u32::MAX)]),
        ),
        ("r_bt", FieldValue::List(vec![bytes(b"x"), bytes(b"")])),
        (
            "r_u64",
            FieldValue::List(vec![FieldValue::U64(1), FieldValue::U64(u64::MAX)]),
        ),
        (
            "r_ts",
            FieldValue::List(vec![
                FieldValue::Message(timestamp(1, 0)),
                FieldValue::Message(timestamp(0, 5)),
            ]),
        ),
    ];

    let mut m = DynamicMessage::new(message(SUPPORTED));
    for (name, value) in fields {
        m.set_field_by_name(name, value);
    }
    m
}

/// Stores the `Supported` message as its protobuf encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct SupportedAsBytes;

impl MessageCodec for SupportedAsBytes {
    fn scalar_type(&self) -> ScalarType {
        ScalarType::Bytea
    }

    fn encode(&self, message: &DynamicMessage) -> Result<Scalar> {
        Ok(Scalar::Bytea(message.encode_to_vec()))
    }

    fn decode(&self, scalar: Scalar, descriptor: &MessageDescriptor) -> Result<DynamicMessage> {
        match scalar {
            Scalar::Bytea(buf) => DynamicMessage::decode(descriptor.clone(), buf.as_slice())
                .map_err(|e| Error::Conversion(e.to_string())),
            other => Err(Error::Conversion(format!("expected bytes, got {other:?}"))),
        }
    }
}

/// In-memory result set.
#[derive(Debug, Clone, Default)]
pub struct MemoryRows {
    columns: Vec<String>,
    rows: VecDeque<Vec<NativeValue>>,
    current: Option<Vec<NativeValue>>,
}

impl MemoryRows {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, row: impl IntoIterator<Item = NativeValue>) {
        self.rows.push_back(row.into_iter().collect());
    }
}

impl Rows for MemoryRows {
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
            .cloned()
            .ok_or_else(|| format!("no column {index} in current row"))?;
        dest.set(value)?;
        Ok(())
    }
}

/// One statement seen by a [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub args: Vec<NativeValue>,
}

/// Executor recording every statement, answering queries from a queue of
/// prepared result sets (empty once the queue runs out).
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<Call>>,
    results: Mutex<VecDeque<MemoryRows>>,
    fail_from: Option<(usize, String)>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a result set for the next query.
    pub fn with_rows(self, rows: MemoryRows) -> Self {
        self.results.lock().push_back(rows);
        self
    }

    /// Fails every call with `message`.
    pub fn failing(self, message: impl Into<String>) -> Self {
        self.failing_from(0, message)
    }

    /// Fails call number `index` (0-based) and every later call.
    pub fn failing_from(mut self, index: usize, message: impl Into<String>) -> Self {
        self.fail_from = Some((index, message.into()));
        self
    }

    /// Statements seen so far, including failed ones.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, sql: &str, args: &[Transcoder]) -> std::result::Result<(), DriverError> {
        let mut calls = self.calls.lock();
        let index = calls.len();
        calls.push(Call {
            sql: sql.to_string(),
            args: args.iter().map(|a| a.get().clone()).collect(),
        });

        match &self.fail_from {
            Some((from, message)) if index >= *from => Err(message.clone().into()),
            _ => Ok(()),
        }
    }
}

impl Executor for RecordingExecutor {
    type Rows<'a> = MemoryRows;

    fn exec(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[Transcoder],
    ) -> std::result::Result<CommandTag, DriverError> {
        ctx.check()?;
        self.record(sql, args)?;
        Ok(CommandTag::new(1))
    }

    fn query<'a>(
        &'a self,
        ctx: &Context,
        sql: &str,
        args: &[Transcoder],
    ) -> std::result::Result<MemoryRows, DriverError> {
        ctx.check()?;
        self.record(sql, args)?;
        Ok(self.results.lock().pop_front().unwrap_or_default())
    }
}

/// A UTC instant from seconds and nanoseconds.
pub fn utc(seconds: i64, nanos: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, nanos)
        .unwrap_or_else(|| panic!("timestamp {seconds}s {nanos}ns out of range"))
}

fn field(
    name: &str,
    number: i32,
    label: Label,
    ty: Type,
    type_name: Option<&str>,
) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(str::to_string),
        ..Default::default()
    }
}

fn singular(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    field(name, number, Label::Optional, ty, None)
}

fn message_field(name: &str, number: i32, label: Label, type_name: &str) -> FieldDescriptorProto {
    field(name, number, label, Type::Message, Some(type_name))
}

fn map_entry(name: &str, key: Type, value: FieldDescriptorProto) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: vec![singular("key", 1, key), value],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn timestamp_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("google/protobuf/timestamp.proto".to_string()),
        package: Some("google.protobuf".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Timestamp".to_string()),
            field: vec![singular("seconds", 1, Type::Int64), singular("nanos", 2, Type::Int32)],
            ..Default::default()
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

fn support_file() -> FileDescriptorProto {
    const TS: &str = ".google.protobuf.Timestamp";

    let scalars = [
        ("bl", Type::Bool),
        ("i32", Type::Int32),
        ("i64", Type::Int64),
        ("f", Type::Float),
        ("d", Type::Double),
        ("s", Type::String),
        ("bt", Type::Bytes),
        ("u32", Type::Uint32),
        ("u64", Type::Uint64),
    ];

    let mut supported = Vec::new();
    let mut number = 0;
    for (name, ty) in scalars {
        number += 1;
        supported.push(singular(name, number, ty));
    }
    number += 1;
    supported.push(message_field("ts", number, Label::Optional, TS));
    for (name, ty) in [
        ("r_bl", Type::Bool),
        ("r_i32", Type::Int32),
        ("r_i64", Type::Int64),
        ("r_f", Type::Float),
        ("r_d", Type::Double),
        ("r_s", Type::String),
        ("r_u32", Type::Uint32),
        ("r_bt", Type::Bytes),
        ("r_u64", Type::Uint64),
    ] {
        number += 1;
        supported.push(field(name, number, Label::Repeated, ty, None));
    }
    number += 1;
    supported.push(message_field("r_ts", number, Label::Repeated, TS));

    let simple = DescriptorProto {
        name: Some(SIMPLE.to_string()),
        field: vec![
            singular("id", 1, Type::Int32),
            singular("title", 2, Type::String),
            singular("data", 3, Type::String),
            message_field("created", 4, Label::Optional, TS),
        ],
        ..Default::default()
    };

    let unsupported = DescriptorProto {
        name: Some(UNSUPPORTED.to_string()),
        field: vec![
            message_field("sup", 1, Label::Optional, ".support.Supported"),
            message_field("mp", 2, Label::Repeated, ".support.Unsupported.MpEntry"),
            message_field("ts_mp", 3, Label::Repeated, ".support.Unsupported.TsMpEntry"),
            field("en", 4, Label::Optional, Type::Enum, Some(".support.SimpleColumns")),
            field("r_en", 5, Label::Repeated, Type::Enum, Some(".support.SimpleColumns")),
        ],
        nested_type: vec![
            map_entry("MpEntry", Type::String, singular("value", 2, Type::Int32)),
            map_entry(
                "TsMpEntry",
                Type::Int32,
                message_field("value", 2, Label::Optional, TS),
            ),
        ],
        ..Default::default()
    };

    let columns = EnumDescriptorProto {
        name: Some("SimpleColumns".to_string()),
        value: ["id", "title", "data", "created"]
            .into_iter()
            .zip(0..)
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(number),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("support.proto".to_string()),
        package: Some(PACKAGE.to_string()),
        dependency: vec!["google/protobuf/timestamp.proto".to_string()],
        message_type: vec![simple, supported_descriptor(supported), unsupported],
        enum_type: vec![columns],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

fn supported_descriptor(fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(SUPPORTED.to_string()),
        field: fields,
        ..Default::default()
    }
}
