//! WHERE and ORDER BY clause writers.

use super::Builder;

/// Writes a WHERE clause, including its leading space, into a builder.
///
/// Placeholders must be written with [`Builder::write_pos_arg`] so they
/// continue the statement's numbering. Any `Fn(&mut Builder)` is a where
/// clause.
pub trait WhereClause {
    fn write_where(&self, b: &mut Builder);
}

impl<F: Fn(&mut Builder)> WhereClause for F {
    fn write_where(&self, b: &mut Builder) {
        self(b)
    }
}

/// ` WHERE "<column>" = $k` for a single identifier.
#[derive(Debug, Clone, Copy)]
pub struct WhereId<'a> {
    column: &'a str,
}

impl WhereId<'static> {
    /// Matches on the `id` column.
    pub fn new() -> Self {
        Self { column: "id" }
    }
}

impl Default for WhereId<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> WhereId<'a> {
    /// Matches on `column` instead of `id`.
    pub fn column(column: &'a str) -> Self {
        Self { column }
    }
}

impl WhereClause for WhereId<'_> {
    fn write_where(&self, b: &mut Builder) {
        b.write_str(" WHERE ");
        b.write_quoted(self.column);
        b.write_str(" = ");
        b.write_pos_arg();
    }
}

/// ` WHERE "<column>" IN ($k, ..., $k+n-1)` for `n` identifiers.
#[derive(Debug, Clone, Copy)]
pub struct WhereIdIn<'a> {
    column: &'a str,
    count: usize,
}

impl WhereIdIn<'static> {
    /// Matches `count` ids on the `id` column.
    pub fn new(count: usize) -> Self {
        Self { column: "id", count }
    }
}

impl<'a> WhereIdIn<'a> {
    /// Matches `count` ids on `column`.
    pub fn column(column: &'a str, count: usize) -> Self {
        Self { column, count }
    }
}

impl WhereClause for WhereIdIn<'_> {
    fn write_where(&self, b: &mut Builder) {
        b.write_str(" WHERE ");
        b.write_quoted(self.column);
        b.write_str(" IN (");
        b.write_pos_args(self.count);
        b.write_str(")");
    }
}

/// Sort direction of an [`Order`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    fn as_sql(self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// ` ORDER BY "a", "b" ASC|DESC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order<C> {
    pub columns: Vec<C>,
    pub direction: Direction,
}

impl<C: AsRef<str>> Order<C> {
    pub fn new(columns: Vec<C>, direction: Direction) -> Self {
        Self { columns, direction }
    }

    pub fn ascending(columns: Vec<C>) -> Self {
        Self::new(columns, Direction::Ascending)
    }

    pub fn descending(columns: Vec<C>) -> Self {
        Self::new(columns, Direction::Descending)
    }

    /// Writes the clause; nothing at all when there are no columns.
    pub fn write_order(&self, b: &mut Builder) {
        if self.columns.is_empty() {
            return;
        }
        b.write_str(" ORDER BY ");
        b.write_column_spec(&self.columns);
        b.write_str(" ");
        b.write_str(self.direction.as_sql());
    }
}
