//! Builder reuse.
//!
//! A [`BuilderPool`] keeps emptied builders for reuse and remembers, per
//! statement [`Shape`], the longest statement built so far. A builder handed
//! out for a shape is pre-sized to that mark so statements of a known shape
//! stop reallocating after their first build.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use super::Builder;

/// Idle builders kept per pool; extra builders are dropped on return.
const MAX_IDLE: usize = 16;

/// Kind of statement a builder is checked out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Insert,
    Select,
    Update,
    Delete,
}

impl Shape {
    fn index(self) -> usize {
        self as usize
    }
}

/// Largest value observed so far. Never shrinks.
#[derive(Debug, Default)]
pub struct HighWaterMark(AtomicUsize);

impl HighWaterMark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mark.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Raises the mark to `n` if `n` is greater.
    pub fn raise(&self, n: usize) {
        self.0.fetch_max(n, Ordering::Relaxed);
    }
}

/// Pool of reusable [`Builder`]s.
#[derive(Debug, Default)]
pub struct BuilderPool {
    idle: Mutex<Vec<Builder>>,
    marks: [HighWaterMark; 4],
}

impl BuilderPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out an empty builder sized for `shape`.
    ///
    /// The builder returns to the pool when the guard is dropped.
    pub fn get(&self, shape: Shape) -> PooledBuilder<'_> {
        let mark = self.mark(shape);
        let mut builder = match self.idle.lock().pop() {
            Some(b) => b,
            None => {
                trace!(?shape, capacity = mark, "allocating statement builder");
                Builder::with_capacity(mark)
            }
        };
        builder.reserve(mark);

        PooledBuilder {
            pool: self,
            shape,
            builder,
        }
    }

    /// High-water mark of statement length for `shape`.
    pub fn mark(&self, shape: Shape) -> usize {
        self.marks[shape.index()].get()
    }

    /// Number of idle builders.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn put(&self, shape: Shape, mut builder: Builder) {
        self.marks[shape.index()].raise(builder.len());
        builder.reset();

        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE {
            idle.push(builder);
        }
    }
}

/// A [`Builder`] checked out of a [`BuilderPool`].
#[derive(Debug)]
pub struct PooledBuilder<'p> {
    pool: &'p BuilderPool,
    shape: Shape,
    builder: Builder,
}

impl Deref for PooledBuilder<'_> {
    type Target = Builder;

    fn deref(&self) -> &Builder {
        &self.builder
    }
}

impl DerefMut for PooledBuilder<'_> {
    fn deref_mut(&mut self) -> &mut Builder {
        &mut self.builder
    }
}

impl Drop for PooledBuilder<'_> {
    fn drop(&mut self) {
        let builder = std::mem::take(&mut self.builder);
        self.pool.put(self.shape, builder);
    }
}
