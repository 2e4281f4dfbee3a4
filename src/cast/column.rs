//! Arena-backed text columns.

use arrow::array::RecordBatch;
use arrow::error::ArrowError;

use super::cast_to_text;

/// A column of optional strings stored in one contiguous buffer.
///
/// Row `i` spans `data[ends[i - 1]..ends[i]]`. Resetting keeps every
/// allocation, so a column can be refilled chunk after chunk without
/// touching the allocator once it has grown to the working size.
#[derive(Debug, Default, Clone)]
pub struct TextColumn {
    data: String,
    ends: Vec<usize>,
    valid: Vec<bool>,
}

impl TextColumn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size for `rows` entries of about 16 bytes each.
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            data: String::with_capacity(rows * 16),
            ends: Vec::with_capacity(rows),
            valid: Vec::with_capacity(rows),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    #[inline]
    pub fn is_null(&self, row: usize) -> bool {
        !self.valid[row]
    }

    /// Text of `row`, or `None` when the row is null.
    #[inline]
    pub fn value(&self, row: usize) -> Option<&str> {
        if !self.valid[row] {
            return None;
        }
        let start = if row == 0 { 0 } else { self.ends[row - 1] };
        Some(&self.data[start..self.ends[row]])
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        (0..self.len()).map(|row| self.value(row))
    }

    pub fn push_null(&mut self) {
        self.ends.push(self.data.len());
        self.valid.push(false);
    }

    pub fn push_str(&mut self, value: &str) {
        self.data.push_str(value);
        self.ends.push(self.data.len());
        self.valid.push(true);
    }

    /// Append one non-null value written in place by `write`.
    pub fn push_with<R>(&mut self, write: impl FnOnce(&mut String) -> R) -> R {
        let result = write(&mut self.data);
        self.ends.push(self.data.len());
        self.valid.push(true);
        result
    }

    /// Drop all rows, keeping the allocations.
    pub fn reset(&mut self) {
        self.data.clear();
        self.ends.clear();
        self.valid.clear();
    }
}

/// The text form of a whole chunk: one [`TextColumn`] per column.
///
/// Owned by a copy session and reused for every chunk it sends.
#[derive(Debug, Default)]
pub struct CastedChunk {
    columns: Vec<TextColumn>,
    rows: usize,
}

impl CastedChunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, index: usize) -> &TextColumn {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[TextColumn] {
        &self.columns
    }

    /// Cast every column of `batch` to text, replacing the previous contents.
    pub fn cast(&mut self, batch: &RecordBatch) -> Result<(), ArrowError> {
        self.prepare(batch.num_columns());
        for (column, array) in self.columns.iter_mut().zip(batch.columns()) {
            cast_to_text(array.as_ref(), column)?;
            debug_assert_eq!(column.len(), batch.num_rows());
        }
        self.rows = batch.num_rows();
        Ok(())
    }

    fn prepare(&mut self, column_count: usize) {
        self.rows = 0;
        if self.columns.len() == column_count {
            self.columns.iter_mut().for_each(TextColumn::reset);
        } else {
            self.columns = (0..column_count).map(|_| TextColumn::new()).collect();
        }
    }
}
