use crate::row::{shape::RowDescriptor, value::SqlValue};

/// Internal column carrying each row's position in the caller's collection, used to line
/// generated keys up with the rows they belong to.
pub const ROW_ORDINAL_COLUMN: &str = "__row_ordinal";

/// The owned, transient copy of the caller's rows handed to the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularBuffer {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

impl TabularBuffer {
    /// Reads `descriptors` from every row, in row order. With `with_ordinal` a trailing
    /// [`ROW_ORDINAL_COLUMN`] holds the zero based position of the row.
    pub fn from_rows<T>(
        columns: Vec<String>,
        descriptors: &[&RowDescriptor<T>],
        rows: &[T],
        with_ordinal: bool,
    ) -> Self {
        let mut columns = columns;
        if with_ordinal {
            columns.push(ROW_ORDINAL_COLUMN.to_string());
        }

        let rows = rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let mut values: Vec<SqlValue> =
                    descriptors.iter().map(|descriptor| descriptor.read(row)).collect();
                if with_ordinal {
                    values.push(SqlValue::I64(ordinal as i64));
                }
                values
            })
            .collect();

        TabularBuffer { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|values| values.get(index))
    }
}
