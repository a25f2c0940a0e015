//! Query results as handed to callers.

use tds_protocol::{ColumnMetadata, Response, ResultSet, Value};

/// Column description exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name; empty for unnamed expressions.
    pub name: String,
    /// Zero-based position in the row.
    pub index: usize,
    /// Whether the server marked the column nullable.
    pub nullable: bool,
}

impl Column {
    fn from_metadata(index: usize, meta: &ColumnMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            index,
            nullable: meta.is_nullable(),
        }
    }
}

/// One row of typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row carries no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// The first result set of a query response.
///
/// Additional result sets in the same response are kept and reachable
/// through [`Rows::more_results`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    columns: Vec<Column>,
    rows: Vec<Row>,
    more: Vec<Rows>,
    rows_affected: u64,
}

impl Rows {
    pub(crate) fn from_response(response: Response) -> Self {
        let rows_affected = response.rows_affected();
        let mut sets = response.result_sets.into_iter().map(Self::from_result_set);

        let mut first = sets.next().unwrap_or_default();
        first.more = sets.collect();
        first.rows_affected = rows_affected;
        first
    }

    fn from_result_set(set: ResultSet) -> Self {
        Self {
            columns: set
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| Column::from_metadata(i, c))
                .collect(),
            rows: set
                .rows
                .into_iter()
                .map(|r| Row { values: r.values })
                .collect(),
            more: Vec::new(),
            rows_affected: 0,
        }
    }

    /// Column descriptions.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Position of the column called `name`, compared case-insensitively.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Iterate over the rows.
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Result sets that followed the first one.
    #[must_use]
    pub fn more_results(&self) -> &[Rows] {
        &self.more
    }

    /// Row count reported by the completion records of the response.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Rows {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Total rows affected.
    pub rows_affected: u64,
}

impl ExecResult {
    pub(crate) fn from_response(response: &Response) -> Self {
        Self {
            rows_affected: response.rows_affected(),
        }
    }
}
