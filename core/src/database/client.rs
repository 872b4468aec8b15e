use std::time::Duration;

use async_trait::async_trait;

use crate::{
    database::{buffer::TabularBuffer, schema::ColumnMetadata},
    row::value::{SqlValue, ValueKind},
    settings::BulkCopyOptions,
};

/// Error type of a connection. The orchestrator inspects the engine error numbers to tell
/// identity violations apart from everything else.
pub trait NativeError: std::error::Error + Send + Sync + 'static {
    fn native_codes(&self) -> Vec<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnDirection {
    #[default]
    Input,
    /// The engine writes a value back into the parameter once the statement completes.
    InputOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    pub name: String,
    pub value: SqlValue,
    pub kind: ValueKind,
    pub direction: ColumnDirection,
}

impl SqlParameter {
    pub fn input(name: impl Into<String>, value: SqlValue, kind: ValueKind) -> Self {
        SqlParameter { name: name.into(), value, kind, direction: ColumnDirection::Input }
    }

    pub fn input_output(name: impl Into<String>, value: SqlValue, kind: ValueKind) -> Self {
        SqlParameter { name: name.into(), value, kind, direction: ColumnDirection::InputOutput }
    }
}

/// Buffer column to destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source: String,
    pub destination: String,
}

/// Everything the transport needs besides the rows themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteOptions {
    pub batch_size: Option<u32>,
    pub timeout: Duration,
    pub enable_streaming: bool,
    pub options: BulkCopyOptions,
    pub column_mappings: Vec<ColumnMapping>,
}

/// A connection to the relational engine. The caller owns the connection and any
/// transaction running on it, statements issued here run inside whatever transaction is
/// active.
pub trait Database {
    type Error: NativeError;

    fn database_name(&self) -> &str;

    fn is_open(&self) -> bool;

    fn open(&mut self) -> Result<(), Self::Error>;

    /// Runs `sql` and returns the affected row count. `InputOutput` parameters are updated
    /// in place.
    fn execute(
        &mut self,
        sql: &str,
        parameters: &mut [SqlParameter],
        timeout: Duration,
    ) -> Result<u64, Self::Error>;

    fn query(
        &mut self,
        sql: &str,
        parameters: &[SqlParameter],
        timeout: Duration,
    ) -> Result<Vec<Vec<SqlValue>>, Self::Error>;

    fn get_schema(
        &mut self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnMetadata>, Self::Error>;
}

/// The native bulk-copy transport bound to the same connection. Implementations must keep
/// the buffer's row order in the destination.
pub trait BulkTransport: Database {
    fn write(
        &mut self,
        destination: &str,
        buffer: &TabularBuffer,
        options: &BulkWriteOptions,
    ) -> Result<u64, Self::Error>;
}

/// Suspension capable mirror of [`Database`].
#[async_trait]
pub trait AsyncDatabase: Send {
    type Error: NativeError;

    fn database_name(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn open(&mut self) -> Result<(), Self::Error>;

    async fn execute(
        &mut self,
        sql: &str,
        parameters: &mut [SqlParameter],
        timeout: Duration,
    ) -> Result<u64, Self::Error>;

    async fn query(
        &mut self,
        sql: &str,
        parameters: &[SqlParameter],
        timeout: Duration,
    ) -> Result<Vec<Vec<SqlValue>>, Self::Error>;

    async fn get_schema(
        &mut self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnMetadata>, Self::Error>;
}

#[async_trait]
pub trait AsyncBulkTransport: AsyncDatabase {
    async fn write(
        &mut self,
        destination: &str,
        buffer: &TabularBuffer,
        options: &BulkWriteOptions,
    ) -> Result<u64, Self::Error>;
}
