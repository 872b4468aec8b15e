//! Recording connection used by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    database::{
        buffer::TabularBuffer,
        client::{
            AsyncBulkTransport, AsyncDatabase, BulkTransport, BulkWriteOptions, ColumnDirection,
            Database, NativeError, SqlParameter,
        },
        schema::ColumnMetadata,
    },
    row::value::SqlValue,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct FakeError {
    pub code: i32,
    pub message: String,
}

impl FakeError {
    pub fn new(code: i32, message: &str) -> Self {
        FakeError { code, message: message.to_string() }
    }
}

impl NativeError for FakeError {
    fn native_codes(&self) -> Vec<i32> {
        vec![self.code]
    }
}

#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub destination: String,
    pub buffer: TabularBuffer,
    pub options: BulkWriteOptions,
}

#[derive(Debug, Default)]
pub struct FakeConnection {
    pub database: String,
    pub open: bool,
    pub opened: usize,
    pub executed: Vec<String>,
    pub parameters: Vec<Vec<SqlParameter>>,
    pub writes: Vec<RecordedWrite>,
    pub timeouts: Vec<Duration>,
    pub schema_requests: usize,
    tables: HashMap<(String, String), Vec<ColumnMetadata>>,
    affected: VecDeque<u64>,
    query_results: VecDeque<Vec<Vec<SqlValue>>>,
    output_values: HashMap<String, SqlValue>,
    failures: Vec<(String, FakeError)>,
    write_failure: Option<FakeError>,
}

impl FakeConnection {
    pub fn new(database: &str) -> Self {
        FakeConnection { database: database.to_string(), open: true, ..Default::default() }
    }

    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    pub fn with_table(mut self, schema: &str, table: &str, columns: Vec<ColumnMetadata>) -> Self {
        self.tables.insert((schema.to_string(), table.to_string()), columns);
        self
    }

    /// Row counts returned by successive `execute` calls, zero once exhausted.
    pub fn with_affected(mut self, counts: &[u64]) -> Self {
        self.affected.extend(counts.iter().copied());
        self
    }

    pub fn with_query_result(mut self, rows: Vec<Vec<SqlValue>>) -> Self {
        self.query_results.push_back(rows);
        self
    }

    /// Value written into the `InputOutput` parameter `name` after `execute`.
    pub fn with_output_value(mut self, name: &str, value: SqlValue) -> Self {
        self.output_values.insert(name.to_string(), value);
        self
    }

    /// Fails any statement containing `fragment`.
    pub fn failing_on(mut self, fragment: &str, error: FakeError) -> Self {
        self.failures.push((fragment.to_string(), error));
        self
    }

    pub fn failing_writes(mut self, error: FakeError) -> Self {
        self.write_failure = Some(error);
        self
    }

    pub fn executed_containing(&self, fragment: &str) -> Vec<&String> {
        self.executed.iter().filter(|sql| sql.contains(fragment)).collect()
    }

    fn run(
        &mut self,
        sql: &str,
        parameters: &mut [SqlParameter],
        timeout: Duration,
    ) -> Result<u64, FakeError> {
        self.executed.push(sql.to_string());
        self.parameters.push(parameters.to_vec());
        self.timeouts.push(timeout);

        if let Some((_, error)) = self.failures.iter().find(|(fragment, _)| sql.contains(fragment)) {
            return Err(error.clone());
        }

        for parameter in parameters.iter_mut() {
            if parameter.direction == ColumnDirection::InputOutput {
                if let Some(value) = self.output_values.get(&parameter.name) {
                    parameter.value = value.clone();
                }
            }
        }

        Ok(self.affected.pop_front().unwrap_or(0))
    }

    fn read(&mut self, sql: &str, parameters: &[SqlParameter]) -> Result<Vec<Vec<SqlValue>>, FakeError> {
        self.executed.push(sql.to_string());
        self.parameters.push(parameters.to_vec());

        if let Some((_, error)) = self.failures.iter().find(|(fragment, _)| sql.contains(fragment)) {
            return Err(error.clone());
        }

        Ok(self.query_results.pop_front().unwrap_or_default())
    }

    fn schema(&mut self, schema: &str, table: &str) -> Vec<ColumnMetadata> {
        self.schema_requests += 1;
        self.tables.get(&(schema.to_string(), table.to_string())).cloned().unwrap_or_default()
    }

    fn record_write(
        &mut self,
        destination: &str,
        buffer: &TabularBuffer,
        options: &BulkWriteOptions,
    ) -> Result<u64, FakeError> {
        if let Some(error) = &self.write_failure {
            return Err(error.clone());
        }

        self.writes.push(RecordedWrite {
            destination: destination.to_string(),
            buffer: buffer.clone(),
            options: options.clone(),
        });
        Ok(buffer.len() as u64)
    }
}

impl Database for FakeConnection {
    type Error = FakeError;

    fn database_name(&self) -> &str {
        &self.database
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<(), FakeError> {
        self.open = true;
        self.opened += 1;
        Ok(())
    }

    fn execute(
        &mut self,
        sql: &str,
        parameters: &mut [SqlParameter],
        timeout: Duration,
    ) -> Result<u64, FakeError> {
        self.run(sql, parameters, timeout)
    }

    fn query(
        &mut self,
        sql: &str,
        parameters: &[SqlParameter],
        _timeout: Duration,
    ) -> Result<Vec<Vec<SqlValue>>, FakeError> {
        self.read(sql, parameters)
    }

    fn get_schema(
        &mut self,
        _database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnMetadata>, FakeError> {
        Ok(self.schema(schema, table))
    }
}

impl BulkTransport for FakeConnection {
    fn write(
        &mut self,
        destination: &str,
        buffer: &TabularBuffer,
        options: &BulkWriteOptions,
    ) -> Result<u64, FakeError> {
        self.record_write(destination, buffer, options)
    }
}

#[async_trait]
impl AsyncDatabase for FakeConnection {
    type Error = FakeError;

    fn database_name(&self) -> &str {
        &self.database
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> Result<(), FakeError> {
        self.open = true;
        self.opened += 1;
        Ok(())
    }

    async fn execute(
        &mut self,
        sql: &str,
        parameters: &mut [SqlParameter],
        timeout: Duration,
    ) -> Result<u64, FakeError> {
        self.run(sql, parameters, timeout)
    }

    async fn query(
        &mut self,
        sql: &str,
        parameters: &[SqlParameter],
        _timeout: Duration,
    ) -> Result<Vec<Vec<SqlValue>>, FakeError> {
        self.read(sql, parameters)
    }

    async fn get_schema(
        &mut self,
        _database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnMetadata>, FakeError> {
        Ok(self.schema(schema, table))
    }
}

#[async_trait]
impl AsyncBulkTransport for FakeConnection {
    async fn write(
        &mut self,
        destination: &str,
        buffer: &TabularBuffer,
        options: &BulkWriteOptions,
    ) -> Result<u64, FakeError> {
        self.record_write(destination, buffer, options)
    }
}
