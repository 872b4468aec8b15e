use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    database::client::{AsyncDatabase, Database},
    error::{BulkError, ConfigurationError},
    sql::identifier::{unquote_identifier, TargetTable},
};

/// One destination column as reported by the engine's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    /// Character or byte length, `-1` for `(max)`.
    pub max_length: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub datetime_precision: Option<u8>,
    pub is_nullable: bool,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        ColumnMetadata {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            precision: None,
            scale: None,
            datetime_precision: None,
            is_nullable: true,
        }
    }

    pub fn with_max_length(mut self, max_length: i32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn with_datetime_precision(mut self, precision: u8) -> Self {
        self.datetime_precision = Some(precision);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnMetadata>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        TableSchema { columns }
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Catalog names compare case-insensitively.
    pub fn find(&self, column: &str) -> Option<&ColumnMetadata> {
        let column = unquote_identifier(column);
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(&column))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl SchemaKey {
    pub fn new(database: &str, table: &TargetTable) -> Self {
        SchemaKey {
            database: unquote_identifier(database),
            schema: unquote_identifier(table.schema()),
            table: unquote_identifier(table.table()),
        }
    }
}

/// Destination metadata fetched once per (database, schema, table) and kept for the life of
/// the owning [`BulkOperations`](crate::BulkOperations). Writes go through `&mut self`, so
/// sharing one cache between threads needs outside synchronization; the usual setup is one
/// operations object per concurrent caller.
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: HashMap<SchemaKey, Arc<TableSchema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        SchemaCache { tables: HashMap::new() }
    }

    pub fn get(&self, key: &SchemaKey) -> Option<Arc<TableSchema>> {
        self.tables.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    fn store(
        &mut self,
        key: SchemaKey,
        table: &TargetTable,
        columns: Vec<ColumnMetadata>,
    ) -> Result<Arc<TableSchema>, ConfigurationError> {
        if columns.is_empty() {
            return Err(ConfigurationError::TableNotFound(table.to_string()));
        }

        let schema = Arc::new(TableSchema::new(columns));
        self.tables.insert(key, Arc::clone(&schema));
        Ok(schema)
    }

    pub fn fetch<C: Database>(
        &mut self,
        connection: &mut C,
        table: &TargetTable,
    ) -> Result<Arc<TableSchema>, BulkError<C::Error>> {
        let key = SchemaKey::new(connection.database_name(), table);
        if let Some(schema) = self.get(&key) {
            return Ok(schema);
        }

        debug!("Fetching destination metadata for {}.{}.{}", key.database, key.schema, key.table);
        let columns = connection
            .get_schema(&key.database, &key.schema, &key.table)
            .map_err(BulkError::from_engine)?;

        Ok(self.store(key, table, columns)?)
    }

    pub async fn fetch_async<C: AsyncDatabase>(
        &mut self,
        connection: &mut C,
        table: &TargetTable,
    ) -> Result<Arc<TableSchema>, BulkError<C::Error>> {
        let key = SchemaKey::new(connection.database_name(), table);
        if let Some(schema) = self.get(&key) {
            return Ok(schema);
        }

        debug!("Fetching destination metadata for {}.{}.{}", key.database, key.schema, key.table);
        let columns = connection
            .get_schema(&key.database, &key.schema, &key.table)
            .await
            .map_err(BulkError::from_engine)?;

        Ok(self.store(key, table, columns)?)
    }
}
