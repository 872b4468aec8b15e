pub mod bulk;
pub mod column_set;
pub mod identity;
mod orchestrator;
pub mod query;
pub mod setup;

use std::sync::Arc;

use crate::{
    database::{
        client::{AsyncBulkTransport, AsyncDatabase, BulkTransport, Database},
        schema::{SchemaCache, TableSchema},
    },
    error::BulkError,
    operations::{
        bulk::BulkPlan,
        query::{DeletePlan, QueryPlan},
        setup::Setup,
    },
    row::{dynamic::DynamicRow, shape::BulkEntity},
    sql::identifier::TargetTable,
};

/// Entry point for every operation. Owns the destination metadata cache, so keep one
/// instance around for the life of a connection or transaction and give each concurrent
/// caller its own.
#[derive(Debug, Default)]
pub struct BulkOperations {
    schema_cache: SchemaCache,
}

impl BulkOperations {
    pub fn new() -> Self {
        BulkOperations::default()
    }

    pub fn setup<T: BulkEntity>(&self) -> Setup<T> {
        Setup::new(Some(T::shape()))
    }

    /// Rows without a static shape. Call
    /// [`with_property_types`](Setup::with_property_types) before choosing a table.
    pub fn setup_dynamic(&self) -> Setup<DynamicRow> {
        Setup::new(None)
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    /// Fetches and caches the destination metadata of `table_name` ahead of a commit, for
    /// instance before a transaction is opened on the connection.
    pub fn prepare<C: Database>(
        &mut self,
        connection: &mut C,
        table_name: &str,
    ) -> Result<Arc<TableSchema>, BulkError<C::Error>> {
        let table = TargetTable::parse(table_name)?;
        if !connection.is_open() {
            connection.open().map_err(BulkError::from_engine)?;
        }
        self.schema_cache.fetch(connection, &table)
    }

    pub async fn prepare_async<C: AsyncDatabase>(
        &mut self,
        connection: &mut C,
        table_name: &str,
    ) -> Result<Arc<TableSchema>, BulkError<C::Error>> {
        let table = TargetTable::parse(table_name)?;
        if !connection.is_open() {
            connection.open().await.map_err(BulkError::from_engine)?;
        }
        self.schema_cache.fetch_async(connection, &table).await
    }

    /// Runs a bulk plan against `rows`. Returns the row count reported by the engine, with
    /// an `InputOutput` identity every row holds its generated key afterwards.
    ///
    /// Statements run inside whatever transaction is active on `connection`, nothing is
    /// committed or rolled back here.
    pub fn commit<T, C: BulkTransport>(
        &mut self,
        plan: BulkPlan<T>,
        connection: &mut C,
        rows: &mut [T],
    ) -> Result<u64, BulkError<C::Error>> {
        orchestrator::commit(&mut self.schema_cache, &plan, connection, rows)
    }

    pub async fn commit_async<T, C: AsyncBulkTransport>(
        &mut self,
        plan: BulkPlan<T>,
        connection: &mut C,
        rows: &mut [T],
    ) -> Result<u64, BulkError<C::Error>> {
        orchestrator::commit_async(&mut self.schema_cache, &plan, connection, rows).await
    }

    pub fn commit_query<T, C: Database>(
        &self,
        plan: QueryPlan<T>,
        connection: &mut C,
        row: &mut T,
    ) -> Result<u64, BulkError<C::Error>> {
        orchestrator::commit_query(&plan, connection, row)
    }

    pub async fn commit_query_async<T, C: AsyncDatabase>(
        &self,
        plan: QueryPlan<T>,
        connection: &mut C,
        row: &mut T,
    ) -> Result<u64, BulkError<C::Error>> {
        orchestrator::commit_query_async(&plan, connection, row).await
    }

    pub fn commit_delete<C: Database>(
        &self,
        plan: DeletePlan,
        connection: &mut C,
    ) -> Result<u64, BulkError<C::Error>> {
        orchestrator::commit_delete(&plan, connection)
    }

    pub async fn commit_delete_async<C: AsyncDatabase>(
        &self,
        plan: DeletePlan,
        connection: &mut C,
    ) -> Result<u64, BulkError<C::Error>> {
        orchestrator::commit_delete_async(&plan, connection).await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use super::*;
    use crate::{
        bulk_entity,
        database::{
            buffer::ROW_ORDINAL_COLUMN,
            client::ColumnDirection,
            schema::ColumnMetadata,
            testing::{FakeConnection, FakeError},
        },
        error::ConfigurationError,
        row::value::{SqlValue, ValueKind},
        sql::predicate::col,
    };

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Book {
        id: i32,
        isbn: String,
        title: String,
        price: f64,
    }

    bulk_entity!(Book {
        fields: [id, isbn, title, price],
    });

    fn books() -> Vec<Book> {
        vec![
            Book { isbn: "111".to_string(), title: "Dune".to_string(), price: 9.5, ..Default::default() },
            Book { isbn: "222".to_string(), title: "Emma".to_string(), price: 4.0, ..Default::default() },
            Book { isbn: "333".to_string(), title: "Ulysses".to_string(), price: 12.0, ..Default::default() },
        ]
    }

    fn books_table() -> Vec<ColumnMetadata> {
        vec![
            ColumnMetadata::new("id", "int").not_null(),
            ColumnMetadata::new("isbn", "varchar").with_max_length(13),
            ColumnMetadata::new("title", "nvarchar").with_max_length(256),
            ColumnMetadata::new("price", "decimal").with_precision(10, 2),
        ]
    }

    fn connection() -> FakeConnection {
        FakeConnection::new("Library").with_table("dbo", "Books", books_table())
    }

    #[test]
    fn test_empty_rows_do_no_io() {
        let mut operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_collection()
            .with_table("Books")
            .unwrap()
            .add_all_columns()
            .unwrap()
            .bulk_insert_or_update()
            .match_target_on("isbn")
            .unwrap()
            .build()
            .unwrap();
        let mut connection = FakeConnection::new("Library").closed();

        let affected = operations.commit(plan, &mut connection, &mut []).unwrap();

        assert_eq!(affected, 0);
        assert_eq!(connection.opened, 0);
        assert_eq!(connection.schema_requests, 0);
        assert!(connection.executed.is_empty());
        assert!(connection.writes.is_empty());
    }

    #[test]
    fn test_plain_insert_writes_to_target() {
        let mut operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_collection()
            .with_table("Books")
            .unwrap()
            .add_columns(["isbn", "title"])
            .unwrap()
            .bulk_insert()
            .build()
            .unwrap();
        let mut connection = FakeConnection::new("Library").closed();
        let mut rows = books();

        let affected = operations.commit(plan, &mut connection, &mut rows).unwrap();

        assert_eq!(affected, 3);
        assert_eq!(connection.opened, 1);
        assert_eq!(connection.schema_requests, 0);
        assert!(connection.executed.is_empty());
        assert_eq!(connection.writes.len(), 1);
        assert_eq!(connection.writes[0].destination, "[Library].[dbo].[Books]");
        assert_eq!(connection.writes[0].buffer.columns(), &["isbn", "title"]);
    }

    #[test]
    fn test_insert_reads_identities_back_by_ordinal() {
        let mut operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_collection()
            .with_table("Books")
            .unwrap()
            .add_columns(["isbn", "title"])
            .unwrap()
            .bulk_insert()
            .set_identity_column_with_direction("id", ColumnDirection::InputOutput)
            .unwrap()
            .build()
            .unwrap();
        let mut connection = connection().with_affected(&[0, 0, 3]).with_query_result(vec![
            vec![SqlValue::I64(1), SqlValue::I32(11)],
            vec![SqlValue::I64(0), SqlValue::I32(10)],
            vec![SqlValue::I64(2), SqlValue::I32(12)],
        ]);
        let mut rows = books();

        let affected = operations.commit(plan, &mut connection, &mut rows).unwrap();

        assert_eq!(affected, 3);
        assert_eq!(rows.iter().map(|b| b.id).collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(connection.writes[0].destination, "#TmpTable");
        assert_eq!(
            connection.writes[0].buffer.columns().last().map(String::as_str),
            Some(ROW_ORDINAL_COLUMN)
        );

        let executed = &connection.executed;
        assert!(executed[0].starts_with("CREATE TABLE #TmpTable"));
        assert!(executed[1].starts_with("CREATE TABLE #TmpOutput"));
        assert!(executed[2].starts_with("MERGE INTO [Library].[dbo].[Books]"));
        assert!(executed[3].starts_with("SELECT [__row_ordinal], [id] FROM #TmpOutput"));
        assert_eq!(executed[4], "DROP TABLE #TmpTable;");
        assert_eq!(executed[5], "DROP TABLE #TmpOutput;");
    }

    #[test]
    fn test_schema_is_fetched_once_per_table() {
        let mut operations = BulkOperations::new();
        let mut connection = connection();

        for _ in 0..2 {
            let plan = operations
                .setup::<Book>()
                .for_collection()
                .with_table("Books")
                .unwrap()
                .add_all_columns()
                .unwrap()
                .bulk_update()
                .match_target_on("isbn")
                .unwrap()
                .build()
                .unwrap();
            operations.commit(plan, &mut connection, &mut books()).unwrap();
        }

        assert_eq!(connection.schema_requests, 1);
        assert_eq!(operations.schema_cache().len(), 1);
    }

    #[test]
    fn test_prepare_warms_the_cache() {
        let mut operations = BulkOperations::new();
        let mut connection = connection().closed();

        let schema = operations.prepare(&mut connection, "dbo.Books").unwrap();
        assert_eq!(schema.columns().len(), 4);
        assert_eq!(connection.opened, 1);

        let err = operations.prepare(&mut connection, "dbo.Missing").unwrap_err();
        assert!(matches!(err, BulkError::Configuration(ConfigurationError::TableNotFound(_))));
    }

    #[test]
    fn test_identity_violation_is_translated() {
        let mut operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_collection()
            .with_table("Books")
            .unwrap()
            .add_all_columns()
            .unwrap()
            .bulk_insert_or_update()
            .match_target_on("isbn")
            .unwrap()
            .build()
            .unwrap();
        let mut connection =
            connection().failing_on("MERGE", FakeError::new(544, "Cannot insert explicit value"));

        let err = operations.commit(plan, &mut connection, &mut books()).unwrap_err();

        assert!(err.is_identity());
        assert!(err.to_string().contains("set_identity_column"));
        assert_eq!(connection.executed_containing("DROP TABLE #TmpTable").len(), 1);
    }

    #[test]
    fn test_other_engine_errors_pass_through() {
        let mut operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_collection()
            .with_table("Books")
            .unwrap()
            .add_all_columns()
            .unwrap()
            .bulk_insert()
            .build()
            .unwrap();
        let mut connection = connection().failing_writes(FakeError::new(2627, "duplicate key"));

        let err = operations.commit(plan, &mut connection, &mut books()).unwrap_err();
        assert!(matches!(err, BulkError::Engine(FakeError { code: 2627, .. })));
    }

    #[test]
    fn test_indexes_are_rebuilt_after_a_failed_load() {
        let mut operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_collection()
            .with_table("Books")
            .unwrap()
            .add_all_columns()
            .unwrap()
            .bulk_insert()
            .tmp_disable_all_non_clustered_indexes()
            .build()
            .unwrap();
        let mut connection = connection().failing_writes(FakeError::new(4815, "bad column length"));

        let err = operations.commit(plan, &mut connection, &mut books()).unwrap_err();

        assert!(matches!(err, BulkError::Engine(FakeError { code: 4815, .. })));
        assert_eq!(connection.executed.len(), 2);
        assert!(connection.executed[0].contains("DISABLE"));
        assert_eq!(connection.executed[1], "ALTER INDEX ALL ON [Library].[dbo].[Books] REBUILD;");

        let names: Vec<&str> = connection.parameters[0].iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@TableName", "@SchemaName"]);
        assert_eq!(connection.parameters[0][0].value, SqlValue::String("Books".to_string()));
    }

    #[test]
    fn test_timeout_reaches_every_statement() {
        let mut operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_collection()
            .with_table("Books")
            .unwrap()
            .add_all_columns()
            .unwrap()
            .bulk_delete()
            .match_target_on("isbn")
            .unwrap()
            .with_timeout(30)
            .build()
            .unwrap();
        let mut connection = connection();

        operations.commit(plan, &mut connection, &mut books()).unwrap();

        assert!(!connection.timeouts.is_empty());
        assert!(connection.timeouts.iter().all(|t| *t == Duration::from_secs(30)));
    }

    #[test]
    fn test_query_insert_copies_scope_identity_back() {
        let operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_object()
            .with_table("Books")
            .unwrap()
            .add_columns(["isbn", "title"])
            .unwrap()
            .insert()
            .set_identity_column_with_direction("id", ColumnDirection::InputOutput)
            .unwrap()
            .build()
            .unwrap();
        let mut connection =
            connection().with_affected(&[1]).with_output_value("@id", SqlValue::I32(77));
        let mut book = books().remove(0);

        let affected = operations.commit_query(plan, &mut connection, &mut book).unwrap();

        assert_eq!(affected, 1);
        assert_eq!(book.id, 77);
        assert!(connection.executed[0].starts_with("INSERT INTO [Library].[dbo].[Books]"));
    }

    #[test]
    fn test_batched_delete_loops_until_nothing_is_left() {
        let operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_delete_query()
            .with_table("Books")
            .unwrap()
            .delete()
            .filter(col("price").lt(5.0))
            .set_batch_quantity(100)
            .build()
            .unwrap();
        let mut connection = connection().with_affected(&[100, 100, 7]);

        let deleted = operations.commit_delete(plan, &mut connection).unwrap();

        assert_eq!(deleted, 207);
        assert_eq!(connection.executed.len(), 4);
        assert!(connection.executed.iter().all(|sql| sql.starts_with("DELETE TOP (100) FROM")));
        assert_eq!(connection.parameters[3][0].name, "@price_condition0");
    }

    #[test]
    fn test_unbatched_delete_runs_once() {
        let operations = BulkOperations::new();
        let plan = operations
            .setup::<Book>()
            .for_delete_query()
            .with_table("Books")
            .unwrap()
            .delete()
            .all_records()
            .build()
            .unwrap();
        let mut connection = connection().with_affected(&[42]);

        assert_eq!(operations.commit_delete(plan, &mut connection).unwrap(), 42);
        assert_eq!(connection.executed, vec!["DELETE FROM [Library].[dbo].[Books];".to_string()]);
    }

    #[test]
    fn test_dynamic_rows_round_trip_identity() {
        let mut operations = BulkOperations::new();
        let types = BTreeMap::from([
            ("id".to_string(), ValueKind::I32),
            ("isbn".to_string(), ValueKind::String),
        ]);
        let plan = operations
            .setup_dynamic()
            .with_property_types(&types)
            .for_collection()
            .with_table("Books")
            .unwrap()
            .add_column("isbn")
            .unwrap()
            .bulk_insert()
            .set_identity_column_with_direction("id", ColumnDirection::InputOutput)
            .unwrap()
            .build()
            .unwrap();
        let mut rows = vec![DynamicRow::new().with("isbn", "999".to_string())];
        let mut connection = connection()
            .with_affected(&[0, 0, 1])
            .with_query_result(vec![vec![SqlValue::I64(0), SqlValue::I64(5)]]);

        operations.commit(plan, &mut connection, &mut rows).unwrap();

        assert_eq!(rows[0].get("id"), Some(&SqlValue::I32(5)));
    }

    #[tokio::test]
    async fn test_async_commit_issues_the_same_statements() {
        let build = |operations: &BulkOperations| {
            operations
                .setup::<Book>()
                .for_collection()
                .with_table("Books")
                .unwrap()
                .add_all_columns()
                .unwrap()
                .bulk_insert_or_update()
                .match_target_on("isbn")
                .unwrap()
                .set_identity_column_with_direction("id", ColumnDirection::InputOutput)
                .unwrap()
                .tmp_disable_all_non_clustered_indexes()
                .build()
                .unwrap()
        };
        let output = vec![vec![SqlValue::I64(0), SqlValue::I32(1)]];

        let mut sync_operations = BulkOperations::new();
        let mut sync_connection = connection().with_query_result(output.clone());
        let mut sync_rows = books();
        let plan = build(&sync_operations);
        sync_operations.commit(plan, &mut sync_connection, &mut sync_rows).unwrap();

        let mut async_operations = BulkOperations::new();
        let mut async_connection = connection().with_query_result(output);
        let mut async_rows = books();
        let plan = build(&async_operations);
        async_operations.commit_async(plan, &mut async_connection, &mut async_rows).await.unwrap();

        assert_eq!(sync_connection.executed, async_connection.executed);
        assert_eq!(sync_connection.writes.len(), async_connection.writes.len());
        assert_eq!(sync_rows, async_rows);
        assert_eq!(async_rows[0].id, 1);
    }

    #[tokio::test]
    async fn test_async_delete_and_query() {
        let operations = BulkOperations::new();
        let mut connection = connection().with_affected(&[1, 3, 0]);

        let update = operations
            .setup::<Book>()
            .for_object()
            .with_table("Books")
            .unwrap()
            .add_column("title")
            .unwrap()
            .update()
            .filter(col("isbn").eq("111".to_string()))
            .build()
            .unwrap();
        let mut book = books().remove(0);
        assert_eq!(operations.commit_query_async(update, &mut connection, &mut book).await.unwrap(), 1);

        let delete = operations
            .setup::<Book>()
            .for_delete_query()
            .with_table("Books")
            .unwrap()
            .delete()
            .all_records()
            .set_batch_quantity(3)
            .build()
            .unwrap();
        assert_eq!(operations.commit_delete_async(delete, &mut connection).await.unwrap(), 3);
        assert_eq!(connection.executed.len(), 3);
    }
}
