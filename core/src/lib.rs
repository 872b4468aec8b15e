// public
pub mod database;
pub mod error;
pub mod settings;
pub mod sql;

mod logger;
pub use logger::{setup_info_logger, setup_logger, setup_statement_logger};

mod operations;
pub use operations::{
    bulk::{BulkDelete, BulkInsert, BulkInsertOrUpdate, BulkPlan, BulkUpdate},
    column_set::ColumnSet,
    query::{DeletePlan, DeleteQuery, QueryInsert, QueryKind, QueryPlan, QueryUpdate, QueryUpsert},
    setup::{
        BulkTable, DeleteQueryTable, ForCollection, ForDeleteQuery, ForObject, PendingTable,
        QueryTable, Setup, TableSetup,
    },
    BulkOperations,
};

mod row;
pub use row::{
    dynamic::{DynamicRow, PropertyTypes},
    shape::{BulkEntity, Getter, RowDescriptor, RowShape, RowShapeBuilder, Setter},
    value::{ColumnValue, ConversionError, SqlValue, ValueKind},
};

mod types;
pub use types::code::Code;

pub use database::{
    buffer::TabularBuffer,
    client::{
        AsyncBulkTransport, AsyncDatabase, BulkTransport, BulkWriteOptions, ColumnDirection,
        ColumnMapping, Database, NativeError, SqlParameter,
    },
    schema::{ColumnMetadata, SchemaCache, TableSchema},
};
pub use error::{BulkError, ConfigurationError};
pub use settings::{BulkCopyOptions, BulkCopySettings, SettingsError};
pub use sql::{
    identifier::TargetTable,
    predicate::{col, Comparison, ComparisonOperator, Connective},
    statement::MergeKind,
};

// export 3rd party dependencies
pub use async_trait::async_trait;

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}
