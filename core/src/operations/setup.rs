use std::{marker::PhantomData, sync::Arc};

use crate::{
    error::ConfigurationError,
    operations::column_set::ColumnSet,
    row::{
        dynamic::{DynamicRow, PropertyTypes},
        shape::{RowDescriptor, RowShape},
        value::ValueKind,
    },
    settings::BulkCopySettings,
    sql::identifier::TargetTable,
};

/// Marker for operations over a collection of rows.
#[derive(Debug, Clone, Copy)]
pub struct ForCollection;

/// Marker for single object statements.
#[derive(Debug, Clone, Copy)]
pub struct ForObject;

/// Marker for delete statements driven only by conditions.
#[derive(Debug, Clone, Copy)]
pub struct ForDeleteQuery;

/// First step of every operation: the row type is known, the table is not.
pub struct Setup<T> {
    shape: Option<Arc<RowShape<T>>>,
}

impl<T> Setup<T> {
    pub(crate) fn new(shape: Option<Arc<RowShape<T>>>) -> Self {
        Setup { shape }
    }

    pub fn for_collection(self) -> PendingTable<T, ForCollection> {
        PendingTable { shape: self.shape, marker: PhantomData }
    }

    pub fn for_object(self) -> PendingTable<T, ForObject> {
        PendingTable { shape: self.shape, marker: PhantomData }
    }

    pub fn for_delete_query(self) -> PendingTable<T, ForDeleteQuery> {
        PendingTable { shape: self.shape, marker: PhantomData }
    }
}

impl Setup<DynamicRow> {
    pub fn with_property_types(self, types: &PropertyTypes) -> Self {
        Setup { shape: Some(Arc::new(RowShape::from_property_types(types))) }
    }
}

pub struct PendingTable<T, M> {
    shape: Option<Arc<RowShape<T>>>,
    marker: PhantomData<M>,
}

impl<T, M> PendingTable<T, M> {
    /// Accepts `table` or `schema.table`. Fails for a dynamic row type set up without
    /// property types.
    pub fn with_table(self, name: &str) -> Result<TableSetup<T, M>, ConfigurationError> {
        let shape = self.shape.ok_or(ConfigurationError::MissingPropertyTypes)?;
        let table = TargetTable::parse(name)?;

        Ok(TableSetup {
            shape,
            table,
            columns: ColumnSet::new(),
            settings: BulkCopySettings::default(),
            marker: PhantomData,
        })
    }
}

/// Table and column selection shared by every operation kind.
pub struct TableSetup<T, M> {
    pub(crate) shape: Arc<RowShape<T>>,
    pub(crate) table: TargetTable,
    pub(crate) columns: ColumnSet,
    pub(crate) settings: BulkCopySettings,
    marker: PhantomData<M>,
}

pub type BulkTable<T> = TableSetup<T, ForCollection>;
pub type QueryTable<T> = TableSetup<T, ForObject>;
pub type DeleteQueryTable<T> = TableSetup<T, ForDeleteQuery>;

impl<T, M> TableSetup<T, M> {
    pub fn with_schema(mut self, schema: &str) -> Result<Self, ConfigurationError> {
        self.table = self.table.with_schema(schema)?;
        Ok(self)
    }

    pub fn add_column(mut self, name: &str) -> Result<Self, ConfigurationError> {
        self.scalar_member(name)?;
        self.columns.add(name)?;
        Ok(self)
    }

    pub fn add_column_as(mut self, name: &str, destination: &str) -> Result<Self, ConfigurationError> {
        self.scalar_member(name)?;
        self.columns.add_as(name, destination)?;
        Ok(self)
    }

    pub fn add_columns<I, S>(mut self, names: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self = self.add_column(name.as_ref())?;
        }
        Ok(self)
    }

    /// Selects every scalar member, composite members are skipped. Fails when two members
    /// resolve to the same destination column.
    pub fn add_all_columns(mut self) -> Result<Self, ConfigurationError> {
        let names: Vec<String> = self.shape.bulk_loadable().map(|d| d.name().to_string()).collect();
        for name in names {
            self.columns.add(&name)?;
        }
        Ok(self)
    }

    pub fn remove_column(mut self, name: &str) -> Result<Self, ConfigurationError> {
        self.columns.remove(name)?;
        Ok(self)
    }

    pub fn custom_column_mapping(
        mut self,
        name: &str,
        destination: &str,
    ) -> Result<Self, ConfigurationError> {
        self.member(name)?;
        self.columns.map_custom(name, destination)?;
        Ok(self)
    }

    pub fn table(&self) -> &TargetTable {
        &self.table
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub(crate) fn member(&self, name: &str) -> Result<&RowDescriptor<T>, ConfigurationError> {
        self.shape.find(name).ok_or_else(|| ConfigurationError::UnknownColumn(name.to_string()))
    }

    pub(crate) fn scalar_member(&self, name: &str) -> Result<&RowDescriptor<T>, ConfigurationError> {
        let descriptor = self.member(name)?;
        if descriptor.kind() == ValueKind::Composite {
            return Err(ConfigurationError::CompositeColumn(name.to_string()));
        }
        Ok(descriptor)
    }
}

impl<T> TableSetup<T, ForCollection> {
    pub fn with_bulk_copy_settings(mut self, settings: BulkCopySettings) -> Self {
        self.settings = settings;
        self
    }
}
