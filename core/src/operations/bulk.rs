use std::{sync::Arc, time::Duration};

use crate::{
    database::{
        buffer::{TabularBuffer, ROW_ORDINAL_COLUMN},
        client::{BulkWriteOptions, ColumnDirection, ColumnMapping, SqlParameter},
        schema::{ColumnMetadata, TableSchema},
    },
    error::ConfigurationError,
    operations::{
        identity::IdentitySpec,
        setup::{BulkTable, TableSetup},
    },
    row::shape::{RowDescriptor, RowShape},
    settings::{BulkCopySettings, DEFAULT_TIMEOUT_SECS},
    sql::{
        identifier::TargetTable,
        predicate::{
            condition_parameters, translate, validate_collation, Comparison, Connective,
            PredicateCondition,
        },
        statement::{
            build_create_output_table, build_create_staging_table, build_drop_table, build_merge,
            build_read_output, MatchColumn, MergeKind, MergeStatement, OUTPUT_TABLE, STAGING_TABLE,
        },
    },
    types::code::Code,
};

const TARGET_ALIAS: &str = "[Target]";

impl<T> BulkTable<T> {
    pub fn bulk_insert(self) -> BulkInsert<T> {
        BulkInsert { operation: Operation::new(self), merge: MergeOptions::default() }
    }

    pub fn bulk_insert_or_update(self) -> BulkInsertOrUpdate<T> {
        BulkInsertOrUpdate { operation: Operation::new(self), merge: MergeOptions::default() }
    }

    pub fn bulk_update(self) -> BulkUpdate<T> {
        BulkUpdate { operation: Operation::new(self), merge: MergeOptions::default() }
    }

    pub fn bulk_delete(self) -> BulkDelete<T> {
        BulkDelete { operation: Operation::new(self), merge: MergeOptions::default() }
    }
}

/// State every bulk operation carries between steps.
pub(crate) struct Operation<T> {
    setup: BulkTable<T>,
    identity: Option<IdentitySpec>,
    timeout: Duration,
    disable_indexes: bool,
}

impl<T> Operation<T> {
    fn new(setup: BulkTable<T>) -> Self {
        Operation {
            setup,
            identity: None,
            timeout: Duration::from_secs(u64::from(DEFAULT_TIMEOUT_SECS)),
            disable_indexes: false,
        }
    }

    /// The identity member joins the selected columns.
    pub(crate) fn set_identity(
        &mut self,
        name: &str,
        direction: ColumnDirection,
    ) -> Result<(), ConfigurationError> {
        if self.identity.is_some() {
            return Err(ConfigurationError::IdentityAlreadySet);
        }
        let descriptor = self.setup.scalar_member(name)?;
        if direction == ColumnDirection::InputOutput && !descriptor.is_writable() {
            return Err(ConfigurationError::IdentityNotWritable(name.to_string()));
        }

        self.setup.columns.add(name)?;
        self.identity = Some(IdentitySpec {
            source: name.to_string(),
            destination: self.setup.columns.actual_name(name),
            direction,
        });
        Ok(())
    }
}

#[derive(Default)]
struct MergeOptions {
    match_on: Vec<(String, Option<String>)>,
    update_when: Vec<Comparison>,
    delete_when: Vec<Comparison>,
    delete_when_not_matched: bool,
}

macro_rules! operation_steps {
    ($builder:ident) => {
        impl<T> $builder<T> {
            /// Registers the member backed by an identity column, values are not read back.
            pub fn set_identity_column(self, name: &str) -> Result<Self, ConfigurationError> {
                self.set_identity_column_with_direction(name, ColumnDirection::Input)
            }

            /// With [`ColumnDirection::InputOutput`] every row receives its generated key once
            /// the commit completes.
            pub fn set_identity_column_with_direction(
                mut self,
                name: &str,
                direction: ColumnDirection,
            ) -> Result<Self, ConfigurationError> {
                self.operation.set_identity(name, direction)?;
                Ok(self)
            }

            /// Disables the target's non-clustered indexes for the load and rebuilds them
            /// afterwards, whether or not the load succeeds.
            pub fn tmp_disable_all_non_clustered_indexes(mut self) -> Self {
                self.operation.disable_indexes = true;
                self
            }

            /// Command timeout for every statement of this operation.
            pub fn with_timeout(mut self, secs: u64) -> Self {
                self.operation.timeout = Duration::from_secs(secs);
                self
            }
        }
    };
}

macro_rules! match_steps {
    ($builder:ident) => {
        impl<T> $builder<T> {
            /// Adds a column to the merge's match condition. Matching is null safe: two null
            /// keys pair up.
            pub fn match_target_on(mut self, name: &str) -> Result<Self, ConfigurationError> {
                self.operation.setup.scalar_member(name)?;
                self.operation.setup.columns.add(name)?;
                self.merge.match_on.push((name.to_string(), None));
                Ok(self)
            }

            pub fn match_target_on_with_collation(
                mut self,
                name: &str,
                collation: &str,
            ) -> Result<Self, ConfigurationError> {
                validate_collation(collation)?;
                self.operation.setup.scalar_member(name)?;
                self.operation.setup.columns.add(name)?;
                self.merge.match_on.push((name.to_string(), Some(collation.to_string())));
                Ok(self)
            }
        }
    };
}

/// Plain bulk load. Without an `InputOutput` identity the rows go straight to the target.
pub struct BulkInsert<T> {
    operation: Operation<T>,
    merge: MergeOptions,
}

pub struct BulkInsertOrUpdate<T> {
    operation: Operation<T>,
    merge: MergeOptions,
}

pub struct BulkUpdate<T> {
    operation: Operation<T>,
    merge: MergeOptions,
}

pub struct BulkDelete<T> {
    operation: Operation<T>,
    merge: MergeOptions,
}

operation_steps!(BulkInsert);
operation_steps!(BulkInsertOrUpdate);
operation_steps!(BulkUpdate);
operation_steps!(BulkDelete);

match_steps!(BulkInsertOrUpdate);
match_steps!(BulkUpdate);
match_steps!(BulkDelete);

impl<T> BulkInsert<T> {
    pub fn build(self) -> Result<BulkPlan<T>, ConfigurationError> {
        BulkPlan::new(MergeKind::Insert, self.operation, self.merge, vec![])
    }
}

impl<T> BulkInsertOrUpdate<T> {
    /// The excluded column keeps its current value on matched rows, it is still written on
    /// insert.
    pub fn exclude_column_from_update(mut self, name: &str) -> Result<Self, ConfigurationError> {
        self.operation.setup.member(name)?;
        self.operation.setup.columns.exclude_from_update(name);
        Ok(self)
    }

    /// Only matched rows satisfying every `update_when` condition are updated.
    pub fn update_when(mut self, condition: Comparison) -> Self {
        self.merge.update_when.push(condition);
        self
    }

    /// Deletes target rows missing from the source that satisfy the condition. Implies
    /// [`delete_when_not_matched`](Self::delete_when_not_matched).
    pub fn delete_when(mut self, condition: Comparison) -> Self {
        self.merge.delete_when.push(condition);
        self
    }

    /// Deletes every target row missing from the source.
    pub fn delete_when_not_matched(mut self, delete: bool) -> Self {
        self.merge.delete_when_not_matched = delete;
        self
    }

    pub fn build(self) -> Result<BulkPlan<T>, ConfigurationError> {
        let excluded = self.operation.setup.columns.excluded_actual_names();
        BulkPlan::new(MergeKind::InsertOrUpdate, self.operation, self.merge, excluded)
    }
}

impl<T> BulkUpdate<T> {
    pub fn exclude_column_from_update(mut self, name: &str) -> Result<Self, ConfigurationError> {
        self.operation.setup.member(name)?;
        self.operation.setup.columns.exclude_from_update(name);
        Ok(self)
    }

    pub fn update_when(mut self, condition: Comparison) -> Self {
        self.merge.update_when.push(condition);
        self
    }

    pub fn build(self) -> Result<BulkPlan<T>, ConfigurationError> {
        let excluded = self.operation.setup.columns.excluded_actual_names();
        BulkPlan::new(MergeKind::Update, self.operation, self.merge, excluded)
    }
}

impl<T> BulkDelete<T> {
    /// Only matched rows satisfying every `delete_when` condition are deleted.
    pub fn delete_when(mut self, condition: Comparison) -> Self {
        self.merge.delete_when.push(condition);
        self
    }

    pub fn build(self) -> Result<BulkPlan<T>, ConfigurationError> {
        BulkPlan::new(MergeKind::Delete, self.operation, self.merge, vec![])
    }
}

/// A selected member and the destination column it lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectedColumn {
    pub member: String,
    pub column: String,
}

pub(crate) fn select_columns<T, M>(setup: &TableSetup<T, M>) -> Vec<SelectedColumn> {
    setup
        .columns
        .selected()
        .iter()
        .map(|member| SelectedColumn {
            member: member.clone(),
            column: setup.columns.actual_name(member),
        })
        .collect()
}

/// Translates `comparisons` against destination names, numbering them from `first`.
pub(crate) fn translate_all<T, M>(
    setup: &TableSetup<T, M>,
    comparisons: &[(Comparison, Connective, Option<String>)],
    qualifier: Option<&str>,
    first: usize,
) -> Result<Vec<PredicateCondition>, ConfigurationError> {
    comparisons
        .iter()
        .enumerate()
        .map(|(i, (comparison, connective, collation))| {
            setup.member(comparison.member())?;
            let column = setup.columns.actual_name(comparison.member());
            translate(comparison, &column, qualifier, collation.as_deref(), *connective, first + i)
        })
        .collect()
}

fn all_of(comparisons: Vec<Comparison>) -> Vec<(Comparison, Connective, Option<String>)> {
    comparisons.into_iter().map(|c| (c, Connective::And, None)).collect()
}

/// A validated bulk operation, consumed by
/// [`BulkOperations::commit`](crate::BulkOperations::commit).
pub struct BulkPlan<T> {
    pub(crate) kind: MergeKind,
    pub(crate) shape: Arc<RowShape<T>>,
    pub(crate) table: TargetTable,
    pub(crate) columns: Vec<SelectedColumn>,
    pub(crate) identity: Option<IdentitySpec>,
    pub(crate) match_on: Vec<MatchColumn>,
    pub(crate) excluded_from_update: Vec<String>,
    pub(crate) update_conditions: Vec<PredicateCondition>,
    pub(crate) delete_conditions: Vec<PredicateCondition>,
    pub(crate) delete_when_not_matched: bool,
    pub(crate) settings: BulkCopySettings,
    pub(crate) timeout: Duration,
    pub(crate) disable_indexes: bool,
}

/// Statements of a staged commit, rendered before anything is sent.
#[derive(Debug, Clone)]
pub(crate) struct StagingScript {
    pub create_staging: Code,
    pub create_output: Option<Code>,
    pub merge: Code,
    pub parameters: Vec<SqlParameter>,
    pub read_output: Option<Code>,
    pub drop: Vec<Code>,
}

impl<T> BulkPlan<T> {
    fn new(
        kind: MergeKind,
        operation: Operation<T>,
        merge: MergeOptions,
        excluded_from_update: Vec<String>,
    ) -> Result<Self, ConfigurationError> {
        let Operation { setup, identity, timeout, disable_indexes } = operation;

        if kind != MergeKind::Insert && merge.match_on.is_empty() {
            return Err(ConfigurationError::MissingMatchTargetOn(kind.operation_name()));
        }
        if setup.columns.is_empty() {
            return Err(ConfigurationError::NoColumns);
        }

        let columns = select_columns(&setup);
        if matches!(kind, MergeKind::InsertOrUpdate | MergeKind::Update) {
            let updatable = columns.iter().any(|c| {
                identity.as_ref().map_or(true, |identity| identity.destination != c.column) &&
                    !excluded_from_update.contains(&c.column)
            });
            if !updatable {
                return Err(ConfigurationError::NoUpdatableColumns(kind.operation_name()));
            }
        }

        let update_when = all_of(merge.update_when);
        let update_conditions = translate_all(&setup, &update_when, Some(TARGET_ALIAS), 0)?;
        let delete_when = all_of(merge.delete_when);
        let delete_conditions =
            translate_all(&setup, &delete_when, Some(TARGET_ALIAS), update_conditions.len())?;

        let match_on = merge
            .match_on
            .into_iter()
            .map(|(member, collation)| MatchColumn {
                column: setup.columns.actual_name(&member),
                collation,
            })
            .collect();

        Ok(BulkPlan {
            kind,
            shape: setup.shape,
            table: setup.table,
            columns,
            identity,
            match_on,
            excluded_from_update,
            update_conditions,
            delete_conditions,
            delete_when_not_matched: merge.delete_when_not_matched,
            settings: setup.settings,
            timeout,
            disable_indexes,
        })
    }

    pub fn kind(&self) -> MergeKind {
        self.kind
    }

    pub fn table(&self) -> &TargetTable {
        &self.table
    }

    fn outputs_identity(&self) -> bool {
        self.identity.as_ref().is_some_and(|identity| identity.is_output())
    }

    /// Merges always need a staged source, inserts only when generated keys are read back.
    pub fn is_staged(&self) -> bool {
        self.kind != MergeKind::Insert || self.outputs_identity()
    }

    pub(crate) fn output_identity(&self) -> Option<&IdentitySpec> {
        self.identity.as_ref().filter(|identity| identity.is_output())
    }

    /// Columns handed to the transport. A direct load leaves the identity column to the
    /// engine unless the settings keep identity values.
    fn loaded_columns(&self, staged: bool) -> Vec<&SelectedColumn> {
        let keep_identity = staged || self.settings.options.keep_identity;
        self.columns
            .iter()
            .filter(|c| {
                keep_identity || self.identity.as_ref().map_or(true, |i| i.source != c.member)
            })
            .collect()
    }

    pub(crate) fn buffer(&self, rows: &[T], staged: bool) -> TabularBuffer {
        let columns = self.loaded_columns(staged);
        let descriptors: Vec<&RowDescriptor<T>> =
            columns.iter().filter_map(|c| self.shape.find(&c.member)).collect();
        let names = columns.iter().map(|c| c.member.clone()).collect();

        TabularBuffer::from_rows(names, &descriptors, rows, staged)
    }

    pub(crate) fn write_options(&self, staged: bool) -> BulkWriteOptions {
        let mut column_mappings: Vec<ColumnMapping> = self
            .loaded_columns(staged)
            .into_iter()
            .map(|c| ColumnMapping { source: c.member.clone(), destination: c.column.clone() })
            .collect();
        if staged {
            column_mappings.push(ColumnMapping {
                source: ROW_ORDINAL_COLUMN.to_string(),
                destination: ROW_ORDINAL_COLUMN.to_string(),
            });
        }

        BulkWriteOptions {
            batch_size: self.settings.batch_size,
            timeout: self.settings.timeout(),
            enable_streaming: self.settings.enable_streaming,
            options: self.settings.options,
            column_mappings,
        }
    }

    fn column_metadata<'s>(
        &self,
        schema: &'s TableSchema,
        column: &str,
    ) -> Result<&'s ColumnMetadata, ConfigurationError> {
        schema.find(column).ok_or_else(|| ConfigurationError::ColumnNotInTable {
            column: column.to_string(),
            table: self.table.to_string(),
        })
    }

    pub(crate) fn staging_script(
        &self,
        schema: &TableSchema,
        target: &str,
    ) -> Result<StagingScript, ConfigurationError> {
        let staged_columns = self
            .columns
            .iter()
            .map(|c| self.column_metadata(schema, &c.column))
            .collect::<Result<Vec<_>, _>>()?;

        let output = self.output_identity();
        let create_output = match output {
            Some(identity) => {
                Some(build_create_output_table(self.column_metadata(schema, &identity.destination)?))
            }
            None => None,
        };

        let columns: Vec<String> = self.columns.iter().map(|c| c.column.clone()).collect();
        let statement = MergeStatement {
            kind: self.kind,
            target,
            source: STAGING_TABLE,
            columns: &columns,
            match_on: &self.match_on,
            identity: self.identity.as_ref().map(|i| i.destination.as_str()),
            excluded_from_update: &self.excluded_from_update,
            update_conditions: &self.update_conditions,
            delete_conditions: &self.delete_conditions,
            delete_when_not_matched: self.delete_when_not_matched,
            output_identity: output.is_some(),
        };

        let mut parameters = condition_parameters(&self.update_conditions);
        parameters.extend(condition_parameters(&self.delete_conditions));

        let mut drop = vec![build_drop_table(STAGING_TABLE)];
        if output.is_some() {
            drop.push(build_drop_table(OUTPUT_TABLE));
        }

        Ok(StagingScript {
            create_staging: build_create_staging_table(&staged_columns),
            create_output,
            merge: build_merge(&statement),
            parameters,
            read_output: output.map(|identity| build_read_output(&identity.destination)),
            drop,
        })
    }
}
