//! Single object statements and condition driven deletes. These never stage anything, the
//! statement runs directly against the target.

use std::{sync::Arc, time::Duration};

use crate::{
    database::client::{ColumnDirection, SqlParameter},
    error::ConfigurationError,
    operations::{
        bulk::{select_columns, translate_all, SelectedColumn},
        identity::IdentitySpec,
        setup::{DeleteQueryTable, QueryTable},
    },
    row::shape::RowShape,
    settings::DEFAULT_TIMEOUT_SECS,
    sql::{
        identifier::{unique_parameter_names, TargetTable},
        predicate::{
            condition_parameters, validate_collation, Comparison, Connective, PredicateCondition,
        },
        statement::{
            build_delete, build_insert, build_parameter_source, build_update, build_upsert,
            MatchColumn, MergeKind, MergeStatement,
        },
    },
    types::code::Code,
};

fn default_timeout() -> Duration {
    Duration::from_secs(u64::from(DEFAULT_TIMEOUT_SECS))
}

type PendingCondition = (Comparison, Connective, Option<String>);

fn push_condition(
    conditions: &mut Vec<PendingCondition>,
    comparison: Comparison,
    connective: Connective,
    collation: Option<&str>,
) -> Result<(), ConfigurationError> {
    if let Some(collation) = collation {
        validate_collation(collation)?;
    }
    conditions.push((comparison, connective, collation.map(str::to_string)));
    Ok(())
}

/// `filter` starts the chain, `and` / `or` extend it strictly left to right.
macro_rules! condition_steps {
    ($builder:ident) => {
        impl<T> $builder<T> {
            pub fn filter(self, comparison: Comparison) -> Self {
                self.and(comparison)
            }

            pub fn filter_with_collation(
                self,
                comparison: Comparison,
                collation: &str,
            ) -> Result<Self, ConfigurationError> {
                self.and_with_collation(comparison, collation)
            }

            pub fn and(mut self, comparison: Comparison) -> Self {
                self.conditions.push((comparison, Connective::And, None));
                self
            }

            pub fn and_with_collation(
                mut self,
                comparison: Comparison,
                collation: &str,
            ) -> Result<Self, ConfigurationError> {
                push_condition(&mut self.conditions, comparison, Connective::And, Some(collation))?;
                Ok(self)
            }

            pub fn or(mut self, comparison: Comparison) -> Self {
                self.conditions.push((comparison, Connective::Or, None));
                self
            }

            pub fn or_with_collation(
                mut self,
                comparison: Comparison,
                collation: &str,
            ) -> Result<Self, ConfigurationError> {
                push_condition(&mut self.conditions, comparison, Connective::Or, Some(collation))?;
                Ok(self)
            }

            pub fn with_timeout(mut self, secs: u64) -> Self {
                self.timeout = Duration::from_secs(secs);
                self
            }
        }
    };
}

impl<T> QueryTable<T> {
    pub fn insert(self) -> QueryInsert<T> {
        QueryInsert { setup: self, identity: None, timeout: default_timeout() }
    }

    pub fn update(self) -> QueryUpdate<T> {
        QueryUpdate { setup: self, identity: None, conditions: vec![], timeout: default_timeout() }
    }

    pub fn upsert(self) -> QueryUpsert<T> {
        QueryUpsert {
            setup: self,
            identity: None,
            match_on: vec![],
            update_when: vec![],
            timeout: default_timeout(),
        }
    }
}

impl<T> DeleteQueryTable<T> {
    pub fn delete(self) -> DeleteQuery<T> {
        DeleteQuery {
            setup: self,
            conditions: vec![],
            all_records: false,
            batch_quantity: None,
            timeout: default_timeout(),
        }
    }
}

fn identity_spec<T>(
    setup: &mut QueryTable<T>,
    current: &Option<IdentitySpec>,
    name: &str,
    direction: ColumnDirection,
) -> Result<IdentitySpec, ConfigurationError> {
    if current.is_some() {
        return Err(ConfigurationError::IdentityAlreadySet);
    }
    let descriptor = setup.scalar_member(name)?;
    if direction == ColumnDirection::InputOutput && !descriptor.is_writable() {
        return Err(ConfigurationError::IdentityNotWritable(name.to_string()));
    }

    setup.columns.add(name)?;
    Ok(IdentitySpec { source: name.to_string(), destination: setup.columns.actual_name(name), direction })
}

pub struct QueryInsert<T> {
    setup: QueryTable<T>,
    identity: Option<IdentitySpec>,
    timeout: Duration,
}

impl<T> QueryInsert<T> {
    pub fn set_identity_column(self, name: &str) -> Result<Self, ConfigurationError> {
        self.set_identity_column_with_direction(name, ColumnDirection::Input)
    }

    /// With [`ColumnDirection::InputOutput`] the row receives `SCOPE_IDENTITY()`.
    pub fn set_identity_column_with_direction(
        mut self,
        name: &str,
        direction: ColumnDirection,
    ) -> Result<Self, ConfigurationError> {
        self.identity = Some(identity_spec(&mut self.setup, &self.identity, name, direction)?);
        Ok(self)
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn build(self) -> Result<QueryPlan<T>, ConfigurationError> {
        QueryPlan::new(QueryKind::Insert, self.setup, self.identity, vec![], vec![], self.timeout)
    }
}

/// `UPDATE ... SET ... WHERE`, the identity column is never assigned.
pub struct QueryUpdate<T> {
    setup: QueryTable<T>,
    identity: Option<IdentitySpec>,
    conditions: Vec<PendingCondition>,
    timeout: Duration,
}

condition_steps!(QueryUpdate);

impl<T> QueryUpdate<T> {
    pub fn set_identity_column(mut self, name: &str) -> Result<Self, ConfigurationError> {
        self.identity =
            Some(identity_spec(&mut self.setup, &self.identity, name, ColumnDirection::Input)?);
        Ok(self)
    }

    pub fn build(self) -> Result<QueryPlan<T>, ConfigurationError> {
        if self.conditions.is_empty() {
            return Err(ConfigurationError::MissingCondition("Update"));
        }
        let conditions = translate_all(&self.setup, &self.conditions, None, 0)?;
        QueryPlan::new(QueryKind::Update, self.setup, self.identity, vec![], conditions, self.timeout)
    }
}

/// MERGE of one object against the target.
pub struct QueryUpsert<T> {
    setup: QueryTable<T>,
    identity: Option<IdentitySpec>,
    match_on: Vec<(String, Option<String>)>,
    update_when: Vec<Comparison>,
    timeout: Duration,
}

impl<T> QueryUpsert<T> {
    pub fn match_target_on(mut self, name: &str) -> Result<Self, ConfigurationError> {
        self.setup.scalar_member(name)?;
        self.setup.columns.add(name)?;
        self.match_on.push((name.to_string(), None));
        Ok(self)
    }

    pub fn match_target_on_with_collation(
        mut self,
        name: &str,
        collation: &str,
    ) -> Result<Self, ConfigurationError> {
        validate_collation(collation)?;
        self.setup.scalar_member(name)?;
        self.setup.columns.add(name)?;
        self.match_on.push((name.to_string(), Some(collation.to_string())));
        Ok(self)
    }

    pub fn set_identity_column(self, name: &str) -> Result<Self, ConfigurationError> {
        self.set_identity_column_with_direction(name, ColumnDirection::Input)
    }

    pub fn set_identity_column_with_direction(
        mut self,
        name: &str,
        direction: ColumnDirection,
    ) -> Result<Self, ConfigurationError> {
        self.identity = Some(identity_spec(&mut self.setup, &self.identity, name, direction)?);
        Ok(self)
    }

    pub fn exclude_column_from_update(mut self, name: &str) -> Result<Self, ConfigurationError> {
        self.setup.member(name)?;
        self.setup.columns.exclude_from_update(name);
        Ok(self)
    }

    pub fn update_when(mut self, condition: Comparison) -> Self {
        self.update_when.push(condition);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn build(self) -> Result<QueryPlan<T>, ConfigurationError> {
        if self.match_on.is_empty() {
            return Err(ConfigurationError::MissingMatchTargetOn("Upsert"));
        }

        let update_when: Vec<PendingCondition> =
            self.update_when.into_iter().map(|c| (c, Connective::And, None)).collect();
        let conditions = translate_all(&self.setup, &update_when, Some("[Target]"), 0)?;
        let match_on = self
            .match_on
            .into_iter()
            .map(|(member, collation)| MatchColumn {
                column: self.setup.columns.actual_name(&member),
                collation,
            })
            .collect();

        QueryPlan::new(QueryKind::Upsert, self.setup, self.identity, match_on, conditions, self.timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Insert,
    Update,
    Upsert,
}

/// A validated single object statement, consumed by
/// [`BulkOperations::commit_query`](crate::BulkOperations::commit_query).
pub struct QueryPlan<T> {
    kind: QueryKind,
    shape: Arc<RowShape<T>>,
    pub(crate) table: TargetTable,
    columns: Vec<SelectedColumn>,
    parameter_names: Vec<String>,
    identity: Option<IdentitySpec>,
    match_on: Vec<MatchColumn>,
    excluded_from_update: Vec<String>,
    conditions: Vec<PredicateCondition>,
    pub(crate) timeout: Duration,
}

impl<T> QueryPlan<T> {
    fn new(
        kind: QueryKind,
        setup: QueryTable<T>,
        identity: Option<IdentitySpec>,
        match_on: Vec<MatchColumn>,
        conditions: Vec<PredicateCondition>,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let columns = select_columns(&setup);
        let excluded_from_update = setup.columns.excluded_actual_names();

        let is_identity =
            |c: &SelectedColumn| identity.as_ref().is_some_and(|i| i.source == c.member);
        let writable = columns
            .iter()
            .filter(|c| !is_identity(c))
            .filter(|c| kind == QueryKind::Insert || !excluded_from_update.contains(&c.column))
            .count();
        if writable == 0 {
            return Err(match kind {
                QueryKind::Insert => ConfigurationError::NoColumns,
                QueryKind::Update => ConfigurationError::NoUpdatableColumns("Update"),
                QueryKind::Upsert => ConfigurationError::NoUpdatableColumns("Upsert"),
            });
        }

        let reserved: Vec<String> =
            condition_parameters(&conditions).into_iter().map(|p| p.name).collect();
        let parameter_names =
            unique_parameter_names(columns.iter().map(|c| c.column.as_str()), &reserved);

        Ok(QueryPlan {
            kind,
            shape: setup.shape,
            table: setup.table,
            columns,
            parameter_names,
            identity,
            match_on,
            excluded_from_update,
            conditions,
            timeout,
        })
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    fn is_identity(&self, column: &SelectedColumn) -> bool {
        self.identity.as_ref().is_some_and(|identity| identity.source == column.member)
    }

    pub(crate) fn output_identity(&self) -> Option<(&IdentitySpec, String)> {
        self.identity
            .as_ref()
            .filter(|identity| identity.is_output() && self.kind != QueryKind::Update)
            .and_then(|identity| {
                let (_, name) = self.bound_columns().find(|(c, _)| c.member == identity.source)?;
                Some((identity, name.clone()))
            })
    }

    /// Selected columns paired with the parameter each one binds to.
    fn bound_columns(&self) -> impl Iterator<Item = (&SelectedColumn, &String)> {
        self.columns.iter().zip(&self.parameter_names)
    }

    pub(crate) fn shape(&self) -> &RowShape<T> {
        &self.shape
    }

    /// Statement text and parameters for `row`. Each selected column binds to a parameter
    /// named after its destination column, made unique within the plan. Condition parameters
    /// follow.
    pub(crate) fn render(&self, target: &str, row: &T) -> (Code, Vec<SqlParameter>) {
        let output = self.output_identity();
        let output_parameter = output.as_ref().map(|(_, name)| name.clone());

        let mut parameters: Vec<SqlParameter> = self
            .bound_columns()
            .filter_map(|(c, name)| {
                let descriptor = self.shape.find(&c.member)?;
                let name = name.clone();
                let value = descriptor.read(row);
                let parameter = if output_parameter.as_deref() == Some(name.as_str()) {
                    SqlParameter::input_output(name, value, descriptor.kind())
                } else {
                    SqlParameter::input(name, value, descriptor.kind())
                };
                Some(parameter)
            })
            .collect();

        let pairs = |include_identity: bool| -> Vec<(String, String)> {
            self.bound_columns()
                .filter(|(c, _)| include_identity || !self.is_identity(c))
                .map(|(c, name)| (c.column.clone(), name.clone()))
                .collect()
        };

        let sql = match self.kind {
            QueryKind::Insert => {
                // the identity is assigned by the engine, only an output parameter is bound
                parameters.retain(|p| {
                    !self.bound_columns().any(|(c, name)| self.is_identity(c) && *name == p.name) ||
                        p.direction == ColumnDirection::InputOutput
                });
                build_insert(target, &pairs(false), output_parameter.as_deref())
            }
            QueryKind::Update => {
                let assignments: Vec<(String, String)> = pairs(false)
                    .into_iter()
                    .filter(|(column, _)| !self.excluded_from_update.contains(column))
                    .collect();
                parameters.retain(|p| assignments.iter().any(|(_, name)| *name == p.name));
                build_update(target, &assignments, &self.conditions)
            }
            QueryKind::Upsert => {
                let source = build_parameter_source(&pairs(true));
                let columns: Vec<String> = self.columns.iter().map(|c| c.column.clone()).collect();
                let statement = MergeStatement {
                    kind: MergeKind::InsertOrUpdate,
                    target,
                    source: &source,
                    columns: &columns,
                    match_on: &self.match_on,
                    identity: self.identity.as_ref().map(|i| i.destination.as_str()),
                    excluded_from_update: &self.excluded_from_update,
                    update_conditions: &self.conditions,
                    delete_conditions: &[],
                    delete_when_not_matched: false,
                    output_identity: false,
                };
                build_upsert(&statement, output_parameter.as_deref())
            }
        };

        parameters.extend(condition_parameters(&self.conditions));
        (sql, parameters)
    }
}

/// `DELETE` driven only by conditions, or of every row.
pub struct DeleteQuery<T> {
    setup: DeleteQueryTable<T>,
    conditions: Vec<PendingCondition>,
    all_records: bool,
    batch_quantity: Option<u32>,
    timeout: Duration,
}

condition_steps!(DeleteQuery);

impl<T> DeleteQuery<T> {
    /// Deletes every row of the target. Any conditions are ignored.
    pub fn all_records(mut self) -> Self {
        self.all_records = true;
        self
    }

    /// Deletes at most `quantity` rows per round, repeating until a round deletes nothing.
    pub fn set_batch_quantity(mut self, quantity: u32) -> Self {
        self.batch_quantity = Some(quantity);
        self
    }

    pub fn build(self) -> Result<DeletePlan, ConfigurationError> {
        let conditions = if self.all_records {
            vec![]
        } else if self.conditions.is_empty() {
            return Err(ConfigurationError::MissingCondition("Delete"));
        } else {
            translate_all(&self.setup, &self.conditions, None, 0)?
        };

        Ok(DeletePlan {
            table: self.setup.table,
            conditions,
            batch_quantity: self.batch_quantity.filter(|quantity| *quantity > 0),
            timeout: self.timeout,
        })
    }
}

/// A validated delete, consumed by
/// [`BulkOperations::commit_delete`](crate::BulkOperations::commit_delete).
#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub(crate) table: TargetTable,
    pub(crate) conditions: Vec<PredicateCondition>,
    pub(crate) batch_quantity: Option<u32>,
    pub(crate) timeout: Duration,
}

impl DeletePlan {
    pub fn table(&self) -> &TargetTable {
        &self.table
    }

    pub fn batch_quantity(&self) -> Option<u32> {
        self.batch_quantity
    }

    pub(crate) fn render(&self, target: &str) -> (Code, Vec<SqlParameter>) {
        (build_delete(target, &self.conditions, self.batch_quantity), condition_parameters(&self.conditions))
    }
}
