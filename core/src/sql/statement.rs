//! SQL text for staging, merging and the single-object statements.
//!
//! Everything in here is a pure function of already validated input, column names arrive
//! as destination names and conditions arrive translated.

use crate::{
    database::{buffer::ROW_ORDINAL_COLUMN, schema::ColumnMetadata},
    sql::{
        identifier::quote_identifier,
        predicate::{render_conditions, PredicateCondition},
    },
    types::code::Code,
};

pub const STAGING_TABLE: &str = "#TmpTable";
pub const OUTPUT_TABLE: &str = "#TmpOutput";

/// Statement kinds that run as a MERGE against a staged source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Insert,
    InsertOrUpdate,
    Update,
    Delete,
}

impl MergeKind {
    pub fn operation_name(&self) -> &'static str {
        match self {
            MergeKind::Insert => "BulkInsert",
            MergeKind::InsertOrUpdate => "BulkInsertOrUpdate",
            MergeKind::Update => "BulkUpdate",
            MergeKind::Delete => "BulkDelete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchColumn {
    pub column: String,
    pub collation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MergeStatement<'a> {
    pub kind: MergeKind,
    /// Fully qualified target name.
    pub target: &'a str,
    /// `#TmpTable` or a derived table such as `(SELECT @a AS [a])`.
    pub source: &'a str,
    pub columns: &'a [String],
    pub match_on: &'a [MatchColumn],
    pub identity: Option<&'a str>,
    pub excluded_from_update: &'a [String],
    pub update_conditions: &'a [PredicateCondition],
    pub delete_conditions: &'a [PredicateCondition],
    pub delete_when_not_matched: bool,
    /// Capture `(ordinal, identity)` pairs into [`OUTPUT_TABLE`].
    pub output_identity: bool,
}

impl MergeStatement<'_> {
    fn is_identity(&self, column: &str) -> bool {
        self.identity.is_some_and(|identity| identity == column)
    }

    pub fn update_columns(&self) -> Vec<&String> {
        self.columns
            .iter()
            .filter(|c| !self.is_identity(c) && !self.excluded_from_update.contains(c))
            .collect()
    }

    pub fn insert_columns(&self) -> Vec<&String> {
        self.columns.iter().filter(|c| !self.is_identity(c)).collect()
    }
}

/// Renders a destination column type with its length, precision or scale.
pub fn render_column_type(column: &ColumnMetadata) -> String {
    let data_type = column.data_type.to_lowercase();
    match data_type.as_str() {
        "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => {
            match column.max_length {
                Some(-1) => format!("{}(max)", data_type),
                Some(length) => format!("{}({})", data_type, length),
                None => data_type,
            }
        }
        "decimal" | "numeric" => match (column.precision, column.scale) {
            (Some(precision), Some(scale)) => format!("{}({}, {})", data_type, precision, scale),
            (Some(precision), None) => format!("{}({})", data_type, precision),
            _ => data_type,
        },
        "datetime2" | "datetimeoffset" | "time" => match column.datetime_precision {
            Some(precision) => format!("{}({})", data_type, precision),
            None => data_type,
        },
        _ => data_type,
    }
}

/// Staging columns are always nullable: identity values are not known yet and the real
/// constraints are enforced by the target.
pub fn build_create_staging_table(columns: &[&ColumnMetadata]) -> Code {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|column| format!("{} {}", quote_identifier(&column.name), render_column_type(column)))
        .collect();
    definitions.push(format!("{} bigint NOT NULL", quote_identifier(ROW_ORDINAL_COLUMN)));

    Code::new(format!("CREATE TABLE {} ({});", STAGING_TABLE, definitions.join(", ")))
}

pub fn build_create_output_table(identity: &ColumnMetadata) -> Code {
    Code::new(format!(
        "CREATE TABLE {} ({} bigint, {} {});",
        OUTPUT_TABLE,
        quote_identifier(ROW_ORDINAL_COLUMN),
        quote_identifier(&identity.name),
        render_column_type(identity)
    ))
}

/// `([Target].[c] = [Source].[c] OR ([Target].[c] IS NULL AND [Source].[c] IS NULL))` per
/// column, so two null keys pair up.
pub fn build_match_condition(match_on: &[MatchColumn]) -> String {
    match_on
        .iter()
        .map(|match_column| {
            let column = quote_identifier(&match_column.column);
            let collate = match &match_column.collation {
                Some(collation) => format!(" COLLATE {}", collation),
                None => String::new(),
            };
            format!(
                "([Target].{column}{collate} = [Source].{column}{collate} OR ([Target].{column} IS NULL AND [Source].{column} IS NULL))",
                column = column,
                collate = collate
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn gated(conditions: &[PredicateCondition]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" AND ({})", render_conditions(conditions))
    }
}

pub fn build_merge(statement: &MergeStatement) -> Code {
    let mut sql = Code::blank();
    sql.push_line(&format!("MERGE INTO {} WITH (HOLDLOCK) AS [Target]", statement.target));
    sql.push_line(&format!("USING {} AS [Source]", statement.source));

    match statement.kind {
        MergeKind::Insert => sql.push_line("ON 1 = 0"),
        _ => sql.push_line(&format!("ON {}", build_match_condition(statement.match_on))),
    }

    if matches!(statement.kind, MergeKind::InsertOrUpdate | MergeKind::Update) {
        let assignments = statement
            .update_columns()
            .iter()
            .map(|c| {
                let column = quote_identifier(c);
                format!("[Target].{} = [Source].{}", column, column)
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_line(&format!(
            "WHEN MATCHED{} THEN UPDATE SET {}",
            gated(statement.update_conditions),
            assignments
        ));
    }

    if matches!(statement.kind, MergeKind::Insert | MergeKind::InsertOrUpdate) {
        let columns = statement.insert_columns();
        let names = columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", ");
        let values = columns
            .iter()
            .map(|c| format!("[Source].{}", quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_line(&format!("WHEN NOT MATCHED BY TARGET THEN INSERT ({}) VALUES ({})", names, values));
    }

    match statement.kind {
        MergeKind::InsertOrUpdate
            if statement.delete_when_not_matched || !statement.delete_conditions.is_empty() =>
        {
            sql.push_line(&format!(
                "WHEN NOT MATCHED BY SOURCE{} THEN DELETE",
                gated(statement.delete_conditions)
            ));
        }
        MergeKind::Delete => {
            sql.push_line(&format!(
                "WHEN MATCHED{} THEN DELETE",
                gated(statement.delete_conditions)
            ));
        }
        _ => {}
    }

    if let (true, Some(identity)) = (statement.output_identity, statement.identity) {
        let image = if statement.kind == MergeKind::Delete { "DELETED" } else { "INSERTED" };
        let ordinal = quote_identifier(ROW_ORDINAL_COLUMN);
        let identity = quote_identifier(identity);
        sql.push_line(&format!(
            "OUTPUT [Source].{ordinal}, {image}.{identity} INTO {output} ({ordinal}, {identity})",
            ordinal = ordinal,
            image = image,
            identity = identity,
            output = OUTPUT_TABLE
        ));
    }

    sql.terminate();
    sql
}

/// Pairs are `(destination column, parameter name)`.
pub fn build_insert(
    target: &str,
    columns: &[(String, String)],
    identity_parameter: Option<&str>,
) -> Code {
    let names = columns.iter().map(|(c, _)| quote_identifier(c)).collect::<Vec<_>>().join(", ");
    let values = columns.iter().map(|(_, p)| p.as_str()).collect::<Vec<_>>().join(", ");

    let mut sql = Code::new(format!("INSERT INTO {} ({}) VALUES ({});", target, names, values));
    if let Some(parameter) = identity_parameter {
        sql.push_line(&format!("SET {} = SCOPE_IDENTITY();", parameter));
    }
    sql
}

pub fn build_update(
    target: &str,
    columns: &[(String, String)],
    conditions: &[PredicateCondition],
) -> Code {
    let assignments = columns
        .iter()
        .map(|(c, p)| format!("{} = {}", quote_identifier(c), p))
        .collect::<Vec<_>>()
        .join(", ");

    Code::new(format!(
        "UPDATE {} SET {} WHERE {};",
        target,
        assignments,
        render_conditions(conditions)
    ))
}

/// Derived single row source for upserting one object: `(SELECT @a AS [a], ...)`.
pub fn build_parameter_source(columns: &[(String, String)]) -> String {
    let projections = columns
        .iter()
        .map(|(c, p)| format!("{} AS {}", p, quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("(SELECT {})", projections)
}

/// A matched row keeps the caller's key, an inserted row receives the generated one.
pub fn build_upsert(statement: &MergeStatement, identity_parameter: Option<&str>) -> Code {
    let mut sql = build_merge(statement);
    if let Some(parameter) = identity_parameter {
        sql.push_line(&format!("SET {p} = COALESCE(SCOPE_IDENTITY(), {p});", p = parameter));
    }
    sql
}

/// `conditions` empty deletes every row. `top` bounds a single round.
pub fn build_delete(target: &str, conditions: &[PredicateCondition], top: Option<u32>) -> Code {
    let top = match top {
        Some(quantity) => format!("TOP ({}) ", quantity),
        None => String::new(),
    };

    if conditions.is_empty() {
        Code::new(format!("DELETE {}FROM {};", top, target))
    } else {
        Code::new(format!("DELETE {}FROM {} WHERE {};", top, target, render_conditions(conditions)))
    }
}

/// Disables every non-clustered index of the table named by `@TableName` / `@SchemaName`.
pub fn build_disable_indexes() -> Code {
    Code::new(
        "DECLARE @sql NVARCHAR(MAX) = N'';
SELECT @sql = @sql + N'ALTER INDEX ' + QUOTENAME(i.[name]) + N' ON ' + QUOTENAME(s.[name]) + N'.' + QUOTENAME(t.[name]) + N' DISABLE; '
FROM sys.indexes AS i
INNER JOIN sys.tables AS t ON i.[object_id] = t.[object_id]
INNER JOIN sys.schemas AS s ON t.[schema_id] = s.[schema_id]
WHERE i.[type_desc] = N'NONCLUSTERED' AND t.[name] = @TableName AND s.[name] = @SchemaName;
EXEC sp_executesql @sql;"
            .to_string(),
    )
}

pub fn build_rebuild_indexes(target: &str) -> Code {
    Code::new(format!("ALTER INDEX ALL ON {} REBUILD;", target))
}

pub fn build_read_output(identity: &str) -> Code {
    let ordinal = quote_identifier(ROW_ORDINAL_COLUMN);
    Code::new(format!(
        "SELECT {ordinal}, {identity} FROM {output} WHERE {ordinal} IS NOT NULL ORDER BY {ordinal};",
        ordinal = ordinal,
        identity = quote_identifier(identity),
        output = OUTPUT_TABLE
    ))
}

pub fn build_drop_table(name: &str) -> Code {
    Code::new(format!("DROP TABLE {};", name))
}
