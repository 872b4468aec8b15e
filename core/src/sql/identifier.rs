//! Identifier quoting and table name resolution.
//!
//! Plain names are always bracket-quoted. A name that already arrives wrapped in brackets is
//! taken as quoted by the caller and passed through untouched, which lets callers hand in
//! identifiers that would otherwise need escaping.

use std::collections::HashSet;

use crate::error::ConfigurationError;

/// Schema used when neither the table name nor `with_schema` supplies one.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Quotes an identifier unless it is already bracketed.
#[inline]
pub fn quote_identifier(name: &str) -> String {
    if is_bracketed(name) {
        name.to_string()
    } else {
        format!("[{}]", name.replace(']', "]]"))
    }
}

/// Strips caller supplied brackets, the form metadata lookups expect.
pub fn unquote_identifier(name: &str) -> String {
    if is_bracketed(name) {
        name[1..name.len() - 1].replace("]]", "]")
    } else {
        name.to_string()
    }
}

fn is_bracketed(name: &str) -> bool {
    name.len() >= 2 && name.starts_with('[') && name.ends_with(']')
}

/// Parameter names are derived from member names, anything outside `[A-Za-z0-9_]` becomes
/// an underscore.
pub fn parameter_name(name: &str) -> String {
    let sanitized: String =
        name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    format!("@{}", sanitized)
}

/// One parameter name per column, distinct from each other and from `reserved`.
///
/// Sanitizing can fold different columns (`Order Id`, `Order_Id`) onto one name, the later
/// column then takes a positional suffix. Names compare case insensitively.
pub fn unique_parameter_names<'a, I>(columns: I, reserved: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut taken: HashSet<String> = reserved.iter().map(|name| name.to_lowercase()).collect();
    columns
        .into_iter()
        .enumerate()
        .map(|(position, column)| {
            let base = parameter_name(column);
            let mut candidate = base.clone();
            let mut suffix = position;
            while !taken.insert(candidate.to_lowercase()) {
                candidate = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            candidate
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetTable {
    schema: Option<String>,
    table: String,
}

impl TargetTable {
    /// Accepts `table` or `schema.table`.
    pub fn parse(name: &str) -> Result<Self, ConfigurationError> {
        let parts: Vec<&str> = name.split('.').collect();
        match parts.as_slice() {
            [table] if !table.trim().is_empty() => {
                Ok(TargetTable { schema: None, table: table.trim().to_string() })
            }
            [schema, table] if !schema.trim().is_empty() && !table.trim().is_empty() => {
                Ok(TargetTable {
                    schema: Some(schema.trim().to_string()),
                    table: table.trim().to_string(),
                })
            }
            [_] | [_, _] => Err(ConfigurationError::EmptyTableName),
            _ => Err(ConfigurationError::TooManyPeriods(name.to_string())),
        }
    }

    /// Fails when the schema was already given, either inline or by an earlier call.
    pub fn with_schema(self, schema: &str) -> Result<Self, ConfigurationError> {
        if self.schema.is_some() {
            return Err(ConfigurationError::SchemaAlreadyDefined(self.to_string()));
        }
        if schema.trim().is_empty() {
            return Ok(self);
        }

        Ok(TargetTable { schema: Some(schema.trim().to_string()), table: self.table })
    }

    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `[database].[schema].[table]`
    pub fn qualified_name(&self, database: &str) -> String {
        format!(
            "{}.{}.{}",
            quote_identifier(database),
            quote_identifier(self.schema()),
            quote_identifier(&self.table)
        )
    }
}

impl std::fmt::Display for TargetTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema(), self.table)
    }
}
