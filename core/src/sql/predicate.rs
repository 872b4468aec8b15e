//! Row level conditions for `update_when`, `delete_when` and the query `filter` chains.
//!
//! A condition compares one member against a captured constant. Conditions are rendered as
//! parameterized fragments and concatenated strictly left to right in the order they were
//! declared, there is no implicit grouping between `and` and `or`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    database::client::SqlParameter,
    error::ConfigurationError,
    row::value::{ColumnValue, SqlValue, ValueKind},
    sql::identifier::{parameter_name, quote_identifier},
};

static COLLATION_NAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    /// Equal (==)
    Eq,
    /// Not Equal (!=)
    Ne,
    /// Greater Than (>)
    Gt,
    /// Greater Than or Equal (>=)
    Gte,
    /// Less Than (<)
    Lt,
    /// Less Than or Equal (<=)
    Lte,
}

impl ComparisonOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Ne => "<>",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Gte => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Lte => "<=",
        }
    }
}

/// How a condition joins the ones declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

/// `member <operator> constant`
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    member: String,
    operator: ComparisonOperator,
    value: SqlValue,
    kind: ValueKind,
}

impl Comparison {
    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn operator(&self) -> ComparisonOperator {
        self.operator
    }

    pub fn value(&self) -> &SqlValue {
        &self.value
    }
}

pub struct ColumnRef(String);

/// Starts a comparison against the row member `member`.
///
/// ```ignore
/// col("warehouse_id").eq(1)
/// col("discontinued_at").is_null()
/// ```
pub fn col(member: impl Into<String>) -> ColumnRef {
    ColumnRef(member.into())
}

impl ColumnRef {
    fn compare<V: ColumnValue>(self, operator: ComparisonOperator, value: V) -> Comparison {
        Comparison { member: self.0, operator, value: value.to_sql_value(), kind: V::KIND }
    }

    pub fn eq<V: ColumnValue>(self, value: V) -> Comparison {
        self.compare(ComparisonOperator::Eq, value)
    }

    pub fn ne<V: ColumnValue>(self, value: V) -> Comparison {
        self.compare(ComparisonOperator::Ne, value)
    }

    pub fn gt<V: ColumnValue>(self, value: V) -> Comparison {
        self.compare(ComparisonOperator::Gt, value)
    }

    pub fn gte<V: ColumnValue>(self, value: V) -> Comparison {
        self.compare(ComparisonOperator::Gte, value)
    }

    pub fn lt<V: ColumnValue>(self, value: V) -> Comparison {
        self.compare(ComparisonOperator::Lt, value)
    }

    pub fn lte<V: ColumnValue>(self, value: V) -> Comparison {
        self.compare(ComparisonOperator::Lte, value)
    }

    pub fn is_null(self) -> Comparison {
        Comparison {
            member: self.0,
            operator: ComparisonOperator::Eq,
            value: SqlValue::Null,
            kind: ValueKind::String,
        }
    }

    pub fn is_not_null(self) -> Comparison {
        Comparison {
            member: self.0,
            operator: ComparisonOperator::Ne,
            value: SqlValue::Null,
            kind: ValueKind::String,
        }
    }
}

/// A translated condition, ready to be spliced into a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateCondition {
    pub fragment: String,
    pub parameters: Vec<SqlParameter>,
    pub sort_order: usize,
    pub connective: Connective,
}

pub fn validate_collation(collation: &str) -> Result<(), ConfigurationError> {
    if COLLATION_NAME.as_ref().is_some_and(|pattern| pattern.is_match(collation)) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidCollation(collation.to_string()))
    }
}

/// Renders `comparison` against the destination `column`, optionally prefixed by a table
/// alias such as `[Target]`. The bound parameter is named after the member plus
/// `_condition{sort_order}`, so repeated conditions on one member never collide.
pub fn translate(
    comparison: &Comparison,
    column: &str,
    qualifier: Option<&str>,
    collation: Option<&str>,
    connective: Connective,
    sort_order: usize,
) -> Result<PredicateCondition, ConfigurationError> {
    let mut left = match qualifier {
        Some(qualifier) => format!("{}.{}", qualifier, quote_identifier(column)),
        None => quote_identifier(column),
    };
    if let Some(collation) = collation {
        validate_collation(collation)?;
        left = format!("{} COLLATE {}", left, collation);
    }

    if comparison.value.is_null() {
        let fragment = match comparison.operator {
            ComparisonOperator::Eq => format!("{} IS NULL", left),
            ComparisonOperator::Ne => format!("{} IS NOT NULL", left),
            _ => {
                return Err(ConfigurationError::NullRelationalComparison(
                    comparison.member.clone(),
                ))
            }
        };
        return Ok(PredicateCondition { fragment, parameters: vec![], sort_order, connective });
    }

    let name = format!("{}_condition{}", parameter_name(&comparison.member), sort_order);
    let fragment = format!("{} {} {}", left, comparison.operator.as_sql(), name);
    let parameter = SqlParameter::input(name, comparison.value.clone(), comparison.kind);

    Ok(PredicateCondition { fragment, parameters: vec![parameter], sort_order, connective })
}

/// Joins conditions in `sort_order`. The connective of the first condition is ignored.
pub fn render_conditions(conditions: &[PredicateCondition]) -> String {
    let mut ordered: Vec<&PredicateCondition> = conditions.iter().collect();
    ordered.sort_by_key(|condition| condition.sort_order);

    let mut rendered = String::new();
    for (i, condition) in ordered.iter().enumerate() {
        if i > 0 {
            rendered.push(' ');
            rendered.push_str(condition.connective.as_sql());
            rendered.push(' ');
        }
        rendered.push_str(&condition.fragment);
    }

    rendered
}

pub fn condition_parameters(conditions: &[PredicateCondition]) -> Vec<SqlParameter> {
    conditions.iter().flat_map(|condition| condition.parameters.iter().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_equality() {
        let condition =
            translate(&col("warehouse_id").eq(1), "WarehouseId", Some("[Target]"), None, Connective::And, 0)
                .unwrap();
        assert_eq!(condition.fragment, "[Target].[WarehouseId] = @warehouse_id_condition0");
        assert_eq!(condition.parameters.len(), 1);
        assert_eq!(condition.parameters[0].name, "@warehouse_id_condition0");
        assert_eq!(condition.parameters[0].value, SqlValue::I32(1));
    }

    #[test]
    fn test_null_equality_renders_is_null() {
        let condition =
            translate(&col("description").eq(Option::<String>::None), "description", None, None, Connective::And, 0)
                .unwrap();
        assert_eq!(condition.fragment, "[description] IS NULL");
        assert!(condition.parameters.is_empty());

        let condition =
            translate(&col("description").is_not_null(), "description", None, None, Connective::And, 1)
                .unwrap();
        assert_eq!(condition.fragment, "[description] IS NOT NULL");
    }

    #[test]
    fn test_null_relational_comparison_is_rejected() {
        let err = translate(&col("price").gt(Option::<i32>::None), "price", None, None, Connective::And, 0)
            .unwrap_err();
        assert_eq!(err, ConfigurationError::NullRelationalComparison("price".to_string()));
    }

    #[test]
    fn test_collation_follows_column() {
        let condition = translate(
            &col("sku").eq("ab".to_string()),
            "sku",
            Some("[Target]"),
            Some("SQL_Latin1_General_CP1_CS_AS"),
            Connective::And,
            2,
        )
        .unwrap();
        assert_eq!(
            condition.fragment,
            "[Target].[sku] COLLATE SQL_Latin1_General_CP1_CS_AS = @sku_condition2"
        );
    }

    #[test]
    fn test_invalid_collation_is_rejected() {
        let err = translate(&col("sku").eq(1), "sku", None, Some("x; DROP TABLE y"), Connective::And, 0)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidCollation(_)));
    }

    #[test]
    fn test_repeated_member_gets_distinct_parameters() {
        let first = translate(&col("price").gte(10), "price", None, None, Connective::And, 0).unwrap();
        let second = translate(&col("price").lt(20), "price", None, None, Connective::And, 1).unwrap();
        assert_ne!(first.parameters[0].name, second.parameters[0].name);
    }

    #[test]
    fn test_render_flattens_left_to_right_by_sort_order() {
        let conditions = vec![
            translate(&col("c").eq(3), "c", None, None, Connective::Or, 2).unwrap(),
            translate(&col("a").eq(1), "a", None, None, Connective::And, 0).unwrap(),
            translate(&col("b").ne(2), "b", None, None, Connective::And, 1).unwrap(),
        ];
        assert_eq!(
            render_conditions(&conditions),
            "[a] = @a_condition0 AND [b] <> @b_condition1 OR [c] = @c_condition2"
        );
        assert_eq!(condition_parameters(&conditions).len(), 3);
    }
}
