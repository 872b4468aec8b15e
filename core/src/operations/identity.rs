use tracing::debug;

use crate::{
    database::client::{ColumnDirection, NativeError, SqlParameter},
    error::{BulkError, ConfigurationError},
    row::{
        shape::{RowShape, Setter},
        value::SqlValue,
    },
};

/// The member backed by an engine-generated key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySpec {
    pub source: String,
    pub destination: String,
    pub direction: ColumnDirection,
}

impl IdentitySpec {
    pub fn is_output(&self) -> bool {
        self.direction == ColumnDirection::InputOutput
    }
}

fn identity_setter<'a, T>(
    shape: &'a RowShape<T>,
    identity: &IdentitySpec,
) -> Result<&'a Setter<T>, ConfigurationError> {
    let descriptor = shape
        .find(&identity.source)
        .ok_or_else(|| ConfigurationError::UnknownColumn(identity.source.clone()))?;
    descriptor.setter().ok_or_else(|| ConfigurationError::IdentityNotWritable(identity.source.clone()))
}

/// Writes `(ordinal, identity)` output rows back into `rows`. Rows are addressed by the
/// ordinal they were staged with, never by the position of the output row.
pub fn reconcile<T, E: NativeError>(
    shape: &RowShape<T>,
    identity: &IdentitySpec,
    rows: &mut [T],
    output: Vec<Vec<SqlValue>>,
) -> Result<usize, BulkError<E>> {
    let setter = identity_setter(shape, identity)?;
    let total = rows.len();
    let mut written = 0;

    for record in output {
        let mut values = record.into_iter();
        let ordinal = values.next().unwrap_or(SqlValue::Null);
        let value = values.next().unwrap_or(SqlValue::Null);

        let index = ordinal
            .as_i128()
            .and_then(|ordinal| usize::try_from(ordinal).ok())
            .filter(|index| *index < total)
            .ok_or_else(|| BulkError::OutputMismatch { ordinal: ordinal.to_string(), rows: total })?;

        setter(&mut rows[index], value)?;
        written += 1;
    }

    debug!("Wrote {} generated {} values back into {} rows", written, identity.source, total);
    Ok(written)
}

/// Single object path: copies the `InputOutput` parameter named `parameter` into the row.
pub fn reconcile_parameter<T, E: NativeError>(
    shape: &RowShape<T>,
    identity: &IdentitySpec,
    row: &mut T,
    parameters: &[SqlParameter],
    parameter: &str,
) -> Result<(), BulkError<E>> {
    let setter = identity_setter(shape, identity)?;
    let value = parameters
        .iter()
        .find(|p| p.name == parameter && p.direction == ColumnDirection::InputOutput)
        .map(|p| p.value.clone())
        .unwrap_or(SqlValue::Null);

    setter(row, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::{database::testing::FakeError, row::value::ValueKind};

    #[derive(Debug, Default)]
    struct Order {
        id: i32,
        reference: String,
        legacy_id: i64,
    }

    fn shape() -> RowShape<Order> {
        RowShape::builder()
            .field("id", |o: &Order| &o.id, |o: &mut Order| &mut o.id)
            .field("reference", |o: &Order| &o.reference, |o: &mut Order| &mut o.reference)
            .read_only("legacy_id", |o: &Order| &o.legacy_id)
            .build()
    }

    fn spec(source: &str) -> IdentitySpec {
        IdentitySpec {
            source: source.to_string(),
            destination: source.to_string(),
            direction: ColumnDirection::InputOutput,
        }
    }

    fn orders(count: usize) -> Vec<Order> {
        (0..count).map(|i| Order { reference: format!("ref-{}", i), ..Default::default() }).collect()
    }

    #[test]
    fn test_reconcile_by_ordinal_not_output_position() {
        let mut rows = orders(3);
        let output = vec![
            vec![SqlValue::I64(2), SqlValue::I32(102)],
            vec![SqlValue::I64(0), SqlValue::I32(100)],
            vec![SqlValue::I64(1), SqlValue::I32(101)],
        ];

        let written = reconcile::<_, FakeError>(&shape(), &spec("id"), &mut rows, output).unwrap();

        assert_eq!(written, 3);
        assert_eq!(rows.iter().map(|o| o.id).collect::<Vec<_>>(), vec![100, 101, 102]);
    }

    #[test]
    fn test_reconcile_rejects_unknown_ordinal() {
        let mut rows = orders(2);
        let output = vec![vec![SqlValue::I64(5), SqlValue::I32(1)]];

        let err = reconcile::<_, FakeError>(&shape(), &spec("id"), &mut rows, output).unwrap_err();
        assert!(matches!(err, BulkError::OutputMismatch { rows: 2, .. }));
    }

    #[test]
    fn test_reconcile_rejects_read_only_identity() {
        let mut rows = orders(1);
        let err = reconcile::<_, FakeError>(&shape(), &spec("legacy_id"), &mut rows, vec![]).unwrap_err();
        assert!(matches!(
            err,
            BulkError::Configuration(ConfigurationError::IdentityNotWritable(ref name)) if name == "legacy_id"
        ));
    }

    #[test]
    fn test_reconcile_parameter_coerces_scope_identity() {
        let mut row = Order::default();
        let parameters = vec![SqlParameter::input_output(
            "@id",
            SqlValue::Decimal(Decimal::from(41)),
            ValueKind::I32,
        )];

        reconcile_parameter::<_, FakeError>(&shape(), &spec("id"), &mut row, &parameters, "@id").unwrap();
        assert_eq!(row.id, 41);
    }
}
