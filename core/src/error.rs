use tracing::error;

use crate::{database::client::NativeError, row::value::ConversionError};

/// Engine error numbers raised when a write targets an identity column the operation was
/// never told about.
pub const IDENTITY_ERROR_CODES: [i32; 2] = [544, 8102];

const IDENTITY_HINT: &str = "An identity column was written without being configured. Call \
                             set_identity_column on the operation if the destination table has \
                             an identity column, then try again.";

/// Caller misuse, detected while the operation is being built or before any statement is
/// sent to the engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Schema has already been defined in the table name: {0}")]
    SchemaAlreadyDefined(String),

    #[error("Table name can't contain more than one period '.' character: {0}")]
    TooManyPeriods(String),

    #[error("Table name can't be empty")]
    EmptyTableName,

    #[error("Column '{0}' is not a member of the row type")]
    UnknownColumn(String),

    #[error("Column '{0}' already has a custom mapping")]
    DuplicateMapping(String),

    #[error("Destination column '{destination}' is already mapped from '{existing}'")]
    DuplicateDestination { destination: String, existing: String },

    #[error("Column '{0}' can't be removed because it was never added")]
    ColumnNotAdded(String),

    #[error("Can't have more than one identity column")]
    IdentityAlreadySet,

    #[error("Identity column '{0}' is read only, generated values can't be written back")]
    IdentityNotWritable(String),

    #[error("{0} requires at least one match_target_on column")]
    MissingMatchTargetOn(&'static str),

    #[error("No columns were added to the operation")]
    NoColumns,

    #[error("{0} has no column left to update once identity and excluded columns are removed")]
    NoUpdatableColumns(&'static str),

    #[error("{0} requires at least one filter condition")]
    MissingCondition(&'static str),

    #[error("Column '{0}' is a composite member and must be addressed through a nested path")]
    CompositeColumn(String),

    #[error("Need property types when the row type is a dynamic row")]
    MissingPropertyTypes,

    #[error("Invalid collation name: {0}")]
    InvalidCollation(String),

    #[error("Column '{0}' can only be compared with null using eq or ne")]
    NullRelationalComparison(String),

    #[error("Table {0} not found. Check your setup and try again.")]
    TableNotFound(String),

    #[error("Column '{column}' does not exist on table {table}")]
    ColumnNotInTable { column: String, table: String },
}

/// Commit time failure, generic over the connection's native error.
#[derive(thiserror::Error, Debug)]
pub enum BulkError<E: NativeError> {
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{message}")]
    Identity {
        message: String,
        #[source]
        source: E,
    },

    #[error("Could not write generated identity back: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Output row ordinal {ordinal} does not match any of the {rows} input rows")]
    OutputMismatch { ordinal: String, rows: usize },

    #[error(transparent)]
    Engine(E),
}

impl<E: NativeError> BulkError<E> {
    /// Wraps a native error, turning identity violations into [`BulkError::Identity`] and
    /// passing everything else through untouched.
    pub fn from_engine(err: E) -> Self {
        if err.native_codes().iter().any(|code| IDENTITY_ERROR_CODES.contains(code)) {
            let message = format!("{} {}", err, IDENTITY_HINT);
            error!("{}", message);
            return BulkError::Identity { message, source: err };
        }

        BulkError::Engine(err)
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, BulkError::Identity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::FakeError;

    #[test]
    fn test_identity_codes_are_translated() {
        for code in IDENTITY_ERROR_CODES {
            let err = BulkError::from_engine(FakeError::new(code, "Cannot insert explicit value"));
            assert!(err.is_identity());
            let message = err.to_string();
            assert!(message.starts_with("Cannot insert explicit value "));
            assert!(message.contains("set_identity_column"));
        }
    }

    #[test]
    fn test_other_engine_errors_pass_through() {
        let err = BulkError::from_engine(FakeError::new(2627, "Violation of PRIMARY KEY"));
        match err {
            BulkError::Engine(inner) => {
                assert_eq!(inner.code, 2627);
                assert_eq!(inner.to_string(), "Violation of PRIMARY KEY");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
