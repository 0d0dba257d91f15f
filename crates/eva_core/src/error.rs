use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvaError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
}

impl EvaError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Caller mistakes (rejected writes, malformed filters) as opposed to engine failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage { .. })
    }
}

pub type EvaResult<T> = Result<T, EvaError>;

impl From<rusqlite::Error> for EvaError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => EvaError::constraint(value.to_string()),
            _ => EvaError::storage(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for EvaError {
    fn from(value: serde_json::Error) -> Self {
        EvaError::storage(format!("json: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::EvaError;

    #[test]
    fn helper_constructors_set_variants() {
        let err = EvaError::storage("disk");
        assert!(matches!(err, EvaError::Storage { .. }));
        assert!(!err.is_client_error());
        let err = EvaError::constraint("dup");
        assert!(matches!(err, EvaError::ConstraintViolation { .. }));
        assert!(err.is_client_error());
        let err = EvaError::invalid_query("op");
        assert!(matches!(err, EvaError::InvalidQuery { .. }));
        let err = EvaError::invalid("bad");
        assert!(matches!(err, EvaError::Validation { .. }));
    }

    #[test]
    fn maps_sqlite_constraint_codes() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY),
            Some("UNIQUE constraint failed".to_string()),
        );
        assert!(matches!(
            EvaError::from(err),
            EvaError::ConstraintViolation { .. }
        ));
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(EvaError::from(err), EvaError::Storage { .. }));
    }
}
