use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacetError {
    #[error("ingestion error: {message}")]
    Ingestion { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("query error: {message}")]
    Query { message: String },
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
}

impl FacetError {
    pub fn ingestion(message: impl Into<String>) -> Self {
        Self::Ingestion {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

pub type FacetResult<T> = Result<T, FacetError>;

impl From<sea_orm::DbErr> for FacetError {
    fn from(value: sea_orm::DbErr) -> Self {
        FacetError::storage(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::FacetError;

    #[test]
    fn helper_constructors_set_variants() {
        let err = FacetError::ingestion("not an object");
        assert!(matches!(err, FacetError::Ingestion { .. }));
        let err = FacetError::storage("disk");
        assert!(matches!(err, FacetError::Storage { .. }));
        let err = FacetError::query("syntax");
        assert!(matches!(err, FacetError::Query { .. }));
        let err = FacetError::configuration("pool");
        assert!(matches!(err, FacetError::Configuration { .. }));
        let err = FacetError::not_found("facet");
        assert!(matches!(err, FacetError::NotFound { .. }));
        let err = FacetError::invalid("bad");
        assert!(matches!(err, FacetError::Validation { .. }));
    }

    #[test]
    fn db_errors_map_to_storage() {
        let err: FacetError = sea_orm::DbErr::Custom("boom".to_string()).into();
        assert!(matches!(err, FacetError::Storage { .. }));
        assert!(err.to_string().contains("boom"));
    }
}
