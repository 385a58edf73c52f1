use thiserror::Error;

#[derive(Error, Debug)]
pub enum DerivationError {
    #[error("Validation failed for {context}: {details}")]
    Validation { context: String, details: String },

    #[error("Ratio '{ratio}' is not computable: {pool} magnitude is below epsilon")]
    DivisionByZero { ratio: String, pool: String },

    #[error("Ratio '{0}' has no components defined")]
    EmptyRatio(String),

    #[error("Period not found: {0}")]
    PeriodNotFound(String),

    #[error("{operation} failed for company {company_id} ({scope}) during {stage}: {source}")]
    Operation {
        operation: String,
        company_id: u64,
        scope: String,
        stage: String,
        #[source]
        source: Box<DerivationError>,
    },

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl DerivationError {
    pub fn validation(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Validation {
            context: context.into(),
            details: details.into(),
        }
    }

    /// Wraps an error with the operation, company, scope and stage it happened in.
    pub fn in_operation(
        self,
        operation: &str,
        company_id: u64,
        scope: impl Into<String>,
        stage: &str,
    ) -> Self {
        Self::Operation {
            operation: operation.to_string(),
            company_id,
            scope: scope.into(),
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }

    pub fn is_division_by_zero(&self) -> bool {
        match self {
            Self::DivisionByZero { .. } => true,
            Self::Operation { source, .. } => source.is_division_by_zero(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DerivationError>;
