use thiserror::Error;

pub const FALLBACK_FAILURE_MESSAGE: &str = "Monte Carlo simulation failed";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Unknown account '{reference}' referenced by {context}")]
    UnknownAccount { reference: String, context: String },

    #[error("{0}")]
    Computation(String),

    #[error("Simulation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unknown_account(reference: &str, context: impl Into<String>) -> Self {
        EngineError::UnknownAccount {
            reference: reference.to_string(),
            context: context.into(),
        }
    }

    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        if let Some(msg) = payload.downcast_ref::<&str>() {
            return EngineError::Computation((*msg).to_string());
        }
        if let Some(msg) = payload.downcast_ref::<String>() {
            return EngineError::Computation(msg.clone());
        }
        EngineError::Computation(FALLBACK_FAILURE_MESSAGE.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
