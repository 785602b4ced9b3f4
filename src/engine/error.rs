use crate::model::AppointmentId;
use crate::ports::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Resource, service, client, appointment, or tenant does not exist.
    NotFound { entity: &'static str, id: String },
    /// Malformed input. Never retried.
    Validation(String),
    /// The requested time was taken by another blocking appointment.
    Conflict(AppointmentId),
    /// Persistence failure. Reads may be retried by the caller; writes are not.
    Store(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::Conflict(id) => {
                write!(f, "conflict with appointment {id}: slot no longer available")
            }
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            StoreError::ConstraintViolation { existing } => EngineError::Conflict(existing),
            StoreError::InvalidTransition { .. } | StoreError::LimitExceeded(_) => {
                EngineError::Validation(e.to_string())
            }
            StoreError::Io(msg) => EngineError::Store(msg),
        }
    }
}
