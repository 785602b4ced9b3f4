//! Collaborator interfaces the booking engine is written against.
//!
//! `storage::Store` implements all of them; tests and alternative backends
//! can swap any one independently.

use async_trait::async_trait;

use crate::model::*;

/// What the engine needs to know about a service to book it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTerms {
    pub duration_minutes: Minutes,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound { entity: &'static str, id: String },
    /// Insert would overlap a blocking appointment on the same resource and date.
    ConstraintViolation { existing: AppointmentId },
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    Io(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound { entity, id: id.to_string() }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            StoreError::ConstraintViolation { existing } => {
                write!(f, "overlaps blocking appointment {existing}")
            }
            StoreError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition {from} -> {to}")
            }
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Io(e) => write!(f, "storage I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    async fn get_resource(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
    ) -> Result<Resource, StoreError>;
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn get_duration(
        &self,
        tenant_id: &TenantId,
        service_id: ServiceId,
    ) -> Result<ServiceTerms, StoreError>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Spans of `pending`/`confirmed` appointments, sorted by start.
    async fn find_blocking(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
        date: CalendarDate,
    ) -> Result<Vec<Span>, StoreError>;

    /// Persist a new appointment. Must reject with `ConstraintViolation` if a
    /// blocking appointment already overlaps it, atomically with the write.
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    /// All appointments of a resource on a date, sorted by start.
    async fn list(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
        date: CalendarDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, StoreError>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Find the client by `(tenant_id, email)` and overwrite its contact
    /// fields, or create it.
    async fn find_or_create(
        &self,
        tenant_id: &TenantId,
        email: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<Client, StoreError>;
}
