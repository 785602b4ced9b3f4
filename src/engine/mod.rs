mod availability;
mod booking;
mod conflict;
mod error;
mod slots;
#[cfg(test)]
mod tests;

pub use availability::{default_hours, resolve_window};
pub use booking::{compute_end_time, AppointmentDraft, BookingRequest};
pub use conflict::{filter_conflicts, find_overlap};
pub use error::EngineError;
pub use slots::{SlotGenerator, Slots};

use std::sync::Arc;

use crate::limits::*;
use crate::model::*;
use crate::ports::*;
use crate::storage::Store;

/// Tunables for slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Spacing between candidate start times.
    pub granularity_minutes: Minutes,
    /// Drop candidates whose service would run past closing time.
    pub trim_overruns: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { granularity_minutes: 30, trim_overruns: false }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(MIN_GRANULARITY_MIN..=MAX_GRANULARITY_MIN).contains(&self.granularity_minutes) {
            return Err(EngineError::validation(format!(
                "granularity must be between {MIN_GRANULARITY_MIN} and {MAX_GRANULARITY_MIN} minutes"
            )));
        }
        Ok(())
    }
}

/// Stateless availability and booking engine for all tenants of a store.
/// Every call is independent; the only shared state lives behind the ports.
pub struct BookingEngine {
    resources: Arc<dyn ResourceDirectory>,
    services: Arc<dyn ServiceCatalog>,
    appointments: Arc<dyn AppointmentStore>,
    clients: Arc<dyn ClientStore>,
    config: EngineConfig,
}

impl BookingEngine {
    pub fn new(
        resources: Arc<dyn ResourceDirectory>,
        services: Arc<dyn ServiceCatalog>,
        appointments: Arc<dyn AppointmentStore>,
        clients: Arc<dyn ClientStore>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { resources, services, appointments, clients, config })
    }

    /// Wire every port to the same store.
    pub fn with_store(store: Arc<Store>, config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(store.clone(), store.clone(), store.clone(), store, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bookable start times for `service_id` with `resource_id` on `date`
    /// (`YYYY-MM-DD`), ascending. Empty when the resource is closed that day.
    pub async fn get_available_slots(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
        service_id: ServiceId,
        date: &str,
    ) -> Result<Vec<ClockTime>, EngineError> {
        let date = parse_date(date)?;
        let (resource, terms) = tokio::try_join!(
            self.resources.get_resource(tenant_id, resource_id),
            self.services.get_duration(tenant_id, service_id),
        )?;
        metrics::counter!(crate::observability::SLOT_QUERIES_TOTAL).increment(1);

        let Some(window) = resolve_window(&resource, date) else {
            tracing::debug!(%tenant_id, %resource_id, %date, "resource closed");
            return Ok(Vec::new());
        };

        let mut generator = SlotGenerator::new(window, self.config.granularity_minutes);
        if self.config.trim_overruns {
            generator = generator.fit_within_window(terms.duration_minutes);
        }

        let blocking = self
            .appointments
            .find_blocking(tenant_id, resource_id, date)
            .await?;
        let slots = filter_conflicts(&generator, &blocking, terms.duration_minutes);
        tracing::debug!(
            %tenant_id, %resource_id, %date,
            blocking = blocking.len(),
            slots = slots.len(),
            "computed available slots"
        );
        Ok(slots)
    }

    pub async fn list_appointments(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
        date: &str,
    ) -> Result<Vec<Appointment>, EngineError> {
        let date = parse_date(date)?;
        Ok(self.appointments.list(tenant_id, resource_id, date).await?)
    }

    /// Move an appointment along its lifecycle. Only edges of the status
    /// state machine are accepted.
    pub async fn set_status(
        &self,
        tenant_id: &TenantId,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let updated = self.appointments.set_status(tenant_id, id, status).await?;
        tracing::info!(%tenant_id, appointment_id = %id, %status, "appointment status changed");
        Ok(updated)
    }

    pub async fn cancel(
        &self,
        tenant_id: &TenantId,
        id: AppointmentId,
    ) -> Result<Appointment, EngineError> {
        self.set_status(tenant_id, id, AppointmentStatus::Cancelled).await
    }
}

pub(crate) fn parse_date(date: &str) -> Result<CalendarDate, EngineError> {
    date.parse()
        .map_err(|e: ParseDateError| EngineError::validation(e.to_string()))
}

pub(crate) fn parse_time(time: &str) -> Result<ClockTime, EngineError> {
    time.parse()
        .map_err(|e: ParseTimeError| EngineError::validation(e.to_string()))
}
