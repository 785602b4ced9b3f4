use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::ports::StoreError;

use super::conflict::find_overlap;
use super::{parse_date, parse_time, BookingEngine, EngineError};

/// A public booking as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource_id: ResourceId,
    pub service_id: ServiceId,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub start_time: String,
    pub client_name: String,
    pub client_email: String,
    pub client_phone: Option<String>,
}

/// An administrative appointment: typed inputs, caller-chosen initial status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentDraft {
    pub resource_id: ResourceId,
    pub service_id: ServiceId,
    pub client_id: Option<ClientId>,
    pub date: CalendarDate,
    pub start: ClockTime,
    pub status: AppointmentStatus,
}

/// `start + duration`. Appointments may end at `24:00` but never later.
pub fn compute_end_time(start: ClockTime, duration: Minutes) -> Result<ClockTime, EngineError> {
    if duration == 0 || duration > MAX_SERVICE_DURATION_MIN {
        return Err(EngineError::validation(format!("invalid service duration: {duration} min")));
    }
    start.checked_add_minutes(duration).ok_or_else(|| {
        EngineError::validation(format!(
            "appointment starting {start} with duration {duration} min would end past midnight"
        ))
    })
}

struct ClientContact {
    name: String,
    email: String,
    phone: Option<String>,
}

fn validate_contact(req: &BookingRequest) -> Result<ClientContact, EngineError> {
    let name = req.client_name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("client name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::validation("client name too long"));
    }

    let email = req.client_email.trim().to_lowercase();
    if email.is_empty() {
        return Err(EngineError::validation("client email is required"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::validation("client email too long"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => return Err(EngineError::validation(format!("invalid client email: {email}"))),
    }

    let phone = req
        .client_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if phone.is_some_and(|p| p.len() > MAX_PHONE_LEN) {
        return Err(EngineError::validation("client phone too long"));
    }

    Ok(ClientContact {
        name: name.to_string(),
        email,
        phone: phone.map(str::to_string),
    })
}

impl BookingEngine {
    /// Book a slot on behalf of a client.
    ///
    /// Resolves (or creates) the client by email, prices the appointment from
    /// the service, and inserts it as `pending`. Two concurrent calls for the
    /// same time cannot both succeed: the store rejects the second insert and
    /// the caller gets `Conflict`.
    pub async fn create_booking(
        &self,
        tenant_id: &TenantId,
        req: BookingRequest,
    ) -> Result<Appointment, EngineError> {
        let date = parse_date(&req.date)?;
        let start = parse_time(&req.start_time)?;
        let contact = validate_contact(&req)?;

        self.resources.get_resource(tenant_id, req.resource_id).await?;

        let client = self
            .clients
            .find_or_create(tenant_id, &contact.email, &contact.name, contact.phone.as_deref())
            .await?;

        let terms = self.services.get_duration(tenant_id, req.service_id).await?;
        let end = compute_end_time(start, terms.duration_minutes)?;

        let appointment = Appointment {
            id: Ulid::new(),
            tenant_id: tenant_id.clone(),
            resource_id: req.resource_id,
            service_id: req.service_id,
            client_id: Some(client.id),
            date,
            start,
            end,
            status: AppointmentStatus::Pending,
            price: terms.price,
        };
        self.commit(appointment).await
    }

    /// Administrative create: same end-time and overlap rules as
    /// `create_booking`, but the initial status is chosen by the caller.
    pub async fn create_appointment(
        &self,
        tenant_id: &TenantId,
        draft: AppointmentDraft,
    ) -> Result<Appointment, EngineError> {
        if !draft.status.is_blocking() {
            return Err(EngineError::validation(format!(
                "appointments must be created pending or confirmed, not {}",
                draft.status
            )));
        }
        self.resources.get_resource(tenant_id, draft.resource_id).await?;
        let terms = self.services.get_duration(tenant_id, draft.service_id).await?;
        let end = compute_end_time(draft.start, terms.duration_minutes)?;

        let appointment = Appointment {
            id: Ulid::new(),
            tenant_id: tenant_id.clone(),
            resource_id: draft.resource_id,
            service_id: draft.service_id,
            client_id: draft.client_id,
            date: draft.date,
            start: draft.start,
            end,
            status: draft.status,
            price: terms.price,
        };
        self.commit(appointment).await
    }

    /// Early conflict check for a clear error, then the insert, whose own
    /// check under the store's lock is the one that counts.
    async fn commit(&self, appointment: Appointment) -> Result<Appointment, EngineError> {
        let existing = self
            .appointments
            .list(&appointment.tenant_id, appointment.resource_id, appointment.date)
            .await?;
        if let Some(conflict) = find_overlap(&appointment.span(), &existing) {
            return Err(self.conflict(&appointment, conflict));
        }

        match self.appointments.insert(appointment.clone()).await {
            Ok(saved) => {
                metrics::counter!(crate::observability::BOOKINGS_TOTAL, "status" => saved.status.as_str())
                    .increment(1);
                tracing::info!(
                    tenant_id = %saved.tenant_id,
                    appointment_id = %saved.id,
                    resource_id = %saved.resource_id,
                    date = %saved.date,
                    start = %saved.start,
                    end = %saved.end,
                    "appointment created"
                );
                Ok(saved)
            }
            Err(StoreError::ConstraintViolation { existing }) => {
                Err(self.conflict(&appointment, existing))
            }
            Err(e) => {
                tracing::error!(appointment_id = %appointment.id, "appointment insert failed: {e}");
                Err(e.into())
            }
        }
    }

    fn conflict(&self, appointment: &Appointment, existing: AppointmentId) -> EngineError {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        tracing::warn!(
            tenant_id = %appointment.tenant_id,
            resource_id = %appointment.resource_id,
            date = %appointment.date,
            start = %appointment.start,
            %existing,
            "booking rejected: overlaps existing appointment"
        );
        EngineError::Conflict(existing)
    }
}
