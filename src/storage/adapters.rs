use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::find_overlap;
use crate::limits::*;
use crate::model::*;
use crate::ports::*;

use super::{DayKey, Store};

// ── Administrative writes ────────────────────────────────────────

impl Store {
    pub async fn upsert_resource(
        &self,
        tenant_id: &TenantId,
        resource: Resource,
    ) -> Result<(), StoreError> {
        if resource.name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(StoreError::LimitExceeded("resource name too long"));
        }
        let _gate = self.compaction_gate.read().await;
        let _catalog = self.catalog_writes.lock().await;
        self.persist_catalog(Event::ResourceUpserted { tenant_id: tenant_id.clone(), resource })
            .await
    }

    pub async fn upsert_service(
        &self,
        tenant_id: &TenantId,
        service: Service,
    ) -> Result<(), StoreError> {
        if service.duration_minutes == 0 || service.duration_minutes > MAX_SERVICE_DURATION_MIN {
            return Err(StoreError::LimitExceeded("service duration out of range"));
        }
        if service.name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(StoreError::LimitExceeded("service name too long"));
        }
        let _gate = self.compaction_gate.read().await;
        let _catalog = self.catalog_writes.lock().await;
        self.persist_catalog(Event::ServiceUpserted { tenant_id: tenant_id.clone(), service })
            .await
    }

    pub fn get_client(&self, tenant_id: &TenantId, email: &str) -> Option<Client> {
        self.clients
            .get(&(tenant_id.clone(), email.to_string()))
            .map(|e| e.value().clone())
    }
}

// ── Port implementations ─────────────────────────────────────────

#[async_trait]
impl ResourceDirectory for Store {
    async fn get_resource(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
    ) -> Result<Resource, StoreError> {
        self.resources
            .get(&(tenant_id.clone(), resource_id))
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::not_found("resource", resource_id))
    }
}

#[async_trait]
impl ServiceCatalog for Store {
    async fn get_duration(
        &self,
        tenant_id: &TenantId,
        service_id: ServiceId,
    ) -> Result<ServiceTerms, StoreError> {
        self.services
            .get(&(tenant_id.clone(), service_id))
            .map(|e| ServiceTerms {
                duration_minutes: e.duration_minutes,
                price: e.price,
            })
            .ok_or_else(|| StoreError::not_found("service", service_id))
    }
}

#[async_trait]
impl AppointmentStore for Store {
    async fn find_blocking(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
        date: CalendarDate,
    ) -> Result<Vec<Span>, StoreError> {
        let Some(day) = self.get_day(&(tenant_id.clone(), resource_id, date)) else {
            return Ok(Vec::new());
        };
        let guard = day.read().await;
        Ok(guard.blocking_spans())
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        if appointment.start >= appointment.end {
            return Err(StoreError::LimitExceeded("appointment must end after it starts"));
        }
        let key: DayKey = (
            appointment.tenant_id.clone(),
            appointment.resource_id,
            appointment.date,
        );
        let _gate = self.compaction_gate.read().await;
        let day = self.get_or_create_day(&key);
        let mut guard = day.write().await;

        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(StoreError::LimitExceeded("too many appointments on this day"));
        }
        // Exclusion constraint: no two blocking appointments may overlap.
        if appointment.status.is_blocking()
            && let Some(existing) = find_overlap(&appointment.span(), &guard.appointments)
        {
            return Err(StoreError::ConstraintViolation { existing });
        }

        let event = Event::AppointmentInserted { appointment: appointment.clone() };
        self.persist_to_day(&key, &mut guard, event).await?;
        Ok(appointment)
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
        date: CalendarDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let Some(day) = self.get_day(&(tenant_id.clone(), resource_id, date)) else {
            return Ok(Vec::new());
        };
        let guard = day.read().await;
        Ok(guard.appointments.clone())
    }

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let key = self
            .day_key_for(tenant_id, &id)
            .ok_or_else(|| StoreError::not_found("appointment", id))?;
        let day = self
            .get_day(&key)
            .ok_or_else(|| StoreError::not_found("appointment", id))?;
        let mut guard = day.write().await;

        let current = guard
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("appointment", id))?
            .status;
        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition { from: current, to: status });
        }

        let event = Event::AppointmentStatusChanged { tenant_id: tenant_id.clone(), id, status };
        self.persist_to_day(&key, &mut guard, event).await?;
        guard
            .get_mut(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("appointment", id))
    }
}

#[async_trait]
impl ClientStore for Store {
    async fn find_or_create(
        &self,
        tenant_id: &TenantId,
        email: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<Client, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let _catalog = self.catalog_writes.lock().await;

        // Contact fields are last-write-wins; totals belong to other workflows.
        let client = match self.get_client(tenant_id, email) {
            Some(mut existing) => {
                existing.name = name.to_string();
                existing.phone = phone.map(str::to_string);
                existing
            }
            None => Client {
                id: Ulid::new(),
                tenant_id: tenant_id.clone(),
                email: email.to_string(),
                name: name.to_string(),
                phone: phone.map(str::to_string),
                total_spent: 0,
                visit_count: 0,
            },
        };
        self.persist_catalog(Event::ClientUpserted { client: client.clone() })
            .await?;
        Ok(client)
    }
}
