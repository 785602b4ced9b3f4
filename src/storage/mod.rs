mod adapters;
mod wal;

pub use wal::Wal;

use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::model::*;
use crate::ports::StoreError;

/// Appointments of one resource on one date, sorted by start.
#[derive(Debug, Default)]
pub struct DaySchedule {
    pub appointments: Vec<Appointment>,
}

impl DaySchedule {
    fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.start <= appointment.start);
        self.appointments.insert(pos, appointment);
    }

    fn get_mut(&mut self, id: &AppointmentId) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    pub fn blocking_spans(&self) -> Vec<Span> {
        self.appointments
            .iter()
            .filter(|a| a.status.is_blocking())
            .map(Appointment::span)
            .collect()
    }
}

pub type SharedDay = Arc<RwLock<DaySchedule>>;
pub(crate) type DayKey = (TenantId, ResourceId, CalendarDate);

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then one
/// fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                for (_, tx) in batch {
                    let r = match &result {
                        Ok(()) => Ok(()),
                        Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                    };
                    let _ = tx.send(r);
                }

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a half-written batch is not
    // carried into the next one.
    let flush = wal.flush_sync();
    append.and(flush)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Storage adapter behind every engine port.
///
/// Appointments live in per-(tenant, resource, date) schedules behind async
/// write locks; an insert checks for overlap and commits while holding that
/// lock, which is what makes double-booking impossible. With a WAL attached
/// every mutation is durable before it becomes visible.
pub struct Store {
    resources: DashMap<(TenantId, ResourceId), Resource>,
    services: DashMap<(TenantId, ServiceId), Service>,
    /// Keyed by normalized email.
    clients: DashMap<(TenantId, String), Client>,
    days: DashMap<DayKey, SharedDay>,
    /// Reverse lookup: appointment → the schedule holding it.
    appointment_days: DashMap<(TenantId, AppointmentId), DayKey>,
    /// Serializes catalog and client writes so WAL order matches apply order.
    catalog_writes: Mutex<()>,
    /// Held shared by every write, exclusively by compaction. Writers take it
    /// before any schedule lock.
    compaction_gate: RwLock<()>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store {
    /// Volatile store, used by tests and ephemeral deployments.
    pub fn in_memory() -> Self {
        Self {
            resources: DashMap::new(),
            services: DashMap::new(),
            clients: DashMap::new(),
            days: DashMap::new(),
            appointment_days: DashMap::new(),
            catalog_writes: Mutex::new(()),
            compaction_gate: RwLock::new(()),
            wal_tx: None,
        }
    }

    /// Durable store: replay the WAL at `path`, then log every mutation to it.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Self::in_memory();
        for event in &events {
            store.replay_event(event);
        }
        tracing::info!(path = %path.display(), events = events.len(), "store replayed");
        store.wal_tx = Some(wal_tx);
        Ok(store)
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append { event: event.clone(), response: tx })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    /// WAL-append then apply a catalog or client event. Caller holds the
    /// compaction gate and `catalog_writes`.
    async fn persist_catalog(&self, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.apply_catalog(event);
        Ok(())
    }

    /// WAL-append then apply an appointment event. Caller holds the
    /// compaction gate and the day lock.
    async fn persist_to_day(
        &self,
        key: &DayKey,
        day: &mut DaySchedule,
        event: Event,
    ) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.apply_to_day(key, day, event);
        Ok(())
    }

    fn apply_catalog(&self, event: Event) {
        match event {
            Event::ResourceUpserted { tenant_id, resource } => {
                self.resources.insert((tenant_id, resource.id), resource);
            }
            Event::ServiceUpserted { tenant_id, service } => {
                self.services.insert((tenant_id, service.id), service);
            }
            Event::ClientUpserted { client } => {
                self.clients
                    .insert((client.tenant_id.clone(), client.email.clone()), client);
            }
            Event::AppointmentInserted { .. } | Event::AppointmentStatusChanged { .. } => {}
        }
    }

    /// Apply an appointment event to its schedule. Caller holds the lock.
    fn apply_to_day(&self, key: &DayKey, day: &mut DaySchedule, event: Event) {
        match event {
            Event::AppointmentInserted { appointment } => {
                self.appointment_days
                    .insert((appointment.tenant_id.clone(), appointment.id), key.clone());
                day.insert(appointment);
            }
            Event::AppointmentStatusChanged { id, status, .. } => {
                if let Some(a) = day.get_mut(&id) {
                    a.status = status;
                }
            }
            _ => {}
        }
    }

    fn day_key_for(&self, tenant_id: &TenantId, id: &AppointmentId) -> Option<DayKey> {
        self.appointment_days
            .get(&(tenant_id.clone(), *id))
            .map(|e| e.value().clone())
    }

    fn get_day(&self, key: &DayKey) -> Option<SharedDay> {
        self.days.get(key).map(|e| e.value().clone())
    }

    fn get_or_create_day(&self, key: &DayKey) -> SharedDay {
        self.days.entry(key.clone()).or_default().value().clone()
    }

    /// Apply one replayed event. Replay owns every schedule, so the
    /// `try_write` never contends.
    fn replay_event(&self, event: &Event) {
        let key = match event {
            Event::AppointmentInserted { appointment } => (
                appointment.tenant_id.clone(),
                appointment.resource_id,
                appointment.date,
            ),
            Event::AppointmentStatusChanged { tenant_id, id, .. } => {
                match self.day_key_for(tenant_id, id) {
                    Some(key) => key,
                    None => return,
                }
            }
            other => {
                self.apply_catalog(other.clone());
                return;
            }
        };
        let day = self.get_or_create_day(&key);
        if let Ok(mut guard) = day.try_write() {
            self.apply_to_day(&key, &mut guard, event.clone());
        }
    }

    /// Minimal event list that recreates the current state.
    async fn snapshot(&self) -> Vec<Event> {
        let mut events: Vec<Event> = Vec::new();
        for e in self.resources.iter() {
            events.push(Event::ResourceUpserted {
                tenant_id: e.key().0.clone(),
                resource: e.value().clone(),
            });
        }
        for e in self.services.iter() {
            events.push(Event::ServiceUpserted {
                tenant_id: e.key().0.clone(),
                service: e.value().clone(),
            });
        }
        for e in self.clients.iter() {
            events.push(Event::ClientUpserted { client: e.value().clone() });
        }

        let days: Vec<SharedDay> = self.days.iter().map(|e| e.value().clone()).collect();
        for day in days {
            let guard = day.read().await;
            for appointment in &guard.appointments {
                events.push(Event::AppointmentInserted { appointment: appointment.clone() });
            }
        }
        events
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. No-op for an in-memory store.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        // No write may land between the snapshot and the swap.
        let _gate = self.compaction_gate.write().await;
        let events = self.snapshot().await;
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
