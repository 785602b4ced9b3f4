use super::*;
use async_trait::async_trait;
use chrono::Weekday;
use ulid::Ulid;

const MONDAY: &str = "2024-06-03";
const TUESDAY: &str = "2024-06-04";
const WEDNESDAY: &str = "2024-06-05";
const SUNDAY: &str = "2024-06-09";

struct Salon {
    store: Arc<Store>,
    engine: BookingEngine,
    tenant: TenantId,
    resource: ResourceId,
    service: ServiceId,
}

async fn salon_with(
    availability: Option<WeeklyAvailability>,
    duration: Minutes,
    config: EngineConfig,
) -> Salon {
    let store = Arc::new(Store::in_memory());
    let tenant = TenantId::new("salon");
    let resource = Ulid::new();
    let service = Ulid::new();
    store
        .upsert_resource(&tenant, Resource { id: resource, name: Some("Ana".into()), availability })
        .await
        .unwrap();
    store
        .upsert_service(
            &tenant,
            Service { id: service, name: Some("Cut".into()), duration_minutes: duration, price: 3000 },
        )
        .await
        .unwrap();
    let engine = BookingEngine::with_store(store.clone(), config).unwrap();
    Salon { store, engine, tenant, resource, service }
}

async fn salon(availability: Option<WeeklyAvailability>, duration: Minutes) -> Salon {
    salon_with(availability, duration, EngineConfig::default()).await
}

fn hours(start: &str, end: &str) -> DayHours {
    DayHours::open(start.parse().unwrap(), end.parse().unwrap())
}

fn monday_only(start: &str, end: &str) -> WeeklyAvailability {
    WeeklyAvailability::default().with(Weekday::Mon, hours(start, end))
}

fn request(s: &Salon, date: &str, start: &str, email: &str) -> BookingRequest {
    BookingRequest {
        resource_id: s.resource,
        service_id: s.service,
        date: date.into(),
        start_time: start.into(),
        client_name: "Ana".into(),
        client_email: email.into(),
        client_phone: Some("555-0100".into()),
    }
}

impl Salon {
    async fn slots(&self, date: &str) -> Vec<String> {
        self.engine
            .get_available_slots(&self.tenant, self.resource, self.service, date)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.to_string())
            .collect()
    }

    async fn book(&self, date: &str, start: &str) -> Result<Appointment, EngineError> {
        self.engine
            .create_booking(&self.tenant, request(self, date, start, "ana@example.com"))
            .await
    }

    async fn confirmed(&self, date: &str, start: &str) -> Appointment {
        self.engine
            .create_appointment(
                &self.tenant,
                AppointmentDraft {
                    resource_id: self.resource,
                    service_id: self.service,
                    client_id: None,
                    date: date.parse().unwrap(),
                    start: start.parse().unwrap(),
                    status: AppointmentStatus::Confirmed,
                },
            )
            .await
            .unwrap()
    }
}

fn assert_no_blocking_overlap(appointments: &[Appointment]) {
    let blocking: Vec<_> = appointments.iter().filter(|a| a.status.is_blocking()).collect();
    for (i, a) in blocking.iter().enumerate() {
        for b in &blocking[i + 1..] {
            assert!(
                !a.span().overlaps(&b.span()),
                "{}-{} overlaps {}-{}",
                a.start,
                a.end,
                b.start,
                b.end
            );
        }
    }
}

// ── Slot listing ─────────────────────────────────────────

#[tokio::test]
async fn booked_interval_removes_overlapping_candidates() {
    let s = salon(Some(monday_only("09:00", "18:00")), 45).await;
    s.confirmed(MONDAY, "10:00").await;

    let slots = s.slots(MONDAY).await;
    assert!(slots.contains(&"09:00".to_string()));
    assert!(!slots.contains(&"09:30".to_string()), "09:30 ends 10:15");
    assert!(!slots.contains(&"10:00".to_string()));
    assert!(!slots.contains(&"10:30".to_string()), "10:30 starts before 10:45");
    assert!(slots.contains(&"11:00".to_string()));
    assert_eq!(slots.last().map(String::as_str), Some("17:30"));
}

#[tokio::test]
async fn finer_granularity_offers_slot_at_booking_end() {
    let config = EngineConfig { granularity_minutes: 15, trim_overruns: false };
    let s = salon_with(Some(monday_only("09:00", "18:00")), 45, config).await;
    s.confirmed(MONDAY, "10:00").await;

    let slots = s.slots(MONDAY).await;
    assert!(slots.contains(&"09:15".to_string()), "09:15 ends exactly at 10:00");
    assert!(!slots.contains(&"09:30".to_string()));
    assert!(slots.contains(&"10:45".to_string()));
}

#[tokio::test]
async fn unset_availability_uses_default_week() {
    let s = salon(None, 30).await;
    let slots = s.slots(TUESDAY).await;
    assert_eq!(slots.first().map(String::as_str), Some("09:00"));
    assert_eq!(slots.last().map(String::as_str), Some("17:30"));
    assert_eq!(slots.len(), 18);
}

#[tokio::test]
async fn partial_availability_closes_other_days() {
    let s = salon(Some(monday_only("09:00", "18:00")), 30).await;
    assert!(s.slots(WEDNESDAY).await.is_empty());
    assert!(!s.slots(MONDAY).await.is_empty());
}

#[tokio::test]
async fn default_week_is_closed_on_sunday() {
    let s = salon(None, 30).await;
    assert!(s.slots(SUNDAY).await.is_empty());
}

#[tokio::test]
async fn sunday_override_opens_sunday() {
    let week = WeeklyAvailability::default().with(Weekday::Sun, hours("10:00", "12:00"));
    let s = salon(Some(week), 30).await;
    assert_eq!(s.slots(SUNDAY).await, ["10:00", "10:30", "11:00", "11:30"]);
}

#[tokio::test]
async fn slot_listing_is_idempotent() {
    let s = salon(None, 60).await;
    s.confirmed(MONDAY, "13:00").await;
    let first = s.slots(MONDAY).await;
    let second = s.slots(MONDAY).await;
    assert_eq!(first, second);
    let mut sorted = first.clone();
    sorted.sort();
    assert_eq!(first, sorted);
}

#[tokio::test]
async fn late_slots_may_overrun_closing_by_default() {
    let s = salon(Some(monday_only("09:00", "12:00")), 45).await;
    assert_eq!(s.slots(MONDAY).await.last().map(String::as_str), Some("11:30"));
}

#[tokio::test]
async fn trim_overruns_drops_late_slots() {
    let config = EngineConfig { granularity_minutes: 30, trim_overruns: true };
    let s = salon_with(Some(monday_only("09:00", "12:00")), 45, config).await;
    assert_eq!(s.slots(MONDAY).await, ["09:00", "09:30", "10:00", "10:30", "11:00"]);
}

#[tokio::test]
async fn slots_for_unknown_resource_or_service() {
    let s = salon(None, 30).await;
    let err = s
        .engine
        .get_available_slots(&s.tenant, Ulid::new(), s.service, MONDAY)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "resource", .. }));

    let err = s
        .engine
        .get_available_slots(&s.tenant, s.resource, Ulid::new(), MONDAY)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "service", .. }));
}

#[tokio::test]
async fn slots_reject_malformed_date() {
    let s = salon(None, 30).await;
    for date in ["2024-6-3", "03/06/2024", "2024-02-30", ""] {
        let err = s
            .engine
            .get_available_slots(&s.tenant, s.resource, s.service, date)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{date:?}");
    }
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn booking_is_pending_priced_and_ends_after_duration() {
    let s = salon(None, 45).await;
    let a = s.book(MONDAY, "09:30").await.unwrap();
    assert_eq!(a.status, AppointmentStatus::Pending);
    assert_eq!(a.start.to_string(), "09:30");
    assert_eq!(a.end.to_string(), "10:15");
    assert_eq!(a.price, 3000);
    assert_eq!(a.tenant_id, s.tenant);
    assert!(a.client_id.is_some());
}

#[tokio::test]
async fn booked_slot_leaves_listing() {
    let s = salon(None, 30).await;
    assert!(s.slots(MONDAY).await.contains(&"14:00".to_string()));
    s.book(MONDAY, "14:00").await.unwrap();
    let after = s.slots(MONDAY).await;
    assert!(!after.contains(&"14:00".to_string()));
    assert!(after.contains(&"13:30".to_string()), "13:30 + 30 only touches 14:00");
}

#[tokio::test]
async fn adjacent_bookings_do_not_conflict() {
    let s = salon(None, 30).await;
    s.book(MONDAY, "10:00").await.unwrap();
    s.book(MONDAY, "10:30").await.unwrap();
    s.book(MONDAY, "09:30").await.unwrap();
    let err = s.book(MONDAY, "10:15").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn cancelled_appointment_stops_blocking() {
    let s = salon(None, 60).await;
    let a = s.book(MONDAY, "11:00").await.unwrap();
    assert!(!s.slots(MONDAY).await.contains(&"11:00".to_string()));

    let cancelled = s.engine.cancel(&s.tenant, a.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert!(s.slots(MONDAY).await.contains(&"11:00".to_string()));
    s.book(MONDAY, "11:00").await.unwrap();
}

#[tokio::test]
async fn completed_appointment_stops_blocking() {
    let s = salon(None, 60).await;
    let a = s.confirmed(MONDAY, "11:00").await;
    s.engine
        .set_status(&s.tenant, a.id, AppointmentStatus::Completed)
        .await
        .unwrap();
    assert!(s.slots(MONDAY).await.contains(&"11:00".to_string()));
}

#[tokio::test]
async fn status_changes_follow_lifecycle() {
    let s = salon(None, 30).await;
    let a = s.book(MONDAY, "09:00").await.unwrap();

    let err = s
        .engine
        .set_status(&s.tenant, a.id, AppointmentStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    s.engine.cancel(&s.tenant, a.id).await.unwrap();
    let err = s
        .engine
        .set_status(&s.tenant, a.id, AppointmentStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "cancelled is final");

    let err = s.engine.cancel(&s.tenant, Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "appointment", .. }));
}

#[tokio::test]
async fn booking_past_midnight_is_rejected() {
    let s = salon(None, 45).await;
    let err = s.book(MONDAY, "23:30").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let listed = s.engine.list_appointments(&s.tenant, s.resource, MONDAY).await.unwrap();
    assert!(listed.is_empty());

    let a = s.book(MONDAY, "23:15").await.unwrap();
    assert_eq!(a.end, ClockTime::END_OF_DAY);
}

#[tokio::test]
async fn booking_validates_input() {
    let s = salon(None, 30).await;
    let cases = [
        request(&s, "2024-13-01", "10:00", "ana@example.com"),
        request(&s, MONDAY, "10:7", "ana@example.com"),
        request(&s, MONDAY, "25:00", "ana@example.com"),
        request(&s, MONDAY, "10:00", ""),
        BookingRequest { client_name: "  ".into(), ..request(&s, MONDAY, "10:00", "a@b.c") },
    ];
    for req in cases {
        let err = s.engine.create_booking(&s.tenant, req.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{req:?}");
    }
    assert!(s.store.get_client(&s.tenant, "a@b.c").is_none());
}

#[tokio::test]
async fn booking_unknown_service_is_not_found() {
    let s = salon(None, 30).await;
    let req = BookingRequest { service_id: Ulid::new(), ..request(&s, MONDAY, "10:00", "a@b.c") };
    let err = s.engine.create_booking(&s.tenant, req).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "service", .. }));

    let req = BookingRequest { resource_id: Ulid::new(), ..request(&s, MONDAY, "10:00", "a@b.c") };
    let err = s.engine.create_booking(&s.tenant, req).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "resource", .. }));
}

#[tokio::test]
async fn repeat_client_updates_contact_only() {
    let s = salon(None, 30).await;
    let first = s.book(MONDAY, "09:00").await.unwrap();

    let req = BookingRequest {
        client_name: "Ana Maria".into(),
        client_email: "ANA@example.com".into(),
        client_phone: None,
        ..request(&s, MONDAY, "10:00", "")
    };
    let second = s.engine.create_booking(&s.tenant, req).await.unwrap();
    assert_eq!(first.client_id, second.client_id);

    let client = s.store.get_client(&s.tenant, "ana@example.com").unwrap();
    assert_eq!(client.name, "Ana Maria");
    assert_eq!(client.phone, None);
    assert_eq!(client.total_spent, 0);
    assert_eq!(client.visit_count, 0);
}

#[tokio::test]
async fn admin_create_rejects_non_blocking_status() {
    let s = salon(None, 30).await;
    let draft = AppointmentDraft {
        resource_id: s.resource,
        service_id: s.service,
        client_id: None,
        date: MONDAY.parse().unwrap(),
        start: "09:00".parse().unwrap(),
        status: AppointmentStatus::Completed,
    };
    let err = s.engine.create_appointment(&s.tenant, draft).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn appointments_listed_in_start_order() {
    let s = salon(None, 30).await;
    for start in ["15:00", "09:00", "12:30"] {
        s.book(MONDAY, start).await.unwrap();
    }
    let starts: Vec<String> = s
        .engine
        .list_appointments(&s.tenant, s.resource, MONDAY)
        .await
        .unwrap()
        .iter()
        .map(|a| a.start.to_string())
        .collect();
    assert_eq!(starts, ["09:00", "12:30", "15:00"]);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_bookings_one_wins() {
    let s = Arc::new(salon(None, 45).await);

    let a = {
        let s = s.clone();
        tokio::spawn(async move {
            s.engine.create_booking(&s.tenant, request(&s, MONDAY, "10:00", "ana@example.com")).await
        })
    };
    let b = {
        let s = s.clone();
        tokio::spawn(async move {
            s.engine.create_booking(&s.tenant, request(&s, MONDAY, "10:15", "bea@example.com")).await
        })
    };
    let (a, b) = tokio::join!(a, b);
    let results = [a.unwrap(), b.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Conflict(_))))
        .count();
    assert_eq!((ok, conflicts), (1, 1));

    let listed = s.engine.list_appointments(&s.tenant, s.resource, MONDAY).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_never_overlap() {
    let s = Arc::new(salon(None, 50).await);
    let handles: Vec<_> = (0..48u32)
        .map(|i| {
            let s = s.clone();
            let start = ClockTime::from_minutes(540 + (i * 35) % 480).unwrap().to_string();
            tokio::spawn(async move {
                let email = format!("client{i}@example.com");
                s.engine.create_booking(&s.tenant, request(&s, MONDAY, &start, &email)).await
            })
        })
        .collect();

    let mut booked = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => booked += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(booked > 0);

    let listed = s.engine.list_appointments(&s.tenant, s.resource, MONDAY).await.unwrap();
    assert_eq!(listed.len(), booked);
    assert_no_blocking_overlap(&listed);
}

// ── Port doubles ─────────────────────────────────────────

/// Appointment store whose `list` always looks empty, as if every read
/// raced ahead of a concurrent write.
struct StaleReads(Arc<Store>);

#[async_trait]
impl AppointmentStore for StaleReads {
    async fn find_blocking(
        &self,
        tenant_id: &TenantId,
        resource_id: ResourceId,
        date: CalendarDate,
    ) -> Result<Vec<Span>, StoreError> {
        self.0.find_blocking(tenant_id, resource_id, date).await
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.0.insert(appointment).await
    }

    async fn list(
        &self,
        _tenant_id: &TenantId,
        _resource_id: ResourceId,
        _date: CalendarDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(Vec::new())
    }

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, StoreError> {
        self.0.set_status(tenant_id, id, status).await
    }
}

#[tokio::test]
async fn store_constraint_catches_what_precheck_misses() {
    let s = salon(None, 45).await;
    let engine = BookingEngine::new(
        s.store.clone(),
        s.store.clone(),
        Arc::new(StaleReads(s.store.clone())),
        s.store.clone(),
        EngineConfig::default(),
    )
    .unwrap();

    let first = engine
        .create_booking(&s.tenant, request(&s, MONDAY, "10:00", "ana@example.com"))
        .await
        .unwrap();
    let err = engine
        .create_booking(&s.tenant, request(&s, MONDAY, "10:30", "bea@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == first.id));
}

/// Appointment store whose disk has gone away.
struct BrokenDisk;

#[async_trait]
impl AppointmentStore for BrokenDisk {
    async fn find_blocking(
        &self,
        _tenant_id: &TenantId,
        _resource_id: ResourceId,
        _date: CalendarDate,
    ) -> Result<Vec<Span>, StoreError> {
        Err(StoreError::Io("read failed".into()))
    }

    async fn insert(&self, _appointment: Appointment) -> Result<Appointment, StoreError> {
        Err(StoreError::Io("write failed".into()))
    }

    async fn list(
        &self,
        _tenant_id: &TenantId,
        _resource_id: ResourceId,
        _date: CalendarDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(Vec::new())
    }

    async fn set_status(
        &self,
        _tenant_id: &TenantId,
        id: AppointmentId,
        _status: AppointmentStatus,
    ) -> Result<Appointment, StoreError> {
        Err(StoreError::not_found("appointment", id))
    }
}

#[tokio::test]
async fn io_failures_surface_as_store_errors() {
    let s = salon(None, 30).await;
    let engine = BookingEngine::new(
        s.store.clone(),
        s.store.clone(),
        Arc::new(BrokenDisk),
        s.store.clone(),
        EngineConfig::default(),
    )
    .unwrap();

    let err = engine
        .get_available_slots(&s.tenant, s.resource, s.service, MONDAY)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));

    let err = engine
        .create_booking(&s.tenant, request(&s, MONDAY, "10:00", "ana@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
}

#[test]
fn engine_rejects_bad_granularity() {
    let store = Arc::new(Store::in_memory());
    for granularity_minutes in [0, MAX_GRANULARITY_MIN + 1] {
        let config = EngineConfig { granularity_minutes, trim_overruns: false };
        assert!(BookingEngine::with_store(store.clone(), config).is_err());
    }
}
