use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use tracing::{info, warn};

use crate::availability::{parse_date, parse_time_of_day};
use crate::error::{ApiError, StoreError};
use crate::limits::{APPOINTMENT_DURATION_KEY, MAX_APPOINTMENT_DURATION_MIN, MAX_NOTES_LEN};
use crate::model::*;
use crate::store::TenantStore;

const SLOT_TAKEN: &str = "appointment time is already booked";

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub specialist_id: i32,
    pub service_id: i32,
    /// `YYYY-MM-DD`.
    pub appointment_date: String,
    /// `HH:MM[:SS]` or a full timestamp; only hour and minute are used.
    pub appointment_time: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub user_id: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    /// Defaults to the current specialist.
    #[serde(default)]
    pub specialist_id: Option<i32>,
    pub appointment_date: String,
    pub appointment_time: String,
}

fn parse_slot(date: &str, time: &str) -> Result<(NaiveDate, NaiveTime), ApiError> {
    let date = parse_date(date)?;
    let time = parse_time_of_day(time)?.to_naive_time();
    Ok((date, time))
}

fn conflict() -> ApiError {
    metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
    ApiError::Conflict(SLOT_TAKEN.into())
}

/// Map a write rejected by the slot uniqueness rule to `Conflict`.
fn map_write_error(e: StoreError) -> ApiError {
    match e {
        StoreError::UniqueViolation(_) => conflict(),
        StoreError::NotFound => ApiError::NotFound("appointment not found".into()),
        other => other.into(),
    }
}

async fn load_appointment<S: TenantStore + ?Sized>(
    store: &S,
    id: i32,
) -> Result<Appointment, ApiError> {
    if id <= 0 {
        return Err(ApiError::BadRequest("invalid appointment ID".into()));
    }
    store
        .appointment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("appointment not found".into()))
}

async fn active_specialist<S: TenantStore + ?Sized>(store: &S, id: i32) -> Result<Specialist, ApiError> {
    if id <= 0 {
        return Err(ApiError::BadRequest("invalid specialist ID".into()));
    }
    let specialist = store
        .specialist(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("specialist not found".into()))?;
    if !specialist.active {
        return Err(ApiError::BadRequest("specialist is not active".into()));
    }
    Ok(specialist)
}

/// Fast-path check for a non-cancelled appointment on the same
/// (specialist, date, time). The store's uniqueness rule stays authoritative.
pub async fn check_conflict<S: TenantStore + ?Sized>(
    store: &S,
    specialist_id: i32,
    date: NaiveDate,
    time: NaiveTime,
    exclude_id: Option<i32>,
) -> Result<(), ApiError> {
    if store
        .exists_conflict(specialist_id, date, time, exclude_id)
        .await?
    {
        return Err(conflict());
    }
    Ok(())
}

/// Book a slot. `now` is the tenant-local wall clock used for the
/// not-in-the-past rule.
pub async fn create_appointment<S: TenantStore + ?Sized>(
    store: &S,
    request: BookingRequest,
    now: NaiveDateTime,
) -> Result<Appointment, ApiError> {
    active_specialist(store, request.specialist_id).await?;

    if request.service_id <= 0 {
        return Err(ApiError::BadRequest("invalid service ID".into()));
    }
    let service = store
        .service(request.service_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("service not found".into()))?;
    if !service.active {
        return Err(ApiError::BadRequest("service is not active".into()));
    }

    let (date, time) = parse_slot(&request.appointment_date, &request.appointment_time)?;
    if date.and_time(time) < now {
        return Err(ApiError::BadRequest("appointment cannot be in the past".into()));
    }

    let notes = request.notes.filter(|n| !n.trim().is_empty());
    if notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(ApiError::BadRequest(format!(
            "notes must be at most {MAX_NOTES_LEN} bytes"
        )));
    }

    check_conflict(store, request.specialist_id, date, time, None).await?;

    let appointment = store
        .insert_appointment(&NewAppointment {
            user_id: request.user_id,
            specialist_id: request.specialist_id,
            service_id: service.id,
            appointment_date: date,
            appointment_time: time,
            status: AppointmentStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: service.price,
            notes,
        })
        .await
        .map_err(map_write_error)?;

    info!(
        "booked appointment {} for specialist {} at {} {}",
        appointment.id,
        appointment.specialist_id,
        appointment.appointment_date,
        SlotTime::from(appointment.appointment_time)
    );
    Ok(appointment)
}

/// Move an appointment to another slot (and optionally specialist).
pub async fn reschedule_appointment<S: TenantStore + ?Sized>(
    store: &S,
    id: i32,
    request: RescheduleRequest,
) -> Result<Appointment, ApiError> {
    let existing = load_appointment(store, id).await?;
    if existing.status == AppointmentStatus::Cancelled {
        return Err(ApiError::BadRequest("cannot update cancelled appointment".into()));
    }

    let specialist_id = request.specialist_id.unwrap_or(existing.specialist_id);
    let (date, time) = parse_slot(&request.appointment_date, &request.appointment_time)?;
    if specialist_id == existing.specialist_id
        && date == existing.appointment_date
        && time == existing.appointment_time
    {
        return Ok(existing);
    }
    if specialist_id != existing.specialist_id {
        active_specialist(store, specialist_id).await?;
    }

    check_conflict(store, specialist_id, date, time, Some(id)).await?;
    store
        .update_appointment_slot(id, specialist_id, date, time)
        .await
        .map_err(map_write_error)
}

pub async fn update_status<S: TenantStore + ?Sized>(
    store: &S,
    id: i32,
    status: &str,
) -> Result<Appointment, ApiError> {
    let status: AppointmentStatus = status.parse().map_err(ApiError::BadRequest)?;
    let existing = load_appointment(store, id).await?;
    if existing.status == status {
        return Ok(existing);
    }
    store
        .update_appointment_status(id, status)
        .await
        .map_err(map_write_error)?;
    load_appointment(store, id).await
}

/// Cancel and release the slot. Completed and already-cancelled
/// appointments are refused.
pub async fn cancel_appointment<S: TenantStore + ?Sized>(
    store: &S,
    id: i32,
) -> Result<Appointment, ApiError> {
    let existing = load_appointment(store, id).await?;
    match existing.status {
        AppointmentStatus::Cancelled => {
            return Err(ApiError::BadRequest("appointment is already cancelled".into()));
        }
        AppointmentStatus::Completed => {
            return Err(ApiError::BadRequest("cannot cancel completed appointment".into()));
        }
        _ => {}
    }
    store
        .update_appointment_status(id, AppointmentStatus::Cancelled)
        .await
        .map_err(map_write_error)?;
    load_appointment(store, id).await
}

pub async fn update_payment_status<S: TenantStore + ?Sized>(
    store: &S,
    id: i32,
    status: &str,
) -> Result<Appointment, ApiError> {
    let next: PaymentStatus = status.parse().map_err(ApiError::BadRequest)?;
    let existing = load_appointment(store, id).await?;
    if !existing.payment_status.can_transition_to(next) {
        return Err(ApiError::BadRequest(format!(
            "cannot change payment status from {} to {}",
            existing.payment_status.as_str(),
            next.as_str()
        )));
    }
    store
        .update_payment_status(id, next)
        .await
        .map_err(map_write_error)?;
    load_appointment(store, id).await
}

/// Store the tenant's slot length, bounded to (0, 480] minutes.
pub async fn set_appointment_duration<S: TenantStore + ?Sized>(
    store: &S,
    minutes: i64,
) -> Result<u32, ApiError> {
    if minutes <= 0 {
        return Err(ApiError::BadRequest("appointment duration must be positive".into()));
    }
    if minutes > MAX_APPOINTMENT_DURATION_MIN as i64 {
        return Err(ApiError::BadRequest(format!(
            "appointment duration cannot exceed {MAX_APPOINTMENT_DURATION_MIN} minutes"
        )));
    }
    store
        .upsert_setting(
            APPOINTMENT_DURATION_KEY,
            &minutes.to_string(),
            "Slot length in minutes used for availability",
        )
        .await
        .inspect_err(|e| warn!("could not store appointment duration: {e}"))?;
    Ok(minutes as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryBackend, MemoryTenant};
    use crate::store::{SessionFactory, TenantSession};
    use std::sync::Arc;

    struct Fixture {
        _backend: MemoryBackend,
        tenant: Arc<MemoryTenant>,
        session: Box<dyn TenantSession>,
        specialist: i32,
        service: i32,
    }

    async fn fixture() -> Fixture {
        let backend = MemoryBackend::new();
        let tenant = backend.insert_namespace("tenant_a");
        let specialist = tenant.add_specialist("Dr. Smith", true).await;
        let service = tenant.add_service("Consultation", 150.0, true).await;
        let session = backend.checkout("tenant_a").await.unwrap();
        Fixture {
            _backend: backend,
            tenant,
            session,
            specialist,
            service,
        }
    }

    fn now() -> NaiveDateTime {
        parse_date("2030-01-01").unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    fn request(f: &Fixture, date: &str, time: &str) -> BookingRequest {
        BookingRequest {
            specialist_id: f.specialist,
            service_id: f.service,
            appointment_date: date.into(),
            appointment_time: time.into(),
            notes: None,
            user_id: Some(42),
        }
    }

    async fn book(f: &Fixture, date: &str, time: &str) -> Appointment {
        create_appointment(f.session.as_ref(), request(f, date, time), now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_pending_appointment_priced_from_service() {
        let f = fixture().await;
        let a = book(&f, "2030-01-07", "10:00").await;
        assert_eq!(a.status, AppointmentStatus::Pending);
        assert_eq!(a.payment_status, PaymentStatus::Pending);
        assert_eq!(a.total_amount, 150.0);
        assert_eq!(a.user_id, Some(42));
        assert_eq!(SlotTime::from(a.appointment_time).to_string(), "10:00");
    }

    #[tokio::test]
    async fn second_booking_of_same_slot_conflicts() {
        let f = fixture().await;
        book(&f, "2030-01-07", "10:00").await;
        let err = create_appointment(
            f.session.as_ref(),
            request(&f, "2030-01-07", "10:00:00"),
            now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, ApiError::Conflict(SLOT_TAKEN.into()));
        assert_eq!(f.tenant.appointment_count().await, 1);
    }

    #[tokio::test]
    async fn rejects_invalid_bookings() {
        let f = fixture().await;
        let s = f.session.as_ref();

        let past = create_appointment(s, request(&f, "2029-12-31", "10:00"), now()).await;
        assert!(matches!(past, Err(ApiError::BadRequest(_))));

        let mut unknown = request(&f, "2030-01-07", "10:00");
        unknown.service_id = 999;
        assert!(matches!(
            create_appointment(s, unknown, now()).await,
            Err(ApiError::NotFound(_))
        ));

        let idle = f.tenant.add_specialist("On leave", false).await;
        let mut inactive = request(&f, "2030-01-07", "10:00");
        inactive.specialist_id = idle;
        assert!(matches!(
            create_appointment(s, inactive, now()).await,
            Err(ApiError::BadRequest(_))
        ));

        let mut long_notes = request(&f, "2030-01-07", "10:00");
        long_notes.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(matches!(
            create_appointment(s, long_notes, now()).await,
            Err(ApiError::BadRequest(_))
        ));

        let bad_time = create_appointment(s, request(&f, "2030-01-07", "ten"), now()).await;
        assert!(matches!(bad_time, Err(ApiError::BadRequest(_))));
        assert_eq!(f.tenant.appointment_count().await, 0);
    }

    #[tokio::test]
    async fn insert_violation_maps_to_conflict() {
        let f = fixture().await;
        let date = parse_date("2030-01-07").unwrap();
        let time = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        f.tenant
            .add_appointment(f.specialist, date, time, AppointmentStatus::Confirmed)
            .await
            .unwrap();

        // bypass the pre-check and hit the store directly
        let err = f
            .session
            .insert_appointment(&NewAppointment {
                user_id: None,
                specialist_id: f.specialist,
                service_id: f.service,
                appointment_date: date,
                appointment_time: time,
                status: AppointmentStatus::Pending,
                payment_status: PaymentStatus::Pending,
                total_amount: 0.0,
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(map_write_error(err), ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancelling_frees_the_slot() {
        let f = fixture().await;
        let a = book(&f, "2030-01-07", "10:00").await;
        let cancelled = cancel_appointment(f.session.as_ref(), a.id).await.unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

        book(&f, "2030-01-07", "10:00").await;

        let again = cancel_appointment(f.session.as_ref(), a.id).await;
        assert!(matches!(again, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn completed_appointment_cannot_be_cancelled() {
        let f = fixture().await;
        let a = book(&f, "2030-01-07", "10:00").await;
        update_status(f.session.as_ref(), a.id, "completed").await.unwrap();
        let err = cancel_appointment(f.session.as_ref(), a.id).await.unwrap_err();
        assert_eq!(err, ApiError::BadRequest("cannot cancel completed appointment".into()));
    }

    #[tokio::test]
    async fn reschedule_checks_conflicts_excluding_itself() {
        let f = fixture().await;
        let a = book(&f, "2030-01-07", "10:00").await;
        let b = book(&f, "2030-01-07", "11:00").await;
        let s = f.session.as_ref();

        let same = RescheduleRequest {
            specialist_id: None,
            appointment_date: "2030-01-07".into(),
            appointment_time: "10:00".into(),
        };
        assert_eq!(reschedule_appointment(s, a.id, same).await.unwrap().id, a.id);

        let onto_b = RescheduleRequest {
            specialist_id: None,
            appointment_date: "2030-01-07".into(),
            appointment_time: "11:00".into(),
        };
        let err = reschedule_appointment(s, a.id, onto_b).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let free = RescheduleRequest {
            specialist_id: None,
            appointment_date: "2030-01-08".into(),
            appointment_time: "09:00".into(),
        };
        let moved = reschedule_appointment(s, b.id, free).await.unwrap();
        assert_eq!(moved.appointment_date, parse_date("2030-01-08").unwrap());
    }

    #[tokio::test]
    async fn cancelled_appointment_cannot_be_rescheduled() {
        let f = fixture().await;
        let a = book(&f, "2030-01-07", "10:00").await;
        cancel_appointment(f.session.as_ref(), a.id).await.unwrap();

        let req = RescheduleRequest {
            specialist_id: None,
            appointment_date: "2030-01-09".into(),
            appointment_time: "10:00".into(),
        };
        let err = reschedule_appointment(f.session.as_ref(), a.id, req).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn reactivating_into_a_taken_slot_conflicts() {
        let f = fixture().await;
        let a = book(&f, "2030-01-07", "10:00").await;
        cancel_appointment(f.session.as_ref(), a.id).await.unwrap();
        book(&f, "2030-01-07", "10:00").await;

        let err = update_status(f.session.as_ref(), a.id, "confirmed").await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn status_value_is_validated() {
        let f = fixture().await;
        let a = book(&f, "2030-01-07", "10:00").await;
        let err = update_status(f.session.as_ref(), a.id, "done").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        let err = update_status(f.session.as_ref(), 999, "confirmed").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn payment_status_follows_transitions() {
        let f = fixture().await;
        let a = book(&f, "2030-01-07", "10:00").await;
        let s = f.session.as_ref();

        let err = update_payment_status(s, a.id, "refunded").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        update_payment_status(s, a.id, "failed").await.unwrap();
        update_payment_status(s, a.id, "completed").await.unwrap();
        let refunded = update_payment_status(s, a.id, "refunded").await.unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);

        let err = update_payment_status(s, a.id, "pending").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn duration_bounds() {
        let f = fixture().await;
        let s = f.session.as_ref();

        assert!(matches!(set_appointment_duration(s, 0).await, Err(ApiError::BadRequest(_))));
        assert!(matches!(set_appointment_duration(s, 481).await, Err(ApiError::BadRequest(_))));
        assert_eq!(set_appointment_duration(s, 480).await.unwrap(), 480);
        assert_eq!(set_appointment_duration(s, 45).await.unwrap(), 45);
        assert_eq!(
            f.tenant.setting_value(APPOINTMENT_DURATION_KEY).await.as_deref(),
            Some("45")
        );
    }
}
