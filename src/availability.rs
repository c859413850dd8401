use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::warn;

use crate::error::ApiError;
use crate::limits::{
    APPOINTMENT_DURATION_KEY, DEFAULT_APPOINTMENT_DURATION_MIN, MAX_APPOINTMENT_DURATION_MIN,
};
use crate::model::*;
use crate::store::TenantStore;

// ── Parsing ──────────────────────────────────────────────────────

pub fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest("invalid date format, use YYYY-MM-DD".into()))
}

/// 0 = Sunday … 6 = Saturday, matching `working_hours.day_of_week`.
pub fn day_of_week(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

/// Working-hour bounds come back either as a bare time of day or as a full
/// timestamp, depending on the driver. Only hour and minute are kept.
pub fn parse_time_of_day(raw: &str) -> Result<SlotTime, ApiError> {
    let raw = raw.trim();

    for fmt in ["%H:%M:%S%.f", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(raw, fmt) {
            return Ok(SlotTime::from(t));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(SlotTime::from(dt.time()));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(SlotTime::from(dt.time()));
        }
    }
    Err(ApiError::BadRequest(format!("invalid time format: {raw}")))
}

// ── Slot arithmetic ──────────────────────────────────────────────

/// Slot length from the tenant setting. Missing, unparsable or non-positive
/// values fall back to the default; oversized values are clamped.
pub fn effective_duration(setting: Option<&str>) -> u32 {
    match setting.and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(m) if m > 0 => m.min(MAX_APPOINTMENT_DURATION_MIN as i64) as u32,
        _ => DEFAULT_APPOINTMENT_DURATION_MIN,
    }
}

/// Every start time `s` with `start <= s` and `s + duration <= end`, stepping
/// by `duration`. A trailing partial slot is never emitted.
pub fn generate_slots(start: SlotTime, end: SlotTime, duration: u32) -> Vec<SlotTime> {
    if duration == 0 || start >= end {
        return Vec::new();
    }
    let end = end.minutes();
    (start.minutes()..)
        .step_by(duration as usize)
        .take_while(|m| m + duration <= end)
        .filter_map(SlotTime::from_minutes)
        .collect()
}

/// Drop slots whose start matches a non-cancelled appointment.
pub fn exclude_booked(slots: Vec<SlotTime>, appointments: &[Appointment]) -> Vec<SlotTime> {
    let booked: Vec<SlotTime> = appointments
        .iter()
        .filter(|a| a.occupies_slot())
        .map(|a| SlotTime::from(a.appointment_time))
        .collect();
    slots.into_iter().filter(|s| !booked.contains(s)).collect()
}

/// The active window for `day`. Duplicates are resolved to the earliest start.
pub fn select_working_hour(hours: &[WorkingHour], day: i32) -> Option<&WorkingHour> {
    let mut candidates: Vec<&WorkingHour> = hours
        .iter()
        .filter(|wh| wh.active && wh.day_of_week == day)
        .collect();
    if candidates.len() > 1 {
        warn!(
            "specialist {} has {} active working-hour records for day {day}, using the earliest",
            candidates[0].specialist_id,
            candidates.len()
        );
        candidates.sort_by_key(|wh| {
            parse_time_of_day(&wh.start_time)
                .map(|t| t.minutes())
                .unwrap_or(u32::MAX)
        });
    }
    candidates.first().copied()
}

// ── Query ────────────────────────────────────────────────────────

/// Bookable start times for a specialist on `date` (`YYYY-MM-DD`).
///
/// The specialist is resolved before the date is parsed, so an unknown
/// specialist is reported as not found even when the date is malformed.
/// An unreadable duration setting falls back to the default.
pub async fn available_slots<S: TenantStore + ?Sized>(
    store: &S,
    specialist_id: i32,
    date: &str,
) -> Result<Vec<SlotTime>, ApiError> {
    if specialist_id <= 0 {
        return Err(ApiError::BadRequest("Invalid specialist ID".into()));
    }
    metrics::counter!(crate::observability::SLOT_QUERIES_TOTAL).increment(1);

    store
        .specialist(specialist_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Specialist not found".into()))?;
    let date = parse_date(date)?;

    let hours = store.working_hours_for(specialist_id).await?;
    let Some(window) = select_working_hour(&hours, day_of_week(date)) else {
        return Ok(Vec::new());
    };
    let start = parse_time_of_day(&window.start_time)?;
    let end = parse_time_of_day(&window.end_time)?;

    let setting = store
        .setting(APPOINTMENT_DURATION_KEY)
        .await
        .unwrap_or_else(|e| {
            warn!("could not read {APPOINTMENT_DURATION_KEY}, using the default: {e}");
            None
        });
    let duration = effective_duration(setting.as_deref());
    let slots = generate_slots(start, end, duration);

    match store.appointments_for_specialist_on(specialist_id, date).await {
        Ok(appointments) => Ok(exclude_booked(slots, &appointments)),
        Err(e) => {
            warn!(
                "could not load appointments for specialist {specialist_id} on {date}, \
                 returning unfiltered slots: {e}"
            );
            Ok(slots)
        }
    }
}
