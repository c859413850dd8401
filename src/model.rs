use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize, Serializer};

pub type TenantId = i32;

/// Row of `public.tenants`, the source of truth for domain routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    pub domain: String,
    pub schema_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    pub fn to_entry(&self) -> TenantCacheEntry {
        TenantCacheEntry {
            id: self.id,
            name: self.name.clone(),
            domain: self.domain.clone(),
            schema: self.schema_name.clone(),
        }
    }
}

/// Read-optimized projection of a [`TenantRecord`]. Never mutated in place;
/// callers always receive their own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantCacheEntry {
    pub id: TenantId,
    pub name: String,
    pub domain: String,
    pub schema: String,
}

// ── Slot time ────────────────────────────────────────────────────

/// A time of day at minute resolution, rendered as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime {
    minutes: u16,
}

impl SlotTime {
    pub const MINUTES_PER_DAY: u32 = 24 * 60;

    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self {
            minutes: (hour * 60 + minute) as u16,
        })
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes < Self::MINUTES_PER_DAY).then_some(Self {
            minutes: minutes as u16,
        })
    }

    pub fn minutes(&self) -> u32 {
        self.minutes as u32
    }

    pub fn hour(&self) -> u32 {
        self.minutes() / 60
    }

    pub fn minute(&self) -> u32 {
        self.minutes() % 60
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl From<NaiveTime> for SlotTime {
    fn from(t: NaiveTime) -> Self {
        Self {
            minutes: (t.hour() * 60 + t.minute()) as u16,
        }
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── Tenant-scoped entities ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Specialist {
    pub id: i32,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub id: i32,
    pub name: String,
    pub price: f64,
    pub active: bool,
}

/// Weekly recurring window. Times arrive as strings because the store may
/// hand back either `HH:MM[:SS]` or a full timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct WorkingHour {
    pub id: i32,
    pub specialist_id: i32,
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: i32,
    pub start_time: String,
    pub end_time: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(format!("invalid appointment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// `refunded` is terminal; a refund needs a completed payment.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Completed)
                | (Pending, Failed)
                | (Failed, Pending)
                | (Failed, Completed)
                | (Completed, Refunded)
        )
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("invalid payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appointment {
    pub id: i32,
    pub user_id: Option<i32>,
    pub specialist_id: i32,
    pub service_id: i32,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Cancelled appointments release their slot.
    pub fn occupies_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

/// Insert payload; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub user_id: Option<i32>,
    pub specialist_id: i32,
    pub service_id: i32,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_time_formats_zero_padded() {
        assert_eq!(SlotTime::new(9, 5).unwrap().to_string(), "09:05");
        assert_eq!(SlotTime::new(23, 59).unwrap().to_string(), "23:59");
        assert!(SlotTime::new(24, 0).is_none());
        assert!(SlotTime::new(10, 60).is_none());
    }

    #[test]
    fn slot_time_from_naive_time_drops_seconds() {
        let t = NaiveTime::from_hms_opt(10, 30, 45).unwrap();
        assert_eq!(SlotTime::from(t), SlotTime::new(10, 30).unwrap());
    }

    #[test]
    fn slot_time_serializes_as_string() {
        let json = serde_json::to_string(&vec![SlotTime::new(9, 0).unwrap()]).unwrap();
        assert_eq!(json, r#"["09:00"]"#);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ["pending", "confirmed", "completed", "cancelled"] {
            assert_eq!(s.parse::<AppointmentStatus>().unwrap().as_str(), s);
        }
        assert!("done".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn payment_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Refunded));
        assert!(!Refunded.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Completed));
    }
}
