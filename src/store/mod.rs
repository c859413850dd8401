//! Storage seams consumed by the tenant core.
//!
//! `postgres` is the production backend; `memory` keeps everything in-process
//! and is what the test suite drives.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};

use crate::error::StoreError;
use crate::model::*;

/// Source of truth for domain → tenant mapping (`public.tenants`).
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Active tenant registered for `domain`, if any.
    async fn tenant_by_domain(&self, domain: &str) -> Result<Option<TenantRecord>, StoreError>;

    async fn list_active_tenants(&self) -> Result<Vec<TenantRecord>, StoreError>;
}

/// Namespace (schema) lifecycle.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    async fn namespace_exists(&self, schema: &str) -> Result<bool, StoreError>;

    /// Execute the rendered template for `schema` as one unit.
    async fn create_namespace(&self, schema: &str, ddl: &str) -> Result<(), StoreError>;

    async fn drop_namespace(&self, schema: &str) -> Result<(), StoreError>;
}

/// Reads and writes against one tenant's namespace.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn specialist(&self, id: i32) -> Result<Option<Specialist>, StoreError>;

    async fn service(&self, id: i32) -> Result<Option<Service>, StoreError>;

    async fn working_hours_for(&self, specialist_id: i32) -> Result<Vec<WorkingHour>, StoreError>;

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn upsert_setting(&self, key: &str, value: &str, description: &str)
        -> Result<(), StoreError>;

    async fn appointments_for_specialist_on(
        &self,
        specialist_id: i32,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// True if a non-cancelled appointment other than `exclude_id` holds
    /// (specialist, date, time).
    async fn exists_conflict(
        &self,
        specialist_id: i32,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<i32>,
    ) -> Result<bool, StoreError>;

    async fn appointment(&self, id: i32) -> Result<Option<Appointment>, StoreError>;

    /// Must fail with [`StoreError::UniqueViolation`] when the slot is taken.
    async fn insert_appointment(&self, new: &NewAppointment) -> Result<Appointment, StoreError>;

    async fn update_appointment_slot(
        &self,
        id: i32,
        specialist_id: i32,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Appointment, StoreError>;

    async fn update_appointment_status(
        &self,
        id: i32,
        status: AppointmentStatus,
    ) -> Result<(), StoreError>;

    async fn update_payment_status(&self, id: i32, status: PaymentStatus)
        -> Result<(), StoreError>;
}

/// A [`TenantStore`] bound to one checked-out connection for the lifetime of
/// a request.
#[async_trait]
pub trait TenantSession: TenantStore {
    fn schema(&self) -> &str;

    /// Reset the connection's namespace. Called once when the request ends.
    async fn release(&self);
}

/// Hands out sessions with the namespace already applied.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn checkout(&self, schema: &str) -> Result<Box<dyn TenantSession>, StoreError>;
}
