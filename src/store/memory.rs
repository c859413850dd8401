use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::limits::*;
use crate::model::*;

use super::{DirectoryStore, NamespaceStore, SessionFactory, TenantSession, TenantStore};

/// In-process backend with the same contracts as the Postgres one:
/// active-only directory lookups, idempotent namespace creation and the
/// non-cancelled (specialist, date, time) uniqueness rule.
#[derive(Default)]
pub struct MemoryBackend {
    tenants: RwLock<Vec<TenantRecord>>,
    namespaces: DashMap<String, Arc<MemoryTenant>>,
    directory_failing: AtomicBool,
    namespace_failing: AtomicBool,
    directory_lookups: AtomicUsize,
    checkouts: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_tenant(&self, id: TenantId, name: &str, domain: &str, schema: &str) {
        let now = Utc::now();
        self.tenants.write().await.push(TenantRecord {
            id,
            name: name.to_string(),
            domain: domain.to_string(),
            schema_name: schema.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        });
    }

    pub async fn set_tenant_active(&self, domain: &str, active: bool) {
        let mut tenants = self.tenants.write().await;
        for t in tenants.iter_mut().filter(|t| t.domain == domain) {
            t.active = active;
            t.updated_at = Utc::now();
        }
    }

    /// Activate exactly `domains` and deactivate every other tenant in one step.
    pub async fn activate_only(&self, domains: &[&str]) {
        let mut tenants = self.tenants.write().await;
        for t in tenants.iter_mut() {
            t.active = domains.contains(&t.domain.as_str());
            t.updated_at = Utc::now();
        }
    }

    pub fn set_directory_failing(&self, failing: bool) {
        self.directory_failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next namespace creations fail after a partial write.
    pub fn set_namespace_failing(&self, failing: bool) {
        self.namespace_failing.store(failing, Ordering::SeqCst);
    }

    /// Number of single-domain directory queries served.
    pub fn directory_lookups(&self) -> usize {
        self.directory_lookups.load(Ordering::SeqCst)
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn namespace(&self, schema: &str) -> Option<Arc<MemoryTenant>> {
        self.namespaces.get(schema).map(|t| t.value().clone())
    }

    /// Create an empty namespace directly, skipping the template seeds.
    pub fn insert_namespace(&self, schema: &str) -> Arc<MemoryTenant> {
        self.namespaces
            .entry(schema.to_string())
            .or_insert_with(|| Arc::new(MemoryTenant::default()))
            .value()
            .clone()
    }

    fn check_directory(&self) -> Result<(), StoreError> {
        if self.directory_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("directory unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for MemoryBackend {
    async fn tenant_by_domain(&self, domain: &str) -> Result<Option<TenantRecord>, StoreError> {
        self.directory_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_directory()?;
        let tenants = self.tenants.read().await;
        Ok(tenants
            .iter()
            .find(|t| t.active && t.domain == domain)
            .cloned())
    }

    async fn list_active_tenants(&self) -> Result<Vec<TenantRecord>, StoreError> {
        self.check_directory()?;
        let tenants = self.tenants.read().await;
        let mut active: Vec<TenantRecord> = tenants.iter().filter(|t| t.active).cloned().collect();
        active.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(active)
    }
}

#[async_trait]
impl NamespaceStore for MemoryBackend {
    async fn namespace_exists(&self, schema: &str) -> Result<bool, StoreError> {
        Ok(self.namespaces.contains_key(schema))
    }

    async fn create_namespace(&self, schema: &str, _ddl: &str) -> Result<(), StoreError> {
        if self.namespace_failing.load(Ordering::SeqCst) {
            // Leave a half-built namespace behind, like a failed DDL batch
            // outside a transaction would.
            self.insert_namespace(schema);
            return Err(StoreError::Backend(format!(
                "relation \"{schema}.appointments\" could not be created"
            )));
        }
        if self.namespaces.contains_key(schema) {
            return Ok(());
        }
        let tenant = self.insert_namespace(schema);
        tenant.seed_defaults().await;
        Ok(())
    }

    async fn drop_namespace(&self, schema: &str) -> Result<(), StoreError> {
        self.namespaces.remove(schema);
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for MemoryBackend {
    async fn checkout(&self, schema: &str) -> Result<Box<dyn TenantSession>, StoreError> {
        let tenant = self
            .namespace(schema)
            .ok_or_else(|| StoreError::Backend(format!("schema \"{schema}\" does not exist")))?;
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            schema: schema.to_string(),
            tenant,
            releases: self.releases.clone(),
        }))
    }
}

// ── Tenant namespace ─────────────────────────────────────────────

#[derive(Default)]
struct TenantData {
    specialists: HashMap<i32, Specialist>,
    services: HashMap<i32, Service>,
    working_hours: Vec<WorkingHour>,
    settings: HashMap<String, String>,
    appointments: Vec<Appointment>,
    next_id: i32,
}

impl TenantData {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn slot_taken(
        &self,
        specialist_id: i32,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<i32>,
    ) -> bool {
        self.appointments.iter().any(|a| {
            a.occupies_slot()
                && a.specialist_id == specialist_id
                && a.appointment_date == date
                && a.appointment_time == time
                && Some(a.id) != exclude_id
        })
    }
}

/// One tenant's tables.
#[derive(Default)]
pub struct MemoryTenant {
    data: Mutex<TenantData>,
    appointment_reads_failing: AtomicBool,
    settings_reads_failing: AtomicBool,
}

impl MemoryTenant {
    /// Mirror of the template's seed rows.
    async fn seed_defaults(&self) {
        self.set_setting(APPOINTMENT_DURATION_KEY, "60").await;
        let specialist = self.add_specialist("Sample Specialist", true).await;
        for day in 1..=5 {
            self.add_working_hour(specialist, day, "09:00", "17:00", true)
                .await;
        }
        self.add_service("Individual Consultation", 200.0, true).await;
        self.add_service("Short Consultation", 100.0, true).await;
        self.add_service("Health Check", 300.0, true).await;
    }

    pub async fn add_specialist(&self, name: &str, active: bool) -> i32 {
        let mut data = self.data.lock().await;
        let id = data.next_id();
        data.specialists.insert(
            id,
            Specialist {
                id,
                name: name.to_string(),
                active,
            },
        );
        id
    }

    pub async fn add_service(&self, name: &str, price: f64, active: bool) -> i32 {
        let mut data = self.data.lock().await;
        let id = data.next_id();
        data.services.insert(
            id,
            Service {
                id,
                name: name.to_string(),
                price,
                active,
            },
        );
        id
    }

    pub async fn add_working_hour(
        &self,
        specialist_id: i32,
        day_of_week: i32,
        start_time: &str,
        end_time: &str,
        active: bool,
    ) -> i32 {
        let mut data = self.data.lock().await;
        let id = data.next_id();
        data.working_hours.push(WorkingHour {
            id,
            specialist_id,
            day_of_week,
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            active,
        });
        id
    }

    pub async fn set_setting(&self, key: &str, value: &str) {
        let mut data = self.data.lock().await;
        data.settings.insert(key.to_string(), value.to_string());
    }

    pub async fn setting_value(&self, key: &str) -> Option<String> {
        self.data.lock().await.settings.get(key).cloned()
    }

    pub async fn specialist_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.data.lock().await.specialists.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn appointment_count(&self) -> usize {
        self.data.lock().await.appointments.len()
    }

    pub fn set_appointment_reads_failing(&self, failing: bool) {
        self.appointment_reads_failing
            .store(failing, Ordering::SeqCst);
    }

    pub fn set_settings_reads_failing(&self, failing: bool) {
        self.settings_reads_failing.store(failing, Ordering::SeqCst);
    }

    async fn insert(&self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        let mut data = self.data.lock().await;
        if new.status != AppointmentStatus::Cancelled
            && data.slot_taken(
                new.specialist_id,
                new.appointment_date,
                new.appointment_time,
                None,
            )
        {
            return Err(StoreError::UniqueViolation(
                "uq_appointments_active_slot".into(),
            ));
        }
        let now = Utc::now();
        let appointment = Appointment {
            id: data.next_id(),
            user_id: new.user_id,
            specialist_id: new.specialist_id,
            service_id: new.service_id,
            appointment_date: new.appointment_date,
            appointment_time: new.appointment_time,
            status: new.status,
            payment_status: new.payment_status,
            total_amount: new.total_amount,
            notes: new.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        data.appointments.push(appointment.clone());
        Ok(appointment)
    }

    /// Insert an appointment as-is, for arranging test fixtures.
    pub async fn add_appointment(
        &self,
        specialist_id: i32,
        date: NaiveDate,
        time: NaiveTime,
        status: AppointmentStatus,
    ) -> Result<Appointment, StoreError> {
        self.insert(&NewAppointment {
            user_id: None,
            specialist_id,
            service_id: 0,
            appointment_date: date,
            appointment_time: time,
            status,
            payment_status: PaymentStatus::Pending,
            total_amount: 0.0,
            notes: None,
        })
        .await
    }
}

/// Session over a [`MemoryTenant`]; counts releases so tests can assert the
/// namespace is always handed back.
pub struct MemorySession {
    schema: String,
    tenant: Arc<MemoryTenant>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl TenantStore for MemorySession {
    async fn specialist(&self, id: i32) -> Result<Option<Specialist>, StoreError> {
        Ok(self.tenant.data.lock().await.specialists.get(&id).cloned())
    }

    async fn service(&self, id: i32) -> Result<Option<Service>, StoreError> {
        Ok(self.tenant.data.lock().await.services.get(&id).cloned())
    }

    async fn working_hours_for(&self, specialist_id: i32) -> Result<Vec<WorkingHour>, StoreError> {
        let data = self.tenant.data.lock().await;
        let mut hours: Vec<WorkingHour> = data
            .working_hours
            .iter()
            .filter(|wh| wh.specialist_id == specialist_id)
            .cloned()
            .collect();
        hours.sort_by_key(|wh| wh.day_of_week);
        Ok(hours)
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.tenant.settings_reads_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("settings relation unavailable".into()));
        }
        Ok(self.tenant.data.lock().await.settings.get(key).cloned())
    }

    async fn upsert_setting(
        &self,
        key: &str,
        value: &str,
        _description: &str,
    ) -> Result<(), StoreError> {
        self.tenant.set_setting(key, value).await;
        Ok(())
    }

    async fn appointments_for_specialist_on(
        &self,
        specialist_id: i32,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        if self.tenant.appointment_reads_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("appointments relation unavailable".into()));
        }
        let data = self.tenant.data.lock().await;
        let mut found: Vec<Appointment> = data
            .appointments
            .iter()
            .filter(|a| a.specialist_id == specialist_id && a.appointment_date == date)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.appointment_time);
        Ok(found)
    }

    async fn exists_conflict(
        &self,
        specialist_id: i32,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<i32>,
    ) -> Result<bool, StoreError> {
        let data = self.tenant.data.lock().await;
        Ok(data.slot_taken(specialist_id, date, time, exclude_id))
    }

    async fn appointment(&self, id: i32) -> Result<Option<Appointment>, StoreError> {
        let data = self.tenant.data.lock().await;
        Ok(data.appointments.iter().find(|a| a.id == id).cloned())
    }

    async fn insert_appointment(&self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        self.tenant.insert(new).await
    }

    async fn update_appointment_slot(
        &self,
        id: i32,
        specialist_id: i32,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Appointment, StoreError> {
        let mut data = self.tenant.data.lock().await;
        let occupies = data
            .appointments
            .iter()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?
            .occupies_slot();
        if occupies && data.slot_taken(specialist_id, date, time, Some(id)) {
            return Err(StoreError::UniqueViolation(
                "uq_appointments_active_slot".into(),
            ));
        }
        let appointment = data
            .appointments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?;
        appointment.specialist_id = specialist_id;
        appointment.appointment_date = date;
        appointment.appointment_time = time;
        appointment.updated_at = Utc::now();
        Ok(appointment.clone())
    }

    async fn update_appointment_status(
        &self,
        id: i32,
        status: AppointmentStatus,
    ) -> Result<(), StoreError> {
        let mut data = self.tenant.data.lock().await;
        let current = data
            .appointments
            .iter()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?
            .clone();
        // Re-activating a cancelled appointment must respect the slot rule.
        if status != AppointmentStatus::Cancelled
            && !current.occupies_slot()
            && data.slot_taken(
                current.specialist_id,
                current.appointment_date,
                current.appointment_time,
                Some(id),
            )
        {
            return Err(StoreError::UniqueViolation(
                "uq_appointments_active_slot".into(),
            ));
        }
        if let Some(a) = data.appointments.iter_mut().find(|a| a.id == id) {
            a.status = status;
            a.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_payment_status(
        &self,
        id: i32,
        status: PaymentStatus,
    ) -> Result<(), StoreError> {
        let mut data = self.tenant.data.lock().await;
        let appointment = data
            .appointments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?;
        appointment.payment_status = status;
        appointment.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TenantSession for MemorySession {
    fn schema(&self) -> &str {
        &self.schema
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
