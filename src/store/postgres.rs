use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::*;

use super::{DirectoryStore, NamespaceStore, SessionFactory, TenantSession, TenantStore};

const RESET_SEARCH_PATH: &str = "SET search_path TO public";

const DIRECTORY_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS public.tenants (
    id SERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    domain VARCHAR(253) NOT NULL UNIQUE,
    schema_name VARCHAR(63) NOT NULL UNIQUE,
    active BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_tenants_active_domain ON public.tenants(domain) WHERE active;
"#;

const APPOINTMENT_COLUMNS: &str = "id, user_id, specialist_id, service_id, appointment_date, \
     appointment_time, status, payment_status, total_amount::float8 AS total_amount, notes, \
     created_at, updated_at";

/// Build the shared pool. Every connection handed back to the pool gets its
/// `search_path` reset, including ones dropped while a handler unwinds.
pub async fn connect(
    url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .after_release(|conn, _meta| {
            Box::pin(async move {
                sqlx::query(RESET_SEARCH_PATH).execute(&mut *conn).await?;
                Ok(true)
            })
        })
        .connect(url)
        .await
}

/// Create `public.tenants` if this is a fresh database.
pub async fn ensure_directory(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(DIRECTORY_DDL).execute(pool).await?;
    Ok(())
}

/// Directory, namespace and session access over one [`PgPool`].
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DirectoryStore for PgBackend {
    async fn tenant_by_domain(&self, domain: &str) -> Result<Option<TenantRecord>, StoreError> {
        let record = sqlx::query_as::<_, TenantRecord>(
            "SELECT id, name, domain, schema_name, active, created_at, updated_at \
             FROM public.tenants WHERE domain = $1 AND active = true",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_active_tenants(&self) -> Result<Vec<TenantRecord>, StoreError> {
        let records = sqlx::query_as::<_, TenantRecord>(
            "SELECT id, name, domain, schema_name, active, created_at, updated_at \
             FROM public.tenants WHERE active = true ORDER BY domain",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[async_trait]
impl NamespaceStore for PgBackend {
    async fn namespace_exists(&self, schema: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_namespace(&self, schema: &str, ddl: &str) -> Result<(), StoreError> {
        // One multi-statement simple query runs as a single implicit
        // transaction: the whole template lands or none of it.
        sqlx::raw_sql(ddl).execute(&self.pool).await?;
        debug!("namespace {schema} committed");
        Ok(())
    }

    async fn drop_namespace(&self, schema: &str) -> Result<(), StoreError> {
        sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS \"{schema}\" CASCADE"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for PgBackend {
    async fn checkout(&self, schema: &str) -> Result<Box<dyn TenantSession>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        // `schema` comes from the directory and was validated as a plain
        // identifier before its namespace was created.
        sqlx::query(&format!("SET search_path TO \"{schema}\", public"))
            .execute(&mut *conn)
            .await?;
        Ok(Box::new(PgSession {
            conn: Mutex::new(conn),
            schema: schema.to_string(),
        }))
    }
}

/// One pooled connection whose `search_path` points at a tenant schema.
pub struct PgSession {
    conn: Mutex<PoolConnection<Postgres>>,
    schema: String,
}

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: i32,
    user_id: Option<i32>,
    specialist_id: i32,
    service_id: i32,
    appointment_date: NaiveDate,
    appointment_time: NaiveTime,
    status: String,
    payment_status: String,
    total_amount: f64,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            user_id: row.user_id,
            specialist_id: row.specialist_id,
            service_id: row.service_id,
            appointment_date: row.appointment_date,
            appointment_time: row.appointment_time,
            status: row.status.parse().map_err(StoreError::Backend)?,
            payment_status: row.payment_status.parse().map_err(StoreError::Backend)?,
            total_amount: row.total_amount,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl TenantStore for PgSession {
    async fn specialist(&self, id: i32) -> Result<Option<Specialist>, StoreError> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query_as::<_, (i32, String, bool)>(
            "SELECT id, name, active FROM specialists WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **conn)
        .await?;
        Ok(row.map(|(id, name, active)| Specialist { id, name, active }))
    }

    async fn service(&self, id: i32) -> Result<Option<Service>, StoreError> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query_as::<_, (i32, String, f64, bool)>(
            "SELECT id, name, price::float8, active FROM services WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **conn)
        .await?;
        Ok(row.map(|(id, name, price, active)| Service {
            id,
            name,
            price,
            active,
        }))
    }

    async fn working_hours_for(&self, specialist_id: i32) -> Result<Vec<WorkingHour>, StoreError> {
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query_as::<_, WorkingHour>(
            "SELECT id, specialist_id, day_of_week, start_time::text AS start_time, \
             end_time::text AS end_time, active \
             FROM working_hours WHERE specialist_id = $1 ORDER BY day_of_week, start_time",
        )
        .bind(specialist_id)
        .fetch_all(&mut **conn)
        .await?;
        Ok(rows)
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.lock().await;
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&mut **conn)
            .await?;
        Ok(value)
    }

    async fn upsert_setting(
        &self,
        key: &str,
        value: &str,
        description: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        sqlx::query(
            "INSERT INTO settings (key, value, description) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE \
             SET value = EXCLUDED.value, description = EXCLUDED.description, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .execute(&mut **conn)
        .await?;
        Ok(())
    }

    async fn appointments_for_specialist_on(
        &self,
        specialist_id: i32,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE specialist_id = $1 AND appointment_date = $2 ORDER BY appointment_time"
        );
        let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(specialist_id)
            .bind(date)
            .fetch_all(&mut **conn)
            .await?;
        rows.into_iter().map(Appointment::try_from).collect()
    }

    async fn exists_conflict(
        &self,
        specialist_id: i32,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<i32>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().await;
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM appointments \
             WHERE specialist_id = $1 AND appointment_date = $2 AND appointment_time = $3 \
             AND status <> 'cancelled' AND ($4::int IS NULL OR id <> $4))",
        )
        .bind(specialist_id)
        .bind(date)
        .bind(time)
        .bind(exclude_id)
        .fetch_one(&mut **conn)
        .await?;
        Ok(exists)
    }

    async fn appointment(&self, id: i32) -> Result<Option<Appointment>, StoreError> {
        let mut conn = self.conn.lock().await;
        let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1");
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **conn)
            .await?;
        row.map(Appointment::try_from).transpose()
    }

    async fn insert_appointment(&self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        let mut conn = self.conn.lock().await;
        let sql = format!(
            "INSERT INTO appointments (user_id, specialist_id, service_id, appointment_date, \
             appointment_time, status, payment_status, total_amount, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {APPOINTMENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(new.user_id)
            .bind(new.specialist_id)
            .bind(new.service_id)
            .bind(new.appointment_date)
            .bind(new.appointment_time)
            .bind(new.status.as_str())
            .bind(new.payment_status.as_str())
            .bind(new.total_amount)
            .bind(new.notes.as_deref())
            .fetch_one(&mut **conn)
            .await?;
        Appointment::try_from(row)
    }

    async fn update_appointment_slot(
        &self,
        id: i32,
        specialist_id: i32,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Appointment, StoreError> {
        let mut conn = self.conn.lock().await;
        let sql = format!(
            "UPDATE appointments SET specialist_id = $2, appointment_date = $3, \
             appointment_time = $4, updated_at = now() WHERE id = $1 RETURNING {APPOINTMENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .bind(specialist_id)
            .bind(date)
            .bind(time)
            .fetch_optional(&mut **conn)
            .await?
            .ok_or(StoreError::NotFound)?;
        Appointment::try_from(row)
    }

    async fn update_appointment_status(
        &self,
        id: i32,
        status: AppointmentStatus,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let result =
            sqlx::query("UPDATE appointments SET status = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&mut **conn)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_payment_status(
        &self,
        id: i32,
        status: PaymentStatus,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let result = sqlx::query(
            "UPDATE appointments SET payment_status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&mut **conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl TenantSession for PgSession {
    fn schema(&self) -> &str {
        &self.schema
    }

    async fn release(&self) {
        let mut conn = self.conn.lock().await;
        if let Err(e) = sqlx::query(RESET_SEARCH_PATH).execute(&mut **conn).await {
            // The pool's after_release hook retries the reset on return.
            warn!("failed to reset search_path after {}: {e}", self.schema);
        }
    }
}
