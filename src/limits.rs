use std::time::Duration;

/// RFC 1035 upper bound for a fully-qualified host name.
pub const MAX_DOMAIN_LEN: usize = 253;

/// Postgres NAMEDATALEN - 1.
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

pub const DEFAULT_TENANT_REFRESH: Duration = Duration::from_secs(300);

/// Settings key read on every slot computation.
pub const APPOINTMENT_DURATION_KEY: &str = "appointment_duration";
pub const DEFAULT_APPOINTMENT_DURATION_MIN: u32 = 60;
pub const MAX_APPOINTMENT_DURATION_MIN: u32 = 480;

pub const MAX_NOTES_LEN: usize = 2_000;
