use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{ApiError, StoreError};
use crate::limits::MAX_SCHEMA_NAME_LEN;
use crate::store::NamespaceStore;

pub const SCHEMA_PLACEHOLDER: &str = "{SCHEMA_NAME}";

const TENANT_TEMPLATE: &str = include_str!("../sql/tenant_template.sql");

#[derive(Debug)]
pub enum SchemaError {
    InvalidName(String),
    Store(StoreError),
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::InvalidName(name) => write!(f, "invalid schema name: {name:?}"),
            SchemaError::Store(e) => write!(f, "schema creation failed: {e}"),
        }
    }
}

impl std::error::Error for SchemaError {}

impl From<SchemaError> for ApiError {
    fn from(e: SchemaError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Schema names are substituted into DDL verbatim, so only lower-case
/// identifiers are accepted: `[a-z_][a-z0-9_]*`, at most 63 bytes.
pub fn validate_schema_name(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_head || !valid_tail || name.len() > MAX_SCHEMA_NAME_LEN {
        return Err(SchemaError::InvalidName(name.to_string()));
    }
    if name.starts_with("pg_") || name == "public" || name == "information_schema" {
        return Err(SchemaError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Substitute `schema` into the tenant template.
pub fn render(schema: &str) -> Result<String, SchemaError> {
    validate_schema_name(schema)?;
    Ok(TENANT_TEMPLATE.replace(SCHEMA_PLACEHOLDER, schema))
}

/// Creates tenant namespaces from the fixed template.
///
/// Two requests instantiating the same new namespace at once race; the
/// conditional DDL makes the loser either no-op or fail and roll back.
pub struct SchemaInstantiator {
    namespaces: Arc<dyn NamespaceStore>,
}

impl SchemaInstantiator {
    pub fn new(namespaces: Arc<dyn NamespaceStore>) -> Self {
        Self { namespaces }
    }

    /// Create (or complete) the namespace. On failure the namespace is
    /// dropped best-effort and the original error returned.
    pub async fn create_schema(&self, schema: &str) -> Result<(), SchemaError> {
        let ddl = render(schema)?;
        match self.namespaces.create_namespace(schema, &ddl).await {
            Ok(()) => {
                info!("created tenant schema {schema}");
                metrics::counter!(crate::observability::SCHEMAS_CREATED_TOTAL).increment(1);
                Ok(())
            }
            Err(e) => {
                error!("creating tenant schema {schema} failed: {e}");
                if let Err(drop_err) = self.namespaces.drop_namespace(schema).await {
                    warn!("cleanup of schema {schema} failed, namespace may be orphaned: {drop_err}");
                }
                Err(SchemaError::Store(e))
            }
        }
    }

    /// Create the namespace only if it is missing. Returns true if created.
    pub async fn ensure_schema(&self, schema: &str) -> Result<bool, SchemaError> {
        validate_schema_name(schema)?;
        if self
            .namespaces
            .namespace_exists(schema)
            .await
            .map_err(SchemaError::Store)?
        {
            return Ok(false);
        }
        self.create_schema(schema).await?;
        Ok(true)
    }
}
