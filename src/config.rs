use uuid::Uuid;

/// Runtime configuration for a node's flow executor.
///
/// Values resolve in order: explicit constructor parameter, then
/// environment (via `dotenvy`), then default.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// SQLite database URL for durable checkpoints.
    pub database_url: Option<String>,
    /// Restart-scoped sender UUID paired with outbound deduplication ids.
    pub sender_uuid: Uuid,
    /// Checkpoint serialization schema version.
    pub schema_version: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_url: Self::resolve_database_url(None),
            sender_uuid: Uuid::new_v4(),
            schema_version: 1,
        }
    }
}

impl RuntimeConfig {
    fn resolve_database_url(provided: Option<String>) -> Option<String> {
        if let Some(url) = provided {
            return Some(url);
        }
        dotenvy::dotenv().ok();
        Some(std::env::var("SPINDLE_DB_URL").unwrap_or_else(|_| "sqlite://spindle.db?mode=rwc".to_string()))
    }

    pub fn new(database_url: Option<String>) -> Self {
        Self {
            database_url: Self::resolve_database_url(database_url),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sender_uuid(mut self, sender_uuid: Uuid) -> Self {
        self.sender_uuid = sender_uuid;
        self
    }

    #[must_use]
    pub fn with_schema_version(mut self, schema_version: u16) -> Self {
        self.schema_version = schema_version;
        self
    }
}
