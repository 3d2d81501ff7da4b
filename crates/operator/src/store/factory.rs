use crate::store::{DatabaseConfig, DatabaseType, PostgresStore, SqliteStore, Store};
use std::sync::Arc;

pub async fn create_store(config: &DatabaseConfig) -> crate::Result<Arc<dyn Store>> {
    match config.db_type {
        DatabaseType::Sqlite => {
            let path = config
                .sqlite_path
                .as_ref()
                .ok_or_else(|| crate::Error::Config("SQLite path not configured".into()))?;
            let url = sqlite_url(&path.to_string_lossy());
            Ok(Arc::new(
                SqliteStore::new(&url, config.max_connections).await?,
            ))
        }
        DatabaseType::Postgres => {
            let connection_string = config.postgres_url.as_ref().ok_or_else(|| {
                crate::Error::Config("PostgreSQL connection string not configured".into())
            })?;
            Ok(Arc::new(
                PostgresStore::new(connection_string, config.max_connections).await?,
            ))
        }
    }
}

// `mode=rwc` creates the database file on first boot.
fn sqlite_url(path: &str) -> String {
    if path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite://{path}?mode=rwc")
    }
}
