use crate::config::AppConfig;
use crate::entities;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool using the application configuration.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    let mut options = ConnectOptions::new(cfg.database_url.clone());
    options
        .max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(cfg.is_development());

    let db = Database::connect(options).await?;
    info!("Database connection established");
    Ok(db)
}

/// Creates any missing tables from the entity definitions. Safe to call on
/// every startup; existing tables are left untouched.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, schema.create_table_from_entity(entities::Bakery)).await?;
    create_table(db, schema.create_table_from_entity(entities::Product)).await?;
    create_table(db, schema.create_table_from_entity(entities::Customer)).await?;
    create_table(db, schema.create_table_from_entity(entities::Cart)).await?;
    create_table(db, schema.create_table_from_entity(entities::CartItem)).await?;
    create_table(db, schema.create_table_from_entity(entities::Order)).await?;
    create_table(db, schema.create_table_from_entity(entities::OrderItem)).await?;

    info!("Database schema ensured");
    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    mut statement: sea_orm::sea_query::TableCreateStatement,
) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    statement.if_not_exists();
    db.execute(backend.build(&statement)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The SQLite backend rejects decimal columns wider than precision 16,
    // so every money column must bootstrap on both backends.
    #[tokio::test]
    async fn schema_bootstraps_on_sqlite() {
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();

        ensure_schema(&db).await.unwrap();
        // Rerunning against existing tables is a no-op.
        ensure_schema(&db).await.unwrap();
    }
}
