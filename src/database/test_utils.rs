use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;

use super::connection::establish_connection;
use super::migrations::Migrator;

/// Create an in-memory SQLite database with all migrations applied
pub async fn setup_test_db() -> DatabaseConnection {
    let db = establish_connection("sqlite::memory:")
        .await
        .expect("Failed to connect to test database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}
