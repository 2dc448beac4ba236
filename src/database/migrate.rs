use clap::Subcommand;
use sea_orm::{DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use super::connection::{establish_connection, get_database_url};
use super::migrations::Migrator;

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateDirection {
    Up,
    Down,
    /// Drop every table, synthesized data tables included, then migrate up
    Fresh,
}

pub async fn migrate_database(database_path: &str, direction: MigrateDirection) -> Result<(), DbErr> {
    let database_url = get_database_url(Some(database_path));
    let db = establish_connection(&database_url).await?;
    apply_migrations(&db, direction).await?;
    info!("Database migration of {} completed", database_path);
    Ok(())
}

pub async fn apply_migrations(db: &DatabaseConnection, direction: MigrateDirection) -> Result<(), DbErr> {
    match direction {
        MigrateDirection::Up => {
            info!("Running migrations up");
            Migrator::up(db, None).await
        }
        MigrateDirection::Down => {
            info!("Running migrations down");
            Migrator::down(db, None).await
        }
        MigrateDirection::Fresh => {
            // `down` alone would leave the mp_data_* tables behind with no record
            info!("Dropping all tables and running migrations up");
            Migrator::fresh(db).await
        }
    }
}
