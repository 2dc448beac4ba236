pub use sea_orm_migration::prelude::*;

mod m20250823_000001_create_boundaries;
mod m20250826_000002_create_map_data;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250823_000001_create_boundaries::Migration),
            Box::new(m20250826_000002_create_map_data::Migration),
        ]
    }
}
