//! Database migrations for the snapshot store schema.

pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_snapshot_schema;

/// The migrator that runs all migrations.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20260301_000001_create_snapshot_schema::Migration)]
    }

    fn migration_table_name() -> SeaRc<dyn Iden> {
        SeaRc::new(Alias::new("warden_migrations"))
    }
}
