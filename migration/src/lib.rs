//! Database migrations for the Integration Hub.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_100000_create_connectors;
mod m2025_06_01_100100_create_connector_credentials;
mod m2025_06_01_100200_create_field_mappings;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_100000_create_connectors::Migration),
            Box::new(m2025_06_01_100100_create_connector_credentials::Migration),
            Box::new(m2025_06_01_100200_create_field_mappings::Migration),
        ]
    }
}
