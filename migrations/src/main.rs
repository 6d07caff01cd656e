//! Command line runner for the embedded schema migrations.
//!
//! Reads `DATABASE_URL` and accepts the usual sea-orm-migration
//! subcommands (`up`, `down`, `status`, `fresh`, ...).

use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    cli::run_cli(surplus_api::migrator::Migrator).await;
}
