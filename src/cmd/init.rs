//! `lunear init`: create the database file and run migrations.

use anyhow::Result;

use lunear::config::AppConfig;
use lunear::tracker::server::open_database;

pub fn cmd_init(config: &AppConfig) -> Result<()> {
    let db_path = config.db_path()?;
    open_database(&db_path)?;
    println!("Database initialized at {}", db_path.display());
    Ok(())
}
