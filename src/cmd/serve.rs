//! Tracker HTTP server command, `lunear serve`.

use anyhow::Result;

use lunear::config::AppConfig;
use lunear::tracker::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: &AppConfig, dev: bool) -> Result<()> {
    let db_path = config.db_path()?;

    start_server(ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        db_path,
        dev_mode: dev,
        secure_cookies: config.secure_cookies(),
    })
    .await?;

    Ok(())
}
