use std::sync::Arc;

use tracing::info;

use tabrelay_core::{Config, ConfigTemplates, Paths};
use tabrelay_server::RelayServer;

pub async fn run(cli_host: Option<String>, cli_port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    // CLI args override config values
    let host = cli_host.unwrap_or_else(|| config.server.host.clone());
    let port = cli_port.unwrap_or(config.server.port);

    info!(host = %host, port = port, "Starting tabrelay relay");

    let templates = Arc::new(ConfigTemplates::from_config(&config));
    let server = Arc::new(RelayServer::new(&config.server, templates));

    println!();
    println!("🛰  tabrelay relay on http://{}:{}", host, port);
    println!("   Tab channel:  ws://{}:{}/ws", host, port);
    println!("   Submit:       POST /run {{\"code\": ...}}");
    println!("   Poll:         GET  /result?request_id=...");
    println!();

    server.serve(&host, port).await?;
    info!("Relay stopped");
    Ok(())
}
