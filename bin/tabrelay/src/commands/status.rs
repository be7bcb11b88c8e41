use tabrelay_client::Controller;
use tabrelay_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let controller = Controller::new(&config.client)?;

    println!();
    println!("🛰  tabrelay relay at {}", config.client.server_url);
    println!();

    let health = match controller.preflight().await {
        Ok(h) => h,
        Err(e) => {
            println!("  ✗ not reachable: {}", e);
            println!();
            return Ok(());
        }
    };

    println!("  Status:     {}", if health.ok { "✓ ok" } else { "✗ degraded" });
    println!("  Browsers:   {} connected", health.connected_browsers);
    println!("  Pending:    {}", health.pending);
    println!("  Completed:  {}", health.completed);

    for info in &health.browsers {
        let name = info.browser_name.as_deref().unwrap_or("unknown browser");
        let version = info.version.as_deref().unwrap_or("?");
        let kind = info.kind.as_deref().unwrap_or("agent");
        print!("  • {} {} ({})", name, version, kind);
        if let Some(url) = &info.url {
            print!(" - {}", url);
        }
        if let Some(title) = &info.title {
            print!(" \"{}\"", title);
        }
        println!();
    }
    println!();
    Ok(())
}
