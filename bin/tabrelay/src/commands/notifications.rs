use tabrelay_client::Controller;
use tabrelay_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let controller = Controller::new(&config.client)?;

    let notifications = controller.notifications().await?;
    if notifications.is_empty() {
        println!("No queued notifications.");
        return Ok(());
    }

    println!();
    println!("🔔 {} notification(s)", notifications.len());
    for n in &notifications {
        let icon = if n.success { "✓" } else { "✗" };
        println!("  {} {}", icon, n.message);
    }
    println!();
    Ok(())
}
