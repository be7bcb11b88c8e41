use tabrelay_client::Controller;
use tabrelay_core::{Config, Paths};

pub async fn run(config_json: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let controller = Controller::new(&config.client)?;

    let agent_config: serde_json::Value = serde_json::from_str(config_json)?;
    let request_id = controller.reinit(&agent_config).await?;
    println!("✓ reinit dispatched (request {})", request_id);
    Ok(())
}
