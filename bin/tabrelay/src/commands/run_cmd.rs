use std::io::Read;
use std::time::Duration;

use anyhow::bail;

use tabrelay_client::Controller;
use tabrelay_core::{Config, Paths};

pub async fn run(
    code: Option<String>,
    file: Option<String>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let code = match (code, file) {
        (Some(c), _) => c,
        (None, Some(path)) => std::fs::read_to_string(&path)?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    if code.trim().is_empty() {
        bail!("no code to execute; pass a snippet, --file, or pipe to stdin");
    }

    let mut controller = Controller::new(&config.client)?;
    let outcome = controller
        .execute(&code, Duration::from_secs(timeout_secs))
        .await?;

    if outcome.ok {
        match outcome.result {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(no value)"),
        }
        if let Some(url) = outcome.url {
            eprintln!("  ↳ {}", url);
        }
        Ok(())
    } else {
        bail!(
            "script error: {}",
            outcome.error.unwrap_or_else(|| "(no error text)".to_string())
        )
    }
}
